use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::app::{App, Command};
use crate::config::Config;
use crate::db::SqliteStore;
use crate::editor::StoreEditorBackend;
use crate::identity::LocalIdentityProvider;
use crate::types::{ListPane, NoteKey, TextEdit, UiState, User, UserId, SIGN_IN_LABEL};

pub const USAGE: &str = "\
commands:
  signin | signout          toggle the session
  new                       create and open a note
  open <key|number>         open a note (number as shown in the list)
  type <offset> <text>      insert text at a character offset (\\n for newline)
  delete <offset> <len>     delete characters
  search <text...>          type into the search box (empty clears it)
  dismiss                   close the notice
  show | help | quit";

/// One parsed terminal line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    App(Command),
    Show,
    Help,
    Quit,
}

// ─── Parsing ───────────────────────────────────────────────────────────────────

/// Parse a line against the current UI, which resolves list numbers and
/// whether sign-in/sign-out make sense right now.
pub fn parse(line: &str, ui: &UiState) -> Result<Input, String> {
    let line = line.trim_start();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    match word {
        "signin" if ui.sign_in_button.label == SIGN_IN_LABEL => Ok(Input::App(Command::ToggleSignIn)),
        "signin" => Err("already signed in".to_string()),
        "signout" if ui.sign_in_button.label != SIGN_IN_LABEL => Ok(Input::App(Command::ToggleSignIn)),
        "signout" => Err("not signed in".to_string()),
        "new" => Ok(Input::App(Command::NewNote)),
        "open" => open_target(rest.trim(), ui).map(|key| Input::App(Command::OpenNote(key))),
        "type" => {
            let (offset, text) = rest.split_once(' ').ok_or("usage: type <offset> <text>")?;
            let offset = number(offset, "offset")?;
            Ok(Input::App(Command::Edit(TextEdit::insert(offset, text.replace("\\n", "\n")))))
        }
        "delete" => {
            let mut args = rest.split_whitespace();
            let (Some(offset), Some(len), None) = (args.next(), args.next(), args.next()) else {
                return Err("usage: delete <offset> <len>".to_string());
            };
            Ok(Input::App(Command::Edit(TextEdit::delete(number(offset, "offset")?, number(len, "length")?))))
        }
        "search" => Ok(Input::App(Command::SearchInput(rest.to_string()))),
        "dismiss" => Ok(Input::App(Command::DismissNotice)),
        "show" | "" => Ok(Input::Show),
        "help" => Ok(Input::Help),
        "quit" | "exit" => Ok(Input::Quit),
        other => Err(format!("unknown command: {other}\n{USAGE}")),
    }
}

fn number(arg: &str, what: &str) -> Result<usize, String> {
    arg.trim().parse().map_err(|_| format!("invalid {what}: {arg:?}"))
}

/// A 1-based number picks from the visible pane; anything else is a key.
fn open_target(arg: &str, ui: &UiState) -> Result<NoteKey, String> {
    if arg.is_empty() {
        return Err("usage: open <key|number>".to_string());
    }
    let pane = visible_pane(ui);
    match arg.parse::<usize>() {
        Ok(n) => n
            .checked_sub(1)
            .and_then(|i| pane.items.get(i))
            .map(|item| item.key.clone())
            .ok_or_else(|| format!("no note number {n}")),
        Err(_) => Ok(NoteKey::new(arg)),
    }
}

fn visible_pane(ui: &UiState) -> &ListPane {
    if ui.search_results.visible {
        &ui.search_results
    } else {
        &ui.notes_list
    }
}

// ─── Rendering ─────────────────────────────────────────────────────────────────

pub fn render_ui(ui: &UiState) -> String {
    let mut out = String::new();
    let button = |label: &str, disabled: bool| {
        if disabled {
            format!("({label})")
        } else {
            format!("[{label}]")
        }
    };
    let _ = writeln!(
        out,
        "{}  {}  {}",
        ui.sign_in_status,
        button(&ui.sign_in_button.label, ui.sign_in_button.disabled),
        button("New note", ui.new_note_button.disabled),
    );
    if !ui.data_status.is_empty() {
        let _ = writeln!(out, "status: {}", ui.data_status);
    }
    match &ui.editor.note {
        Some(key) => {
            let _ = writeln!(out, "editing: {key}");
        }
        None => {
            let _ = writeln!(out, "editing: -");
        }
    }
    let (title, pane) = if ui.search_results.visible {
        (format!("results for {:?}", ui.search_input.trim()), &ui.search_results)
    } else {
        ("notes".to_string(), &ui.notes_list)
    };
    let _ = writeln!(out, "{title}:");
    if pane.items.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for (i, item) in pane.items.iter().enumerate() {
        let marker = if item.selected { '>' } else { ' ' };
        let _ = writeln!(out, "{marker} {:>2}. {}  [{}]", i + 1, item.label, item.key);
    }
    if let Some(notice) = &ui.notice {
        let _ = writeln!(out, "!! {notice}");
    }
    out
}

// ─── Terminal loop ─────────────────────────────────────────────────────────────

/// Wire the store, identity provider and editors together and drive the app
/// from stdin until `quit` or end of input.
pub async fn repl(config: Config) -> Result<()> {
    let store = if config.in_memory() {
        SqliteStore::open_in_memory()?
    } else {
        SqliteStore::open(&config.db_path)
            .with_context(|| format!("Failed to open store at {}", config.db_path.display()))?
    };
    let store = Arc::new(store);
    let account = User {
        uid: UserId::new(config.user_id.clone()),
        display_name: config.display_name.clone(),
        email: None,
    };
    let identity = Arc::new(LocalIdentityProvider::new(account));
    let editors = Arc::new(StoreEditorBackend::new(store.clone()));
    // Long enough for every debounced refresh a command can trigger.
    let settle = config.list_refresh_debounce.max(config.search_debounce) + Duration::from_millis(100);
    tracing::info!(db = %config.db_path.display(), user = %config.user_id, "starting");

    let app = App::new(config, store, identity, editors);
    let handle = app.handle();
    let ui = app.subscribe_ui();
    let app_loop = tokio::spawn(app.run());

    println!("{USAGE}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let snapshot = ui.borrow().clone();
        match parse(&line, &snapshot) {
            Ok(Input::Quit) => break,
            Ok(Input::Help) => {
                println!("{USAGE}");
                continue;
            }
            Ok(Input::Show) => {}
            Ok(Input::App(command)) => {
                if !handle.send(command) {
                    break;
                }
                tokio::time::sleep(settle).await;
            }
            Err(message) => {
                println!("{message}");
                continue;
            }
        }
        print!("{}", render_ui(&ui.borrow()));
    }

    handle.send(Command::Shutdown);
    app_loop.await??;
    Ok(())
}
