use std::path::PathBuf;
use std::time::Duration;

/// Number of leading characters used to derive a note's display name.
pub const NOTE_NAME_LENGTH: usize = 22;

/// Runtime settings. `Default` gives the stock behaviour; `from_env` layers
/// environment overrides on top.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite file backing the realtime store. `:memory:` keeps everything in RAM.
    pub db_path: PathBuf,
    /// Account used by the local identity provider.
    pub user_id: String,
    pub display_name: String,
    pub name_length: usize,
    /// Quiet period before the notes list is re-rendered after an edit.
    pub list_refresh_debounce: Duration,
    /// Quiet period before a search query runs.
    pub search_debounce: Duration,
    /// Shortest trimmed query (in characters) that switches to the results view.
    pub min_query_len: usize,
    /// Placeholder shown in an empty editor.
    pub default_text: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            user_id: "local".to_string(),
            display_name: "Local user".to_string(),
            name_length: NOTE_NAME_LENGTH,
            list_refresh_debounce: Duration::from_millis(500),
            search_debounce: Duration::from_millis(500),
            min_query_len: 2,
            default_text: "Start noting things down...".to_string(),
        }
    }
}

impl Config {
    /// Read `NOTE_IT_DOWN_DB`, `NOTE_IT_DOWN_USER` and `NOTE_IT_DOWN_NAME`,
    /// falling back to `$USER` for the account.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("NOTE_IT_DOWN_DB") {
            if !path.trim().is_empty() {
                config.db_path = PathBuf::from(path);
            }
        }
        let user = std::env::var("NOTE_IT_DOWN_USER")
            .or_else(|_| std::env::var("USER"))
            .ok()
            .filter(|u| !u.trim().is_empty());
        if let Some(user) = user {
            config.display_name = user.clone();
            config.user_id = user;
        }
        if let Ok(name) = std::env::var("NOTE_IT_DOWN_NAME") {
            if !name.trim().is_empty() {
                config.display_name = name;
            }
        }
        config
    }

    pub fn in_memory(&self) -> bool {
        self.db_path.as_os_str() == ":memory:"
    }
}

fn default_db_path() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home)
            .join(".local/share/note-it-down")
            .join("notes.sqlite"),
        Err(_) => PathBuf::from("notes.sqlite"),
    }
}
