pub mod app;
pub mod commands;
pub mod config;
pub mod db;
pub mod debounce;
pub mod editor;
pub mod identity;
pub mod index;
pub mod lifecycle;
pub mod notes_list;
pub mod search;
pub mod session;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

use crate::config::Config;

pub fn run() -> anyhow::Result<()> {
    // Only log WARN and above in release builds to avoid leaking note content.
    // Logs go to stderr so they never interleave with the rendered UI.
    #[cfg(debug_assertions)]
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    #[cfg(not(debug_assertions))]
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::WARN)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(commands::repl(Config::from_env()))
}
