use anyhow::Result;
use console::Emoji;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

static WATCH: Emoji<'_, '_> = Emoji("👀 ", "");

pub async fn run_watch(path: &Path, config: &Config, pid_path: &Path) -> Result<()> {
    println!("{}Watching {} for changes (pid file: {})...", WATCH, path.display(), pid_path.display());

    let cancel = CancellationToken::new();
    crate::daemon::run(path, config, pid_path, cancel).await
}
