use clap::Parser;
use coderadar::cli::{run_index, run_index_clear, run_index_status, run_search, run_watch, Args, Command};
use coderadar::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Index { path, force, prune, verbose, config } => {
            let config = load_config(&path, config.as_deref())?;
            run_index(&path, &config, force, prune, verbose).await
        }
        Command::IndexStatus { path } => {
            let config = load_config(&path, None)?;
            run_index_status(&path, &config).await
        }
        Command::IndexClear { path } => {
            let config = load_config(&path, None)?;
            run_index_clear(&path, &config).await
        }
        Command::Search { query, path, limit, hybrid, json, config } => {
            let config = load_config(&path, config.as_deref())?;
            run_search(&path, &config, &query, limit, hybrid, json).await
        }
        Command::Watch { path, config, pid_file } => {
            let config = load_config(&path, config.as_deref())?;
            let pid_path = pid_file.unwrap_or_else(|| path.join(".coderadar").join("watch.pid"));
            run_watch(&path, &config, &pid_path).await
        }
    }
}

fn load_config(root: &std::path::Path, explicit: Option<&std::path::Path>) -> anyhow::Result<Config> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => root.join("coderadar.toml"),
    };
    Config::load(&path)
}
