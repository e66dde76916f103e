use anyhow::Result;
use console::{style, Emoji};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::ignore_matcher::IgnoreMatcher;
use crate::search::batch::BatchProgressEvent;
use crate::search::{create_embedder, Embedder, Indexer, LocalStore, VectorStore};

static INDEXING: Emoji<'_, '_> = Emoji("📊 ", "");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "");
static ERROR: Emoji<'_, '_> = Emoji("❌ ", "");
static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "");

pub async fn run_index(path: &Path, config: &Config, force: bool, prune: bool, verbose: bool) -> Result<()> {
    let ignore = IgnoreMatcher::build(
        path,
        config.ignore.external_gitignore.as_deref().map(Path::new),
        &config.ignore.extra_dirs,
    );
    let store_path = path.join(&config.store.path);
    let store: Arc<dyn VectorStore> = Arc::new(LocalStore::new(store_path));

    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedder));
    if verbose {
        println!("{}Checking embedder connectivity at {}...", INFO, config.embedder.endpoint);
    }
    embedder.health_check().await?;

    let indexer = Indexer::new(
        store.clone(),
        embedder,
        config.embedder.provider.as_str(),
        &config.embedder.model,
        &config.chunking,
        config.embedder.parallelism.unwrap_or(4),
        config.embedder.tokens_per_minute,
    );

    store.load().await?;
    let last_index_time = if force {
        for doc_path in store.list_documents().await? {
            store.delete_by_file(&doc_path).await?;
            store.delete_document(&doc_path).await?;
        }
        // index_all reloads from disk as its first step, so the clear must be durable.
        store.persist().await?;
        None
    } else {
        store.get_stats().await?.last_updated
    };

    println!("{}Indexing {}...", INDEXING, path.display());

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}").unwrap());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    let bar = pb.clone();
    let progress: Arc<dyn Fn(BatchProgressEvent) + Send + Sync> = Arc::new(move |event| {
        if event.retrying {
            bar.set_message(format!(
                "batch {}/{}: retrying (attempt {}, status {})",
                event.batch_index + 1,
                event.total_batches,
                event.attempt,
                event.status
            ));
        } else {
            bar.set_message(format!("{}/{} chunks embedded", event.completed_chunks, event.total_chunks));
        }
    });

    let result = indexer
        .index_all(path, &ignore, CancellationToken::new(), Some(progress), last_index_time)
        .await;
    pb.finish_and_clear();
    let result = result?;

    println!("\n{}Indexing complete!\n", SUCCESS);
    println!("  Files indexed:   {}", style(result.files_indexed).green());
    println!("  Chunks created:  {}", style(result.chunks_created).cyan());
    println!("  Files skipped:   {} (unchanged)", style(result.files_skipped).dim());
    if prune {
        println!("  Files removed:   {} (no longer on disk)", style(result.files_removed).yellow());
    }

    if !result.errors.is_empty() {
        println!("\n{}Skipped files ({}):", ERROR, result.errors.len());
        for error in result.errors.iter().take(10) {
            println!("  - {}", style(error).red());
        }
        if result.errors.len() > 10 {
            println!("  ... and {} more", result.errors.len() - 10);
        }
    }

    let stats = store.get_stats().await?;
    println!("\n{}Index statistics:", INFO);
    println!("  Total files:     {}", stats.total_files);
    println!("  Total chunks:    {}", stats.total_chunks);
    println!("  Index size:      {} KB", stats.index_size_bytes / 1024);
    if let Some(updated) = stats.last_updated {
        println!("  Last updated:    {}", updated.format("%Y-%m-%d %H:%M:%S"));
    }
    if let (Some(provider), Some(model)) = (&stats.embedder_provider, &stats.embedder_model) {
        println!("  Embedder:        {provider} ({model})");
    }

    Ok(())
}

pub async fn run_index_status(path: &Path, config: &Config) -> Result<()> {
    let store_path = path.join(&config.store.path);
    if !store_path.exists() {
        println!("{}No index found at {}", INFO, store_path.display());
        println!("Run `coderadar index` to build the search index.");
        return Ok(());
    }

    let store = LocalStore::new(store_path.clone());
    store.load().await?;

    let stats = store.get_stats().await?;
    println!("\n{}Index status: {}\n", INFO, store_path.display());
    println!("  Total files:     {}", style(stats.total_files).green());
    println!("  Total chunks:    {}", style(stats.total_chunks).cyan());
    println!("  Index size:      {} KB", style(stats.index_size_bytes / 1024).yellow());
    if let Some(updated) = stats.last_updated {
        println!("  Last updated:    {}", style(updated.format("%Y-%m-%d %H:%M:%S")).dim());
    }
    if let (Some(provider), Some(model)) = (&stats.embedder_provider, &stats.embedder_model) {
        println!("  Embedder:        {} ({})", style(provider).dim(), style(model).dim());
    }

    let mut files = store.list_files_with_stats().await?;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    println!("\n  Files:");
    for file in files.iter().take(20) {
        println!("    {} ({} chunks)", file.path, file.chunk_count);
    }
    if files.len() > 20 {
        println!("    ... and {} more", files.len() - 20);
    }

    Ok(())
}

pub async fn run_index_clear(path: &Path, config: &Config) -> Result<()> {
    let store_path = path.join(&config.store.path);
    if !store_path.exists() {
        println!("{}No index found.", INFO);
        return Ok(());
    }

    std::fs::remove_file(&store_path)?;
    println!("{}Index cleared successfully.", SUCCESS);
    Ok(())
}
