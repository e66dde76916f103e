use anyhow::Result;
use console::{style, Emoji};
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::search::{create_embedder, Embedder, LocalStore, Searcher, VectorStore};

static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "");
static FILE: Emoji<'_, '_> = Emoji("📄 ", "");

pub async fn run_search(path: &Path, config: &Config, query: &str, limit: usize, hybrid: bool, json: bool) -> Result<()> {
    let store_path = path.join(&config.store.path);
    if !store_path.exists() {
        anyhow::bail!("No search index found. Run `coderadar index` first to build the index.");
    }

    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedder));
    let store: Arc<dyn VectorStore> = Arc::new(LocalStore::new(store_path));

    let mut hybrid_config = config.search.hybrid.clone();
    if hybrid {
        hybrid_config.enabled = true;
    }
    let searcher = Searcher::new(store, embedder, config.search.boost.clone(), hybrid_config);

    let results = searcher.smart_search(query, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results found for: {}", style(query).italic());
        return Ok(());
    }

    println!(
        "\n{}Found {} results for: {}\n",
        SEARCH,
        style(results.len()).cyan(),
        style(query).yellow().bold()
    );

    for (i, result) in results.iter().enumerate() {
        let chunk = &result.chunk;
        println!(
            "{} {}. {} {}",
            FILE,
            style(i + 1).dim(),
            style(&chunk.file_path).green(),
            style(format!("(L{}-{})", chunk.start_line, chunk.end_line)).dim()
        );
        println!("   Score: {}", style(format!("{:.3}", result.score)).cyan());

        let preview_lines: Vec<&str> = chunk.content.lines().skip(2).take(5).collect();
        let preview = preview_lines.join("\n");
        if !preview.is_empty() {
            let truncated = if preview.len() > 200 {
                format!("{}...", &preview[..200])
            } else {
                preview
            };
            println!("   {}", style(truncated).dim());
        }
        println!();
    }

    Ok(())
}
