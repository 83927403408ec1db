use anyhow::{Context, Result};

use orison::config::OrisonConfig;
use orison::embedding;
use orison::graph::search::{self, FindSimilarRequest, SearchLimits};
use orison::graph::types::EntityType;

/// Rank the owner's points (or topics) by similarity to free text.
pub async fn search(
    config: &OrisonConfig,
    query: &str,
    owner: Option<&str>,
    target: EntityType,
    top_k: Option<usize>,
) -> Result<()> {
    let owner_id = config
        .resolve_owner(owner)
        .context("no owner given; pass --owner or set storage.default_owner")?;

    let conn = orison::db::open_database(config.resolved_db_path())?;
    let provider = embedding::create_provider(&config.embedding)?;
    let query_embedding = provider
        .embed(query)
        .await
        .context("failed to embed query")?;

    let request = FindSimilarRequest {
        query_embedding,
        top_k: top_k.unwrap_or(config.search.default_top_k),
        exclude_id: None,
        owner_id,
        target,
    };
    let results = search::find_similar(&conn, &request, SearchLimits::from(&config.search))?;

    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} related {}(s)\n", results.len(), target);
    for (i, item) in results.iter().enumerate() {
        println!(
            "  {}. [{}] {} (similarity: {:.4})",
            i + 1,
            item.category.as_deref().unwrap_or("-"),
            item.id,
            item.similarity,
        );
        println!("     {}", preview(&item.title, 120));
        println!();
    }

    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_cuts_on_char_boundaries() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("ééééé", 3), "ééé...");
    }
}
