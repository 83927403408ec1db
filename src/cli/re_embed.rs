//! CLI `re-embed` command: backfill embeddings with the configured provider.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use orison::config::OrisonConfig;
use orison::db;
use orison::embedding;
use orison::graph::editor::{self, EntityPatch};
use orison::graph::types::{EntityType, FieldUpdate};

struct Pending {
    entity_type: EntityType,
    id: String,
    text: String,
}

/// Embed every point and topic that has no vector yet, or all of them with
/// `all`. Topics whose inputs change are re-aggregated as each edit lands.
pub async fn re_embed(config: &OrisonConfig, all: bool) -> Result<()> {
    let mut conn = db::open_database(config.resolved_db_path()).context("failed to open database")?;
    let provider = embedding::create_provider(&config.embedding)
        .context("failed to create embedding provider")?;

    let filter = if all { "" } else { " WHERE embedding IS NULL" };
    let mut work = Vec::new();
    for (entity_type, table) in [
        (EntityType::Point, "prayer_points"),
        (EntityType::Topic, "prayer_topics"),
    ] {
        let mut stmt = conn.prepare(&format!(
            "SELECT id, title, content, embedding_text FROM {table}{filter} ORDER BY created_at"
        ))?;
        let rows = stmt
            .query_map([], |row| {
                let (title, content): (String, String) = (row.get(1)?, row.get(2)?);
                let stored: Option<String> = row.get(3)?;
                let text = stored
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| embedding::embedding_text(&title, &content));
                Ok(Pending {
                    entity_type,
                    id: row.get(0)?,
                    text,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        work.extend(rows.into_iter().filter(|p| !p.text.trim().is_empty()));
    }

    let total = work.len();
    if total == 0 {
        println!("Nothing to embed.");
        return Ok(());
    }

    println!("Embedding {total} entities with '{}'...", config.embedding.model);

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {pos}/{len} ({eta})")
            .context("invalid progress template")?
            .progress_chars("##-"),
    );

    let limit = config.aggregation.recent_point_limit;
    let mut failed = 0usize;
    for item in work {
        let outcome = match provider.embed(&item.text).await {
            Ok(vector) => {
                let patch = EntityPatch {
                    embedding: FieldUpdate::Set(vector),
                    embedding_text: FieldUpdate::Set(item.text),
                    ..Default::default()
                };
                editor::update_entity(&mut conn, item.entity_type, &item.id, patch, limit)
                    .map(|_| ())
            }
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            failed += 1;
            tracing::warn!(entity_type = %item.entity_type, id = %item.id, error = %e, "re-embed failed");
        }
        pb.inc(1);
    }

    pb.finish_and_clear();

    println!("Embedded {} of {total} entities.", total - failed);
    if failed > 0 {
        println!("{failed} failed; rerun `orison re-embed` to retry them.");
    }
    Ok(())
}
