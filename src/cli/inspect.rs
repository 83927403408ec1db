//! CLI `inspect` command: full details for a single point or topic.

use anyhow::{bail, Result};

use orison::config::OrisonConfig;
use orison::graph::store;
use orison::graph::types::EntityType;

const LOG_LIMIT: usize = 50;

pub fn inspect(config: &OrisonConfig, entity_type: EntityType, id: &str) -> Result<()> {
    let conn = orison::db::open_database(config.resolved_db_path())?;

    match entity_type {
        EntityType::Point => {
            let Some(p) = store::get_point(&conn, id)? else {
                bail!("point not found: {id}");
            };
            println!("Point: {}", p.id);
            println!("{}", "=".repeat(50));
            println!("  Title:          {}", p.title);
            println!("  Category:       {}", p.category.as_deref().unwrap_or("-"));
            println!("  Author:         {} ({})", p.author_name, p.author_id);
            if !p.recipients.is_empty() {
                println!("  Recipients:     {}", p.recipients.join(", "));
            }
            println!("  Created:        {}", p.created_at);
            println!("  Updated:        {}", p.updated_at);
            println!("  Embedding:      {}", dims(p.embedding.as_deref()));
            if let Some(ref prayer) = p.prayer_id {
                println!("  Prayer:         {prayer}");
            }
            println!();
            println!("Content:");
            println!("  {}", p.content);
            if !p.linked_topics.is_empty() {
                println!();
                println!("Linked topics:");
                for topic_id in &p.linked_topics {
                    let title = store::get_topic(&conn, topic_id)?
                        .map(|t| t.title)
                        .unwrap_or_else(|| "(missing)".into());
                    println!("  --> {topic_id} ({title})");
                }
            }
        }
        EntityType::Topic => {
            let Some(t) = store::get_topic(&conn, id)? else {
                bail!("topic not found: {id}");
            };
            println!("Topic: {}", t.id);
            println!("{}", "=".repeat(50));
            println!("  Title:          {}", t.title);
            println!("  Author:         {} ({})", t.author_name, t.author_id);
            println!("  Created:        {}", t.created_at);
            println!("  Updated:        {}", t.updated_at);
            println!("  Embedding:      {}", dims(t.embedding.as_deref()));
            println!("  Aggregate:      {}", dims(t.aggregated_embedding.as_deref()));
            println!("  Aggregated at:  {}", t.aggregated_at.as_deref().unwrap_or("never"));
            if t.aggregate_dirty {
                println!("  Dirty:          yes (run `orison reconcile`)");
            }
            println!("  Categories:     {}", t.categories.join(", "));
            if !t.content.is_empty() {
                println!();
                println!("Content:");
                println!("  {}", t.content);
            }
            if !t.journey.is_empty() {
                println!();
                println!("Journey:");
                for entry in &t.journey {
                    println!(
                        "  {} [{}] {} ({})",
                        entry.created_at,
                        entry.category.as_deref().unwrap_or("-"),
                        entry.title,
                        entry.id,
                    );
                }
            }
        }
    }

    let log = store::entity_log(&conn, id, LOG_LIMIT)?;
    if !log.is_empty() {
        println!();
        println!("Audit Log:");
        for entry in log {
            let details = entry.details.map(|d| d.to_string()).unwrap_or_default();
            println!("  {} [{}] {}", entry.created_at, entry.operation, details);
        }
    }

    Ok(())
}

fn dims(embedding: Option<&[f32]>) -> String {
    match embedding {
        Some(e) => format!("{} dims", e.len()),
        None => "none".into(),
    }
}
