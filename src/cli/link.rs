//! CLI `link` and `unlink` commands.

use anyhow::Result;

use orison::config::OrisonConfig;
use orison::graph::link::LinkTarget;

/// Link a point to an existing topic.
pub async fn link(config: &OrisonConfig, point_id: &str, topic_id: &str) -> Result<()> {
    let client = super::open_client(config)?;
    let target = LinkTarget::Topic {
        id: topic_id.to_string(),
    };
    let outcome = client.link(point_id, target).await?;
    super::print_outcome("link", &outcome)
}

/// Link two points under a freshly created shared topic.
pub async fn link_points(
    config: &OrisonConfig,
    point_id: &str,
    other_point_id: &str,
    title: Option<String>,
) -> Result<()> {
    let client = super::open_client(config)?;
    let target = LinkTarget::Point {
        id: other_point_id.to_string(),
        new_topic_title: title,
        new_topic_id: None,
    };
    let outcome = client.link(point_id, target).await?;
    super::print_outcome("link", &outcome)
}

pub async fn unlink(config: &OrisonConfig, point_id: &str, topic_id: &str) -> Result<()> {
    let client = super::open_client(config)?;
    let outcome = client.unlink(point_id, topic_id).await?;
    super::print_outcome("unlink", &outcome)
}
