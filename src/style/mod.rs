//! Style Dataset Collector & Analyzer
//!
//! collect posts -> compute statistics -> write artifacts -> register an
//! inactive `StyleGuideVersion`. Activation is always a separate, explicit
//! store operation.

mod analyzer;
mod collector;

pub use analyzer::{analyze_posts, render_markdown, version_id_for, StyleAnalyzer, StyleGuide, StyleStats};
pub use collector::{CollectorOptions, StyleCollector, StyleDataset, StyleTarget};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use crate::models::StyleGuideVersion;
use crate::store::Store;

/// Activate a version from async code. The store call blocks on SQLite
/// locks and retry backoff, so it runs on the blocking pool.
pub async fn activate_version(store: Arc<Store>, version_id: &str, now: DateTime<Utc>) -> Result<StyleGuideVersion> {
    let id = version_id.to_string();
    let version = tokio::task::spawn_blocking(move || store.activate_style_version(&id, now))
        .await
        .context("style activation task failed")??;
    Ok(version)
}

/// Outcome of one pipeline run
#[derive(Debug)]
pub enum StyleRun {
    Created(StyleGuideVersion),
    NotEnoughPosts { found: usize, required: usize },
}

pub struct StylePipeline {
    collector: StyleCollector,
    analyzer: StyleAnalyzer,
    store: Arc<Store>,
}

impl StylePipeline {
    pub fn new(collector: StyleCollector, analyzer: StyleAnalyzer, store: Arc<Store>) -> Self {
        Self {
            collector,
            analyzer,
            store,
        }
    }

    pub async fn run(&self, target: &StyleTarget, options: &CollectorOptions, min_tweets: usize) -> Result<StyleRun> {
        let dataset = self.collector.collect(target, options).await?;
        if dataset.posts.len() < min_tweets {
            info!(
                "Only {} posts from @{} (need {}), no style guide generated",
                dataset.posts.len(),
                dataset.handle,
                min_tweets
            );
            return Ok(StyleRun::NotEnoughPosts {
                found: dataset.posts.len(),
                required: min_tweets,
            });
        }

        let version = self.analyzer.analyze(&dataset).await?;
        self.store.insert_style_version(&version)?;
        info!(
            "Registered style guide {} ({} posts, inactive)",
            version.version_id, version.tweet_count
        );
        Ok(StyleRun::Created(version))
    }
}
