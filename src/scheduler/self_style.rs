//! Self-Style-Worker loop
//!
//! Regenerates our own style guide from recent posts. New versions are
//! registered inactive; activation stays a manual step.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::provider_failure;
use super::runner::Job;
use crate::context::AppContext;
use crate::social::ProviderError;
use crate::style::{CollectorOptions, StyleAnalyzer, StyleCollector, StylePipeline, StyleRun, StyleTarget};

pub struct SelfStyleJob {
    ctx: Arc<AppContext>,
}

impl SelfStyleJob {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// `Ok(None)` when disabled or the provider was unavailable
    pub async fn generate(&self) -> Result<Option<StyleRun>> {
        let config = &self.ctx.config.self_style;
        if !config.enabled {
            debug!("Self-style analysis disabled");
            return Ok(None);
        }

        let pipeline = StylePipeline::new(
            StyleCollector::new(self.ctx.provider(), self.ctx.clock.clone()),
            StyleAnalyzer::new(&self.ctx.config.style_output_dir, self.ctx.clock.clone()).with_llm(self.ctx.llm.clone()),
            self.ctx.store.clone(),
        );
        let options = CollectorOptions {
            days: config.days,
            max_tweets: config.max_tweets,
            include_replies: config.include_replies,
        };

        match pipeline.run(&StyleTarget::OwnAccount, &options, config.min_tweets).await {
            Ok(run) => Ok(Some(run)),
            Err(e) => match e.downcast::<ProviderError>() {
                Ok(provider_error) => {
                    provider_failure(self.name(), provider_error)?;
                    Ok(None)
                }
                Err(e) => Err(e),
            },
        }
    }
}

#[async_trait]
impl Job for SelfStyleJob {
    fn name(&self) -> &str {
        "self_style"
    }

    async fn run_once(&self) -> Result<()> {
        self.generate().await.map(|_| ())
    }
}
