//! Application context
//!
//! Built once at startup and shared as `Arc<AppContext>` by every loop. The
//! social provider sits behind a lock so it can be rebuilt from configuration
//! without restarting the loops.

use anyhow::Result;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::composer::ContentComposer;
use crate::config::Config;
use crate::llm::{ClaudeClient, LlmProvider};
use crate::lock::{DistributedLock, InMemoryLockBackend, LockBackend, RedisLockBackend};
use crate::moderation::{KeywordModerator, Moderator};
use crate::persona::Persona;
use crate::social::{build_provider, SocialProvider};
use crate::store::Store;

pub struct AppContext {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub lock: Arc<DistributedLock>,
    pub llm: Arc<dyn LlmProvider>,
    pub persona: Arc<Persona>,
    pub moderator: Arc<dyn Moderator>,
    pub store: Arc<Store>,
    provider: RwLock<Arc<dyn SocialProvider>>,
}

impl AppContext {
    /// Production wiring from configuration
    pub fn init(config: Config) -> Result<Arc<Self>> {
        let store = Arc::new(Store::open(&config.db_path)?);

        let persona = match &config.persona_file {
            Some(path) => Persona::load(path)?,
            None => {
                info!("No PERSONA_FILE set, using neutral persona");
                Persona::neutral(&config.provider.handle)
            }
        };

        let mut builder = AppContextBuilder::new(config, store).persona(persona);
        if let Some(url) = builder.config.redis_url.clone() {
            builder = builder.lock_backend(Arc::new(RedisLockBackend::new(&url)?));
        } else {
            warn!("REDIS_URL not set - locks only exclude loops within this process");
        }

        Ok(builder.build())
    }

    /// Start wiring with explicit parts; anything not set gets its default
    pub fn builder(config: Config, store: Arc<Store>) -> AppContextBuilder {
        AppContextBuilder::new(config, store)
    }

    /// Current social provider
    pub fn provider(&self) -> Arc<dyn SocialProvider> {
        self.provider.read().clone()
    }

    /// Rebuild the provider from configuration
    pub fn reset_provider(&self) {
        let provider = build_provider(&self.config.provider);
        info!("Social provider reset to {}", provider.name());
        *self.provider.write() = provider;
    }

    /// Swap in a specific provider
    pub fn set_provider(&self, provider: Arc<dyn SocialProvider>) {
        *self.provider.write() = provider;
    }

    pub fn composer(&self) -> ContentComposer {
        ContentComposer::new(
            self.llm.clone(),
            self.persona.clone(),
            self.moderator.clone(),
            self.store.clone(),
        )
    }
}

pub struct AppContextBuilder {
    config: Config,
    store: Arc<Store>,
    clock: Option<Arc<dyn Clock>>,
    lock_backend: Option<Arc<dyn LockBackend>>,
    provider: Option<Arc<dyn SocialProvider>>,
    llm: Option<Arc<dyn LlmProvider>>,
    persona: Option<Persona>,
    moderator: Option<Arc<dyn Moderator>>,
}

impl AppContextBuilder {
    fn new(config: Config, store: Arc<Store>) -> Self {
        Self {
            config,
            store,
            clock: None,
            lock_backend: None,
            provider: None,
            llm: None,
            persona: None,
            moderator: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn lock_backend(mut self, backend: Arc<dyn LockBackend>) -> Self {
        self.lock_backend = Some(backend);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn SocialProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn persona(mut self, persona: Persona) -> Self {
        self.persona = Some(persona);
        self
    }

    pub fn moderator(mut self, moderator: Arc<dyn Moderator>) -> Self {
        self.moderator = Some(moderator);
        self
    }

    pub fn build(self) -> Arc<AppContext> {
        let config = self.config;
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let backend = self
            .lock_backend
            .unwrap_or_else(|| Arc::new(InMemoryLockBackend::new(clock.clone())));
        let lock = Arc::new(DistributedLock::new(backend, clock.clone()));
        let provider = self.provider.unwrap_or_else(|| build_provider(&config.provider));
        let llm = self
            .llm
            .unwrap_or_else(|| Arc::new(ClaudeClient::from_config(&config)));
        let persona = self
            .persona
            .unwrap_or_else(|| Persona::neutral(&config.provider.handle));
        let moderator = self.moderator.unwrap_or_else(|| {
            let terms = config
                .blocked_terms
                .iter()
                .chain(persona.banned_phrases())
                .cloned()
                .collect::<Vec<_>>();
            Arc::new(KeywordModerator::new(terms, persona.max_post_chars()))
        });

        info!(
            "Context ready: provider={}, lock={}, llm={} (available: {})",
            provider.name(),
            lock.backend_name(),
            llm.name(),
            llm.is_available()
        );

        Arc::new(AppContext {
            config,
            clock,
            lock,
            llm,
            persona: Arc::new(persona),
            moderator,
            store: self.store,
            provider: RwLock::new(provider),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::social::MockProvider;

    #[test]
    fn test_builder_defaults_and_provider_swap() {
        let mut config = Config::default();
        config.provider.use_mock = true;
        config.provider.handle = "nova".to_string();

        let ctx = AppContext::builder(config, Arc::new(Store::open_in_memory().unwrap())).build();
        assert_eq!(ctx.provider().name(), "mock");
        assert_eq!(ctx.lock.backend_name(), "memory");
        assert!(ctx.persona.compiled_prompt().contains("You are nova"));

        ctx.set_provider(Arc::new(MockProvider::no_op("nova")));
        assert_eq!(ctx.provider().name(), "noop");

        ctx.reset_provider();
        assert_eq!(ctx.provider().name(), "mock");
    }

    #[test]
    fn test_missing_credentials_fall_back_to_noop() {
        let config = Config::default();
        let ctx = AppContext::builder(config, Arc::new(Store::open_in_memory().unwrap())).build();
        assert_eq!(ctx.provider().name(), "noop");
    }
}
