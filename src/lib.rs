//! Persona Agent
//!
//! Autonomous social-media persona: ingests mentions, composes and posts
//! content through persona, style and moderation gates, and learns memories
//! from how conversations go.
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────── AppContext ────────────┐
//!                  │ Clock · DistributedLock · Store    │
//!                  │ SocialProvider · LlmProvider       │
//!                  │ Persona · Moderator                │
//!                  └────────────────┬───────────────────┘
//!        ┌─────────────┬────────────┼─────────────┬──────────────┐
//!   Ingestion    Timeline-Poster   Learning-Worker   Self-Style-Worker
//!   (mentions)   (gates → post)    (extract → memories) (collect → analyze)
//! ```
//!
//! Every loop runs on its own cadence, takes its named lock for one unit of
//! work, releases it and sleeps. Loops share only the lock, the clock and the
//! store.

pub mod clock;
pub mod composer;
pub mod config;
pub mod context;
pub mod learning;
pub mod llm;
pub mod lock;
pub mod models;
pub mod moderation;
pub mod persona;
pub mod scheduler;
pub mod social;
pub mod store;
pub mod style;

pub use clock::{Clock, FakeClock, SystemClock};
pub use composer::{ContentComposer, Draft};
pub use config::Config;
pub use context::AppContext;
pub use learning::{LearningExtractor, LearningSource};
pub use llm::{ClaudeClient, LlmProvider};
pub use lock::{DistributedLock, InMemoryLockBackend, LockBackend, LockError, LockHandle, RedisLockBackend};
pub use models::{
    Author, Direction, EngagementMetrics, InboundItem, ItemKind, MemoryItem, MemoryKind, OutboundItem, PendingPost,
    PendingStatus, StyleGuideVersion,
};
pub use moderation::{KeywordModerator, Moderator, Verdict};
pub use persona::Persona;
pub use scheduler::{CycleOutcome, Job, LoopConfig, LoopState, ScheduledLoop};
pub use social::{MockProvider, ProviderError, SocialProvider, TimelineWindow, XProvider};
pub use store::{ActivationError, Store};
pub use style::{StylePipeline, StyleRun, StyleTarget};
