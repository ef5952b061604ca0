//! Social platform providers
//!
//! - `traits`: the `SocialProvider` capability and its error taxonomy
//! - `mock`: in-memory provider (local runs, no-op fallback, tests)
//! - `x_api`: X API v2 over HTTP

pub mod mock;
pub mod traits;
pub mod x_api;

pub use mock::MockProvider;
pub use traits::{newer_id, ProviderError, SocialProvider, TimelineWindow};
pub use x_api::XProvider;

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::ProviderConfig;

/// Build the provider the configuration asks for. Missing credentials fall
/// back to a no-op mock so the rest of the agent keeps running.
pub fn build_provider(config: &ProviderConfig) -> Arc<dyn SocialProvider> {
    if config.use_mock {
        info!("Using mock social provider as @{}", config.handle);
        return Arc::new(MockProvider::new(&config.handle));
    }

    match (&config.bearer_token, &config.user_id) {
        (Some(token), Some(user_id)) if !token.is_empty() && !user_id.is_empty() => {
            info!("Using X API provider as @{}", config.handle);
            Arc::new(XProvider::new(&config.api_base, token, user_id, &config.handle))
        }
        _ => {
            error!("X_BEARER_TOKEN / X_USER_ID missing - social provider disabled");
            warn!("Falling back to no-op provider: nothing will be fetched or posted");
            Arc::new(MockProvider::no_op(&config.handle))
        }
    }
}
