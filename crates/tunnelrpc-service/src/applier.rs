//! Agent-side hook that applies a pushed configuration

use async_trait::async_trait;
use tunnelrpc_proto::{ApplyReport, ClientConfig};

/// Applies a configuration and reports the outcome of each sub-config
///
/// Implementations report local failures through the returned
/// [`ApplyReport`] instead of an error: a configuration that partially
/// applies is still a completed call.
#[async_trait]
pub trait ConfigApplier: Send + Sync {
    async fn apply(&self, config: &ClientConfig) -> ApplyReport;
}

#[async_trait]
impl<T: ConfigApplier + ?Sized> ConfigApplier for std::sync::Arc<T> {
    async fn apply(&self, config: &ClientConfig) -> ApplyReport {
        (**self).apply(config).await
    }
}
