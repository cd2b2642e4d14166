use async_trait::async_trait;

use crate::{
    config::SinkConfig,
    error::{ConfigError, SinkError},
    types::{Category, Point},
};

/// A configured destination for points.
///
/// Instances start unconfigured from a [`SinkCreator`], are validated once through
/// [`Sink::load_config`], and are then shared read-only by every writer.
#[async_trait]
pub trait Sink: Send + Sync {
    /// The registry name of this implementation, e.g. `influxdb`
    fn target(&self) -> &'static str;

    /// The configured instance id. Empty until `load_config` succeeds.
    fn id(&self) -> &str;

    /// Validate the config and derive everything `write` needs. Called exactly once,
    /// before the sink becomes reachable from any category.
    fn load_config(&mut self, config: &SinkConfig) -> Result<(), ConfigError>;

    /// Encode and deliver a batch. Implementations own their timeouts.
    async fn write(&self, category: Category, points: &[Point]) -> Result<(), SinkError>;
}

/// Produces a fresh, unconfigured sink
pub type SinkCreator = fn() -> Box<dyn Sink>;
