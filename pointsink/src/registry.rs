//! Sink constructors by target name, and the table of live sinks by category.
//!
//! Constructors are registered explicitly when the process is assembled:
//!
//! ```
//! use pointsink::{downstream::InfluxdbSink, SinkRegistry};
//!
//! let registry = SinkRegistry::builder()
//!     .register("influxdb", InfluxdbSink::create)
//!     .build();
//! assert!(registry.supports("influxdb"));
//! assert!(!registry.supports("kafka"));
//! ```

use std::{collections::HashMap, sync::Arc};

use crate::{
    downstream::{InfluxdbSink, JaegerSink, LogstashSink, OtelSink, RemoteWriteSink},
    error::ConfigError,
    sink::{Sink, SinkCreator},
    types::Category,
};

/// Target name to constructor. Immutable once built.
#[derive(Clone, Default)]
pub struct SinkRegistry {
    creators: HashMap<String, SinkCreator>,
}

impl std::fmt::Debug for SinkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut targets: Vec<&str> = self.creators.keys().map(String::as_str).collect();
        targets.sort_unstable();
        f.debug_struct("SinkRegistry")
            .field("targets", &targets)
            .finish()
    }
}

impl SinkRegistry {
    /// Start an empty registry
    pub fn builder() -> SinkRegistryBuilder {
        SinkRegistryBuilder::default()
    }

    /// A registry holding every sink this crate ships:
    /// `influxdb`, `logstash`, `m3db`, `jaeger` and `otel`.
    pub fn with_default_targets() -> Self {
        Self::builder()
            .register(InfluxdbSink::TARGET, InfluxdbSink::create)
            .register(LogstashSink::TARGET, LogstashSink::create)
            .register(RemoteWriteSink::TARGET, RemoteWriteSink::create)
            .register(JaegerSink::TARGET, JaegerSink::create)
            .register(OtelSink::TARGET, OtelSink::create)
            .build()
    }

    /// Whether a constructor exists for `target`
    pub fn supports(&self, target: &str) -> bool {
        self.creators.contains_key(target)
    }

    /// Construct a fresh, unconfigured sink for `target`
    pub fn create(&self, target: &str) -> Result<Box<dyn Sink>, ConfigError> {
        self.creators
            .get(target)
            .map(|creator| creator())
            .ok_or_else(|| ConfigError::NotImplemented {
                target: target.to_string(),
            })
    }
}

/// Assembles a [`SinkRegistry`]
#[derive(Default)]
pub struct SinkRegistryBuilder {
    creators: HashMap<String, SinkCreator>,
}

impl SinkRegistryBuilder {
    /// Register a constructor. A later registration for the same target replaces
    /// the earlier one.
    pub fn register(mut self, target: impl Into<String>, creator: SinkCreator) -> Self {
        let target = target.into();
        if self.creators.insert(target.clone(), creator).is_some() {
            log::warn!("sink target {target} registered twice, keeping the last");
        }
        self
    }

    /// Finish the registry
    pub fn build(self) -> SinkRegistry {
        SinkRegistry {
            creators: self.creators,
        }
    }
}

/// Live sinks and the category index over them. Built once during initialization
/// and read-only afterward.
#[derive(Default)]
pub struct SinkTable {
    instances: Vec<Arc<dyn Sink>>,
    categories: HashMap<Category, Vec<Arc<dyn Sink>>>,
}

impl std::fmt::Debug for SinkTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let instances: Vec<(&str, &str)> =
            self.instances.iter().map(|s| (s.target(), s.id())).collect();
        f.debug_struct("SinkTable")
            .field("instances", &instances)
            .field("categories", &self.categories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SinkTable {
    /// Add a configured sink to the flat instance list
    pub fn add_instance(&mut self, sink: Arc<dyn Sink>) {
        self.instances.push(sink);
    }

    /// Find a live sink by id
    pub fn instance(&self, id: &str) -> Option<&Arc<dyn Sink>> {
        self.instances.iter().find(|s| s.id() == id)
    }

    /// Every live sink in registration order
    pub fn instances(&self) -> &[Arc<dyn Sink>] {
        &self.instances
    }

    /// Subscribe the sink with `id` to `category`. A sink is listed at most once per
    /// category. Returns false when no live sink has that id.
    pub fn subscribe(&mut self, category: Category, id: &str) -> bool {
        let Some(sink) = self.instances.iter().find(|s| s.id() == id).cloned() else {
            return false;
        };
        let sinks = self.categories.entry(category).or_default();
        if !sinks.iter().any(|s| s.id() == id) {
            sinks.push(sink);
        }
        true
    }

    /// Sinks serving `category`, in subscription order
    pub fn route(&self, category: Category) -> &[Arc<dyn Sink>] {
        self.categories
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        config::SinkConfig,
        error::SinkError,
        types::Point,
    };

    #[derive(Default)]
    struct Named {
        id: String,
    }

    #[async_trait]
    impl Sink for Named {
        fn target(&self) -> &'static str {
            "named"
        }

        fn id(&self) -> &str {
            &self.id
        }

        fn load_config(&mut self, config: &SinkConfig) -> Result<(), ConfigError> {
            self.id = config.id().to_string();
            Ok(())
        }

        async fn write(&self, _category: Category, _points: &[Point]) -> Result<(), SinkError> {
            Ok(())
        }
    }

    impl Named {
        fn create() -> Box<dyn Sink> {
            Box::<Named>::default()
        }
    }

    fn named(id: &str) -> Arc<dyn Sink> {
        Arc::new(Named { id: id.to_string() })
    }

    #[test_log::test]
    fn unknown_target_is_not_implemented() {
        let registry = SinkRegistry::builder().build();
        let err = registry.create("nope").err().expect("nothing registered");
        assert_eq!("nope not implemented yet", err.to_string());
    }

    #[test_log::test]
    fn registered_target_creates_fresh_instances() {
        let registry = SinkRegistry::builder()
            .register("named", Named::create)
            .build();
        let a = registry.create("named").expect("registered");
        let b = registry.create("named").expect("registered");
        assert_eq!("", a.id());
        assert_eq!("", b.id());
        assert_eq!("named", a.target());
    }

    #[test_log::test]
    fn default_targets() {
        let registry = SinkRegistry::with_default_targets();
        for target in ["influxdb", "logstash", "m3db", "jaeger", "otel"] {
            assert!(registry.supports(target), "{target}");
            assert_eq!(target, registry.create(target).expect("registered").target());
        }
    }

    #[test_log::test]
    fn table_routes_in_subscription_order() {
        let mut table = SinkTable::default();
        table.add_instance(named("a"));
        table.add_instance(named("b"));

        assert!(table.subscribe(Category::Metric, "b"));
        assert!(table.subscribe(Category::Metric, "a"));
        assert!(table.subscribe(Category::Metric, "a"));
        assert!(!table.subscribe(Category::Metric, "c"));
        assert!(table.subscribe(Category::Logging, "a"));

        let metric: Vec<&str> = table.route(Category::Metric).iter().map(|s| s.id()).collect();
        assert_eq!(vec!["b", "a"], metric);
        assert_eq!(1, table.route(Category::Logging).len());
        assert!(table.route(Category::Tracing).is_empty());
        assert!(table.instance("b").is_some());
    }
}
