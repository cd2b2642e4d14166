use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
};

use crate::{
    config::SinkConfig,
    error::{ConfigError, SinkError},
    registry::{SinkRegistry, SinkTable},
    sink::Sink,
    types::{Category, Point},
};

/// Where the one-shot initialization stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkState {
    /// `initialize` has not been called
    Uninitialized,
    /// The first `initialize` call is running
    Initializing,
    /// Sinks are live and `write` dispatches
    Ready,
    /// Initialization failed; `write` refuses every call
    Failed(ConfigError),
}

/// Brings sinks up once and fans batches out to them by category.
///
/// Share it behind an `Arc`; `write` takes `&self` and needs no locking once
/// initialization has finished.
///
/// ```
/// # let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().expect("runtime can be built");
/// # runtime.block_on(async {
/// use pointsink::{config::parse_descriptors, Category, Point, SinkManager, SinkRegistry};
///
/// let configs = parse_descriptors(
///     &["M", "L"],
///     &["influxdb://127.0.0.1:8086?protocol=http&database=db0", ""],
/// ).expect("descriptors parse");
///
/// let manager = SinkManager::new(SinkRegistry::with_default_targets());
/// manager.initialize(configs).expect("sinks come up");
///
/// // Nothing subscribes to logging, so this is a no-op.
/// manager
///     .write(Category::Logging, &[Point::new("log").field("message", "hi")])
///     .await
///     .expect("no sinks means nothing to fail");
/// # });
/// ```
#[derive(Debug)]
pub struct SinkManager {
    registry: SinkRegistry,
    initializing: AtomicBool,
    outcome: OnceLock<Result<SinkTable, ConfigError>>,
}

impl SinkManager {
    /// A manager resolving targets through `registry`
    pub fn new(registry: SinkRegistry) -> Self {
        Self {
            registry,
            initializing: AtomicBool::new(false),
            outcome: OnceLock::new(),
        }
    }

    /// Validate configs, construct and configure their sinks, and index them by
    /// category. Only the first call does any work. Concurrent callers block until it
    /// finishes; every caller, first or later, gets the stored outcome.
    ///
    /// Initialization is all-or-nothing: if any config fails, no sink goes live.
    /// Empty placeholder configs mean "no sink configured" and are skipped.
    pub fn initialize(&self, configs: Vec<SinkConfig>) -> Result<(), ConfigError> {
        let outcome = self.outcome.get_or_init(|| {
            self.initializing.store(true, Ordering::Release);
            let outcome = build_table(&self.registry, configs);
            match &outcome {
                Ok(table) => log::info!("{} sinks ready", table.instances().len()),
                Err(e) => log::error!("sink initialization failed: {e}"),
            }
            outcome
        });
        outcome.as_ref().map(|_| ()).map_err(Clone::clone)
    }

    /// The current lifecycle state
    pub fn state(&self) -> SinkState {
        match self.outcome.get() {
            Some(Ok(_)) => SinkState::Ready,
            Some(Err(e)) => SinkState::Failed(e.clone()),
            None if self.initializing.load(Ordering::Acquire) => SinkState::Initializing,
            None => SinkState::Uninitialized,
        }
    }

    /// Sinks subscribed to `category`. Empty before a successful initialize.
    pub fn sinks_for(&self, category: Category) -> &[Arc<dyn Sink>] {
        match self.outcome.get() {
            Some(Ok(table)) => table.route(category),
            _ => &[],
        }
    }

    /// Deliver `points` to every sink subscribed to `category`, in subscription order.
    ///
    /// Every sink is attempted even when an earlier one fails. Failures are logged and
    /// the last one is returned. A category with no subscribed sinks succeeds.
    pub async fn write(&self, category: Category, points: &[Point]) -> Result<(), SinkError> {
        let table = match self.outcome.get() {
            Some(Ok(table)) => table,
            _ => return Err(SinkError::NotInitialized),
        };

        let sinks = table.route(category);
        if sinks.is_empty() {
            log::debug!("no sinks for {category}, dropping {} points", points.len());
            return Ok(());
        }

        let mut last_error = None;
        for sink in sinks {
            if let Err(e) = sink.write(category, points).await {
                log::warn!(
                    "sink {} ({}) failed to write {} {category} points: {e}",
                    sink.id(),
                    sink.target(),
                    points.len()
                );
                last_error = Some(e);
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// [`SinkManager::write`] for a category given as a short tag, pure name or
    /// write path, e.g. `M`, `metric` or `/v1/write/metric`.
    pub async fn write_category(&self, category: &str, points: &[Point]) -> Result<(), SinkError> {
        if !matches!(self.outcome.get(), Some(Ok(_))) {
            return Err(SinkError::NotInitialized);
        }
        let category = Category::parse(category)
            .ok_or_else(|| SinkError::UnsupportedCategory(category.to_string()))?;
        self.write(category, points).await
    }
}

/// Ids must be non-blank and pairwise distinct. Checked before any sink is built.
pub fn validate_configs(configs: &[SinkConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for (index, config) in configs.iter().enumerate() {
        let id = config.id().trim();
        if id.is_empty() {
            return Err(ConfigError::BlankId { index });
        }
        if !seen.insert(id) {
            return Err(ConfigError::DuplicateId { id: id.to_string() });
        }
    }
    Ok(())
}

fn build_table(registry: &SinkRegistry, configs: Vec<SinkConfig>) -> Result<SinkTable, ConfigError> {
    let configs: Vec<SinkConfig> = configs.into_iter().filter(|c| !c.is_empty()).collect();
    validate_configs(&configs)?;

    let mut table = SinkTable::default();
    for config in &configs {
        let mut sink = registry.create(config.target())?;
        sink.load_config(config)?;
        log::debug!("sink {} ({}) configured", sink.id(), sink.target());
        table.add_instance(Arc::from(sink));
    }

    for config in &configs {
        let id = config.id().trim();
        for tag in &config.categories {
            let category = Category::parse(tag).ok_or_else(|| {
                ConfigError::invalid(config.target(), "categories", format!("unknown category `{tag}`"))
            })?;
            if !table.subscribe(category, id) {
                return Err(ConfigError::invalid(
                    config.target(),
                    "id",
                    format!("no live sink has id `{id}`"),
                ));
            }
        }
    }
    Ok(table)
}
