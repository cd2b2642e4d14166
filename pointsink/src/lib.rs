//! Category-routed telemetry egress.
//!
//! [`pointsink`] takes batches of [`Point`]s tagged with a [`Category`] (metrics,
//! logging, tracing) and delivers them to every sink subscribed to that category.
//! Sinks are configured once from compact descriptors such as
//! `influxdb://host:8086?protocol=http&database=db0` and then shared read-only by
//! every writer.
//!
//! # Targets
//!
//! | target     | protocol                                           |
//! |------------|----------------------------------------------------|
//! | `influxdb` | line protocol over http(s) or udp                  |
//! | `logstash` | json or plain text over http(s)                    |
//! | `m3db`     | prometheus remote write, snappy protobuf over http |
//! | `jaeger`   | thrift over http, or compact thrift to an agent    |
//! | `otel`     | OTLP traces over grpc or http                      |
//!
//! # Getting Started
//!
//! Build a [`SinkManager`] from [`SinkRegistry::with_default_targets`], call
//! [`SinkManager::initialize`] with the parsed descriptors, then
//! [`SinkManager::write`] from anywhere.

pub mod config;
pub mod downstream;
pub mod error;
pub mod manager;
pub mod registry;
pub mod sink;
pub mod types;

/// Internal generated types - ideally you shouldn't need to do much with them.
/// Nevertheless, they are exported in case you need them.
pub mod proto;

pub use config::SinkConfig;
pub use error::{ConfigError, SinkError};
pub use manager::{SinkManager, SinkState};
pub use registry::SinkRegistry;
pub use sink::Sink;
pub use types::{Category, FieldValue, Point};
