//! A bounded pool of controllable headless-browser workers.
//!
//! [`Cluster`] accepts jobs — units of work that drive a single browser
//! instance, optionally spawning further jobs that share their ancestor's
//! identity — and distributes them across a fixed number of worker threads,
//! each owning exactly one browser at a time. Jobs can fan out into many
//! sub-job instances and fan back in: a submission is only reported complete
//! once every instance sharing its [`JobId`] has finished, which is what lets
//! a single `explore` call recursively crawl a site without the caller
//! tracking the crawl's shape themselves.
//!
//! Memory is bounded on two axes: the worker pool caps concurrent browsers,
//! and the job queue spills to disk past a configurable number of resident
//! items rather than growing unboundedly in memory.
//!
//! ```no_run
//! use browser_cluster::{Cluster, ClusterConfig};
//! use std::sync::Arc;
//!
//! # fn make_browser() -> Box<dyn browser_cluster::Browser> { unimplemented!() }
//! let config = ClusterConfig::builder().pool_size(4).build();
//! let cluster = Cluster::new(config, Arc::new(make_browser)).unwrap();
//! cluster.explore("https://example.com", serde_json::json!({}), |result| {
//!     println!("{:?}", result.payload);
//! }).unwrap();
//! cluster.wait().unwrap();
//! ```

#![warn(missing_docs)]

pub mod accounting;
pub mod browser;
pub mod cluster;
pub mod config;
pub mod error;
pub mod job;
pub mod queue;
pub mod sitemap;
pub mod skip;
pub mod util;
pub mod worker;

pub use browser::{Browser, ElementHandle, Page, StatusCode};
pub use cluster::{Cluster, ClusterHandle};
pub use config::{ClusterConfig, ClusterConfigBuilder};
pub use error::{ClusterError, ClusterResult, JobError};
pub use job::{
    BrowserProviderJob, FnJob, Forwarder, Job, JobId, JobOutcome, JobResult,
    ResourceExplorationJob, TaintTraceJob,
};
pub use worker::BrowserFactory;

#[cfg(feature = "test-internals")]
pub mod test_support;
