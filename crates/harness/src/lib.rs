//! # vendorsim harness
//!
//! A stand-in for a storage vendor's REST API, used to load-test and
//! chaos-test clients without a real cluster.
//!
//! Every request is recorded, validated against the vendor's OpenAPI
//! contract, authorized against the scopes the contract declares, and then
//! answered by one of two backends:
//!
//! - **Mock**: fixed canned responses, byte-identical on every call
//! - **Simulated**: an in-memory model of organizations, users, file systems,
//!   S3 buckets and policies, and containers
//!
//! The pipeline itself is transport-agnostic ([`Harness::handle`]); the
//! [`server`] module puts it behind axum.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vendorsim_harness::{Harness, HarnessConfig, server};
//!
//! # async fn example() -> Result<(), vendorsim_harness::HarnessError> {
//! let config = HarnessConfig::default();
//! let harness = Arc::new(Harness::from_config(&config)?);
//! server::serve(harness, &config).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Mock and simulated vendor backends.
pub mod backend;
/// Startup configuration.
pub mod config;
/// OpenAPI contract loading and request/response validation.
pub mod contract;
/// Harness error types.
pub mod error;
/// Outcome counters and latency percentiles.
pub mod metrics;
/// The request pipeline.
pub mod pipeline;
/// Request recording.
pub mod recorder;
/// Vendor user roles.
pub mod roles;
/// HTTP surface.
pub mod server;

/// Shared test helpers.
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use backend::{
    ApiResponse, Backend, BackendMode, MockBackend, OperationCall, SimulatedBackend, VendorBackend,
};
pub use config::{ConfigOverrides, HarnessConfig};
pub use contract::{ApiContract, MatchedOperation, Security};
pub use error::{HarnessError, HarnessResult};
pub use metrics::{HarnessMetrics, MetricsSnapshot, Outcome};
pub use pipeline::{Harness, HarnessResponse, InboundRequest};
pub use recorder::{RequestRecord, RequestRecorder};
pub use roles::Role;
pub use server::{router, serve};
