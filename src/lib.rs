//! Canopy - a configuration-driven API gateway.
//!
//! Canopy exposes many independently configured APIs behind one HTTP listener.
//! Each API is a JSON definition file naming a public path, a backend target and
//! an optional stack of policies; the gateway compiles every definition into a
//! forwarding handler and installs it in an atomically swapped routing table.
//!
//! # Features
//! - Dynamic API registration from a directory of definitions, with optional hot reload
//! - Per-API filter chains (IP allow/deny lists, methods, headers, paths)
//! - Request decoration and response interception (headers, bodies, status)
//! - Per-API rate limiting (by route / IP / header) and Basic or API-key authentication
//! - Longest-prefix path routing with exact suffix and query forwarding
//! - Structured tracing via `tracing` with request ids
//! - Graceful shutdown
//!
//! # Quick Example
//! ```no_run
//! use canopy::Gateway;
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let gateway = Gateway::new("gateway.json");
//! let addr = gateway.start().await?;
//! println!("listening on {addr} with {} APIs", gateway.apis().len());
//! gateway.stop().await;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! business logic inside `core`. End users should prefer the re-exports documented below
//! instead of reaching into internal modules directly.
//!
//! # Error Handling
//! Configuration and lifecycle APIs return domain specific error types
//! (`ValidationError`, `PolicyError`, `GatewayError`); plumbing returns
//! `eyre::Result<T>` with context attached through `WrapErr`. Request-time
//! failures never surface as errors: they are turned into HTTP responses.
//!
//! # Concurrency & Data Structures
//! The routing table is an immutable snapshot behind `arc_swap::ArcSwap`.
//! Requests read it lock-free; registrations publish a new snapshot, so a
//! request is always routed against one consistent table.
//!
//! # License
//! Licensed under Apache-2.0.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate and embedders
pub use crate::{
    adapters::{HttpClientAdapter, HttpHandler},
    core::{ApiRegistry, Gateway, GatewayError, GatewayState},
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
