//! mesos-dns - DNS server projecting live Mesos cluster state into a
//! read-only DNS zone.
//!
//! The server periodically fetches `/master/state.json` from the leading
//! Mesos master (with failover through the configured master list), turns
//! the document into an immutable record snapshot, and answers A/SRV/ANY
//! queries for the cluster zone from it. Queries outside the zone are
//! forwarded to upstream resolvers with bounded referral recursion.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                          mesos-dns                             │
//! │                                                                │
//! │  ┌──────────────────┐ refresh  ┌──────────────────┐            │
//! │  │ Record Generator │─────────▶│  Record Snapshot │            │
//! │  │ (master state)   │  swap    │  (immutable)     │            │
//! │  └──────────────────┘          └────────┬─────────┘            │
//! │         │ GET /master/state.json        │                      │
//! │         ▼                               ▼                      │
//! │  ┌──────────────┐              ┌──────────────────┐  UDP/TCP   │
//! │  │ Mesos leader │              │   DNS Handler    │◀── :53     │
//! │  └──────────────┘              │ cluster | forward│            │
//! │                                └──────────────────┘            │
//! │                                         │ out-of-zone          │
//! │                                         ▼                      │
//! │                                ┌──────────────────┐            │
//! │                                │ Upstream resolvers│           │
//! │                                └──────────────────┘            │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Naming
//!
//! ```text
//! leader.mesos.                A     the leading master
//! masterN.mesos.               A     the Nth configured master
//! <framework>.mesos.           A     framework scheduler
//! <task>-<hash>-<id>.<fw>.mesos.  A  canonical task name
//! _<task>._tcp.<fw>.mesos.     SRV   task service ports
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use mesos_dns::{DnsConfig, DnsServer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut config: DnsConfig = todo!("load configuration");
//!     config.finalize().unwrap();
//!
//!     let shutdown = CancellationToken::new();
//!     let server = DnsServer::new(config);
//!     server.run(shutdown).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod forwarder;
pub mod generator;
pub mod handler;
pub mod labels;
pub mod metrics;
pub mod records;
pub mod server;
pub mod state;
pub mod telemetry;
pub mod template;

// Re-export main types
pub use config::{Config, DnsConfig, TelemetryConfig};
pub use error::DnsError;
pub use handler::DnsHandler;
pub use records::{PublishedRecords, RecordKind, RecordSnapshot};
pub use server::DnsServer;
