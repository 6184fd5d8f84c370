//! Client for the politikontroller.no crowd-sourced traffic control
//! reports.
//!
//! The backend is an undocumented mobile-app API with its own wire
//! conventions: request query strings are AES-encrypted parameter blobs,
//! responses are pipe-delimited pseudo-CSV rows or bare sentinel tokens,
//! and timestamps arrive in several incompatible shapes. This crate
//! adapts that contract into typed records.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     politikontroller client                  │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌──────────┐   ┌────────────────┐          │
//! │  │  query    │──▶│  crypto  │──▶│    backend     │          │
//! │  │ (assemble)│   │ (encrypt)│   │  (HTTP GET)    │          │
//! │  └───────────┘   └──────────┘   └───────┬────────┘          │
//! │                                         ▼                   │
//! │  ┌───────────┐   ┌──────────┐   ┌────────────────┐          │
//! │  │   geo     │◀──│  models  │◀──│      wire      │          │
//! │  │ (cluster) │   │ (records)│   │ (classify/split│          │
//! │  └───────────┘   └────▲─────┘   └────────────────┘          │
//! │                       │                                     │
//! │                  ┌────┴─────┐                               │
//! │                  │ timefmt  │                               │
//! │                  │(normalize)│                              │
//! │                  └──────────┘                               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use politikontroller::Client;
//!
//! # async fn run() -> Result<(), politikontroller::ClientError> {
//! let client = Client::initialize("4747474747", "password")?;
//! let clusters = client.get_controls(63.43, 10.39, true).await?;
//! for cluster in &clusters {
//!     println!("{} ({} duplicates)", cluster.primary.title(), cluster.duplicates.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod crypto;
pub mod geo;
pub mod models;
pub mod query;
pub mod timefmt;
pub mod wire;

// Re-export key types at crate root for convenience
pub use client::{AuthFailure, Client, ClientError, API_URL, DETAIL_CONCURRENCY};
pub use config::{Config, ConfigError};
pub use crypto::DecodingError;
pub use geo::{cluster_controls, haversine_km, to_feature_collection, DEFAULT_MAX_DISTANCE_KM};
pub use models::{
    Account, AuthState, Control, ControlCluster, ControlType, Credentials, Endpoint,
    ExchangeResult, MapArea,
};
pub use query::QueryBuilder;
pub use timefmt::{normalize, ParsedTimestamp};
pub use wire::{AccessDenied, Outcome};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
