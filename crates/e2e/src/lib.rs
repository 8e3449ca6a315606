//! wafcheck end-to-end harness
//!
//! Declarative verification of a deployed web application firewall. Test
//! files under `tests/<kind>/` describe actions (HTTP requests, TLS handshakes
//! and browser visits) together with the expectation each one must meet.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      wafcheck harness                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  catalog      integrations.yml × tests/<kind>/*.yml          │
//! │    └── <Integration>_tests.json, actions.txt                 │
//! │  materialize  test + action + integration                    │
//! │    └── config.yml, autoconf-services.yml, timeout.txt        │
//! │  spec         raw record -> Action (all errors at once)      │
//! │  runner       Action -> Verdict                              │
//! │    ├── http        reqwest, one request                      │
//! │    ├── tls         rustls handshake + x509 inspection        │
//! │    └── playwright  one browser navigation                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod http;
pub mod materialize;
pub mod playwright;
pub mod runner;
pub mod spec;
pub mod tls;

pub use catalog::{Catalog, CatalogEntry, IntegrationMatrix, Mode};
pub use config::{HarnessSettings, OutputPaths};
pub use error::{E2eError, E2eResult, ValidationError};
pub use materialize::{Integration, Materialized, Materializer};
pub use runner::{ActionRunner, RunnerConfig, Verdict};
pub use spec::{Action, ActionKind, ActionRef, TestFile};
