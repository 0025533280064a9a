//! Warden - a rule-driven authorization reverse proxy
//!
//! Requests are matched against a hot-reloadable ruleset, enriched with
//! attributes pulled from headers, query strings and JSON or gRPC bodies,
//! checked against an external authorization service, and forwarded to the
//! rule's backend. Hooks run on the way back, registering resources the
//! backend just created.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod payload;
pub mod proxy;
pub mod rules;
pub mod services;

pub use application::Application;
pub use error::{Error, Result};
