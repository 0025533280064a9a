//! The proxy: middleware chain, director, transport and hooks
//!
//! Every request runs through a fixed pipeline:
//! - the middleware chain matches a rule, authenticates, extracts attributes,
//!   authorizes and rewrites the path;
//! - the director points the request at the rule's backend;
//! - the transport dispatches it over HTTP/1.1 or h2c;
//! - hooks run on the backend's response.

pub mod attributes;
pub mod authz;
pub mod basic_auth;
pub mod chain;
pub mod director;
pub mod enrichment;
pub mod error_response;
pub mod headers;
pub mod hooks;
pub mod middleware;
pub mod middleware_stack;
pub mod prefix;
pub mod rule_match;
pub mod service;
pub mod test_utils;
pub mod transport;
pub mod types;


pub use service::{ProxyService, ProxySettings};
pub use types::{ProxyError, ProxyResult};
