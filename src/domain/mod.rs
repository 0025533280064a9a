//! Domain types for Warden
//!
//! Rules, attributes, and the authorization-domain records the proxy builds
//! its permission checks and resource registrations from.

pub mod attributes;
pub mod resource;
pub mod rule;

pub use attributes::{AttributeMap, AttributeSource, AttributeSpec, AttributeType, AttributeValue};
pub use resource::{Action, Organization, Project, Resource, Subject};
pub use rule::{
    Backend, Frontend, HookKind, HookSpec, MatchStrategy, MiddlewareKind, MiddlewareSpec,
    PathParams, Rule, RuleFile, Ruleset,
};
