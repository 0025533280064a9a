//! Rule loading, caching and matching

pub mod blob;
pub mod matcher;
pub mod pattern;
pub mod store;

pub use blob::{BlobError, BlobObject, BlobSource, FsBlobSource};
pub use matcher::{MatchError, RegexMatcher, RouteMatcher, RuleMatch, RuleMatcher};
pub use pattern::{CompiledPattern, PatternError, RouteTemplate};
pub use store::{RefreshReport, RuleStore, RuleStoreError, Snapshot};
