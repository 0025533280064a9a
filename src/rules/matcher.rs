//! Request-to-rule matching
//!
//! Both strategies walk the snapshot in file order, then rule order, and the
//! first rule whose method and pattern both match wins. There is no
//! specificity scoring, so declaration order is the tie-break.

use crate::domain::{MatchStrategy, PathParams, Rule, Ruleset};
use crate::rules::pattern::CompiledPattern;
use crate::rules::store::RuleStore;
use async_trait::async_trait;
use http::{Method, Uri};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("no rule matches the request")]
    Unknown,
}

/// The matched rule and any path parameters its pattern captured
#[derive(Debug, Clone)]
pub struct RuleMatch {
    pub rule: Arc<Rule>,
    pub path_params: PathParams,
}

#[async_trait]
pub trait RuleMatcher: Send + Sync {
    async fn match_request(&self, method: &Method, uri: &Uri) -> Result<RuleMatch, MatchError>;
}

/// Build the matcher that fits how `store` compiles its patterns
pub fn for_store(store: Arc<RuleStore>) -> Arc<dyn RuleMatcher> {
    match store.strategy() {
        MatchStrategy::Regex => Arc::new(RegexMatcher::new(store)),
        MatchStrategy::Route => Arc::new(RouteMatcher::new(store)),
    }
}

/// Tests each regex against the request path and query string
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    store: Arc<RuleStore>,
}

impl RegexMatcher {
    pub fn new(store: Arc<RuleStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RuleMatcher for RegexMatcher {
    async fn match_request(&self, method: &Method, uri: &Uri) -> Result<RuleMatch, MatchError> {
        let snapshot = self.store.get_all().await;
        match_regex(&snapshot, method, uri)
    }
}

/// Matches templated routes against the path and captures parameters
#[derive(Debug, Clone)]
pub struct RouteMatcher {
    store: Arc<RuleStore>,
}

impl RouteMatcher {
    pub fn new(store: Arc<RuleStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RuleMatcher for RouteMatcher {
    async fn match_request(&self, method: &Method, uri: &Uri) -> Result<RuleMatch, MatchError> {
        let snapshot = self.store.get_all().await;
        match_route(&snapshot, method, uri)
    }
}

fn request_target(uri: &Uri) -> &str {
    uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
}

fn ordered_rules<'a>(
    rulesets: &'a [Ruleset],
    method: &'a Method,
) -> impl Iterator<Item = &'a Arc<Rule>> + 'a {
    rulesets
        .iter()
        .flat_map(|set| set.rules.iter())
        .filter(move |rule| rule.frontend.method == method.as_str())
}

/// Regex strategy over an explicit snapshot
pub fn match_regex(rulesets: &[Ruleset], method: &Method, uri: &Uri) -> Result<RuleMatch, MatchError> {
    let target = request_target(uri);
    ordered_rules(rulesets, method)
        .find(|rule| match &rule.frontend.pattern {
            CompiledPattern::Regex(regex) => regex.is_match(target),
            CompiledPattern::Route(_) => false,
        })
        .map(|rule| RuleMatch {
            rule: rule.clone(),
            path_params: PathParams::new(),
        })
        .ok_or(MatchError::Unknown)
}

/// Route strategy over an explicit snapshot
pub fn match_route(rulesets: &[Ruleset], method: &Method, uri: &Uri) -> Result<RuleMatch, MatchError> {
    let path = uri.path();
    ordered_rules(rulesets, method)
        .find_map(|rule| match &rule.frontend.pattern {
            CompiledPattern::Route(template) => template.captures(path).map(|path_params| RuleMatch {
                rule: rule.clone(),
                path_params,
            }),
            CompiledPattern::Regex(_) => None,
        })
        .ok_or(MatchError::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RuleFile;
    use crate::rules::blob::FsBlobSource;
    use proptest::prelude::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn ruleset(source: &str, yaml: &str, strategy: MatchStrategy) -> Ruleset {
        let rules = RuleFile::parse(yaml.as_bytes())
            .unwrap()
            .into_rules(strategy)
            .unwrap();
        Ruleset {
            source: source.to_string(),
            rules: rules.into_iter().map(Arc::new).collect(),
        }
    }

    const REGEX_RULES: &str = r#"
rules:
  - backends:
      - name: first
        target: http://first
        frontends:
          - path: ^/api/things
            method: GET
          - path: ^/api/.*
            method: GET
          - path: ^/api/things$
            method: POST
          - path: ^/search\?q=
            method: GET
"#;

    const ROUTE_RULES: &str = r#"
rules:
  - backends:
      - name: projects
        target: http://projects
        frontends:
          - path: /projects/{project}/resources/{id:[0-9]+}
            method: GET
          - path: /projects/{project}/resources/{name}
            method: GET
          - path: /projects/{project}
            method: DELETE
"#;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[rstest]
    #[case(Method::GET, "/api/things/1", "^/api/things")]
    #[case(Method::GET, "/api/other", "^/api/.*")]
    #[case(Method::POST, "/api/things", "^/api/things$")]
    #[case(Method::GET, "/search?q=rust", "^/search\\?q=")]
    fn test_regex_first_match_wins(#[case] method: Method, #[case] target: &str, #[case] pattern: &str) {
        let sets = vec![ruleset("a.yaml", REGEX_RULES, MatchStrategy::Regex)];
        let found = match_regex(&sets, &method, &uri(target)).unwrap();
        assert_eq!(found.rule.frontend.url_pattern, pattern);
        assert!(found.path_params.is_empty());
    }

    #[rstest]
    #[case(Method::DELETE, "/api/things")]
    #[case(Method::POST, "/api/things/1")]
    #[case(Method::GET, "/elsewhere")]
    fn test_regex_no_match(#[case] method: Method, #[case] target: &str) {
        let sets = vec![ruleset("a.yaml", REGEX_RULES, MatchStrategy::Regex)];
        assert_eq!(
            match_regex(&sets, &method, &uri(target)).unwrap_err(),
            MatchError::Unknown
        );
    }

    #[test]
    fn test_earlier_file_wins() {
        let later = REGEX_RULES.replace("first", "second");
        let sets = vec![
            ruleset("a.yaml", REGEX_RULES, MatchStrategy::Regex),
            ruleset("b.yaml", &later, MatchStrategy::Regex),
        ];
        let found = match_regex(&sets, &Method::GET, &uri("/api/x")).unwrap();
        assert_eq!(found.rule.backend.namespace, "first");
    }

    #[test]
    fn test_route_captures_path_params() {
        let sets = vec![ruleset("r.yaml", ROUTE_RULES, MatchStrategy::Route)];

        let numeric = match_route(&sets, &Method::GET, &uri("/projects/p1/resources/42?x=1")).unwrap();
        assert_eq!(
            numeric.rule.frontend.url_pattern,
            "/projects/{project}/resources/{id:[0-9]+}"
        );
        assert_eq!(numeric.path_params.get("project").map(String::as_str), Some("p1"));
        assert_eq!(numeric.path_params.get("id").map(String::as_str), Some("42"));

        let named = match_route(&sets, &Method::GET, &uri("/projects/p1/resources/vm-a")).unwrap();
        assert_eq!(named.path_params.get("name").map(String::as_str), Some("vm-a"));

        assert!(match_route(&sets, &Method::GET, &uri("/projects/p1")).is_err());
        assert!(match_route(&sets, &Method::DELETE, &uri("/projects/p1/extra")).is_err());
    }

    #[tokio::test]
    async fn test_matchers_read_through_the_store() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("routes.yaml"), ROUTE_RULES).unwrap();

        let store = Arc::new(RuleStore::new(
            Arc::new(FsBlobSource::new(dir.path())),
            MatchStrategy::Route,
        ));
        let matcher = for_store(store);

        let found = matcher
            .match_request(&Method::DELETE, &uri("/projects/p9"))
            .await
            .unwrap();
        assert_eq!(found.path_params.get("project").map(String::as_str), Some("p9"));
        assert_eq!(
            matcher.match_request(&Method::PUT, &uri("/projects/p9")).await.unwrap_err(),
            MatchError::Unknown
        );
    }

    proptest! {
        #[test]
        fn prop_matching_is_deterministic(segment in "[a-z0-9]{1,12}", post in any::<bool>()) {
            let sets = vec![ruleset("a.yaml", REGEX_RULES, MatchStrategy::Regex)];
            let method = if post { Method::POST } else { Method::GET };
            let target = uri(&format!("/api/{segment}"));

            let first = match_regex(&sets, &method, &target).map(|m| Arc::as_ptr(&m.rule));
            let second = match_regex(&sets, &method, &target).map(|m| Arc::as_ptr(&m.rule));
            prop_assert_eq!(first, second);
        }
    }
}
