//! Frontend pattern compilation
//!
//! A frontend pattern is compiled once, when its rule file is loaded, into
//! one of two shapes depending on the store's [`MatchStrategy`]:
//!
//! - **Regex**: the pattern is a regular expression tested against the request
//!   path and query (`/api/v1/things?x=1`). Matching is unanchored, so write
//!   `^...$` to pin a pattern to the whole string.
//! - **Route**: the pattern is a templated path such as `/projects/{id}` or
//!   `/items/{sku:[0-9]+}`. It is compiled into an anchored regex whose named
//!   groups become path parameters.

use crate::domain::rule::{MatchStrategy, PathParams};
use regex::Regex;
use thiserror::Error;

/// Default expression for a template variable without an explicit pattern
const DEFAULT_SEGMENT: &str = "[^/]+";

/// Errors raised while compiling a frontend pattern
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("invalid regex pattern {pattern:?}: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid route template {template:?}: {reason}")]
    Template { template: String, reason: String },
}

/// A frontend pattern compiled for one matching strategy
#[derive(Debug, Clone)]
pub enum CompiledPattern {
    Regex(Regex),
    Route(RouteTemplate),
}

impl CompiledPattern {
    /// Compile `pattern` for the given strategy
    pub fn compile(pattern: &str, strategy: MatchStrategy) -> Result<Self, PatternError> {
        match strategy {
            MatchStrategy::Regex => Regex::new(pattern)
                .map(Self::Regex)
                .map_err(|source| PatternError::Regex {
                    pattern: pattern.to_string(),
                    source,
                }),
            MatchStrategy::Route => RouteTemplate::parse(pattern).map(Self::Route),
        }
    }

    pub fn strategy(&self) -> MatchStrategy {
        match self {
            Self::Regex(_) => MatchStrategy::Regex,
            Self::Route(_) => MatchStrategy::Route,
        }
    }
}

/// A templated path compiled to an anchored regex with named captures
#[derive(Debug, Clone)]
pub struct RouteTemplate {
    template: String,
    regex: Regex,
    params: Vec<String>,
}

impl RouteTemplate {
    /// Parse a template such as `/orgs/{org}/projects/{id:[a-z0-9-]+}`
    pub fn parse(template: &str) -> Result<Self, PatternError> {
        let invalid = |reason: &str| PatternError::Template {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let mut expr = String::from("^");
        let mut params: Vec<String> = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    expr.push_str(&regex::escape(&literal));
                    literal.clear();

                    // Variables may carry their own pattern, which can itself contain braces.
                    let mut depth = 1usize;
                    let mut variable = String::new();
                    for inner in chars.by_ref() {
                        match inner {
                            '{' => depth += 1,
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                        variable.push(inner);
                    }
                    if depth != 0 {
                        return Err(invalid("unbalanced braces"));
                    }

                    let (name, pattern) = match variable.split_once(':') {
                        Some((name, pattern)) => (name.trim(), pattern),
                        None => (variable.trim(), DEFAULT_SEGMENT),
                    };
                    if !is_identifier(name) {
                        return Err(invalid(&format!("invalid variable name {name:?}")));
                    }
                    if params.iter().any(|p| p == name) {
                        return Err(invalid(&format!("duplicate variable {name:?}")));
                    }
                    if pattern.is_empty() {
                        return Err(invalid(&format!("empty pattern for variable {name:?}")));
                    }

                    expr.push_str(&format!("(?P<{name}>{pattern})"));
                    params.push(name.to_string());
                }
                '}' => return Err(invalid("unexpected closing brace")),
                _ => literal.push(c),
            }
        }
        expr.push_str(&regex::escape(&literal));
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            template: template.to_string(),
            regex,
            params,
        })
    }

    /// Match a request path, returning the captured parameters on success
    pub fn captures(&self, path: &str) -> Option<PathParams> {
        let caps = self.regex.captures(path)?;
        Some(
            self.params
                .iter()
                .filter_map(|name| {
                    caps.name(name)
                        .map(|m| (name.clone(), m.as_str().to_string()))
                })
                .collect(),
        )
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/ping", "/ping", &[])]
    #[case("/projects/{id}", "/projects/p-1", &[("id", "p-1")])]
    #[case("/orgs/{org}/projects/{id}", "/orgs/acme/projects/42", &[("org", "acme"), ("id", "42")])]
    #[case("/items/{sku:[0-9]+}", "/items/12345", &[("sku", "12345")])]
    #[case("/files/{path:.+}", "/files/a/b/c.txt", &[("path", "a/b/c.txt")])]
    #[case("/codes/{code:[A-Z]{3}}", "/codes/ABC", &[("code", "ABC")])]
    fn test_route_template_captures(
        #[case] template: &str,
        #[case] path: &str,
        #[case] expected: &[(&str, &str)],
    ) {
        let route = RouteTemplate::parse(template).unwrap();
        let params = route.captures(path).expect("path should match");
        let expected: PathParams = expected
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(params, expected);
    }

    #[rstest]
    #[case("/projects/{id}", "/projects/p-1/extra")]
    #[case("/projects/{id}", "/projects/")]
    #[case("/items/{sku:[0-9]+}", "/items/abc")]
    #[case("/a.b", "/axb")]
    #[case("/codes/{code:[A-Z]{3}}", "/codes/ABCD")]
    fn test_route_template_rejects(#[case] template: &str, #[case] path: &str) {
        let route = RouteTemplate::parse(template).unwrap();
        assert!(route.captures(path).is_none());
    }

    #[rstest]
    #[case("/projects/{id")]
    #[case("/projects/id}")]
    #[case("/projects/{1id}")]
    #[case("/projects/{id}/{id}")]
    #[case("/projects/{id:}")]
    #[case("/projects/{id:[}")]
    fn test_invalid_templates(#[case] template: &str) {
        assert!(matches!(
            RouteTemplate::parse(template),
            Err(PatternError::Template { .. })
        ));
    }

    #[test]
    fn test_regex_strategy_reports_bad_pattern() {
        let err = CompiledPattern::compile("/api/(unclosed", MatchStrategy::Regex).unwrap_err();
        assert!(matches!(err, PatternError::Regex { .. }));
        assert!(err.to_string().contains("/api/(unclosed"));
    }

    #[test]
    fn test_strategy_round_trip() {
        let regex = CompiledPattern::compile("^/api/.*$", MatchStrategy::Regex).unwrap();
        let route = CompiledPattern::compile("/api/{id}", MatchStrategy::Route).unwrap();
        assert_eq!(regex.strategy(), MatchStrategy::Regex);
        assert_eq!(route.strategy(), MatchStrategy::Route);
    }
}
