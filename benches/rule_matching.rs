//! Benchmarks for rule matching and payload extraction on the request path

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};
use http::{Method, Uri};
use std::hint::black_box;
use std::sync::Arc;
use warden::domain::{MatchStrategy, RuleFile, Ruleset};
use warden::payload::{grpc, json};
use warden::rules::matcher::{match_regex, match_route};

/// A rule file with `count` frontends; the last one is the benchmark target
fn rule_file(count: usize, strategy: MatchStrategy) -> Vec<Ruleset> {
    let mut yaml = String::from("rules:\n  - backends:\n      - name: bench\n        target: http://backend\n        frontends:\n");
    for i in 0..count {
        let path = match strategy {
            MatchStrategy::Route => format!("/svc{i}/items/{{id}}"),
            MatchStrategy::Regex => format!("^/svc{i}/items/[^/]+$"),
        };
        yaml.push_str(&format!("          - path: \"{path}\"\n            method: GET\n"));
    }

    let rules = RuleFile::parse(yaml.as_bytes())
        .expect("valid rule file")
        .into_rules(strategy)
        .expect("patterns compile");
    vec![Ruleset {
        source: "bench.yaml".to_string(),
        rules: rules.into_iter().map(Arc::new).collect(),
    }]
}

fn bench_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("rule_matching");

    for count in [10, 100, 1000] {
        let uri: Uri = format!("/svc{}/items/42", count - 1).parse().expect("uri");

        let route_rules = rule_file(count, MatchStrategy::Route);
        group.bench_function(format!("route_last_of_{count}"), |b| {
            b.iter(|| black_box(match_route(&route_rules, &Method::GET, &uri)))
        });

        let regex_rules = rule_file(count, MatchStrategy::Regex);
        group.bench_function(format!("regex_last_of_{count}"), |b| {
            b.iter(|| black_box(match_regex(&regex_rules, &Method::GET, &uri)))
        });
    }

    group.finish();
}

fn bench_payload_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload_extraction");

    let mut message = Vec::new();
    for tag in 1u8..=15 {
        message.extend_from_slice(&[(tag << 3) | 2, 0x05]);
        message.extend_from_slice(b"value");
    }
    let frame: Bytes = grpc::encode_frame(&message);
    group.bench_function("grpc_field_15", |b| {
        b.iter(|| black_box(grpc::extract(&frame, "15")))
    });

    let body = br#"{"instance": {"project": "web", "tags": [{"name": "a"}, {"name": "b"}]}}"#;
    group.bench_function("json_nested_index", |b| {
        b.iter(|| black_box(json::extract(body, "instance.tags[1].name")))
    });

    group.finish();
}

criterion_group!(benches, bench_matching, bench_payload_extraction);
criterion_main!(benches);
