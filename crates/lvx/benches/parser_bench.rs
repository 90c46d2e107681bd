//! 🏁 Parser throughput — the per-line tax, measured instead of vibed.

use criterion::{criterion_group, criterion_main, Criterion};

use lvx::parsers::{
    CommonParserConfig, ObjectParser, ObjectParserConfig, Parser, PatternParser,
    PatternParserConfig, RegexParser, RegexParserConfig,
};

fn promoting_common() -> CommonParserConfig {
    CommonParserConfig {
        time_field: Some("ts".to_string()),
        level_field: Some("lvl".to_string()),
        message_field: Some("msg".to_string()),
        ..CommonParserConfig::default()
    }
}

fn bench_object_parser(c: &mut Criterion) {
    let mut parser = ObjectParser::new(ObjectParserConfig {
        common: promoting_common(),
    });
    let line = r#"{"ts":"2024-01-15T10:30:00Z","lvl":"ERROR","msg":"disk full","host":"h1","retries":3}"#;
    c.bench_function("parse_object_line", |b| {
        b.iter(|| parser.parse(std::hint::black_box(line), "bench").unwrap())
    });
}

fn bench_regex_parser(c: &mut Criterion) {
    let mut parser = RegexParser::new(RegexParserConfig {
        pattern: r"^(?P<ts>\S+)\s+\[(?P<lvl>\w+)\]\s+(?P<msg>.*)$".to_string(),
        common: promoting_common(),
    })
    .expect("pattern compiles");
    let line = "2024-01-15T10:30:00Z [WARN] cache miss storm on shard 7";
    c.bench_function("parse_regex_line", |b| {
        b.iter(|| parser.parse(std::hint::black_box(line), "bench").unwrap())
    });
}

fn bench_pattern_parser(c: &mut Criterion) {
    let mut parser = PatternParser::new(PatternParserConfig {
        pattern: "%{SYSLOGLINE}".to_string(),
        custom_patterns: Default::default(),
        common: CommonParserConfig {
            time_field: Some("timestamp".to_string()),
            message_field: Some("message".to_string()),
            ..CommonParserConfig::default()
        },
    })
    .expect("library expands");
    let line = "Jan 15 10:30:00 web-1 sshd[4242]: accepted publickey for deploy";
    c.bench_function("parse_syslog_pattern_line", |b| {
        b.iter(|| parser.parse(std::hint::black_box(line), "bench").unwrap())
    });
}

criterion_group!(
    benches,
    bench_object_parser,
    bench_regex_parser,
    bench_pattern_parser
);
criterion_main!(benches);
