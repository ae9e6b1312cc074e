//! Marshalling Performance Benchmarks
//!
//! Measures the per-invocation text work done before a driver is touched:
//! - IN/OUT spec parsing and value conversion
//! - Placeholder counting and script splitting
//! - Connection string synthesis across several LDAP servers

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use procvault::config::DatabasesConfig;
use procvault::{connection, procedure, sql, DbType, ProcedureExecutor};
use secrecy::SecretString;

fn bench_parse_specs(c: &mut Criterion) {
    let in_spec = "id:INTEGER:42,name:VARCHAR2:alice,amount:DECIMAL:1234.56,\
                   day:DATE:2024-06-01,active:BOOLEAN:true";
    let out_spec = "status:VARCHAR2,total:NUMBER,flag:BOOLEAN";

    c.bench_function("parse_in_five_params", |b| {
        b.iter(|| procedure::parse_in(black_box(Some(in_spec))));
    });

    c.bench_function("prepare_call", |b| {
        b.iter(|| ProcedureExecutor::prepare(black_box("APP.PKG.PROC"), Some(in_spec), Some(out_spec)));
    });

    let wide: Vec<String> = (0..200).map(|i| format!("p{i}:INTEGER:{i}")).collect();
    let wide = wide.join(",");
    c.bench_function("parse_in_two_hundred_params", |b| {
        b.iter(|| procedure::parse_in(black_box(Some(wide.as_str()))));
    });
}

fn bench_sql_text(c: &mut Criterion) {
    let query = "SELECT u.id, u.name /* cols */ FROM users u -- users\n\
                 WHERE u.age > :min_age AND u.name <> 'why?' AND u.created_at::date = ?";

    c.bench_function("count_placeholders", |b| {
        b.iter(|| sql::count_placeholders(black_box(query)));
    });

    let script: String = (0..500)
        .map(|i| format!("INSERT INTO t (id, note) VALUES ({i}, 'row; {i}'); -- row {i}\n"))
        .collect();
    c.bench_function("split_statements_500", |b| {
        b.iter(|| sql::split_statements(black_box(&script)));
    });
}

fn bench_connection_strings(c: &mut Criterion) {
    let mut config = DatabasesConfig::default();
    config.oracle.ldap.servers = (1..=4).map(|i| format!("oid{i}.example.com")).collect();
    config.oracle.ldap.context = "cn=OracleContext,dc=example,dc=com".to_string();

    c.bench_function("build_ldap_descriptor", |b| {
        b.iter(|| {
            connection::build(
                black_box(&config),
                DbType::Oracle,
                "ORCL",
                "app",
                SecretString::new("pw".to_string()),
                None,
            )
        });
    });

    c.bench_function("build_direct_descriptor", |b| {
        b.iter(|| {
            connection::build(
                black_box(&config),
                DbType::Oracle,
                "ORCL",
                "app",
                SecretString::new("pw".to_string()),
                Some("db.example.com"),
            )
        });
    });
}

criterion_group!(benches, bench_parse_specs, bench_sql_text, bench_connection_strings);
criterion_main!(benches);
