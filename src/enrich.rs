//! IP enrichment side-effect pass.
//!
//! `CALL ENRICH_IP <expr>` compiles to a join against an enrichment table.
//! Filling that table is an optional, out-of-core step: before compiling,
//! the distinct values of `<expr>` are sampled through an
//! [`EnrichmentBackend`], resolved with a [`GeoLookup`] and written back.
//! Every failure here is logged and otherwise ignored; the compiled SQL is
//! the same whether or not enrichment succeeded.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::Compiler;
use crate::ast::{Node, PipeNode, ToSql, visit_pipe_nodes};
use crate::error::{PipeError, PipeResult};
use crate::expand::{ENRICH_IP, call_arguments, synthesize_segment};
use crate::transpiler::OutputMode;

/// Enrichment type stored alongside IP rows.
pub const IP_KIND: &str = "ip";

/// Attribute persisted for every resolved IP.
pub const COUNTRY: &str = "country";

/// Resolves a key (an IP address) to named attributes.
pub trait GeoLookup: Send + Sync {
    fn lookup(&self, key: &str) -> PipeResult<HashMap<String, String>>;
}

/// Query and persistence capability supplied by the caller.
pub trait EnrichmentBackend: Send + Sync {
    /// Run `sql` and return the first column of every row as text.
    fn distinct_values(&self, sql: &str) -> impl Future<Output = PipeResult<Vec<String>>> + Send;

    /// Store one `(key, value, kind)` row, replacing any previous one.
    fn persist(&self, key: &str, value: &str, kind: &str) -> impl Future<Output = PipeResult<()>> + Send;
}

/// In-memory geolocation table, loadable from JSON:
///
/// ```json
/// { "1.2.3.4": { "country": "PL", "city": "Warsaw" } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeoTable {
    entries: HashMap<String, HashMap<String, String>>,
}

impl GeoTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, attributes: HashMap<String, String>) {
        self.entries.insert(key.into(), attributes);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn from_json(text: &str) -> PipeResult<Self> {
        serde_json::from_str(text).map_err(|e| PipeError::Config(format!("invalid geolocation table: {e}")))
    }

    pub fn load(path: &Path) -> PipeResult<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

impl GeoLookup for GeoTable {
    fn lookup(&self, key: &str) -> PipeResult<HashMap<String, String>> {
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| PipeError::Enrichment(format!("no geolocation entry for {key}")))
    }
}

/// Outcome of one enrichment pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentReport {
    /// Sampling queries issued.
    pub queries: usize,
    /// Rows written.
    pub persisted: usize,
    /// Failed or timed-out backend calls.
    pub failures: usize,
}

/// The sampling query of every `CALL ENRICH_IP` in the tree: the chain up to
/// the call, followed by `AGGREGATE GROUP BY <expr>` and a `LIMIT`, built on
/// the tree so trailing comments in the prefix stay comments.
pub fn enrichment_queries(nodes: &[Node], compiler: &Compiler) -> Vec<String> {
    let limit = compiler.config().enrichment.sample_limit;
    let mut queries = Vec::new();

    visit_pipe_nodes(nodes, &mut |pipe| {
        for (i, segment) in pipe.segments.iter().enumerate() {
            let Some(args) = call_arguments(segment, ENRICH_IP) else {
                continue;
            };
            if args.is_empty() {
                continue;
            }
            let rules = compiler.rules();
            let mut sample = PipeNode {
                head: pipe.head.clone(),
                segments: pipe.segments[..i].to_vec(),
            };
            sample
                .segments
                .push(synthesize_segment(&format!("|> AGGREGATE GROUP BY {}", args.to_sql()), rules));
            sample.segments.push(synthesize_segment(&format!("|> LIMIT {limit}"), rules));
            let sql = compiler
                .compile_tree(vec![Node::Pipe(sample)], OutputMode::Nested)
                .sql;
            debug!(%sql, "enrichment sampling query");
            queries.push(sql);
        }
    });

    queries
}

/// Run sampling queries, resolve every value and persist the results.
/// Each backend call is bounded by `timeout`.
pub async fn run_enrichment<B: EnrichmentBackend>(
    queries: Vec<String>,
    backend: &B,
    geo: &dyn GeoLookup,
    timeout: Duration,
) -> EnrichmentReport {
    let mut report = EnrichmentReport::default();

    for sql in queries {
        report.queries += 1;
        let values = match bounded(timeout, backend.distinct_values(&sql)).await {
            Ok(values) => values,
            Err(e) => {
                warn!(error = %e, "enrichment sampling failed");
                report.failures += 1;
                continue;
            }
        };

        for value in values.iter().filter(|v| !v.is_empty()) {
            let country = match geo.lookup(value) {
                Ok(attributes) => attributes.get(COUNTRY).cloned(),
                Err(e) => {
                    debug!(key = %value, error = %e, "no geolocation data");
                    None
                }
            };
            let Some(country) = country else {
                continue;
            };

            match bounded(timeout, backend.persist(value, &country, IP_KIND)).await {
                Ok(()) => report.persisted += 1,
                Err(e) => {
                    warn!(key = %value, error = %e, "persisting enrichment failed");
                    report.failures += 1;
                }
            }
        }
    }

    info!(
        queries = report.queries,
        persisted = report.persisted,
        failures = report.failures,
        "enrichment finished"
    );
    report
}

async fn bounded<T>(timeout: Duration, call: impl Future<Output = PipeResult<T>>) -> PipeResult<T> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| PipeError::Timeout(timeout.as_millis() as u64))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeBackend {
        values: Vec<String>,
        fail_query: bool,
        slow: bool,
        queries: Mutex<Vec<String>>,
        rows: Mutex<Vec<(String, String, String)>>,
    }

    impl EnrichmentBackend for FakeBackend {
        async fn distinct_values(&self, sql: &str) -> PipeResult<Vec<String>> {
            self.queries.lock().unwrap().push(sql.to_string());
            if self.slow {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            if self.fail_query {
                return Err(PipeError::Database("connection refused".to_string()));
            }
            Ok(self.values.clone())
        }

        async fn persist(&self, key: &str, value: &str, kind: &str) -> PipeResult<()> {
            self.rows
                .lock()
                .unwrap()
                .push((key.to_string(), value.to_string(), kind.to_string()));
            Ok(())
        }
    }

    fn geo() -> GeoTable {
        GeoTable::from_json(r#"{"1.1.1.1": {"country": "AU"}, "8.8.8.8": {"country": "US", "city": "Mountain View"}}"#)
            .unwrap()
    }

    #[test]
    fn test_sampling_query() {
        let compiler = Compiler::new(CompilerConfig::default()).unwrap();
        let tree = compiler.parse("FROM access |> WHERE status = 200 |> CALL ENRICH_IP client_ip |> LIMIT 5");
        assert_eq!(
            enrichment_queries(&tree, &compiler),
            vec!["SELECT client_ip\nFROM access\nWHERE status = 200\nGROUP BY client_ip\nLIMIT 100".to_string()]
        );
    }

    #[test]
    fn test_sampling_query_after_comments() {
        let compiler = Compiler::new(CompilerConfig::default()).unwrap();
        let tree = compiler.parse("FROM access -- source table\n|> CALL ENRICH_IP client_ip");
        assert_eq!(
            enrichment_queries(&tree, &compiler),
            vec!["SELECT client_ip\nFROM access\nGROUP BY client_ip\nLIMIT 100".to_string()]
        );

        let tree = compiler.parse(
            "FROM access\n|> WHERE status = 200 -- successful only\n|> CALL ENRICH_IP client_ip /* ip */\n|> LIMIT 5",
        );
        assert_eq!(
            enrichment_queries(&tree, &compiler),
            vec!["SELECT client_ip\nFROM access\nWHERE status = 200\nGROUP BY client_ip\nLIMIT 100".to_string()]
        );
    }

    #[test]
    fn test_sampling_query_per_call() {
        let compiler = Compiler::new(CompilerConfig::builder().sample_limit(10).build()).unwrap();
        let tree = compiler.parse("FROM a |> CALL ENRICH_IP src |> CALL ENRICH_IP dst");
        assert_eq!(
            enrichment_queries(&tree, &compiler),
            vec![
                "SELECT src\nFROM a\nGROUP BY src\nLIMIT 10".to_string(),
                "SELECT dst\nFROM (SELECT *, pipe_enrich.value AS ip_country\nFROM a\n\
                 LEFT JOIN pipe_enrich ON pipe_enrich.key = src AND pipe_enrich.enrich_type = 'ip')\n\
                 GROUP BY dst\nLIMIT 10"
                    .to_string(),
            ]
        );
    }

    #[test]
    fn test_no_calls_no_queries() {
        let compiler = Compiler::new(CompilerConfig::default()).unwrap();
        let tree = compiler.parse("FROM access |> LIMIT 5");
        assert!(enrichment_queries(&tree, &compiler).is_empty());
    }

    #[test]
    fn test_geo_table() {
        let table = geo();
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup("8.8.8.8").unwrap()["city"], "Mountain View");
        assert!(matches!(table.lookup("10.0.0.1"), Err(PipeError::Enrichment(_))));
        assert!(GeoTable::from_json("[1, 2]").is_err());
    }

    #[tokio::test]
    async fn test_resolved_values_are_persisted() {
        let backend = FakeBackend {
            values: vec!["1.1.1.1".into(), "10.0.0.1".into(), String::new(), "8.8.8.8".into()],
            ..Default::default()
        };
        let report = run_enrichment(vec!["SELECT ip".into()], &backend, &geo(), Duration::from_millis(500)).await;
        assert_eq!(report, EnrichmentReport { queries: 1, persisted: 2, failures: 0 });
        assert_eq!(
            *backend.rows.lock().unwrap(),
            vec![
                ("1.1.1.1".to_string(), "AU".to_string(), "ip".to_string()),
                ("8.8.8.8".to_string(), "US".to_string(), "ip".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_backend_failure_is_swallowed() {
        let backend = FakeBackend {
            fail_query: true,
            ..Default::default()
        };
        let report = run_enrichment(vec!["SELECT ip".into()], &backend, &geo(), Duration::from_millis(500)).await;
        assert_eq!(report.failures, 1);
        assert!(backend.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let backend = FakeBackend {
            values: vec!["1.1.1.1".into()],
            slow: true,
            ..Default::default()
        };
        let report = run_enrichment(vec!["SELECT ip".into()], &backend, &geo(), Duration::from_millis(50)).await;
        assert_eq!(report, EnrichmentReport { queries: 1, persisted: 0, failures: 1 });
    }
}
