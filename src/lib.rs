//! # pipesql
//!
//! Compiles SQL extended with pipe syntax into plain SQL.
//!
//! ```text
//! FROM logs
//! |> WHERE status >= 500
//! |> AGGREGATE count(*) AS errors GROUP BY host
//! |> ORDER BY errors DESC
//! |> LIMIT 10
//! ```
//!
//! Compilation runs in four passes over a token tree:
//!
//! 1. [`lexer`]: ordered regex rules turn text into tagged tokens
//! 2. [`parser`]: parentheses and `|>` chains are grouped into nodes
//! 3. [`expand`]: `CALL` macros become ordinary pipe segments
//! 4. [`transpiler`]: every chain is folded into nested subqueries or a CTE chain
//!
//! Rendering the final tree with [`ToSql`](ast::ToSql) gives the SQL text.
//!
//! ## Quick Example
//!
//! ```
//! use pipesql::prelude::*;
//!
//! let compiler = Compiler::new(CompilerConfig::default()).unwrap();
//! let sql = compiler.compile("FROM t |> WHERE b=9 |> WHERE c=10");
//! assert_eq!(sql, "SELECT *\nFROM (SELECT *\nFROM t\nWHERE b=9)\nWHERE c=10");
//! ```

pub mod ast;
pub mod config;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod expand;
pub mod interval;
pub mod lexer;
pub mod parser;
pub mod transpiler;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::ast::{Node, ToSql, find_token};
use crate::config::CompilerConfig;
use crate::enrich::{EnrichmentBackend, EnrichmentReport, GeoLookup, enrichment_queries, run_enrichment};
use crate::error::{PipeError, PipeResult};
use crate::expand::{MacroTable, expand_macros};
use crate::lexer::dialect::sqlparse;
use crate::lexer::{ERROR, RuleList, Token};
use crate::transpiler::{OutputMode, transpile};

pub mod prelude {
    pub use crate::ast::{Node, PipeNode, ToSql};
    pub use crate::config::{CompilerConfig, LogCategory};
    pub use crate::engine::SqlEnrichmentStore;
    pub use crate::enrich::{EnrichmentBackend, EnrichmentReport, GeoLookup, GeoTable};
    pub use crate::error::*;
    pub use crate::lexer::{Token, TokenType};
    pub use crate::transpiler::OutputMode;
    pub use crate::{Compilation, Compiler};
}

/// Everything one compilation produced besides the SQL text.
#[derive(Debug, Clone, PartialEq)]
pub struct Compilation {
    pub sql: String,
    /// `CALL` targets that matched no macro.
    pub unknown_commands: Vec<String>,
    /// The lexer's `Error` token, when the input did not lex cleanly.
    pub error: Option<Token>,
    /// Set by [`Compiler::compile_with_enrichment`] when enrichment ran.
    pub enrichment: Option<EnrichmentReport>,
}

/// A configured pipe-syntax compiler.
///
/// The rule list and macro table are built once; a `Compiler` can be shared
/// across threads and reused for any number of inputs.
pub struct Compiler {
    config: CompilerConfig,
    rules: Arc<RuleList>,
    macros: MacroTable,
}

impl Compiler {
    /// Validate `config` and build the default dialect.
    pub fn new(config: CompilerConfig) -> PipeResult<Self> {
        config.validate()?;
        Ok(Self::with_rules(config, sqlparse()?))
    }

    /// Use a custom rule list. Its token types should match those of
    /// [`sqlparse`] for grouping and transpilation to work.
    pub fn with_rules(config: CompilerConfig, rules: RuleList) -> Self {
        let rules = Arc::new(rules);
        let macros = MacroTable::new(&config, rules.clone());
        Self { config, rules, macros }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleList {
        &self.rules
    }

    /// Lex and group `input` without rewriting anything.
    pub fn parse(&self, input: &str) -> Vec<Node> {
        parser::parse(input, self.rules.as_ref())
    }

    /// Compile `input` in the configured output mode.
    ///
    /// Never fails: text the dialect cannot lex is carried through as
    /// `Error` tokens and left for the caller to reject.
    pub fn compile(&self, input: &str) -> String {
        self.compile_detailed(input).sql
    }

    pub fn compile_detailed(&self, input: &str) -> Compilation {
        self.compile_tree(self.parse(input), self.config.mode)
    }

    /// Like [`compile`](Self::compile), but input that does not lex
    /// cleanly is rejected.
    pub fn compile_strict(&self, input: &str) -> PipeResult<String> {
        let compilation = self.compile_detailed(input);
        match compilation.error {
            Some(token) if token.raw_value.chars().count() == 1 => Err(PipeError::lex(
                token.position,
                format!("unexpected character {:?}", token.raw_value),
            )),
            Some(token) => Err(PipeError::lex(token.position, token.raw_value)),
            None => Ok(compilation.sql),
        }
    }

    /// Compile `input` after filling the enrichment table for every
    /// `CALL ENRICH_IP` it contains. Enrichment failures are logged and
    /// never change the compiled SQL.
    pub async fn compile_with_enrichment<B: EnrichmentBackend>(
        &self,
        input: &str,
        backend: &B,
        geo: &dyn GeoLookup,
    ) -> Compilation {
        let tree = self.parse(input);
        let queries = enrichment_queries(&tree, self);

        let report = if queries.is_empty() {
            None
        } else {
            let timeout = Duration::from_millis(self.config.enrichment.timeout_ms);
            Some(run_enrichment(queries, backend, geo, timeout).await)
        };

        let mut compilation = self.compile_tree(tree, self.config.mode);
        compilation.enrichment = report;
        compilation
    }

    pub(crate) fn compile_tree(&self, tree: Vec<Node>, mode: OutputMode) -> Compilation {
        let error = find_token(&tree, &ERROR).cloned();
        if let Some(token) = &error {
            warn!(position = token.position, "input did not lex cleanly");
        }

        let expansion = expand_macros(tree, &self.macros);
        let sql = transpile(expansion.nodes, mode, &self.config.cte_prefix).to_sql();
        debug!(%mode, %sql, "compiled");

        Compilation {
            sql,
            unknown_commands: expansion.unknown_commands,
            error,
            enrichment: None,
        }
    }
}
