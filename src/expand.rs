//! Pipe macros.
//!
//! A macro is a `CALL <NAME> ...` segment (or `EXTEND ENRICH_IP(...)`) that
//! is rewritten into ordinary pipe segments before transpilation:
//!
//! ```text
//! |> CALL TIMEBUCKET ts BY 1 hour AS bucket
//! |> CALL LOGCATEGORY message AS category
//! |> CALL ENRICH_IP client_ip
//! |> EXTEND ENRICH_IP(client_ip) AS geo
//! ```
//!
//! Synthesized segments are produced as SQL text and lexed with the same
//! rule list as the input, so they carry ordinary token types.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::ast::{Node, PipeNode, ToSql, find_token, split_at_keyword, tokens_to_nodes, transform_pipe_nodes, trim};
use crate::config::{CompilerConfig, LogCategory};
use crate::interval::parse_interval;
use crate::lexer::dialect::PIPE;
use crate::lexer::{ERROR, RuleList, lex};
use crate::parser::{Cursor, SegmentView, group_parenthesis, group_pipes};

/// Upper bound on substitutions within one pipe chain.
const MAX_EXPANSIONS: usize = 64;

pub const TIMEBUCKET: &str = "TIMEBUCKET";
pub const LOGCATEGORY: &str = "LOGCATEGORY";
pub const ENRICH_IP: &str = "ENRICH_IP";

/// Result of [`expand_macros`].
#[derive(Debug, Clone, PartialEq)]
pub struct Expansion {
    pub nodes: Vec<Node>,
    /// `CALL` targets that are not known macros, in input order.
    pub unknown_commands: Vec<String>,
}

enum Expanded {
    Segments(Vec<Vec<Node>>),
    Unknown(String),
    Unchanged,
}

/// The macros available to one compiler, built once from configuration.
pub struct MacroTable {
    rules: Arc<RuleList>,
    time_format: String,
    log_categories: Vec<LogCategory>,
    ip_dataset: String,
    ip_columns: String,
    enrich_table: String,
}

impl MacroTable {
    pub fn new(config: &CompilerConfig, rules: Arc<RuleList>) -> Self {
        Self {
            rules,
            time_format: config.macros.time_format.clone(),
            log_categories: config.macros.log_categories.clone(),
            ip_dataset: config.macros.ip_dataset.clone(),
            ip_columns: config.macros.ip_columns.clone(),
            enrich_table: config.enrichment.table.clone(),
        }
    }

    fn expand_pipe(&self, mut pipe: PipeNode, unknown: &mut Vec<String>) -> PipeNode {
        let mut index = 0;
        let mut expansions = 0;

        while index < pipe.segments.len() {
            match self.expand_segment(&pipe.segments[index]) {
                Expanded::Segments(segments) => {
                    if expansions == MAX_EXPANSIONS {
                        warn!(limit = MAX_EXPANSIONS, "macro expansion limit reached, remaining segments left as-is");
                        break;
                    }
                    expansions += 1;
                    pipe.segments.splice(index..=index, segments);
                }
                Expanded::Unknown(name) => {
                    warn!(command = %name, "unknown pipe command");
                    unknown.push(name);
                    index += 1;
                }
                Expanded::Unchanged => index += 1,
            }
        }

        pipe
    }

    fn expand_segment(&self, segment: &[Node]) -> Expanded {
        let Some(view) = SegmentView::parse(segment) else {
            return Expanded::Unchanged;
        };
        if find_token(segment, &ERROR).is_some() {
            return Expanded::Unchanged;
        }

        let expanded = match view.operator_name.as_str() {
            "CALL" => {
                let mut cursor = Cursor::new(view.args);
                let Some(name) = cursor.next_token() else {
                    warn!("CALL without a command name");
                    return Expanded::Unchanged;
                };
                let args = cursor.rest();
                match name.normalized().as_str() {
                    TIMEBUCKET => self.timebucket(args),
                    LOGCATEGORY => self.logcategory(args),
                    ENRICH_IP => self.enrich_ip_call(args),
                    _ => return Expanded::Unknown(name.raw_value.clone()),
                }
            }
            "EXTEND" => {
                let mut cursor = Cursor::new(view.args);
                match cursor.next_token() {
                    Some(name) if name.normalized() == ENRICH_IP => self.enrich_ip_extend(cursor.rest()),
                    _ => return Expanded::Unchanged,
                }
            }
            _ => return Expanded::Unchanged,
        };

        match expanded {
            Some(sql) => {
                debug!(from = %segment.to_sql().trim(), to = ?sql, "expanded pipe macro");
                Expanded::Segments(sql.iter().map(|s| self.segment(s)).collect())
            }
            None => {
                warn!(segment = %segment.to_sql().trim(), "malformed pipe macro left as-is");
                Expanded::Unchanged
            }
        }
    }

    fn segment(&self, sql: &str) -> Vec<Node> {
        synthesize_segment(sql, self.rules.as_ref())
    }

    // CALL TIMEBUCKET <ts> BY <interval> AS <alias>
    fn timebucket(&self, args: &[Node]) -> Option<Vec<String>> {
        let (ts, rest) = split_at_keyword(args, "BY");
        let (interval, alias) = split_at_keyword(rest?, "AS");
        let alias = alias?;
        if ts.is_empty() || interval.is_empty() || alias.is_empty() {
            return None;
        }

        let raw = interval.to_sql();
        let interval = match parse_interval(&raw) {
            Some(parsed) => parsed.to_string(),
            None if raw.to_ascii_uppercase().starts_with("INTERVAL") => raw,
            None => {
                debug!(interval = %raw, "interval not recognized, passing through");
                format!("INTERVAL {raw}")
            }
        };

        let (ts, alias, format) = (ts.to_sql(), alias.to_sql(), &self.time_format);
        let start = format!("toStartOfInterval({ts}, {interval})");
        Some(vec![format!(
            "|> EXTEND concat(formatDateTime({start}, {format}), ' - ', \
             formatDateTime({start} + {interval}, {format})) AS {alias}"
        )])
    }

    // CALL LOGCATEGORY <expr> AS <alias>
    fn logcategory(&self, args: &[Node]) -> Option<Vec<String>> {
        let (expr, alias) = split_at_keyword(args, "AS");
        let alias = alias?;
        if expr.is_empty() || alias.is_empty() {
            return None;
        }

        let (expr, alias) = (expr.to_sql(), alias.to_sql());
        if self.log_categories.is_empty() {
            return Some(vec![format!("|> EXTEND 'Unknown' AS {alias}")]);
        }

        let whens: String = self
            .log_categories
            .iter()
            .map(|c| format!(" WHEN {expr} REGEXP {} THEN {}", sql_string(&c.pattern), sql_string(&c.label)))
            .collect();
        Some(vec![format!("|> EXTEND CASE{whens} ELSE 'Unknown' END AS {alias}")])
    }

    // CALL ENRICH_IP <expr>
    fn enrich_ip_call(&self, args: &[Node]) -> Option<Vec<String>> {
        if args.is_empty() {
            return None;
        }
        let (expr, table) = (args.to_sql(), &self.enrich_table);
        Some(vec![
            format!("|> LEFT JOIN {table} ON {table}.key = {expr} AND {table}.enrich_type = 'ip'"),
            format!("|> EXTEND {table}.value AS ip_country"),
        ])
    }

    // EXTEND ENRICH_IP(<expr>) AS <alias>
    fn enrich_ip_extend(&self, args: &[Node]) -> Option<Vec<String>> {
        let mut cursor = Cursor::new(args);
        let Some(Node::List(call)) = cursor.next_node() else {
            return None;
        };
        if call.len() < 2 || !call[0].is_raw("(") || !call[call.len() - 1].is_raw(")") {
            return None;
        }
        let expr = trim(&call[1..call.len() - 1]);
        let (before, alias) = split_at_keyword(cursor.rest(), "AS");
        let alias = alias?;
        if expr.is_empty() || !before.is_empty() || alias.is_empty() {
            return None;
        }

        let (expr, alias) = (expr.to_sql(), alias.to_sql());
        Some(vec![format!(
            "|> LEFT JOIN (SELECT ip, {} FROM {}) AS {alias} ON {alias}.ip = {expr}",
            self.ip_columns, self.ip_dataset
        )])
    }
}

/// Arguments following `CALL <name>` when `segment` is such a call.
pub fn call_arguments<'a>(segment: &'a [Node], name: &str) -> Option<&'a [Node]> {
    let view = SegmentView::parse(segment)?;
    if view.operator_name != "CALL" {
        return None;
    }
    let mut cursor = Cursor::new(view.args);
    if cursor.next_token()?.normalized() != name {
        return None;
    }
    Some(cursor.rest())
}

/// Lex one synthesized `|> ...` segment, keeping nested pipe chains grouped.
pub(crate) fn synthesize_segment(sql: &str, rules: &RuleList) -> Vec<Node> {
    group_parenthesis(tokens_to_nodes(lex(sql, rules)))
        .into_iter()
        .flat_map(|node| match node {
            Node::List(_) => group_pipes(vec![node], &PIPE),
            node => vec![node],
        })
        .collect()
}

/// Expand every macro in every pipe chain of `nodes` until none is left.
pub fn expand_macros(nodes: Vec<Node>, table: &MacroTable) -> Expansion {
    let mut unknown_commands = Vec::new();
    let nodes = transform_pipe_nodes(nodes, &mut |pipe| {
        Node::Pipe(table.expand_pipe(pipe, &mut unknown_commands))
    });
    Expansion {
        nodes,
        unknown_commands,
    }
}

/// Quote `value` as a SQL string literal.
fn sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}
