//! Pipe chain to SQL transpiler.
//!
//! Segments are folded into a [`TranspileState`] one at a time. Each
//! operator has a priority reflecting where its clause sits in a SELECT
//! statement; when the next operator cannot be merged without reordering
//! clauses, the current state is closed and becomes the source of a fresh
//! one, either as a parenthesized subquery or as a named CTE.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ast::{Node, PipeNode, ToSql, split_at_keyword, transform_pipe_nodes, trim};
use crate::lexer::dialect::{KEYWORD, NAME, NEWLINE, PUNCTUATION, WHITESPACE, WILDCARD};
use crate::parser::SegmentView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Closed states become parenthesized subqueries.
    #[default]
    Nested,
    /// Closed states become a `WITH` chain.
    Cte,
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nested" => Ok(Self::Nested),
            "cte" => Ok(Self::Cte),
            other => Err(format!("unknown output mode '{other}', expected 'nested' or 'cte'")),
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nested => f.write_str("nested"),
            Self::Cte => f.write_str("cte"),
        }
    }
}

/// Pipe operators the transpiler understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeOperator {
    Join,
    Where,
    Aggregate,
    Select,
    Extend,
    OrderBy,
    Limit,
}

impl PipeOperator {
    /// Look up a normalized operator name (`LEFT OUTER JOIN`, `ORDER BY`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "WHERE" => Some(Self::Where),
            "AGGREGATE" => Some(Self::Aggregate),
            "SELECT" => Some(Self::Select),
            "EXTEND" => Some(Self::Extend),
            "ORDER BY" => Some(Self::OrderBy),
            "LIMIT" => Some(Self::Limit),
            name if name == "JOIN" || name.ends_with(" JOIN") => Some(Self::Join),
            _ => None,
        }
    }

    pub fn priority(self) -> u8 {
        match self {
            Self::Join => 2,
            Self::Where => 3,
            Self::Aggregate => 4,
            Self::Select => 7,
            Self::Extend => 8,
            Self::OrderBy => 9,
            Self::Limit => 10,
        }
    }
}

/// One SELECT statement under construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranspileState {
    pub select: Option<Vec<Node>>,
    pub from: Vec<Node>,
    /// Clauses keep their operator token, e.g. `LEFT JOIN u ON ...`.
    pub join: Option<Vec<Node>>,
    pub where_clause: Option<Vec<Node>>,
    pub group_by: Option<Vec<Node>>,
    pub order_by: Option<Vec<Node>>,
    pub limit: Option<Vec<Node>>,
    pub last_priority: u8,
    /// 1-based indices of the segments merged into this state.
    pub merged: Vec<usize>,
}

impl TranspileState {
    /// Initial state for a chain head: `FROM x` reads from `x`, a full
    /// `SELECT`/`WITH` query becomes a subquery, anything else is used as-is.
    pub fn from_head(head: &[Node]) -> Self {
        let head = trim(head);
        let from = match head.first() {
            Some(first) if first.is_keyword("FROM") => trim(&head[1..]).to_vec(),
            Some(first) if first.is_keyword("SELECT") || first.is_keyword("WITH") => {
                vec![parenthesize(head.to_vec())]
            }
            _ => head.to_vec(),
        };
        if from.is_empty() {
            warn!("pipe chain has no source");
        }
        Self {
            from,
            ..Self::default()
        }
    }

    /// Merge one segment. The caller has already closed the state if needed.
    pub fn merge(&mut self, operator: PipeOperator, view: &SegmentView<'_>, index: usize) {
        let args = view.args;
        match operator {
            PipeOperator::Join => self.join = Some(clause(view)),
            PipeOperator::Where => self.where_clause = Some(clause(view)),
            PipeOperator::OrderBy => self.order_by = Some(clause(view)),
            PipeOperator::Limit => self.limit = Some(clause(view)),
            PipeOperator::Aggregate => {
                let (aggregates, group_by) = split_at_keyword(args, "GROUP BY");
                let group_by = group_by.filter(|g| !g.is_empty());

                let mut select = Vec::new();
                let parts = [group_by, self.select.as_deref(), Some(aggregates)];
                for part in parts.into_iter().flatten().filter(|p| !p.is_empty()) {
                    if !select.is_empty() {
                        select.extend(comma());
                    }
                    select.extend(part.iter().cloned());
                }

                self.select = (!select.is_empty()).then_some(select);
                self.group_by = group_by.map(<[Node]>::to_vec);
            }
            PipeOperator::Select => self.select = Some(args.to_vec()),
            PipeOperator::Extend => {
                let mut select = self
                    .select
                    .take()
                    .unwrap_or_else(|| vec![Node::token("*", &WILDCARD)]);
                select.extend(comma());
                select.extend(args.iter().cloned());
                self.select = Some(select);
            }
        }
        self.last_priority = operator.priority();
        self.merged.push(index);
    }

    /// Render as `SELECT ... FROM ... [JOIN] [WHERE] [GROUP BY] [ORDER BY] [LIMIT]`.
    pub fn render(&self, parens: bool) -> Vec<Node> {
        let mut nodes = vec![keyword("SELECT"), space()];
        match &self.select {
            Some(select) if !select.is_empty() => nodes.extend(select.iter().cloned()),
            _ => nodes.push(Node::token("*", &WILDCARD)),
        }
        nodes.extend([newline(), keyword("FROM"), space()]);
        nodes.extend(self.from.iter().cloned());

        for clause in [&self.join, &self.where_clause].into_iter().flatten() {
            nodes.push(newline());
            nodes.extend(clause.iter().cloned());
        }
        if let Some(group_by) = &self.group_by {
            nodes.extend([newline(), keyword("GROUP BY"), space()]);
            nodes.extend(group_by.iter().cloned());
        }
        for clause in [&self.order_by, &self.limit].into_iter().flatten() {
            nodes.push(newline());
            nodes.extend(clause.iter().cloned());
        }

        if parens { vec![parenthesize(nodes)] } else { nodes }
    }

    /// `<prefix><i>[_<j>...]` from the merged segment indices.
    pub fn cte_name(&self, prefix: &str) -> String {
        if self.merged.is_empty() {
            return format!("{prefix}0");
        }
        let indices: Vec<String> = self.merged.iter().map(usize::to_string).collect();
        format!("{prefix}{}", indices.join("_"))
    }
}

/// Replace every pipe chain in `nodes` with equivalent SQL.
pub fn transpile(nodes: Vec<Node>, mode: OutputMode, cte_prefix: &str) -> Vec<Node> {
    transform_pipe_nodes(nodes, &mut |pipe| match mode {
        OutputMode::Nested => transpile_nested(pipe),
        OutputMode::Cte => transpile_cte(pipe, cte_prefix),
    })
}

fn transpile_nested(pipe: PipeNode) -> Node {
    let state = fold_chain(&pipe, |closed| closed.render(true));
    Node::List(state.render(false))
}

fn transpile_cte(pipe: PipeNode, prefix: &str) -> Node {
    let mut ctes: Vec<(String, Vec<Node>)> = Vec::new();
    let last = fold_chain(&pipe, |closed| {
        let name = closed.cte_name(prefix);
        ctes.push((name.clone(), closed.render(false)));
        vec![Node::token(name, &NAME)]
    });
    let last_name = last.cte_name(prefix);
    ctes.push((last_name.clone(), last.render(false)));
    debug!(ctes = ?ctes.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(), "built CTE chain");

    let mut nodes = vec![Node::token("WITH", &KEYWORD), newline()];
    for (i, (name, body)) in ctes.into_iter().enumerate() {
        if i > 0 {
            nodes.extend([Node::token(",", &PUNCTUATION), newline()]);
        }
        nodes.extend([
            Node::token(name, &NAME),
            space(),
            keyword("AS"),
            space(),
            Node::token("(", &PUNCTUATION),
            newline(),
        ]);
        nodes.extend(body);
        nodes.extend([newline(), Node::token(")", &PUNCTUATION)]);
    }
    nodes.extend([
        newline(),
        keyword("SELECT"),
        space(),
        Node::token("*", &WILDCARD),
        space(),
        keyword("FROM"),
        space(),
        Node::token(last_name, &NAME),
    ]);
    Node::List(nodes)
}

/// Fold every segment of `pipe` into states. `close` turns a finished state
/// into the `from` of the next one; the last, still open state is returned.
fn fold_chain<F>(pipe: &PipeNode, mut close: F) -> TranspileState
where
    F: FnMut(TranspileState) -> Vec<Node>,
{
    let mut state = TranspileState::from_head(&pipe.head);

    for (i, segment) in pipe.segments.iter().enumerate() {
        let Some(view) = SegmentView::parse(segment) else {
            warn!(segment = %segment.to_sql().trim(), "pipe segment without an operator, skipped");
            continue;
        };
        let Some(operator) = PipeOperator::from_name(&view.operator_name) else {
            warn!(operator = %view.operator_name, "unknown pipe operator, segment skipped");
            continue;
        };

        if state.last_priority >= operator.priority() {
            let from = close(std::mem::take(&mut state));
            state = TranspileState {
                from,
                ..TranspileState::default()
            };
        }
        state.merge(operator, &view, i + 1);
    }

    state
}

fn clause(view: &SegmentView<'_>) -> Vec<Node> {
    let mut nodes = vec![Node::Token(view.operator.clone())];
    if !view.args.is_empty() {
        nodes.push(space());
        nodes.extend(view.args.iter().cloned());
    }
    nodes
}

fn parenthesize(nodes: Vec<Node>) -> Node {
    let mut wrapped = Vec::with_capacity(nodes.len() + 2);
    wrapped.push(Node::token("(", &PUNCTUATION));
    wrapped.extend(nodes);
    wrapped.push(Node::token(")", &PUNCTUATION));
    Node::List(wrapped)
}

fn keyword(value: &str) -> Node {
    Node::token(value, &KEYWORD)
}

fn space() -> Node {
    Node::token(" ", &WHITESPACE)
}

fn newline() -> Node {
    Node::token("\n", &NEWLINE)
}

fn comma() -> [Node; 2] {
    [Node::token(",", &PUNCTUATION), space()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::dialect::sqlparse;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    fn nested(input: &str) -> String {
        let rules = sqlparse().unwrap();
        transpile(parse(input, &rules), OutputMode::Nested, "_pipe_").to_sql()
    }

    fn cte(input: &str) -> String {
        let rules = sqlparse().unwrap();
        transpile(parse(input, &rules), OutputMode::Cte, "_pipe_").to_sql()
    }

    #[test]
    fn test_repeated_where_nests() {
        assert_eq!(
            nested("FROM t |> WHERE b=9 |> WHERE c=10"),
            "SELECT *\nFROM (SELECT *\nFROM t\nWHERE b=9)\nWHERE c=10"
        );
    }

    #[test]
    fn test_aggregate_group_by() {
        assert_eq!(
            nested("FROM t |> AGGREGATE count(*) GROUP BY k"),
            "SELECT k, count(*)\nFROM t\nGROUP BY k"
        );
    }

    #[test]
    fn test_aggregate_without_group_by() {
        assert_eq!(nested("FROM t |> AGGREGATE count(*) AS c"), "SELECT count(*) AS c\nFROM t");
    }

    #[test]
    fn test_increasing_priorities_merge() {
        assert_eq!(
            nested("FROM t |> LEFT JOIN u ON t.id = u.id |> WHERE a > 1 |> SELECT a, b |> ORDER BY a DESC |> LIMIT 10"),
            "SELECT a, b\nFROM t\nLEFT JOIN u ON t.id = u.id\nWHERE a > 1\nORDER BY a DESC\nLIMIT 10"
        );
    }

    #[test]
    fn test_extend_seeds_star() {
        assert_eq!(nested("FROM t |> EXTEND a + 1 AS b"), "SELECT *, a + 1 AS b\nFROM t");
        assert_eq!(nested("FROM t |> SELECT a |> EXTEND a * 2 AS d"), "SELECT a, a * 2 AS d\nFROM t");
    }

    #[test]
    fn test_select_after_extend_flushes() {
        assert_eq!(
            nested("FROM t |> EXTEND x AS y |> SELECT y"),
            "SELECT y\nFROM (SELECT *, x AS y\nFROM t)"
        );
    }

    #[test]
    fn test_where_after_aggregate_filters_result() {
        assert_eq!(
            nested("FROM t |> AGGREGATE count(*) AS c GROUP BY k |> WHERE c > 5"),
            "SELECT *\nFROM (SELECT k, count(*) AS c\nFROM t\nGROUP BY k)\nWHERE c > 5"
        );
    }

    #[test]
    fn test_unknown_operator_is_skipped() {
        assert_eq!(nested("FROM t |> FROBNICATE x |> LIMIT 3"), "SELECT *\nFROM t\nLIMIT 3");
        assert_eq!(nested("FROM t |> |> LIMIT 3"), "SELECT *\nFROM t\nLIMIT 3");
    }

    #[test]
    fn test_select_head_becomes_subquery() {
        assert_eq!(
            nested("SELECT * FROM t |> LIMIT 1"),
            "SELECT *\nFROM (SELECT * FROM t)\nLIMIT 1"
        );
    }

    #[test]
    fn test_nested_pipe_in_source() {
        assert_eq!(
            nested("FROM (FROM t |> WHERE a) |> WHERE b"),
            "SELECT *\nFROM (SELECT *\nFROM t\nWHERE a)\nWHERE b"
        );
    }

    #[test]
    fn test_plain_sql_passes_through() {
        let input = "SELECT a FROM t WHERE b = 1";
        assert_eq!(nested(input), input);
    }

    #[test]
    fn test_cte_mode() {
        assert_eq!(
            cte("FROM t |> WHERE b=9 |> WHERE c=10"),
            "WITH\n_pipe_1 AS (\nSELECT *\nFROM t\nWHERE b=9\n),\n_pipe_2 AS (\nSELECT *\nFROM _pipe_1\nWHERE c=10\n)\nSELECT * FROM _pipe_2"
        );
    }

    #[test]
    fn test_cte_names_concatenate_merged_segments() {
        assert_eq!(
            cte("FROM t |> WHERE a |> LIMIT 5"),
            "WITH\n_pipe_1_2 AS (\nSELECT *\nFROM t\nWHERE a\nLIMIT 5\n)\nSELECT * FROM _pipe_1_2"
        );
        assert_eq!(cte("FROM t |> NOPE"), "WITH\n_pipe_0 AS (\nSELECT *\nFROM t\n)\nSELECT * FROM _pipe_0");
    }

    #[test]
    fn test_modes_agree_on_statement_count() {
        let input = "FROM t |> WHERE a |> AGGREGATE count(*) AS c GROUP BY k |> WHERE c > 1 |> ORDER BY c |> LIMIT 3";
        let nested_sql = nested(input);
        let cte_sql = cte(input);
        assert_eq!(nested_sql.matches("SELECT").count(), 2);
        // one extra SELECT for the final `SELECT * FROM <last>`
        assert_eq!(cte_sql.matches("SELECT").count(), 3);
        assert!(cte_sql.ends_with("SELECT * FROM _pipe_3_4_5"));
    }

    #[test]
    fn test_each_priority_drop_adds_one_level() {
        let segments = [
            ("JOIN u ON t.id = u.id", PipeOperator::Join),
            ("WHERE a > 1", PipeOperator::Where),
            ("AGGREGATE count(*) AS c GROUP BY k", PipeOperator::Aggregate),
            ("SELECT k, c", PipeOperator::Select),
            ("EXTEND c + 1 AS d", PipeOperator::Extend),
            ("ORDER BY k", PipeOperator::OrderBy),
            ("LIMIT 3", PipeOperator::Limit),
        ];

        let mut chains: Vec<Vec<usize>> = (0..segments.len()).map(|a| vec![a]).collect();
        for len in 2..=3 {
            let shorter: Vec<Vec<usize>> = chains.iter().filter(|c| c.len() == len - 1).cloned().collect();
            for chain in shorter {
                for next in 0..segments.len() {
                    let mut longer = chain.clone();
                    longer.push(next);
                    chains.push(longer);
                }
            }
        }
        assert_eq!(chains.len(), 7 + 49 + 343);

        let rules = sqlparse().unwrap();
        for chain in chains {
            let input: String = std::iter::once("FROM t".to_string())
                .chain(chain.iter().map(|&i| format!(" |> {}", segments[i].0)))
                .collect();
            let drops = chain
                .windows(2)
                .filter(|w| segments[w[1]].1.priority() <= segments[w[0]].1.priority())
                .count();

            let nested_sql = transpile(parse(&input, &rules), OutputMode::Nested, "_pipe_").to_sql();
            let cte_sql = transpile(parse(&input, &rules), OutputMode::Cte, "_pipe_").to_sql();
            assert_eq!(nested_sql.matches("(SELECT").count(), drops, "{input}");
            assert_eq!(cte_sql.matches(" AS (\n").count(), drops + 1, "{input}");
        }
    }

    #[test]
    fn test_increasing_chain_is_one_select() {
        let input = "FROM t |> JOIN u ON t.id = u.id |> WHERE a |> AGGREGATE count(*) AS c GROUP BY k \
                     |> EXTEND c * 2 AS d |> ORDER BY d |> LIMIT 1";
        let sql = nested(input);
        assert_eq!(sql.matches("SELECT").count(), 1);
        assert_eq!(
            sql,
            "SELECT k, count(*) AS c, c * 2 AS d\nFROM t\nJOIN u ON t.id = u.id\nWHERE a\nGROUP BY k\nORDER BY d\nLIMIT 1"
        );
    }

    #[test]
    fn test_operator_lookup() {
        assert_eq!(PipeOperator::from_name("LEFT OUTER JOIN"), Some(PipeOperator::Join));
        assert_eq!(PipeOperator::from_name("JOIN"), Some(PipeOperator::Join));
        assert_eq!(PipeOperator::from_name("XJOIN"), None);
        assert_eq!(PipeOperator::from_name("ORDER BY").map(PipeOperator::priority), Some(9));
    }

    #[test]
    fn test_output_mode_parse() {
        assert_eq!("CTE".parse::<OutputMode>(), Ok(OutputMode::Cte));
        assert!("flat".parse::<OutputMode>().is_err());
        assert_eq!(OutputMode::Nested.to_string(), "nested");
    }
}
