//! Grouping passes over the token stream.
//!
//! Parsing is deliberately shallow: tokens are nested by parentheses, then
//! split into pipe chains at `|>` tokens. Segment contents are interpreted
//! later by [`SegmentView`].
//!
//! ```
//! use pipesql::ast::{Node, ToSql};
//! use pipesql::lexer::dialect::sqlparse;
//! use pipesql::parser::parse;
//!
//! let rules = sqlparse().unwrap();
//! let nodes = parse("FROM t |> WHERE a = 1", &rules);
//! assert!(matches!(nodes[0], Node::Pipe(_)));
//! assert_eq!(nodes.to_sql(), "FROM t |> WHERE a = 1");
//! ```

use crate::ast::{Node, PipeNode, tokens_to_nodes, trim};
use crate::lexer::dialect::PIPE;
use crate::lexer::{Rule, Token, TokenType, lex};

/// Lex `input` and group it into parentheses and pipe chains.
pub fn parse(input: &str, rules: &dyn Rule) -> Vec<Node> {
    let nodes = tokens_to_nodes(lex(input, rules));
    group_pipes(group_parenthesis(nodes), &PIPE)
}

/// Nest every `(` ... `)` run into a [`Node::List`].
///
/// A `)` with no matching `(` stays where it is; an unclosed `(` keeps
/// everything after it inside its list.
pub fn group_parenthesis(nodes: Vec<Node>) -> Vec<Node> {
    let mut iter = nodes.into_iter();
    group_until_close(&mut iter, false)
}

fn group_until_close(iter: &mut impl Iterator<Item = Node>, nested: bool) -> Vec<Node> {
    let mut out = Vec::new();
    while let Some(node) = iter.next() {
        match node {
            Node::List(children) => out.push(Node::List(group_parenthesis(children))),
            node if node.is_raw("(") => {
                let mut list = vec![node];
                list.extend(group_until_close(iter, true));
                out.push(Node::List(list));
            }
            node if node.is_raw(")") && nested => {
                out.push(node);
                return out;
            }
            node => out.push(node),
        }
    }
    out
}

/// Split each statement at `pipe` tokens into a [`Node::Pipe`].
///
/// Parenthesized lists are processed recursively; their own `(` and `)`
/// stay outside the chain built from their contents. A `;` ends the chain
/// of the statement before it. Statements without a pipe are unchanged.
pub fn group_pipes(nodes: Vec<Node>, pipe: &TokenType) -> Vec<Node> {
    let nodes: Vec<Node> = nodes
        .into_iter()
        .map(|node| match node {
            Node::List(children) => Node::List(group_parenthesized(children, pipe)),
            node => node,
        })
        .collect();

    let mut out = Vec::new();
    let mut statement = Vec::new();
    for node in nodes {
        if node.is_raw(";") {
            out.extend(split_pipes(std::mem::take(&mut statement), pipe));
            out.push(node);
        } else {
            statement.push(node);
        }
    }
    out.extend(split_pipes(statement, pipe));
    out
}

fn group_parenthesized(mut children: Vec<Node>, pipe: &TokenType) -> Vec<Node> {
    let opening = (children.first().is_some_and(|n| n.is_raw("("))).then(|| children.remove(0));
    let closing = match children.last() {
        Some(last) if last.is_raw(")") => children.pop(),
        _ => None,
    };

    let mut out = Vec::with_capacity(children.len() + 2);
    out.extend(opening);
    out.extend(group_pipes(children, pipe));
    out.extend(closing);
    out
}

fn split_pipes(nodes: Vec<Node>, pipe: &TokenType) -> Vec<Node> {
    if !nodes.iter().any(|n| n.is_kind(pipe)) {
        return nodes;
    }

    let mut chain = PipeNode::default();
    for node in nodes {
        if node.is_kind(pipe) {
            chain.segments.push(vec![node]);
        } else if let Some(segment) = chain.segments.last_mut() {
            segment.push(node);
        } else {
            chain.head.push(node);
        }
    }
    vec![Node::Pipe(chain)]
}

/// Walks a node slice skipping trivia.
pub struct Cursor<'a> {
    nodes: &'a [Node],
    index: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(nodes: &'a [Node]) -> Self {
        Self { nodes, index: 0 }
    }

    fn skip_trivia(&mut self) {
        while self.nodes.get(self.index).is_some_and(Node::is_trivia) {
            self.index += 1;
        }
    }

    /// Next non-trivia node.
    pub fn next_node(&mut self) -> Option<&'a Node> {
        self.skip_trivia();
        let node = self.nodes.get(self.index)?;
        self.index += 1;
        Some(node)
    }

    /// Next non-trivia node if it is a token.
    pub fn next_token(&mut self) -> Option<&'a Token> {
        self.skip_trivia();
        let token = self.nodes.get(self.index)?.as_token()?;
        self.index += 1;
        Some(token)
    }

    /// Remaining nodes, trimmed.
    pub fn rest(&self) -> &'a [Node] {
        trim(&self.nodes[self.index.min(self.nodes.len())..])
    }
}

/// A pipe segment split into its parts: `|> OPERATOR args...`.
#[derive(Debug)]
pub struct SegmentView<'a> {
    pub pipe: &'a Token,
    pub operator: &'a Token,
    /// Upper-cased operator with whitespace collapsed, e.g. `ORDER BY`.
    pub operator_name: String,
    pub args: &'a [Node],
}

impl<'a> SegmentView<'a> {
    pub fn parse(segment: &'a [Node]) -> Option<Self> {
        let mut cursor = Cursor::new(segment);
        let pipe = cursor.next_token()?;
        if pipe.raw_value != "|>" {
            return None;
        }
        let operator = cursor.next_token()?;
        Some(Self {
            pipe,
            operator,
            operator_name: operator.normalized(),
            args: cursor.rest(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ToSql;
    use crate::lexer::dialect::sqlparse;
    use crate::lexer::{RegexRule, RuleList, StringRule};
    use pretty_assertions::assert_eq;

    static OPEN: TokenType = TokenType::new("Open", "(");
    static CLOSE: TokenType = TokenType::new("Close", ")");
    static IDENT: TokenType = TokenType::new("Ident", "identifier");

    fn paren_rules() -> RuleList {
        RuleList::new(vec![
            Box::new(StringRule::new("(", &OPEN).unwrap()),
            Box::new(StringRule::new(")", &CLOSE).unwrap()),
            Box::new(RegexRule::new(r"[^() ]* *", &IDENT).unwrap()),
        ])
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Shape {
        Leaf(String),
        Group(Vec<Shape>),
    }

    fn leaf(s: &str) -> Shape {
        Shape::Leaf(s.to_string())
    }

    fn shape(nodes: &[Node]) -> Vec<Shape> {
        nodes
            .iter()
            .map(|node| match node {
                Node::Token(t) => Shape::Leaf(t.raw_value.clone()),
                Node::List(children) => Shape::Group(shape(children)),
                Node::Pipe(_) => panic!("unexpected pipe"),
            })
            .collect()
    }

    fn group(input: &str) -> Vec<Node> {
        group_parenthesis(tokens_to_nodes(lex(input, &paren_rules())))
    }

    #[test]
    fn test_flat() {
        assert_eq!(shape(&group("a b c")), vec![leaf("a "), leaf("b "), leaf("c")]);
    }

    #[test]
    fn test_nested_groups() {
        assert_eq!(
            shape(&group("(a (b) c)")),
            vec![Shape::Group(vec![
                leaf("("),
                leaf("a "),
                Shape::Group(vec![leaf("("), leaf("b"), leaf(")")]),
                leaf(" "),
                leaf("c"),
                leaf(")"),
            ])]
        );
    }

    #[test]
    fn test_stray_close_after_groups() {
        assert_eq!(
            shape(&group("(a)(b))")),
            vec![
                Shape::Group(vec![leaf("("), leaf("a"), leaf(")")]),
                Shape::Group(vec![leaf("("), leaf("b"), leaf(")")]),
                leaf(")"),
            ]
        );
    }

    #[test]
    fn test_stray_close_between_groups() {
        assert_eq!(
            shape(&group("(a))(b)")),
            vec![
                Shape::Group(vec![leaf("("), leaf("a"), leaf(")")]),
                leaf(")"),
                Shape::Group(vec![leaf("("), leaf("b"), leaf(")")]),
            ]
        );
    }

    #[test]
    fn test_unbalanced() {
        assert_eq!(shape(&group("(a")), vec![Shape::Group(vec![leaf("("), leaf("a")])]);
        assert_eq!(shape(&group("a)")), vec![leaf("a"), leaf(")")]);
        assert_eq!(shape(&group("((")), vec![Shape::Group(vec![leaf("("), Shape::Group(vec![leaf("(")])])]);
    }

    /// Deterministically generated balanced inputs with their expected shape.
    fn generated_cases() -> Vec<(String, Vec<Shape>)> {
        let mut cases: Vec<(String, Vec<Shape>)> = vec![
            (String::new(), vec![]),
            ("a ".to_string(), vec![leaf("a ")]),
            ("b ".to_string(), vec![leaf("b ")]),
        ];
        for _ in 0..3 {
            let mut next = cases.clone();
            for (text, expected) in cases.iter().take(6) {
                let mut inner = vec![leaf("(")];
                inner.extend(expected.iter().cloned());
                inner.push(leaf(")"));
                next.push((format!("({text})"), vec![Shape::Group(inner)]));
            }
            for (i, (left, left_shape)) in cases.iter().enumerate().take(5) {
                let (right, right_shape) = &cases[cases.len() - 1 - i];
                // two adjacent identifiers would lex as one token
                if left.ends_with(' ') || right.starts_with('(') || left.is_empty() || right.is_empty() {
                    let mut combined = left_shape.clone();
                    combined.extend(right_shape.iter().cloned());
                    next.push((format!("{left}{right}"), combined));
                }
            }
            cases = next;
        }
        cases
    }

    #[test]
    fn test_generated_cases() {
        let cases = generated_cases();
        assert!(cases.len() > 20);
        for (input, expected) in cases {
            let nodes = group(&input);
            assert_eq!(shape(&nodes), expected, "input {input:?}");
            assert_eq!(nodes.to_sql(), input);
        }
    }

    #[test]
    fn test_group_pipes_top_level() {
        let rules = sqlparse().unwrap();
        let nodes = parse("FROM t |> WHERE b=9 |> LIMIT 1", &rules);
        assert_eq!(nodes.len(), 1);
        let Node::Pipe(pipe) = &nodes[0] else {
            panic!("expected pipe");
        };
        assert_eq!(pipe.head.to_sql(), "FROM t ");
        assert_eq!(pipe.segments.len(), 2);
        assert_eq!(pipe.segments[0].to_sql(), "|> WHERE b=9 ");
        assert_eq!(pipe.segments[1].to_sql(), "|> LIMIT 1");
    }

    #[test]
    fn test_group_pipes_without_pipe_is_unchanged() {
        let rules = sqlparse().unwrap();
        let input = "SELECT a FROM (SELECT 1) x";
        let nodes = parse(input, &rules);
        assert!(nodes.iter().all(|n| !matches!(n, Node::Pipe(_))));
        assert_eq!(nodes.to_sql(), input);
    }

    #[test]
    fn test_group_pipes_inside_parentheses() {
        let rules = sqlparse().unwrap();
        let input = "SELECT * FROM (FROM t |> WHERE a)";
        let nodes = parse(input, &rules);
        assert_eq!(nodes.to_sql(), input);
        let Some(Node::List(list)) = nodes.last() else {
            panic!("expected list");
        };
        assert!(list[0].is_raw("("));
        assert!(matches!(list[1], Node::Pipe(_)));
        assert!(list[2].is_raw(")"));
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_semicolon_ends_chain() {
        let rules = sqlparse().unwrap();
        let input = "FROM a |> LIMIT 1; FROM b |> LIMIT 2";
        let nodes = parse(input, &rules);
        assert_eq!(nodes.to_sql(), input);
        assert!(matches!(nodes[0], Node::Pipe(_)));
        assert!(nodes[1].is_raw(";"));
        assert!(matches!(nodes[2], Node::Pipe(_)));
        assert_eq!(nodes.len(), 3);
    }

    #[test]
    fn test_segment_view() {
        let rules = sqlparse().unwrap();
        let nodes = parse("FROM t |> order  by x DESC ", &rules);
        let Node::Pipe(pipe) = &nodes[0] else {
            panic!("expected pipe");
        };
        let view = SegmentView::parse(&pipe.segments[0]).unwrap();
        assert_eq!(view.operator_name, "ORDER BY");
        assert_eq!(view.operator.raw_value, "order  by");
        assert_eq!(view.args.to_sql(), "x DESC");
    }

    #[test]
    fn test_segment_view_rejects_bare_pipe() {
        let rules = sqlparse().unwrap();
        let nodes = parse("FROM t |>", &rules);
        let Node::Pipe(pipe) = &nodes[0] else {
            panic!("expected pipe");
        };
        assert!(SegmentView::parse(&pipe.segments[0]).is_none());
    }
}
