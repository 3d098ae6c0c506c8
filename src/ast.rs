//! Node tree produced by grouping the token stream.
//!
//! Every node renders back to text by concatenation, so a tree built from
//! lexed input always reproduces that input exactly.

use crate::lexer::dialect::{
    MULTILINE_COMMENT, MULTILINE_HINT, NEWLINE, SINGLE_COMMENT, SINGLE_HINT, WHITESPACE,
};
use crate::lexer::{Token, TokenType};

/// Trait for rendering nodes back to SQL text.
pub trait ToSql {
    fn to_sql(&self) -> String;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Token(Token),
    /// A parenthesized group, including its parentheses when present.
    List(Vec<Node>),
    Pipe(PipeNode),
}

/// A pipe chain: the part before the first `|>` and one segment per `|>`.
/// Every segment starts with its pipe token.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipeNode {
    pub head: Vec<Node>,
    pub segments: Vec<Vec<Node>>,
}

impl Node {
    /// A synthesized token node.
    pub fn token(raw_value: impl Into<String>, kind: &'static TokenType) -> Self {
        Node::Token(Token::new(0, raw_value, kind))
    }

    pub fn as_token(&self) -> Option<&Token> {
        match self {
            Node::Token(token) => Some(token),
            _ => None,
        }
    }

    /// True for a token whose raw value equals `value`.
    pub fn is_raw(&self, value: &str) -> bool {
        self.as_token().is_some_and(|t| t.raw_value == value)
    }

    /// True for a token with the given tag.
    pub fn is_kind(&self, kind: &TokenType) -> bool {
        self.as_token().is_some_and(|t| t.is(kind))
    }

    /// True for a token whose normalized value is `keyword` (upper case).
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.as_token().is_some_and(|t| t.normalized() == keyword)
    }

    /// Whitespace, line breaks, comments and hints.
    pub fn is_trivia(&self) -> bool {
        let Some(token) = self.as_token() else {
            return false;
        };
        [&WHITESPACE, &NEWLINE, &SINGLE_COMMENT, &MULTILINE_COMMENT, &SINGLE_HINT, &MULTILINE_HINT]
            .iter()
            .any(|kind| token.is(kind))
            || (!token.raw_value.is_empty() && token.raw_value.trim().is_empty())
    }

    /// Direct children in render order.
    pub fn children(&self) -> Vec<&Node> {
        match self {
            Node::Token(_) => Vec::new(),
            Node::List(nodes) => nodes.iter().collect(),
            Node::Pipe(pipe) => pipe
                .head
                .iter()
                .chain(pipe.segments.iter().flatten())
                .collect(),
        }
    }

    fn write_sql(&self, out: &mut String) {
        match self {
            Node::Token(token) => out.push_str(&token.raw_value),
            Node::List(nodes) => nodes.iter().for_each(|n| n.write_sql(out)),
            Node::Pipe(pipe) => pipe
                .head
                .iter()
                .chain(pipe.segments.iter().flatten())
                .for_each(|n| n.write_sql(out)),
        }
    }
}

impl ToSql for Node {
    fn to_sql(&self) -> String {
        let mut out = String::new();
        self.write_sql(&mut out);
        out
    }
}

impl ToSql for [Node] {
    fn to_sql(&self) -> String {
        let mut out = String::new();
        self.iter().for_each(|n| n.write_sql(&mut out));
        out
    }
}

impl ToSql for Vec<Node> {
    fn to_sql(&self) -> String {
        self.as_slice().to_sql()
    }
}

/// Wrap lexed tokens as leaf nodes.
pub fn tokens_to_nodes(tokens: Vec<Token>) -> Vec<Node> {
    tokens.into_iter().map(Node::Token).collect()
}

/// Drop leading and trailing trivia.
pub fn trim(nodes: &[Node]) -> &[Node] {
    let start = nodes.iter().position(|n| !n.is_trivia()).unwrap_or(nodes.len());
    let end = nodes.iter().rposition(|n| !n.is_trivia()).map_or(start, |i| i + 1);
    &nodes[start..end]
}

/// Position of the first top-level node that is the keyword `keyword`.
pub fn find_keyword(nodes: &[Node], keyword: &str) -> Option<usize> {
    nodes.iter().position(|n| n.is_keyword(keyword))
}

/// Split at the first top-level `keyword`, trimming both halves.
pub fn split_at_keyword<'a>(nodes: &'a [Node], keyword: &str) -> (&'a [Node], Option<&'a [Node]>) {
    match find_keyword(nodes, keyword) {
        Some(i) => (trim(&nodes[..i]), Some(trim(&nodes[i + 1..]))),
        None => (trim(nodes), None),
    }
}

/// Rebuild the tree bottom-up, handing every pipe chain to `f` after its
/// nested chains have already been transformed.
pub fn transform_pipe_nodes<F>(nodes: Vec<Node>, f: &mut F) -> Vec<Node>
where
    F: FnMut(PipeNode) -> Node,
{
    nodes.into_iter().map(|node| transform_node(node, f)).collect()
}

fn transform_node<F>(node: Node, f: &mut F) -> Node
where
    F: FnMut(PipeNode) -> Node,
{
    match node {
        Node::Token(_) => node,
        Node::List(nodes) => Node::List(transform_pipe_nodes(nodes, f)),
        Node::Pipe(pipe) => {
            let head = transform_pipe_nodes(pipe.head, f);
            let segments = pipe
                .segments
                .into_iter()
                .map(|segment| transform_pipe_nodes(segment, f))
                .collect();
            f(PipeNode { head, segments })
        }
    }
}

/// Visit every pipe chain, outermost first.
pub fn visit_pipe_nodes<'a, F>(nodes: &'a [Node], f: &mut F)
where
    F: FnMut(&'a PipeNode),
{
    for node in nodes {
        if let Node::Pipe(pipe) = node {
            f(pipe);
        }
        for child in node.children() {
            visit_pipe_nodes(std::slice::from_ref(child), f);
        }
    }
}

/// First token anywhere in the tree with the given tag.
pub fn find_token<'a>(nodes: &'a [Node], kind: &TokenType) -> Option<&'a Token> {
    nodes.iter().find_map(|node| match node {
        Node::Token(token) if token.is(kind) => Some(token),
        Node::Token(_) => None,
        _ => node
            .children()
            .into_iter()
            .find_map(|child| find_token(std::slice::from_ref(child), kind)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::dialect::{NAME, PUNCTUATION};

    fn name(raw: &str) -> Node {
        Node::token(raw.to_string(), &NAME)
    }

    fn space() -> Node {
        Node::token(" ", &WHITESPACE)
    }

    #[test]
    fn test_concatenation() {
        let nodes = vec![
            name("a"),
            space(),
            Node::List(vec![Node::token("(", &PUNCTUATION), name("b"), Node::token(")", &PUNCTUATION)]),
        ];
        assert_eq!(nodes.to_sql(), "a (b)");
        assert_eq!(nodes[2].to_sql(), "(b)");
    }

    #[test]
    fn test_pipe_renders_head_then_segments() {
        let pipe = Node::Pipe(PipeNode {
            head: vec![name("t"), space()],
            segments: vec![vec![name("|>"), space(), name("x")]],
        });
        assert_eq!(pipe.to_sql(), "t |> x");
        assert_eq!(pipe.children().len(), 5);
    }

    #[test]
    fn test_trim() {
        let nodes = vec![space(), name("a"), space(), name("b"), space(), space()];
        assert_eq!(trim(&nodes).to_sql(), "a b");
        let blank = vec![space(), space()];
        assert!(trim(&blank).is_empty());
        assert!(trim(&[]).is_empty());
    }

    #[test]
    fn test_split_at_keyword() {
        let nodes = vec![name("ts"), space(), name("by"), space(), name("1h")];
        let (before, after) = split_at_keyword(&nodes, "BY");
        assert_eq!(before.to_sql(), "ts");
        assert_eq!(after.map(|a| a.to_sql()), Some("1h".to_string()));
        let (all, none) = split_at_keyword(&nodes, "AS");
        assert_eq!(all.to_sql(), "ts by 1h");
        assert!(none.is_none());
    }

    #[test]
    fn test_transform_is_bottom_up() {
        let inner = Node::Pipe(PipeNode {
            head: vec![name("inner")],
            segments: vec![],
        });
        let outer = Node::Pipe(PipeNode {
            head: vec![Node::List(vec![inner])],
            segments: vec![],
        });
        let mut seen = Vec::new();
        let out = transform_pipe_nodes(vec![outer], &mut |pipe: PipeNode| {
            let text = pipe.head.to_sql();
            seen.push(text.clone());
            Node::token(format!("<{text}>"), &NAME)
        });
        assert_eq!(seen, vec!["inner", "<inner>"]);
        assert_eq!(out.to_sql(), "<<inner>>");
    }
}
