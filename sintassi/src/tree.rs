//! Parse trees and their bracketed text form.

use std::fmt;
use std::str::FromStr;

use crate::errors::SintassiError;
use crate::token::Token;

/// A constituency tree. Leaves carry token text; inner nodes carry symbol names.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ParseTree {
    label: String,
    children: Vec<ParseTree>,
}

impl ParseTree {
    /// Creates a leaf.
    pub fn leaf<S>(text: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            label: text.into(),
            children: vec![],
        }
    }

    /// Creates an inner node.
    pub fn node<S>(label: S, children: Vec<ParseTree>) -> Self
    where
        S: Into<String>,
    {
        Self {
            label: label.into(),
            children,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn children(&self) -> &[ParseTree] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Whether the node has exactly one child and that child is a leaf.
    pub fn is_preterminal(&self) -> bool {
        self.children.len() == 1 && self.children[0].is_leaf()
    }

    /// Collects leaf texts from left to right.
    pub fn leaves(&self) -> Vec<&str> {
        let mut result = vec![];
        self.visit(&mut |node| {
            if node.is_leaf() {
                result.push(node.label());
            }
        });
        result
    }

    /// Collects `(tag, word)` pairs of pre-terminal nodes from left to right.
    pub fn preterminals(&self) -> Vec<(&str, &str)> {
        let mut result = vec![];
        self.visit(&mut |node| {
            if node.is_preterminal() {
                result.push((node.label(), node.children[0].label()));
            }
        });
        result
    }

    /// Builds tokens from the leaves, tagged with their pre-terminal labels.
    pub fn tokens(&self) -> Vec<Token> {
        let mut tokens = vec![];
        let mut offset = 0;
        self.collect_tokens(None, &mut tokens, &mut offset);
        tokens
    }

    fn collect_tokens(&self, tag: Option<&str>, tokens: &mut Vec<Token>, offset: &mut usize) {
        if self.is_leaf() {
            let start = *offset;
            *offset += self.label.len() + 1;
            let mut token = Token::new(self.label.as_str()).with_span(start..*offset - 1);
            if let Some(tag) = tag {
                token = token.with_pos(tag);
            }
            tokens.push(token);
            return;
        }
        let tag = self.is_preterminal().then_some(self.label.as_str());
        for child in &self.children {
            child.collect_tokens(tag, tokens, offset);
        }
    }

    /// Collects labeled spans `(label, start, end)` of phrasal nodes.
    ///
    /// Pre-terminals and leaves are excluded. Positions count leaves.
    pub fn brackets(&self) -> Vec<(String, usize, usize)> {
        let mut result = vec![];
        self.collect_brackets(0, &mut result);
        result
    }

    fn collect_brackets(&self, start: usize, result: &mut Vec<(String, usize, usize)>) -> usize {
        if self.is_leaf() {
            return start + 1;
        }
        let mut end = start;
        for child in &self.children {
            end = child.collect_brackets(end, result);
        }
        if !self.is_preterminal() {
            result.push((self.label.clone(), start, end));
        }
        end
    }

    /// Visits nodes in pre-order.
    fn visit<'a, F>(&'a self, f: &mut F)
    where
        F: FnMut(&'a ParseTree),
    {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }
}

impl fmt::Display for ParseTree {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_leaf() {
            return write!(f, "{}", self.label);
        }
        write!(f, "({}", self.label)?;
        for child in &self.children {
            write!(f, " {child}")?;
        }
        write!(f, ")")
    }
}

enum Lexeme<'a> {
    Open,
    Close,
    Atom(&'a str),
}

fn lex(s: &str) -> Vec<Lexeme> {
    let mut result = vec![];
    let mut start = None;
    for (i, c) in s.char_indices() {
        if c == '(' || c == ')' || c.is_whitespace() {
            if let Some(st) = start.take() {
                result.push(Lexeme::Atom(&s[st..i]));
            }
            match c {
                '(' => result.push(Lexeme::Open),
                ')' => result.push(Lexeme::Close),
                _ => (),
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(st) = start {
        result.push(Lexeme::Atom(&s[st..]));
    }
    result
}

fn tree_error<S>(msg: S) -> SintassiError
where
    S: Into<String>,
{
    SintassiError::invalid_format("tree", msg)
}

fn parse_node<'a, I>(lexemes: &mut I) -> Result<ParseTree, SintassiError>
where
    I: Iterator<Item = Lexeme<'a>>,
{
    // The opening bracket has been consumed.
    let mut label = String::new();
    let mut children = vec![];
    let mut first = true;
    loop {
        match lexemes.next() {
            Some(Lexeme::Open) => children.push(parse_node(lexemes)?),
            Some(Lexeme::Close) => break,
            Some(Lexeme::Atom(a)) if first => label = a.to_string(),
            Some(Lexeme::Atom(a)) => children.push(ParseTree::leaf(a)),
            None => return Err(tree_error("unbalanced brackets")),
        }
        first = false;
    }
    if children.is_empty() {
        return Err(tree_error(format!("node `{label}` has no children")));
    }
    Ok(ParseTree::node(label, children))
}

impl FromStr for ParseTree {
    type Err = SintassiError;

    /// Reads a bracketed tree such as `(S (NP (DT the) (NN dog)) (VP (VBZ barks)))`.
    ///
    /// An unlabeled root wrapping a single tree, as in Penn Treebank files, is removed.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lexemes = lex(s).into_iter();
        match lexemes.next() {
            Some(Lexeme::Open) => (),
            _ => return Err(tree_error("a tree must start with `(`")),
        }
        let tree = parse_node(&mut lexemes)?;
        if lexemes.next().is_some() {
            return Err(tree_error("trailing input after the tree"));
        }
        if tree.label.is_empty() {
            let mut children = tree.children;
            if children.len() == 1 && !children[0].is_leaf() {
                return Ok(children.remove(0));
            }
            return Err(tree_error("a node has no label"));
        }
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TREE: &str = "(S (NP (DT the) (NN dog)) (VP (VBZ barks)))";

    #[test]
    fn test_tree_from_str_display() {
        let tree: ParseTree = TREE.parse().unwrap();

        assert_eq!(
            ParseTree::node(
                "S",
                vec![
                    ParseTree::node(
                        "NP",
                        vec![
                            ParseTree::node("DT", vec![ParseTree::leaf("the")]),
                            ParseTree::node("NN", vec![ParseTree::leaf("dog")]),
                        ]
                    ),
                    ParseTree::node(
                        "VP",
                        vec![ParseTree::node("VBZ", vec![ParseTree::leaf("barks")])]
                    ),
                ]
            ),
            tree
        );
        assert_eq!(TREE, tree.to_string());
    }

    #[test]
    fn test_tree_unlabeled_root() {
        let tree: ParseTree = format!("( {TREE} )").parse().unwrap();

        assert_eq!(TREE, tree.to_string());
    }

    #[test]
    fn test_tree_invalid() {
        assert!("S (NP x)".parse::<ParseTree>().is_err());
        assert!("(S (NP x)".parse::<ParseTree>().is_err());
        assert!("(S (NP x)) y".parse::<ParseTree>().is_err());
        assert!("(S)".parse::<ParseTree>().is_err());
    }

    #[test]
    fn test_tree_leaves_and_brackets() {
        let tree: ParseTree = TREE.parse().unwrap();

        assert_eq!(vec!["the", "dog", "barks"], tree.leaves());
        assert_eq!(
            vec![("DT", "the"), ("NN", "dog"), ("VBZ", "barks")],
            tree.preterminals()
        );
        assert_eq!(
            vec![
                ("NP".to_string(), 0, 2),
                ("VP".to_string(), 2, 3),
                ("S".to_string(), 0, 3),
            ],
            tree.brackets()
        );
    }

    #[test]
    fn test_tree_tokens() {
        let tree: ParseTree = TREE.parse().unwrap();
        let tokens = tree.tokens();

        assert_eq!(
            vec![
                Token::new("the").with_pos("DT").with_span(0..3),
                Token::new("dog").with_pos("NN").with_span(4..7),
                Token::new("barks").with_pos("VBZ").with_span(8..13),
            ],
            tokens
        );
    }
}
