//! Probabilistic CYK chart parsing.

use std::fmt;
use std::str::FromStr;

use hashbrown::HashMap;

use crate::cnf::is_synthetic;
use crate::errors::{Result, SintassiError};
use crate::grammar::{Grammar, Symbol};
use crate::token::Token;
use crate::tree::ParseTree;
use crate::utils::Indexer;

/// How a lexical rule `A -> 't'` is matched against a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminalMatch {
    /// `t` equals the part-of-speech tag.
    Tag,

    /// `t` equals the text or the lowercased text.
    Surface,

    /// Either of the above.
    Both,
}

impl Default for TerminalMatch {
    fn default() -> Self {
        Self::Both
    }
}

impl FromStr for TerminalMatch {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tag" => Ok(Self::Tag),
            "surface" => Ok(Self::Surface),
            "both" => Ok(Self::Both),
            _ => Err("Could not parse a terminal match. Use tag, surface or both."),
        }
    }
}

/// Options of a parse call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseOptions {
    /// Number of parses to return. Values below 1 are treated as 1.
    pub n_best: usize,

    /// Keeps only the best-scoring symbols of each chart cell.
    pub beam_width: Option<usize>,

    pub terminal_match: TerminalMatch,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            n_best: 1,
            beam_width: None,
            terminal_match: TerminalMatch::Both,
        }
    }
}

impl ParseOptions {
    pub fn with_n_best(mut self, n_best: usize) -> Self {
        self.n_best = n_best;
        self
    }

    pub fn with_beam_width(mut self, beam_width: Option<usize>) -> Self {
        self.beam_width = beam_width;
        self
    }

    pub fn with_terminal_match(mut self, terminal_match: TerminalMatch) -> Self {
        self.terminal_match = terminal_match;
        self
    }
}

/// A parse tree with its log-probability.
#[derive(Clone, Debug, PartialEq)]
pub struct Parse {
    pub tree: ParseTree,
    pub log_probability: f64,
}

impl Parse {
    pub fn probability(&self) -> f64 {
        self.log_probability.exp()
    }
}

/// Why a sentence has no parse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoDerivation {
    EmptyInput,

    /// No lexical rule covers the token at `index`.
    UncoveredToken { index: usize },

    /// Every token is covered but no tree spans the sentence from the start symbol.
    NoSpanningParse,
}

impl fmt::Display for NoDerivation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "empty input"),
            Self::UncoveredToken { index } => write!(f, "token {index} is not covered"),
            Self::NoSpanningParse => write!(f, "no parse spans the input"),
        }
    }
}

/// Result of parsing one sentence.
#[derive(Clone, Debug, PartialEq)]
pub enum ParseOutcome {
    /// Parses ordered from the most probable.
    Parsed(Vec<Parse>),
    NoDerivation(NoDerivation),
}

impl ParseOutcome {
    pub fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }

    /// Gets the most probable parse.
    pub fn best(&self) -> Option<&Parse> {
        match self {
            Self::Parsed(parses) => parses.first(),
            Self::NoDerivation(_) => None,
        }
    }

    pub fn parses(&self) -> &[Parse] {
        match self {
            Self::Parsed(parses) => parses,
            Self::NoDerivation(_) => &[],
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Back {
    Lexical,
    Binary {
        rule: usize,
        split: usize,
        left_rank: usize,
        right_rank: usize,
    },
}

#[derive(Clone, Copy, Debug)]
struct Derivation {
    log_prob: f64,
    back: Back,
}

struct BinaryRule {
    lhs: usize,
    left: usize,
    right: usize,
    log_prob: f64,
}

/// Per-symbol derivation lists of one span.
type Cell = Vec<Vec<Derivation>>;

/// Inserts after every derivation that is at least as good, keeping `n` at most.
fn insert_derivation(list: &mut Vec<Derivation>, d: Derivation, n: usize) {
    let pos = list
        .iter()
        .position(|x| x.log_prob < d.log_prob)
        .unwrap_or(list.len());
    if pos < n {
        list.insert(pos, d);
        list.truncate(n);
    }
}

/// CYK parser over a grammar in Chomsky normal form.
pub struct CykParser {
    symbols: Indexer<String>,
    start: usize,
    lexical: HashMap<String, Vec<(usize, f64)>>,
    binary: Vec<BinaryRule>,
}

impl CykParser {
    /// Compiles a grammar.
    ///
    /// # Errors
    ///
    /// [`SintassiError::InvalidGrammar`] is returned if the grammar is not in Chomsky
    /// normal form.
    pub fn new(grammar: &Grammar) -> Result<Self> {
        if !grammar.is_cnf() {
            return Err(SintassiError::invalid_grammar(
                "the parser requires a grammar in Chomsky normal form",
            ));
        }
        let mut symbols = Indexer::new();
        for lhs in grammar.nonterminals() {
            symbols.get_id(lhs.as_str());
        }
        let start = symbols.get_id(grammar.start());
        let mut lexical: HashMap<String, Vec<(usize, f64)>> = HashMap::new();
        let mut binary = vec![];
        for rule in grammar.rules() {
            let lhs = symbols.get_id(rule.lhs.as_str());
            let log_prob = rule.probability.ln();
            match rule.rhs.as_slice() {
                [Symbol::Terminal(text)] => {
                    lexical.entry(text.clone()).or_default().push((lhs, log_prob));
                }
                [Symbol::NonTerminal(left), Symbol::NonTerminal(right)] => {
                    binary.push(BinaryRule {
                        lhs,
                        left: symbols.get_id(left.as_str()),
                        right: symbols.get_id(right.as_str()),
                        log_prob,
                    });
                }
                _ => {
                    return Err(SintassiError::invalid_grammar(format!(
                        "`{rule}` is not in Chomsky normal form"
                    )))
                }
            }
        }
        Ok(Self {
            symbols,
            start,
            lexical,
            binary,
        })
    }

    /// Parses a token sequence.
    ///
    /// Ties between derivations of the same score keep the earlier candidate, which is the
    /// one from the earlier binary rule or, for the same rule, the smaller split point.
    ///
    /// # Examples
    ///
    /// ```
    /// use sintassi::{tokens_from_annotated, CykParser, Grammar, ParseOptions, ParseOutcome};
    ///
    /// let grammar: Grammar = "S -> NP VP [1]\nNP -> 'DT' [1]\nVP -> 'VBZ' [1]".parse().unwrap();
    /// let parser = CykParser::new(&grammar).unwrap();
    ///
    /// let tokens = tokens_from_annotated("it/DT barks/VBZ").unwrap();
    /// let outcome = parser.parse(&tokens, &ParseOptions::default());
    /// assert_eq!("(S (NP it) (VP barks))", outcome.best().unwrap().tree.to_string());
    ///
    /// let tokens = tokens_from_annotated("it/DT barks/NN").unwrap();
    /// assert!(!parser.parse(&tokens, &ParseOptions::default()).is_parsed());
    /// ```
    pub fn parse(&self, tokens: &[Token], options: &ParseOptions) -> ParseOutcome {
        let n = tokens.len();
        if n == 0 {
            return ParseOutcome::NoDerivation(NoDerivation::EmptyInput);
        }
        let n_best = options.n_best.max(1);
        let n_symbols = self.symbols.len();

        // chart[start][width - 1]
        let mut chart: Vec<Vec<Cell>> = (0..n)
            .map(|i| (0..n - i).map(|_| vec![vec![]; n_symbols]).collect())
            .collect();

        for (i, token) in tokens.iter().enumerate() {
            let cell = &mut chart[i][0];
            let mut matched: Vec<(usize, f64)> = vec![];
            for text in Self::terminal_candidates(token, options.terminal_match) {
                for &entry in self.lexical.get(text.as_str()).into_iter().flatten() {
                    if !matched.iter().any(|m| m.0 == entry.0 && m.1 == entry.1) {
                        matched.push(entry);
                    }
                }
            }
            for (lhs, log_prob) in matched {
                let d = Derivation {
                    log_prob,
                    back: Back::Lexical,
                };
                insert_derivation(&mut cell[lhs], d, n_best);
            }
            if cell.iter().all(Vec::is_empty) {
                return ParseOutcome::NoDerivation(NoDerivation::UncoveredToken { index: i });
            }
            Self::prune(cell, options.beam_width);
        }

        for width in 2..=n {
            for start in 0..=n - width {
                let mut cell: Cell = vec![vec![]; n_symbols];
                for (r, rule) in self.binary.iter().enumerate() {
                    for split in 1..width {
                        let left = &chart[start][split - 1][rule.left];
                        let right = &chart[start + split][width - split - 1][rule.right];
                        if left.is_empty() || right.is_empty() {
                            continue;
                        }
                        for (left_rank, l) in left.iter().enumerate() {
                            for (right_rank, rd) in right.iter().enumerate() {
                                let d = Derivation {
                                    log_prob: rule.log_prob + l.log_prob + rd.log_prob,
                                    back: Back::Binary {
                                        rule: r,
                                        split,
                                        left_rank,
                                        right_rank,
                                    },
                                };
                                insert_derivation(&mut cell[rule.lhs], d, n_best);
                            }
                        }
                    }
                }
                Self::prune(&mut cell, options.beam_width);
                chart[start][width - 1] = cell;
            }
        }

        let top = &chart[0][n - 1][self.start];
        if top.is_empty() {
            return ParseOutcome::NoDerivation(NoDerivation::NoSpanningParse);
        }
        let parses = top
            .iter()
            .enumerate()
            .map(|(rank, d)| Parse {
                tree: self.build(&chart, tokens, 0, n, self.start, rank),
                log_probability: d.log_prob,
            })
            .collect();
        ParseOutcome::Parsed(parses)
    }

    fn terminal_candidates(token: &Token, matching: TerminalMatch) -> Vec<String> {
        let mut candidates = vec![];
        if matching != TerminalMatch::Surface {
            if let Some(pos) = token.pos() {
                candidates.push(pos.to_string());
            }
        }
        if matching != TerminalMatch::Tag {
            candidates.push(token.text().to_string());
            let lower = token.text().to_lowercase();
            if lower != token.text() {
                candidates.push(lower);
            }
        }
        candidates
    }

    /// Keeps the `beam_width` symbols with the best derivations. Ties keep lower symbol ids.
    fn prune(cell: &mut Cell, beam_width: Option<usize>) {
        let Some(width) = beam_width else {
            return;
        };
        let width = width.max(1);
        let mut alive: Vec<(usize, f64)> = cell
            .iter()
            .enumerate()
            .filter_map(|(s, list)| list.first().map(|d| (s, d.log_prob)))
            .collect();
        if alive.len() <= width {
            return;
        }
        alive.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        for &(s, _) in &alive[width..] {
            cell[s].clear();
        }
    }

    fn build(
        &self,
        chart: &[Vec<Cell>],
        tokens: &[Token],
        start: usize,
        width: usize,
        symbol: usize,
        rank: usize,
    ) -> ParseTree {
        let label = &self.symbols.keys()[symbol];
        let d = chart[start][width - 1][symbol][rank];
        let children = match d.back {
            Back::Lexical => vec![ParseTree::leaf(tokens[start].text())],
            Back::Binary {
                rule,
                split,
                left_rank,
                right_rank,
            } => {
                let rule = &self.binary[rule];
                let left = self.build(chart, tokens, start, split, rule.left, left_rank);
                let right = self.build(
                    chart,
                    tokens,
                    start + split,
                    width - split,
                    rule.right,
                    right_rank,
                );
                let mut children = vec![];
                splice_synthetic(left, &mut children);
                splice_synthetic(right, &mut children);
                children
            }
        };
        ParseTree::node(label.as_str(), children)
    }
}

/// Replaces a synthetic node by its children.
fn splice_synthetic(tree: ParseTree, children: &mut Vec<ParseTree>) {
    if is_synthetic(tree.label()) && !tree.is_leaf() {
        children.extend(tree.children().iter().cloned());
    } else {
        children.push(tree);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::token::tokens_from_annotated;

    fn parser(grammar: &str) -> CykParser {
        let grammar: Grammar = grammar.parse().unwrap();
        CykParser::new(&grammar.to_cnf().unwrap()).unwrap()
    }

    const GRAMMAR: &str = "\
        S -> NP VP [1]\n\
        NP -> DT NN [0.7]\n\
        NP -> 'john' [0.3]\n\
        VP -> VBZ NP [0.4]\n\
        VP -> 'runs' [0.6]\n\
        DT -> 'the' [1]\n\
        NN -> 'dog' [0.5]\n\
        NN -> 'cat' [0.5]\n\
        VBZ -> 'sees' [1]";

    #[test]
    fn test_cyk_unique_derivation() {
        let parser = parser(GRAMMAR);
        let tokens = tokens_from_annotated("John sees the dog").unwrap();
        let outcome = parser.parse(&tokens, &ParseOptions::default());

        let best = outcome.best().unwrap();
        assert_eq!(
            "(S (NP John) (VP (VBZ sees) (NP (DT the) (NN dog))))",
            best.tree.to_string()
        );
        let expected = 0.3f64.ln() + 0.4f64.ln() + 0.7f64.ln() + 0.5f64.ln();
        assert!((best.log_probability - expected).abs() < 1e-12);
        assert_eq!(1, outcome.parses().len());
    }

    #[test]
    fn test_cyk_rejects_non_cnf() {
        let grammar: Grammar = "S -> A [1]\nA -> 'a' [1]".parse().unwrap();

        assert!(matches!(
            CykParser::new(&grammar),
            Err(SintassiError::InvalidGrammar(_))
        ));
    }

    #[test]
    fn test_cyk_empty_input() {
        let parser = parser(GRAMMAR);

        assert_eq!(
            ParseOutcome::NoDerivation(NoDerivation::EmptyInput),
            parser.parse(&[], &ParseOptions::default())
        );
    }

    #[test]
    fn test_cyk_uncovered_token() {
        let parser = parser(GRAMMAR);
        let tokens = tokens_from_annotated("john sees the unicorn").unwrap();

        assert_eq!(
            ParseOutcome::NoDerivation(NoDerivation::UncoveredToken { index: 3 }),
            parser.parse(&tokens, &ParseOptions::default())
        );
    }

    #[test]
    fn test_cyk_uncovered_tag() {
        let grammar: Grammar = "S -> NP VP [1]\nNP -> 'NNP' [1]\nVP -> 'VBZ' [1]"
            .parse()
            .unwrap();
        let parser = CykParser::new(&grammar).unwrap();
        let tokens = tokens_from_annotated("John/NNP runs/XYZ").unwrap();
        let options = ParseOptions::default().with_terminal_match(TerminalMatch::Tag);

        assert_eq!(
            ParseOutcome::NoDerivation(NoDerivation::UncoveredToken { index: 1 }),
            parser.parse(&tokens, &options)
        );
    }

    #[test]
    fn test_cyk_no_spanning_parse() {
        let parser = parser(GRAMMAR);
        let tokens = tokens_from_annotated("the dog").unwrap();

        assert_eq!(
            ParseOutcome::NoDerivation(NoDerivation::NoSpanningParse),
            parser.parse(&tokens, &ParseOptions::default())
        );
    }

    #[test]
    fn test_cyk_n_best_and_ties() {
        // Both splits of "a a a" have the same probability.
        let grammar = "\
            S -> X X [1]\n\
            X -> X X [0.5]\n\
            X -> 'a' [0.5]";
        let parser = parser(grammar);
        let tokens = tokens_from_annotated("a a a").unwrap();
        let outcome = parser.parse(&tokens, &ParseOptions::default().with_n_best(10));

        let parses = outcome.parses();
        assert_eq!(2, parses.len());
        assert_eq!(parses[0].log_probability, parses[1].log_probability);
        assert_eq!("(S (X a) (X (X a) (X a)))", parses[0].tree.to_string());
        assert_eq!("(S (X (X a) (X a)) (X a))", parses[1].tree.to_string());

        let best = parser.parse(&tokens, &ParseOptions::default());
        assert_eq!(&parses[..1], best.parses());
    }

    #[test]
    fn test_cyk_debinarizes_trees() {
        let parser = parser("S -> 'x' NP 'y' [1]\nNP -> 'n' [1]");
        let tokens = tokens_from_annotated("x n y").unwrap();
        let outcome = parser.parse(&tokens, &ParseOptions::default());

        assert_eq!("(S x (NP n) y)", outcome.best().unwrap().tree.to_string());
        assert!((outcome.best().unwrap().probability() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_cyk_beam_keeps_best_symbols() {
        let grammar = "\
            S -> X Y [1]\n\
            X -> 'a' [0.9]\n\
            X -> 'b' [0.1]\n\
            Z -> 'a' [1]\n\
            Y -> 'b' [0.5]\n\
            Y -> Z Z [0.5]";
        let parser = parser(grammar);
        let tokens = tokens_from_annotated("a b").unwrap();

        // Z beats X on the first token, so S cannot be built.
        let narrow = parser.parse(&tokens, &ParseOptions::default().with_beam_width(Some(1)));
        assert_eq!(
            ParseOutcome::NoDerivation(NoDerivation::NoSpanningParse),
            narrow
        );

        let wide = parser.parse(&tokens, &ParseOptions::default().with_beam_width(Some(2)));
        let full = parser.parse(&tokens, &ParseOptions::default());
        assert_eq!("(S (X a) (Y b))", full.best().unwrap().tree.to_string());
        assert_eq!(full, wide);
    }
}
