//! Probabilistic context-free grammars.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bincode::{
    de::{BorrowDecoder, Decoder},
    enc::Encoder,
    error::{DecodeError, EncodeError},
    BorrowDecode, Decode, Encode,
};
use hashbrown::HashMap;

use crate::errors::{Result, SintassiError};
use crate::tree::ParseTree;
use crate::utils::Indexer;

/// Allowed deviation of the probability sum of each left-hand side from 1.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// A grammar symbol.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Decode, Encode)]
pub enum Symbol {
    NonTerminal(String),
    Terminal(String),
}

impl Symbol {
    pub fn nonterminal<S>(name: S) -> Self
    where
        S: Into<String>,
    {
        Self::NonTerminal(name.into())
    }

    pub fn terminal<S>(text: S) -> Self
    where
        S: Into<String>,
    {
        Self::Terminal(text.into())
    }

    pub fn name(&self) -> &str {
        match self {
            Self::NonTerminal(s) | Self::Terminal(s) => s,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NonTerminal(s) => write!(f, "{s}"),
            Self::Terminal(s) => {
                write!(f, "'")?;
                for c in s.chars() {
                    if c == '\'' || c == '\\' {
                        write!(f, "\\")?;
                    }
                    write!(f, "{c}")?;
                }
                write!(f, "'")
            }
        }
    }
}

fn fmt_production(f: &mut fmt::Formatter, lhs: &str, rhs: &[Symbol], value: f64) -> fmt::Result {
    write!(f, "{lhs} ->")?;
    for symbol in rhs {
        write!(f, " {symbol}")?;
    }
    write!(f, " [{value}]")
}

/// Reads `LHS -> X 'y' Z [value]`.
fn parse_production(s: &str, what: &'static str) -> Result<(String, Vec<Symbol>, f64)> {
    let (lhs, rest) = s
        .split_once("->")
        .ok_or_else(|| SintassiError::invalid_format(what, format!("`{s}` lacks `->`")))?;
    let lhs = lhs.trim();
    if lhs.is_empty() || lhs.contains(char::is_whitespace) || lhs.starts_with('\'') {
        return Err(SintassiError::invalid_format(
            what,
            format!("`{s}` has an invalid left-hand side"),
        ));
    }
    let rest = rest.trim_end();
    let open = rest.rfind('[').filter(|_| rest.ends_with(']')).ok_or_else(|| {
        SintassiError::invalid_format(what, format!("`{s}` lacks a `[value]` suffix"))
    })?;
    let value: f64 = rest[open + 1..rest.len() - 1].trim().parse().map_err(|_| {
        SintassiError::invalid_format(what, format!("`{s}` has an invalid value"))
    })?;

    let mut rhs = vec![];
    let mut chars = rest[..open].chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '\'' {
            chars.next();
            let mut text = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(c) = chars.next() {
                            text.push(c);
                        }
                    }
                    '\'' => {
                        closed = true;
                        break;
                    }
                    c => text.push(c),
                }
            }
            if !closed {
                return Err(SintassiError::invalid_format(
                    what,
                    format!("`{s}` has an unterminated terminal"),
                ));
            }
            rhs.push(Symbol::Terminal(text));
        } else {
            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                name.push(c);
                chars.next();
            }
            rhs.push(Symbol::NonTerminal(name));
        }
    }
    Ok((lhs.to_string(), rhs, value))
}

/// A rule with its probability.
#[derive(Clone, Debug, PartialEq, Decode, Encode)]
pub struct Rule {
    pub lhs: String,
    pub rhs: Vec<Symbol>,
    pub probability: f64,
}

impl Rule {
    pub fn new<S>(lhs: S, rhs: Vec<Symbol>, probability: f64) -> Self
    where
        S: Into<String>,
    {
        Self {
            lhs: lhs.into(),
            rhs,
            probability,
        }
    }

    /// `A -> 'a'`
    pub fn is_lexical(&self) -> bool {
        self.rhs.len() == 1 && self.rhs[0].is_terminal()
    }

    /// `A -> B`
    pub fn is_unit(&self) -> bool {
        self.rhs.len() == 1 && !self.rhs[0].is_terminal()
    }

    /// `A -> B C`
    pub fn is_binary(&self) -> bool {
        self.rhs.len() == 2 && self.rhs.iter().all(|s| !s.is_terminal())
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_production(f, &self.lhs, &self.rhs, self.probability)
    }
}

impl FromStr for Rule {
    type Err = SintassiError;

    /// Reads a rule such as `S -> NP VP [0.9]` or `DT -> 'the' [0.5]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lhs, rhs, probability) = parse_production(s, "rule")?;
        Ok(Self {
            lhs,
            rhs,
            probability,
        })
    }
}

/// Which nodes of a treebank tree become terminal symbols.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminalKind {
    /// Words are terminals; pre-terminals yield lexical rules such as `DT -> 'the'`.
    Surface,

    /// Part-of-speech tags are terminals; pre-terminals are replaced by `'DT'`.
    Tag,
}

impl FromStr for TerminalKind {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "surface" => Ok(Self::Surface),
            "tag" => Ok(Self::Tag),
            _ => Err("Could not parse a terminal kind. Use surface or tag."),
        }
    }
}

/// An observed count of a rule.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleCount {
    pub lhs: String,
    pub rhs: Vec<Symbol>,
    pub count: f64,
}

impl RuleCount {
    pub fn new<S>(lhs: S, rhs: Vec<Symbol>, count: f64) -> Self
    where
        S: Into<String>,
    {
        Self {
            lhs: lhs.into(),
            rhs,
            count,
        }
    }

    /// Extracts one count per rule occurrence in a tree.
    ///
    /// # Examples
    ///
    /// ```
    /// use sintassi::{ParseTree, RuleCount, TerminalKind};
    ///
    /// let tree: ParseTree = "(S (NP (NN dogs)) (VP (VBP bark)))".parse().unwrap();
    ///
    /// let rules: Vec<String> = RuleCount::from_tree(&tree, TerminalKind::Tag)
    ///     .iter()
    ///     .map(|c| c.to_string())
    ///     .collect();
    /// assert_eq!(vec!["S -> NP VP [1]", "NP -> 'NN' [1]", "VP -> 'VBP' [1]"], rules);
    /// ```
    pub fn from_tree(tree: &ParseTree, kind: TerminalKind) -> Vec<Self> {
        let mut counts = vec![];
        Self::collect(tree, kind, &mut counts);
        counts
    }

    fn collect(node: &ParseTree, kind: TerminalKind, counts: &mut Vec<Self>) {
        if node.is_leaf() || (kind == TerminalKind::Tag && node.is_preterminal()) {
            return;
        }
        let rhs = node
            .children()
            .iter()
            .map(|child| {
                if child.is_leaf() {
                    Symbol::terminal(child.label())
                } else if kind == TerminalKind::Tag && child.is_preterminal() {
                    Symbol::terminal(child.label())
                } else {
                    Symbol::nonterminal(child.label())
                }
            })
            .collect();
        counts.push(Self::new(node.label(), rhs, 1.0));
        for child in node.children() {
            Self::collect(child, kind, counts);
        }
    }
}

impl fmt::Display for RuleCount {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_production(f, &self.lhs, &self.rhs, self.count)
    }
}

impl FromStr for RuleCount {
    type Err = SintassiError;

    /// Reads a count such as `NP -> DT NN [12]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lhs, rhs, count) = parse_production(s, "rule count")?;
        Ok(Self { lhs, rhs, count })
    }
}

/// Options of grammar estimation.
#[derive(Clone, Debug, PartialEq)]
pub struct GrammarTrainOptions {
    /// Additive smoothing constant `k`.
    pub smoothing: f64,

    /// Start symbol. Defaults to the left-hand side of the first count.
    pub start: Option<String>,
}

impl Default for GrammarTrainOptions {
    fn default() -> Self {
        Self {
            smoothing: 0.001,
            start: None,
        }
    }
}

impl GrammarTrainOptions {
    pub fn with_smoothing(mut self, smoothing: f64) -> Self {
        self.smoothing = smoothing;
        self
    }

    pub fn with_start<S>(mut self, start: S) -> Self
    where
        S: Into<String>,
    {
        self.start = Some(start.into());
        self
    }
}

/// A validated PCFG.
///
/// Every left-hand side has rules whose probabilities sum to 1 within
/// [`PROBABILITY_TOLERANCE`].
#[derive(Clone, Debug)]
pub struct Grammar {
    start: String,
    rules: Vec<Rule>,
    lhs_ids: Indexer<String>,
    rules_by_lhs: Vec<Vec<usize>>,
}

impl Grammar {
    /// Creates a grammar.
    ///
    /// # Errors
    ///
    /// [`SintassiError::InvalidGrammar`] is returned when:
    ///
    /// * `rules` is empty or contains duplicated productions.
    /// * A right-hand side is empty or refers to a nonterminal without rules.
    /// * A probability is not in `(0, 1]`.
    /// * The start symbol has no rules.
    /// * The probabilities of a left-hand side do not sum to 1.
    pub fn new<S>(start: S, rules: Vec<Rule>) -> Result<Self>
    where
        S: Into<String>,
    {
        let start = start.into();
        if rules.is_empty() {
            return Err(SintassiError::invalid_grammar("the grammar has no rules"));
        }
        let mut lhs_ids = Indexer::new();
        let mut rules_by_lhs: Vec<Vec<usize>> = vec![];
        let mut seen = HashMap::new();
        for (i, rule) in rules.iter().enumerate() {
            if rule.lhs.is_empty() {
                return Err(SintassiError::invalid_grammar(format!(
                    "rule {i} has an empty left-hand side"
                )));
            }
            if rule.rhs.is_empty() {
                return Err(SintassiError::invalid_grammar(format!(
                    "`{}` has an empty right-hand side",
                    rule.lhs
                )));
            }
            if !(rule.probability > 0.0 && rule.probability <= 1.0 + PROBABILITY_TOLERANCE) {
                return Err(SintassiError::invalid_grammar(format!(
                    "`{rule}` has a probability outside (0, 1]"
                )));
            }
            if seen.insert((&rule.lhs, &rule.rhs), i).is_some() {
                return Err(SintassiError::invalid_grammar(format!(
                    "`{rule}` is duplicated"
                )));
            }
            let id = lhs_ids.get_id(rule.lhs.as_str());
            if id == rules_by_lhs.len() {
                rules_by_lhs.push(vec![]);
            }
            rules_by_lhs[id].push(i);
        }
        for rule in &rules {
            for symbol in &rule.rhs {
                if let Symbol::NonTerminal(name) = symbol {
                    if lhs_ids.get(name.as_str()).is_none() {
                        return Err(SintassiError::invalid_grammar(format!(
                            "`{name}` in `{rule}` has no rules"
                        )));
                    }
                }
            }
        }
        if lhs_ids.get(start.as_str()).is_none() {
            return Err(SintassiError::invalid_grammar(format!(
                "the start symbol `{start}` has no rules"
            )));
        }
        for (lhs, ids) in lhs_ids.keys().iter().zip(&rules_by_lhs) {
            let sum: f64 = ids.iter().map(|&i| rules[i].probability).sum();
            if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
                return Err(SintassiError::invalid_grammar(format!(
                    "probabilities of `{lhs}` sum to {sum}"
                )));
            }
        }
        drop(seen);
        Ok(Self {
            start,
            rules,
            lhs_ids,
            rules_by_lhs,
        })
    }

    /// Estimates rule probabilities from counts with additive smoothing.
    ///
    /// `P(A -> α) = (count + k) / (total(A) + k · distinct(A))`. Counts of the same rule are
    /// summed and rules keep the order of their first count.
    ///
    /// # Errors
    ///
    /// [`SintassiError::InvalidArgument`] is returned for empty input, negative or
    /// non-finite counts, an invalid smoothing constant, or a left-hand side whose total is
    /// zero without smoothing. [`SintassiError::InvalidGrammar`] is returned when the
    /// estimated grammar is invalid.
    pub fn train(counts: &[RuleCount], options: &GrammarTrainOptions) -> Result<Self> {
        let first = counts
            .first()
            .ok_or_else(|| SintassiError::invalid_argument("counts", "no rule counts"))?;
        let k = options.smoothing;
        if !(k.is_finite() && k >= 0.0) {
            return Err(SintassiError::invalid_argument(
                "smoothing",
                "must be a non-negative finite number",
            ));
        }
        let start = options.start.clone().unwrap_or_else(|| first.lhs.clone());

        let mut productions: Indexer<(String, Vec<Symbol>)> = Indexer::new();
        let mut merged = vec![];
        for c in counts {
            if !(c.count.is_finite() && c.count >= 0.0) {
                return Err(SintassiError::invalid_argument(
                    "counts",
                    format!("`{c}` has an invalid count"),
                ));
            }
            if c.rhs.is_empty() {
                return Err(SintassiError::invalid_argument(
                    "counts",
                    format!("`{}` has an empty right-hand side", c.lhs),
                ));
            }
            let id = productions.get_id(&(c.lhs.clone(), c.rhs.clone()));
            if id == merged.len() {
                merged.push(0.0);
            }
            merged[id] += c.count;
        }

        let mut totals: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
        for ((lhs, _), &count) in productions.keys().iter().zip(&merged) {
            let entry = totals.entry(lhs.as_str()).or_default();
            entry.0 += count;
            entry.1 += 1;
        }
        let mut rules = vec![];
        for ((lhs, rhs), &count) in productions.keys().iter().zip(&merged) {
            let (total, distinct) = totals[lhs.as_str()];
            let den = total + k * distinct as f64;
            if den <= 0.0 {
                return Err(SintassiError::invalid_argument(
                    "counts",
                    format!("`{lhs}` has a zero total count"),
                ));
            }
            let probability = (count + k) / den;
            if probability > 0.0 {
                rules.push(Rule::new(lhs.clone(), rhs.clone(), probability));
            }
        }
        log::info!(
            "estimated {} rules for {} left-hand sides",
            rules.len(),
            totals.len()
        );
        Self::new(start, rules)
    }

    /// Replaces probabilities of rules of `lhs`.
    ///
    /// Rules not listed keep their probabilities. The grammar is left unchanged when the
    /// result violates an invariant.
    ///
    /// # Errors
    ///
    /// [`SintassiError::InvalidArgument`] is returned when an update names an unknown
    /// rule, and [`SintassiError::InvalidGrammar`] when the updated grammar is invalid.
    pub fn reweight(&mut self, lhs: &str, updates: &[(Vec<Symbol>, f64)]) -> Result<()> {
        let mut rules = self.rules.clone();
        for (rhs, probability) in updates {
            let rule = rules
                .iter_mut()
                .find(|r| r.lhs == lhs && &r.rhs == rhs)
                .ok_or_else(|| {
                    SintassiError::invalid_argument(
                        "updates",
                        format!("no rule `{}`", Rule::new(lhs, rhs.clone(), *probability)),
                    )
                })?;
            rule.probability = *probability;
        }
        *self = Self::new(self.start.clone(), rules)?;
        Ok(())
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    /// Rules in insertion order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Iterates over rules of a left-hand side in insertion order.
    pub fn rules_for<'a>(&'a self, lhs: &str) -> impl Iterator<Item = &'a Rule> + 'a {
        let ids = self
            .lhs_ids
            .get(lhs)
            .map_or(&[][..], |id| self.rules_by_lhs[id].as_slice());
        ids.iter().map(move |&i| &self.rules[i])
    }

    /// Left-hand sides in order of first appearance.
    pub fn nonterminals(&self) -> &[String] {
        self.lhs_ids.keys()
    }

    /// Probability sums per left-hand side.
    pub fn sums(&self) -> BTreeMap<&str, f64> {
        self.lhs_ids
            .keys()
            .iter()
            .zip(&self.rules_by_lhs)
            .map(|(lhs, ids)| {
                (
                    lhs.as_str(),
                    ids.iter().map(|&i| self.rules[i].probability).sum(),
                )
            })
            .collect()
    }

    /// Whether every rule is lexical or binary.
    pub fn is_cnf(&self) -> bool {
        self.rules.iter().all(|r| r.is_lexical() || r.is_binary())
    }
}

impl PartialEq for Grammar {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start && self.rules == other.rules
    }
}

impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, rule) in self.rules.iter().enumerate() {
            if i != 0 {
                writeln!(f)?;
            }
            write!(f, "{rule}")?;
        }
        Ok(())
    }
}

impl FromStr for Grammar {
    type Err = SintassiError;

    /// Reads one rule per line. Blank lines and lines starting with `#` are skipped. The
    /// left-hand side of the first rule is the start symbol.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rules = s
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(Rule::from_str)
            .collect::<Result<Vec<_>>>()?;
        let start = rules
            .first()
            .map(|r| r.lhs.clone())
            .ok_or_else(|| SintassiError::invalid_grammar("the grammar has no rules"))?;
        Self::new(start, rules)
    }
}

impl Encode for Grammar {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        Encode::encode(&self.start, encoder)?;
        Encode::encode(&self.rules, encoder)?;
        Ok(())
    }
}

impl Decode for Grammar {
    fn decode<D: Decoder>(decoder: &mut D) -> Result<Self, DecodeError> {
        let start: String = Decode::decode(decoder)?;
        let rules: Vec<Rule> = Decode::decode(decoder)?;
        Self::new(start, rules).map_err(|e| DecodeError::OtherString(e.to_string()))
    }
}

impl<'de> BorrowDecode<'de> for Grammar {
    fn borrow_decode<D: BorrowDecoder<'de>>(decoder: &mut D) -> Result<Self, DecodeError> {
        Self::decode(decoder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nt(s: &str) -> Symbol {
        Symbol::nonterminal(s)
    }

    fn t(s: &str) -> Symbol {
        Symbol::terminal(s)
    }

    #[test]
    fn test_rule_from_str_display() {
        let rule: Rule = "NP -> DT 'big \\'n\\' bad' NN [0.25]".parse().unwrap();

        assert_eq!(
            Rule::new("NP", vec![nt("DT"), t("big 'n' bad"), nt("NN")], 0.25),
            rule
        );
        assert_eq!("NP -> DT 'big \\'n\\' bad' NN [0.25]", rule.to_string());
    }

    #[test]
    fn test_rule_from_str_invalid() {
        assert!("NP DT NN [0.5]".parse::<Rule>().is_err());
        assert!("NP -> DT NN".parse::<Rule>().is_err());
        assert!("NP -> DT NN [x]".parse::<Rule>().is_err());
        assert!("NP -> 'the [0.5]".parse::<Rule>().is_err());
        assert!(" -> DT [0.5]".parse::<Rule>().is_err());
    }

    #[test]
    fn test_grammar_sum_violation() {
        let grammar: Result<Grammar> = "S -> NP VP [0.9]\nNP -> 'a' [1.0]\nVP -> 'b' [1.0]".parse();

        assert_eq!(
            "InvalidGrammarError: probabilities of `S` sum to 0.9",
            &grammar.err().unwrap().to_string()
        );
    }

    #[test]
    fn test_grammar_rejects_undefined_nonterminal() {
        let grammar: Result<Grammar> = "S -> NP VP [1.0]\nNP -> 'a' [1.0]".parse();

        assert_eq!(
            "InvalidGrammarError: `VP` in `S -> NP VP [1]` has no rules",
            &grammar.err().unwrap().to_string()
        );
    }

    #[test]
    fn test_grammar_rejects_unknown_start() {
        let grammar = Grammar::new("ROOT", vec![Rule::new("S", vec![t("a")], 1.0)]);

        assert_eq!(
            "InvalidGrammarError: the start symbol `ROOT` has no rules",
            &grammar.err().unwrap().to_string()
        );
    }

    #[test]
    fn test_grammar_rejects_duplicates_and_empty_rhs() {
        let dup = Grammar::new(
            "S",
            vec![
                Rule::new("S", vec![t("a")], 0.5),
                Rule::new("S", vec![t("a")], 0.5),
            ],
        );
        assert!(matches!(dup, Err(SintassiError::InvalidGrammar(_))));

        let empty = Grammar::new("S", vec![Rule::new("S", vec![], 1.0)]);
        assert!(matches!(empty, Err(SintassiError::InvalidGrammar(_))));

        assert!(matches!(
            Grammar::new("S", vec![]),
            Err(SintassiError::InvalidGrammar(_))
        ));
    }

    #[test]
    fn test_grammar_train_add_k() {
        let counts = vec![
            RuleCount::new("S", vec![nt("NP"), nt("VP")], 3.0),
            RuleCount::new("NP", vec![t("dogs")], 2.0),
            RuleCount::new("NP", vec![t("cats")], 1.0),
            RuleCount::new("NP", vec![t("dogs")], 1.0),
            RuleCount::new("VP", vec![t("bark")], 3.0),
        ];
        let grammar = Grammar::train(&counts, &GrammarTrainOptions::default()).unwrap();

        assert_eq!("S", grammar.start());
        let np: Vec<_> = grammar.rules_for("NP").collect();
        assert_eq!(2, np.len());
        assert_eq!(vec![t("dogs")], np[0].rhs);
        assert!((np[0].probability - 3.001 / 4.002).abs() < 1e-12);
        assert!((np[1].probability - 1.001 / 4.002).abs() < 1e-12);
        for (_, sum) in grammar.sums() {
            assert!((sum - 1.0).abs() <= PROBABILITY_TOLERANCE);
        }
    }

    #[test]
    fn test_grammar_train_invalid_counts() {
        let options = GrammarTrainOptions::default();

        assert!(matches!(
            Grammar::train(&[], &options),
            Err(SintassiError::InvalidArgument(_))
        ));
        let negative = vec![RuleCount::new("S", vec![t("a")], -1.0)];
        assert!(matches!(
            Grammar::train(&negative, &options),
            Err(SintassiError::InvalidArgument(_))
        ));
        let zero = vec![RuleCount::new("S", vec![t("a")], 0.0)];
        assert!(matches!(
            Grammar::train(&zero, &options.clone().with_smoothing(0.0)),
            Err(SintassiError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_grammar_reweight() {
        let mut grammar: Grammar = "S -> 'a' [0.5]\nS -> 'b' [0.5]".parse().unwrap();

        grammar
            .reweight("S", &[(vec![t("a")], 0.2), (vec![t("b")], 0.8)])
            .unwrap();
        assert_eq!("S -> 'a' [0.2]\nS -> 'b' [0.8]", grammar.to_string());

        let result = grammar.reweight("S", &[(vec![t("a")], 0.5)]);
        assert!(matches!(result, Err(SintassiError::InvalidGrammar(_))));
        assert_eq!("S -> 'a' [0.2]\nS -> 'b' [0.8]", grammar.to_string());

        let result = grammar.reweight("S", &[(vec![t("c")], 0.5)]);
        assert!(matches!(result, Err(SintassiError::InvalidArgument(_))));
    }

    #[test]
    fn test_rule_count_from_tree_surface() {
        let tree: ParseTree = "(S (NP (DT the) (NN dog)) (VP (VBZ barks)))".parse().unwrap();
        let counts: Vec<String> = RuleCount::from_tree(&tree, TerminalKind::Surface)
            .iter()
            .map(|c| c.to_string())
            .collect();

        assert_eq!(
            vec![
                "S -> NP VP [1]",
                "NP -> DT NN [1]",
                "DT -> 'the' [1]",
                "NN -> 'dog' [1]",
                "VP -> VBZ [1]",
                "VBZ -> 'barks' [1]",
            ],
            counts
        );
    }

    #[test]
    fn test_grammar_round_trip() {
        let grammar: Grammar = "S -> NP VP [1]\nNP -> 'a' [0.3]\nNP -> 'b' [0.7]\nVP -> 'c' [1]"
            .parse()
            .unwrap();
        let config = bincode::config::standard();
        let bytes = bincode::encode_to_vec(&grammar, config).unwrap();
        let (decoded, _): (Grammar, usize) = bincode::decode_from_slice(&bytes, config).unwrap();

        assert_eq!(grammar, decoded);
        assert_eq!(
            vec!["S", "NP", "VP"],
            decoded.nonterminals().iter().map(String::as_str).collect::<Vec<_>>()
        );
    }
}
