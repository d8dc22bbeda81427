//! Conversion to Chomsky normal form.
//!
//! Synthetic symbols introduced here are named `T|t` for the pre-terminal of a terminal
//! `t` and `A|<C-D>` for the remainder `C D` of a binarized rule of `A`. Hyphens inside the
//! names of the remainder are escaped, as in `A|<C\-1-D>` for `C-1 D`.

use hashbrown::HashMap;

use crate::errors::{Result, SintassiError};
use crate::grammar::{Grammar, Rule, Symbol};
use crate::utils::Indexer;

/// Pivots smaller than this make the unit closure singular.
const SINGULAR_EPSILON: f64 = 1e-12;

pub(crate) fn terminal_preterminal(text: &str) -> String {
    format!("T|{text}")
}

/// Names the remainder of a binarized rule. A `-` or `\` inside a symbol name is escaped with
/// `\`, so distinct remainders never share a name.
pub(crate) fn binarized_symbol(lhs: &str, rest: &[Symbol]) -> String {
    let mut name = format!("{lhs}|<");
    for (i, symbol) in rest.iter().enumerate() {
        if i != 0 {
            name.push('-');
        }
        for c in symbol.name().chars() {
            if c == '-' || c == '\\' {
                name.push('\\');
            }
            name.push(c);
        }
    }
    name.push('>');
    name
}

/// Whether a symbol was introduced by the conversion.
pub fn is_synthetic(name: &str) -> bool {
    name.starts_with("T|") || (name.contains("|<") && name.ends_with('>'))
}

/// Appends `rule` or adds its probability to an existing rule with the same production.
struct RuleSet {
    ids: HashMap<(String, Vec<Symbol>), usize>,
    rules: Vec<Rule>,
}

impl RuleSet {
    fn new() -> Self {
        Self {
            ids: HashMap::new(),
            rules: vec![],
        }
    }

    fn add(&mut self, rule: Rule) {
        let key = (rule.lhs.clone(), rule.rhs.clone());
        if let Some(&i) = self.ids.get(&key) {
            self.rules[i].probability += rule.probability;
        } else {
            self.ids.insert(key, self.rules.len());
            self.rules.push(rule);
        }
    }

    /// Adds a synthetic rule once.
    fn add_once(&mut self, rule: Rule) {
        let key = (rule.lhs.clone(), rule.rhs.clone());
        if !self.ids.contains_key(&key) {
            self.ids.insert(key, self.rules.len());
            self.rules.push(rule);
        }
    }
}

impl Grammar {
    /// Converts the grammar to Chomsky normal form.
    ///
    /// Terminals in long rules get pre-terminals, long rules are right-binarized, and unit
    /// rules are folded into their targets through the closure `(I − U)⁻¹` of the unit
    /// probability matrix. The probability mass of every left-hand side is preserved. A
    /// grammar already in normal form is returned unchanged.
    ///
    /// # Errors
    ///
    /// [`SintassiError::InvalidGrammar`] is returned when unit rules form a cycle that
    /// never exits.
    ///
    /// # Examples
    ///
    /// ```
    /// use sintassi::Grammar;
    ///
    /// let grammar: Grammar = "S -> NP 'runs' [1]\nNP -> 'john' [1]".parse().unwrap();
    /// let cnf = grammar.to_cnf().unwrap();
    ///
    /// assert!(cnf.is_cnf());
    /// assert_eq!(
    ///     "S -> NP T|runs [1]\nNP -> 'john' [1]\nT|runs -> 'runs' [1]",
    ///     cnf.to_string()
    /// );
    /// ```
    pub fn to_cnf(&self) -> Result<Grammar> {
        if self.is_cnf() {
            return Ok(self.clone());
        }
        let binarized = binarize(self.rules());
        let rules = remove_units(binarized)?;
        log::debug!(
            "converted {} rules into {} rules in normal form",
            self.rules().len(),
            rules.len()
        );
        Grammar::new(self.start(), rules)
    }
}

/// Runs the terminal and binarization steps.
fn binarize(rules: &[Rule]) -> Vec<Rule> {
    let mut main = RuleSet::new();
    let mut synthetic = RuleSet::new();
    for rule in rules {
        if rule.rhs.len() < 2 {
            main.add(rule.clone());
            continue;
        }
        let rhs: Vec<Symbol> = rule
            .rhs
            .iter()
            .map(|symbol| match symbol {
                Symbol::Terminal(text) => {
                    let name = terminal_preterminal(text);
                    synthetic.add_once(Rule::new(
                        name.as_str(),
                        vec![Symbol::terminal(text.as_str())],
                        1.0,
                    ));
                    Symbol::NonTerminal(name)
                }
                nt => nt.clone(),
            })
            .collect();
        if rhs.len() == 2 {
            main.add(Rule::new(rule.lhs.as_str(), rhs, rule.probability));
            continue;
        }
        let mut rest_name = binarized_symbol(&rule.lhs, &rhs[1..]);
        main.add(Rule::new(
            rule.lhs.as_str(),
            vec![rhs[0].clone(), Symbol::nonterminal(rest_name.as_str())],
            rule.probability,
        ));
        for i in 1..rhs.len() - 1 {
            let next = if i + 2 == rhs.len() {
                rhs[i + 1].clone()
            } else {
                Symbol::nonterminal(binarized_symbol(&rule.lhs, &rhs[i + 1..]))
            };
            let next_name = next.name().to_string();
            synthetic.add_once(Rule::new(
                rest_name.as_str(),
                vec![rhs[i].clone(), next],
                1.0,
            ));
            rest_name = next_name;
        }
    }
    let mut rules = main.rules;
    rules.extend(synthetic.rules);
    rules
}

/// Folds unit rules into the lexical and binary rules of their targets.
fn remove_units(rules: Vec<Rule>) -> Result<Vec<Rule>> {
    if !rules.iter().any(Rule::is_unit) {
        return Ok(rules);
    }

    // Only symbols taking part in unit rules need a row in the closure.
    let mut unit_symbols = Indexer::<String>::new();
    for rule in rules.iter().filter(|r| r.is_unit()) {
        unit_symbols.get_id(rule.lhs.as_str());
        unit_symbols.get_id(rule.rhs[0].name());
    }
    let n = unit_symbols.len();
    let mut matrix = vec![0.0; n * n];
    for i in 0..n {
        matrix[i * n + i] = 1.0;
    }
    for rule in rules.iter().filter(|r| r.is_unit()) {
        let a = unit_symbols.get(rule.lhs.as_str()).unwrap_or_default();
        let b = unit_symbols.get(rule.rhs[0].name()).unwrap_or_default();
        matrix[a * n + b] -= rule.probability;
    }
    let closure = invert(matrix, n).ok_or_else(|| {
        SintassiError::invalid_grammar("unit rules form a cycle that never terminates")
    })?;

    let mut lhs_order = Indexer::<String>::new();
    let mut proper_by_lhs: Vec<Vec<usize>> = vec![];
    for (i, rule) in rules.iter().enumerate() {
        let id = lhs_order.get_id(rule.lhs.as_str());
        if id == proper_by_lhs.len() {
            proper_by_lhs.push(vec![]);
        }
        if !rule.is_unit() {
            proper_by_lhs[id].push(i);
        }
    }

    let mut result = RuleSet::new();
    for (a_id, a) in lhs_order.keys().iter().enumerate() {
        let Some(a_row) = unit_symbols.get(a.as_str()) else {
            for &i in &proper_by_lhs[a_id] {
                result.add(rules[i].clone());
            }
            continue;
        };
        // The symbol itself first, then unit targets in closure order.
        let mut targets = vec![a_row];
        targets.extend((0..n).filter(|&b| b != a_row));
        for b in targets {
            let weight = closure[a_row * n + b];
            if weight <= 0.0 {
                continue;
            }
            let Some(b_id) = lhs_order.get(unit_symbols.keys()[b].as_str()) else {
                continue;
            };
            for &i in &proper_by_lhs[b_id] {
                let rule = &rules[i];
                result.add(Rule::new(
                    a.as_str(),
                    rule.rhs.clone(),
                    weight * rule.probability,
                ));
            }
        }
    }
    Ok(result.rules)
}

/// Inverts a dense `n × n` matrix with Gauss-Jordan elimination and partial pivoting.
fn invert(mut a: Vec<f64>, n: usize) -> Option<Vec<f64>> {
    let mut inv = vec![0.0; n * n];
    for i in 0..n {
        inv[i * n + i] = 1.0;
    }
    for col in 0..n {
        let pivot = (col..n).max_by(|&x, &y| {
            a[x * n + col]
                .abs()
                .partial_cmp(&a[y * n + col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot * n + col].abs() < SINGULAR_EPSILON {
            return None;
        }
        if pivot != col {
            for j in 0..n {
                a.swap(pivot * n + j, col * n + j);
                inv.swap(pivot * n + j, col * n + j);
            }
        }
        let p = a[col * n + col];
        for j in 0..n {
            a[col * n + j] /= p;
            inv[col * n + j] /= p;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row * n + col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                a[row * n + j] -= factor * a[col * n + j];
                inv[row * n + j] -= factor * inv[col * n + j];
            }
        }
    }
    Some(inv)
}
