//! Precision, recall and F1 bookkeeping.

use std::collections::BTreeMap;
use std::fmt;

/// Counts of one label (or of all labels pooled together).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LabelScore {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl LabelScore {
    /// Returns 0.0 when nothing was predicted.
    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    /// Returns 0.0 when nothing was expected.
    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    /// Harmonic mean of precision and recall, or 0.0 when both are 0.0.
    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    /// Number of gold items.
    pub fn support(&self) -> usize {
        self.true_positives + self.false_negatives
    }

    fn add(&mut self, other: &Self) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Result of evaluating a model on held-out data.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Evaluation {
    /// Scores per label, or per constituent label for parse trees.
    pub per_label: BTreeMap<String, LabelScore>,

    /// Micro-averaged scores over all labels.
    pub overall: LabelScore,

    /// Token accuracy for sequence labeling, exact-match rate for parsing.
    pub accuracy: f64,

    /// Entity-level scores when the labels follow the BIO scheme.
    pub entities: Option<LabelScore>,
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "{:<16} {:>9} {:>9} {:>9} {:>9}",
            "label", "precision", "recall", "f1", "support"
        )?;
        let write_row = |f: &mut fmt::Formatter, name: &str, s: &LabelScore| {
            writeln!(
                f,
                "{:<16} {:>9.4} {:>9.4} {:>9.4} {:>9}",
                name,
                s.precision(),
                s.recall(),
                s.f1(),
                s.support()
            )
        };
        for (label, score) in &self.per_label {
            write_row(f, label, score)?;
        }
        write_row(f, "(overall)", &self.overall)?;
        if let Some(entities) = &self.entities {
            write_row(f, "(entities)", entities)?;
        }
        write!(f, "accuracy: {:.4}", self.accuracy)
    }
}

/// Accumulates token-level and entity-level scores of label sequences.
#[derive(Default)]
pub(crate) struct SequenceScorer {
    per_label: BTreeMap<String, LabelScore>,
    entities: LabelScore,
    has_bio: bool,
    n_correct: usize,
    n_total: usize,
}

impl SequenceScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<S, T>(&mut self, gold: &[S], predicted: &[T])
    where
        S: AsRef<str>,
        T: AsRef<str>,
    {
        debug_assert_eq!(gold.len(), predicted.len());
        for (g, p) in gold.iter().zip(predicted) {
            let (g, p) = (g.as_ref(), p.as_ref());
            self.n_total += 1;
            if g == p {
                self.n_correct += 1;
                self.per_label.entry(g.to_string()).or_default().true_positives += 1;
            } else {
                self.per_label.entry(g.to_string()).or_default().false_negatives += 1;
                self.per_label.entry(p.to_string()).or_default().false_positives += 1;
            }
        }

        let gold_spans = entity_spans(gold);
        let pred_spans = entity_spans(predicted);
        if gold.iter().any(|l| is_bio(l.as_ref())) || predicted.iter().any(|l| is_bio(l.as_ref()))
        {
            self.has_bio = true;
        }
        let tp = pred_spans.iter().filter(|s| gold_spans.contains(s)).count();
        self.entities.true_positives += tp;
        self.entities.false_positives += pred_spans.len() - tp;
        self.entities.false_negatives += gold_spans.len() - tp;
    }

    pub fn finish(self) -> Evaluation {
        let mut overall = LabelScore::default();
        for score in self.per_label.values() {
            overall.add(score);
        }
        Evaluation {
            per_label: self.per_label,
            overall,
            accuracy: ratio(self.n_correct, self.n_total),
            entities: self.has_bio.then_some(self.entities),
        }
    }
}

fn is_bio(label: &str) -> bool {
    label.starts_with("B-") || label.starts_with("I-")
}

/// Extracts `(type, start, end)` entity spans from a BIO label sequence.
///
/// An `I-` label that does not continue an entity of the same type starts a new one.
pub fn entity_spans<S>(labels: &[S]) -> Vec<(String, usize, usize)>
where
    S: AsRef<str>,
{
    let mut spans = vec![];
    let mut current: Option<(&str, usize)> = None;
    for (i, label) in labels.iter().enumerate() {
        let label = label.as_ref();
        let (inside, ty) = if let Some(ty) = label.strip_prefix("B-") {
            (false, Some(ty))
        } else if let Some(ty) = label.strip_prefix("I-") {
            (true, Some(ty))
        } else {
            (false, None)
        };
        match (current, ty) {
            (Some((cur, _)), Some(ty)) if inside && cur == ty => continue,
            (Some((cur, start)), _) => spans.push((cur.to_string(), start, i)),
            (None, _) => (),
        }
        current = ty.map(|ty| (ty, i));
    }
    if let Some((cur, start)) = current {
        spans.push((cur.to_string(), start, labels.len()));
    }
    spans
}

/// Keeps the brackets that take part in scoring parse trees.
///
/// Brackets over a single word are dropped, and of a unary chain over the same span only the
/// topmost label is kept. `brackets` must be in post-order, as returned by
/// [`crate::ParseTree::brackets()`].
pub(crate) fn phrase_brackets(brackets: &[(String, usize, usize)]) -> Vec<(String, usize, usize)> {
    let mut result: Vec<(String, usize, usize)> = vec![];
    for bracket in brackets.iter().filter(|b| b.2 - b.1 >= 2) {
        match result.last_mut() {
            Some(last) if (last.1, last.2) == (bracket.1, bracket.2) => *last = bracket.clone(),
            _ => result.push(bracket.clone()),
        }
    }
    result
}

/// Accumulates labeled-bracket scores of parse trees.
#[derive(Default)]
pub(crate) struct BracketScorer {
    per_label: BTreeMap<String, LabelScore>,
    n_exact: usize,
    n_trees: usize,
}

impl BracketScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one sentence. `predicted` is `None` when the parser found no derivation.
    pub fn push(
        &mut self,
        gold: &[(String, usize, usize)],
        predicted: Option<&[(String, usize, usize)]>,
    ) {
        self.n_trees += 1;
        let predicted = predicted.unwrap_or_default();
        let mut remaining: Vec<Option<&(String, usize, usize)>> = gold.iter().map(Some).collect();
        let mut n_matched = 0;
        for bracket in predicted {
            let found = remaining
                .iter_mut()
                .find(|g| g.map_or(false, |g| g == bracket));
            let score = self.per_label.entry(bracket.0.clone()).or_default();
            if let Some(slot) = found {
                *slot = None;
                score.true_positives += 1;
                n_matched += 1;
            } else {
                score.false_positives += 1;
            }
        }
        for bracket in remaining.into_iter().flatten() {
            self.per_label
                .entry(bracket.0.clone())
                .or_default()
                .false_negatives += 1;
        }
        if n_matched == gold.len() && n_matched == predicted.len() {
            self.n_exact += 1;
        }
    }

    pub fn finish(self) -> Evaluation {
        let mut overall = LabelScore::default();
        for score in self.per_label.values() {
            overall.add(score);
        }
        Evaluation {
            per_label: self.per_label,
            overall,
            accuracy: ratio(self.n_exact, self.n_trees),
            entities: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::tree::ParseTree;

    #[test]
    fn test_label_score_undefined() {
        let s = LabelScore::default();

        assert_eq!(0.0, s.precision());
        assert_eq!(0.0, s.recall());
        assert_eq!(0.0, s.f1());
    }

    #[test]
    fn test_entity_spans() {
        let labels = ["B-PER", "I-PER", "O", "I-LOC", "B-LOC", "B-LOC", "I-PER"];

        assert_eq!(
            vec![
                ("PER".to_string(), 0, 2),
                ("LOC".to_string(), 3, 4),
                ("LOC".to_string(), 4, 5),
                ("LOC".to_string(), 5, 6),
                ("PER".to_string(), 6, 7),
            ],
            entity_spans(&labels)
        );
    }

    #[test]
    fn test_sequence_scorer() {
        let mut scorer = SequenceScorer::new();
        scorer.push(&["B-PER", "I-PER", "O"], &["B-PER", "O", "O"]);
        scorer.push(&["O", "B-LOC"], &["O", "B-LOC"]);
        let eval = scorer.finish();

        assert_eq!(
            LabelScore {
                true_positives: 0,
                false_positives: 0,
                false_negatives: 1,
            },
            eval.per_label["I-PER"]
        );
        assert_eq!(
            LabelScore {
                true_positives: 2,
                false_positives: 1,
                false_negatives: 0,
            },
            eval.per_label["O"]
        );
        assert_eq!(0.8, eval.accuracy);
        assert_eq!(
            Some(LabelScore {
                true_positives: 1,
                false_positives: 1,
                false_negatives: 1,
            }),
            eval.entities
        );
    }

    #[test]
    fn test_sequence_scorer_without_bio() {
        let mut scorer = SequenceScorer::new();
        scorer.push(&["DT", "NN"], &["DT", "VB"]);
        let eval = scorer.finish();

        assert_eq!(None, eval.entities);
        assert_eq!(0.5, eval.overall.precision());
    }

    #[test]
    fn test_bracket_scorer() {
        let gold = vec![
            ("S".to_string(), 0, 3),
            ("NP".to_string(), 0, 2),
            ("VP".to_string(), 2, 3),
        ];
        let predicted = vec![
            ("S".to_string(), 0, 3),
            ("NP".to_string(), 1, 3),
            ("VP".to_string(), 2, 3),
        ];
        let mut scorer = BracketScorer::new();
        scorer.push(&gold, Some(&predicted));
        scorer.push(&gold, None);
        let eval = scorer.finish();

        assert_eq!(
            LabelScore {
                true_positives: 2,
                false_positives: 1,
                false_negatives: 4,
            },
            eval.overall
        );
        assert_eq!(0.0, eval.accuracy);
        assert_eq!(None, eval.entities);
    }

    #[test]
    fn test_phrase_brackets_collapses_unary_chains() {
        let tree: ParseTree = "(S (VP (VB eat) (NP (NN fish))))".parse().unwrap();

        assert_eq!(
            vec![
                ("NP".to_string(), 1, 2),
                ("VP".to_string(), 0, 2),
                ("S".to_string(), 0, 2),
            ],
            tree.brackets()
        );
        assert_eq!(vec![("S".to_string(), 0, 2)], phrase_brackets(&tree.brackets()));
    }
}
