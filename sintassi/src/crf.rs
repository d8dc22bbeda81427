//! Linear-chain conditional random field.

use bincode::{
    de::{BorrowDecoder, Decoder},
    enc::Encoder,
    error::{DecodeError, EncodeError},
    BorrowDecode, Decode, Encode,
};

use crate::crf_trainer::{CrfTrainOptions, CrfTrainer};
use crate::errors::{Result, SintassiError};
use crate::feature::{FeatureConfig, FeatureExtractor};
use crate::label::{LabelId, LabelSet};
use crate::metrics::{Evaluation, SequenceScorer};
use crate::optimizer::Optimizer;
use crate::token::{LabeledSentence, Token};
use crate::utils::{log_sum_exp, Indexer};

/// Attribute ids with their values, one list per position.
pub(crate) type AttributeSeq = Vec<Vec<(usize, f64)>>;

/// All parameters of a CRF in one flat vector.
///
/// Layout: `attribute × label` emission weights, `label × label` transition weights, start
/// weights and end weights.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct CrfWeights {
    n_attributes: usize,
    n_labels: usize,
    params: Vec<f64>,
}

impl CrfWeights {
    pub fn new(n_attributes: usize, n_labels: usize) -> Self {
        let len = n_attributes * n_labels + n_labels * n_labels + 2 * n_labels;
        Self {
            n_attributes,
            n_labels,
            params: vec![0.0; len],
        }
    }

    pub fn n_labels(&self) -> usize {
        self.n_labels
    }

    pub fn n_attributes(&self) -> usize {
        self.n_attributes
    }

    pub fn params(&self) -> &[f64] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut [f64] {
        &mut self.params
    }

    #[inline(always)]
    pub fn emission_index(&self, attribute: usize, label: LabelId) -> usize {
        attribute * self.n_labels + label
    }

    #[inline(always)]
    pub fn transition_index(&self, prev: LabelId, label: LabelId) -> usize {
        (self.n_attributes + prev) * self.n_labels + label
    }

    #[inline(always)]
    pub fn start_index(&self, label: LabelId) -> usize {
        (self.n_attributes + self.n_labels) * self.n_labels + label
    }

    #[inline(always)]
    pub fn end_index(&self, label: LabelId) -> usize {
        (self.n_attributes + self.n_labels + 1) * self.n_labels + label
    }

    #[inline(always)]
    fn transition(&self, prev: LabelId, label: LabelId) -> f64 {
        self.params[self.transition_index(prev, label)]
    }

    /// Computes emission scores as a flat `position × label` table.
    pub fn emissions(&self, xs: &[Vec<(usize, f64)>]) -> Vec<f64> {
        let l = self.n_labels;
        let mut em = vec![0.0; xs.len() * l];
        for (t, attrs) in xs.iter().enumerate() {
            let row = &mut em[t * l..(t + 1) * l];
            for &(a, v) in attrs {
                let offset = a * l;
                for (e, w) in row.iter_mut().zip(&self.params[offset..offset + l]) {
                    *e += v * w;
                }
            }
        }
        em
    }

    /// Unnormalized score of a label path.
    pub fn path_score(&self, em: &[f64], ys: &[LabelId]) -> f64 {
        let l = self.n_labels;
        let (first, last) = match (ys.first(), ys.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => return 0.0,
        };
        let mut score = self.params[self.start_index(first)] + self.params[self.end_index(last)];
        for (t, &y) in ys.iter().enumerate() {
            score += em[t * l + y];
            if t != 0 {
                score += self.transition(ys[t - 1], y);
            }
        }
        score
    }

    /// Runs the forward and backward recursions in log space.
    pub fn forward_backward(&self, em: &[f64]) -> Lattice {
        let l = self.n_labels;
        let n = if l == 0 { 0 } else { em.len() / l };
        let mut alpha = vec![0.0; n * l];
        let mut beta = vec![0.0; n * l];
        if n == 0 {
            return Lattice {
                n_labels: l,
                alpha,
                beta,
                log_z: 0.0,
            };
        }
        for y in 0..l {
            alpha[y] = self.params[self.start_index(y)] + em[y];
        }
        for t in 1..n {
            for y in 0..l {
                let v = log_sum_exp((0..l).map(|p| alpha[(t - 1) * l + p] + self.transition(p, y)));
                alpha[t * l + y] = em[t * l + y] + v;
            }
        }
        for y in 0..l {
            beta[(n - 1) * l + y] = self.params[self.end_index(y)];
        }
        for t in (0..n - 1).rev() {
            for y in 0..l {
                let v = log_sum_exp(
                    (0..l).map(|z| self.transition(y, z) + em[(t + 1) * l + z] + beta[(t + 1) * l + z]),
                );
                beta[t * l + y] = v;
            }
        }
        let log_z = log_sum_exp(
            (0..l).map(|y| alpha[(n - 1) * l + y] + self.params[self.end_index(y)]),
        );
        Lattice {
            n_labels: l,
            alpha,
            beta,
            log_z,
        }
    }

    /// Finds the highest-scoring path. Ties go to the lowest label id.
    pub fn viterbi(&self, em: &[f64]) -> Vec<LabelId> {
        let l = self.n_labels;
        let n = if l == 0 { 0 } else { em.len() / l };
        if n == 0 {
            return vec![];
        }
        let mut delta = vec![0.0; n * l];
        let mut backptr = vec![0; n * l];
        for y in 0..l {
            delta[y] = self.params[self.start_index(y)] + em[y];
        }
        for t in 1..n {
            for y in 0..l {
                let mut best = f64::NEG_INFINITY;
                let mut best_prev = 0;
                for p in 0..l {
                    let s = delta[(t - 1) * l + p] + self.transition(p, y);
                    if s > best {
                        best = s;
                        best_prev = p;
                    }
                }
                delta[t * l + y] = best + em[t * l + y];
                backptr[t * l + y] = best_prev;
            }
        }
        let mut best = f64::NEG_INFINITY;
        let mut best_last = 0;
        for y in 0..l {
            let s = delta[(n - 1) * l + y] + self.params[self.end_index(y)];
            if s > best {
                best = s;
                best_last = y;
            }
        }
        let mut path = vec![0; n];
        path[n - 1] = best_last;
        for t in (1..n).rev() {
            path[t - 1] = backptr[t * l + path[t]];
        }
        path
    }
}

impl Encode for CrfWeights {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        Encode::encode(&self.n_attributes, encoder)?;
        Encode::encode(&self.n_labels, encoder)?;
        Encode::encode(&self.params, encoder)?;
        Ok(())
    }
}

impl Decode for CrfWeights {
    fn decode<D: Decoder>(decoder: &mut D) -> Result<Self, DecodeError> {
        let n_attributes: usize = Decode::decode(decoder)?;
        let n_labels: usize = Decode::decode(decoder)?;
        let params: Vec<f64> = Decode::decode(decoder)?;
        let expected = (n_attributes + n_labels + 2) * n_labels;
        if params.len() != expected {
            return Err(DecodeError::OtherString(format!(
                "invalid weight table: expected {expected} values, got {}",
                params.len()
            )));
        }
        Ok(Self {
            n_attributes,
            n_labels,
            params,
        })
    }
}

impl<'de> BorrowDecode<'de> for CrfWeights {
    fn borrow_decode<D: BorrowDecoder<'de>>(decoder: &mut D) -> Result<Self, DecodeError> {
        Self::decode(decoder)
    }
}

/// Forward and backward log scores of one sequence.
pub(crate) struct Lattice {
    n_labels: usize,
    alpha: Vec<f64>,
    beta: Vec<f64>,
    pub log_z: f64,
}

impl Lattice {
    /// Posterior probability of `label` at position `t`.
    #[inline]
    pub fn marginal(&self, t: usize, label: LabelId) -> f64 {
        let i = t * self.n_labels + label;
        (self.alpha[i] + self.beta[i] - self.log_z).exp()
    }

    /// Posterior probability of `prev` at `t - 1` followed by `label` at `t`.
    #[inline]
    pub fn pair_marginal(
        &self,
        weights: &CrfWeights,
        em: &[f64],
        t: usize,
        prev: LabelId,
        label: LabelId,
    ) -> f64 {
        let l = self.n_labels;
        (self.alpha[(t - 1) * l + prev]
            + weights.transition(prev, label)
            + em[t * l + label]
            + self.beta[t * l + label]
            - self.log_z)
            .exp()
    }
}

/// Summary of a training run, stored with the model.
#[derive(Clone, Debug, PartialEq, Decode, Encode)]
pub struct TrainingMetadata {
    /// Number of iterations performed.
    pub iterations: usize,

    /// Negative conditional log-likelihood at the last iteration.
    pub final_loss: f64,

    /// L2 norm of the regularized gradient at the last iteration.
    pub final_gradient_norm: f64,

    /// Whether training stopped because the gradient norm fell below the threshold.
    pub converged: bool,

    pub optimizer: Optimizer,
    pub learning_rate: f64,
    pub regularization: f64,
    pub n_examples: usize,
}

/// A weight of a trained CRF, as yielded by [`CrfModel::weights()`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CrfWeight<'a> {
    /// Weight of an attribute for a label.
    Emission {
        attribute: &'a str,
        label: &'a str,
        weight: f64,
    },

    /// Weight of a label following another label.
    Transition {
        from: &'a str,
        to: &'a str,
        weight: f64,
    },

    /// Weight of a label at the beginning of a sequence.
    Start { label: &'a str, weight: f64 },

    /// Weight of a label at the end of a sequence.
    End { label: &'a str, weight: f64 },
}

/// Linear-chain CRF sequence labeler.
///
/// # Examples
///
/// ```
/// use sintassi::{CrfModel, CrfTrainOptions, LabeledSentence, Optimizer};
///
/// let examples = vec![
///     LabeledSentence::from_annotated("John/B-PER runs/O").unwrap(),
///     LabeledSentence::from_annotated("the/O dog/O runs/O").unwrap(),
/// ];
/// let options = CrfTrainOptions::default()
///     .with_iterations(30)
///     .with_optimizer(Optimizer::AdaGrad { epsilon: 1e-8 });
/// let model = CrfModel::train(&examples, &options).unwrap();
///
/// let tokens = &examples[0].tokens;
/// assert_eq!(vec!["B-PER", "O"], model.predict(tokens));
/// assert!(model.predict(&[]).is_empty());
/// ```
pub struct CrfModel {
    pub(crate) extractor: FeatureExtractor,
    pub(crate) labels: LabelSet,
    pub(crate) attributes: Indexer<String>,
    pub(crate) weights: CrfWeights,
    pub(crate) metadata: TrainingMetadata,
}

impl CrfModel {
    /// Trains a model.
    ///
    /// # Errors
    ///
    /// [`SintassiError::InvalidArgument`] is returned before any training when the example
    /// set is empty, an example is empty, or token and label counts differ.
    /// [`SintassiError::Numerical`] is returned when training diverges.
    pub fn train(examples: &[LabeledSentence], options: &CrfTrainOptions) -> Result<Self> {
        if examples.is_empty() {
            return Err(SintassiError::invalid_argument(
                "examples",
                "no training examples",
            ));
        }
        for (i, example) in examples.iter().enumerate() {
            CrfTrainer::validate(i, example)?;
        }
        let mut trainer = CrfTrainer::new(options.features.clone())?;
        for example in examples {
            trainer.push_sentence(example)?;
        }
        trainer.train(options)
    }

    /// Labels a token sequence with the Viterbi path.
    ///
    /// The output has the same length as the input; an empty input yields an empty output.
    pub fn predict(&self, tokens: &[Token]) -> Vec<String> {
        self.predict_ids(tokens)
            .into_iter()
            .map(|id| self.labels.name(id).to_string())
            .collect()
    }

    /// Labels a token sequence, returning label ids.
    pub fn predict_ids(&self, tokens: &[Token]) -> Vec<LabelId> {
        if tokens.is_empty() {
            return vec![];
        }
        let em = self.weights.emissions(&self.attribute_seq(tokens));
        self.weights.viterbi(&em)
    }

    /// Computes the conditional log-probability of a labeling.
    ///
    /// # Errors
    ///
    /// [`SintassiError::InvalidArgument`] is returned when the lengths differ or a label is
    /// not in the model's label set.
    pub fn score_sequence<S>(&self, tokens: &[Token], labels: &[S]) -> Result<f64>
    where
        S: AsRef<str>,
    {
        if tokens.len() != labels.len() {
            return Err(SintassiError::invalid_argument(
                "labels",
                format!(
                    "{} labels given for {} tokens",
                    labels.len(),
                    tokens.len()
                ),
            ));
        }
        let ys = labels
            .iter()
            .map(|label| self.labels.require(label.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let em = self.weights.emissions(&self.attribute_seq(tokens));
        let lattice = self.weights.forward_backward(&em);
        Ok(self.weights.path_score(&em, &ys) - lattice.log_z)
    }

    /// Computes the posterior probability of every label at every position.
    ///
    /// Rows follow token order; columns follow label ids.
    pub fn marginals(&self, tokens: &[Token]) -> Vec<Vec<f64>> {
        let em = self.weights.emissions(&self.attribute_seq(tokens));
        let lattice = self.weights.forward_backward(&em);
        (0..tokens.len())
            .map(|t| {
                (0..self.labels.len())
                    .map(|y| lattice.marginal(t, y))
                    .collect()
            })
            .collect()
    }

    /// Evaluates the model on labeled sentences.
    ///
    /// # Errors
    ///
    /// [`SintassiError::InvalidArgument`] is returned when an example has different numbers
    /// of tokens and labels.
    pub fn evaluate(&self, examples: &[LabeledSentence]) -> Result<Evaluation> {
        let mut scorer = SequenceScorer::new();
        for (i, example) in examples.iter().enumerate() {
            if example.tokens.len() != example.labels.len() {
                return Err(SintassiError::invalid_argument(
                    "examples",
                    format!("example {i} has mismatched token and label counts"),
                ));
            }
            scorer.push(&example.labels, &self.predict(&example.tokens));
        }
        Ok(scorer.finish())
    }

    /// Replaces the gazetteer of the feature extractor.
    ///
    /// Categories the model was not trained with contribute nothing.
    ///
    /// # Errors
    ///
    /// An error variant is returned if a phrase is empty.
    pub fn with_gazetteer(mut self, gazetteer: Vec<(String, String)>) -> Result<Self> {
        let config = self.extractor.config().clone().with_gazetteer(gazetteer);
        self.extractor = FeatureExtractor::new(config)?;
        Ok(self)
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn metadata(&self) -> &TrainingMetadata {
        &self.metadata
    }

    pub fn feature_config(&self) -> &FeatureConfig {
        self.extractor.config()
    }

    /// Iterates over all weights, emissions first.
    pub fn weights(&self) -> impl Iterator<Item = CrfWeight<'_>> + '_ {
        let w = &self.weights;
        let labels = &self.labels;
        let emissions = self
            .attributes
            .keys()
            .iter()
            .enumerate()
            .flat_map(move |(a, attribute)| {
                labels.iter().enumerate().map(move |(y, label)| CrfWeight::Emission {
                    attribute: attribute.as_str(),
                    label,
                    weight: w.params[w.emission_index(a, y)],
                })
            });
        let transitions = labels.iter().enumerate().flat_map(move |(p, from)| {
            labels.iter().enumerate().map(move |(y, to)| CrfWeight::Transition {
                from,
                to,
                weight: w.transition(p, y),
            })
        });
        let starts = labels.iter().enumerate().map(move |(y, label)| CrfWeight::Start {
            label,
            weight: w.params[w.start_index(y)],
        });
        let ends = labels.iter().enumerate().map(move |(y, label)| CrfWeight::End {
            label,
            weight: w.params[w.end_index(y)],
        });
        emissions.chain(transitions).chain(starts).chain(ends)
    }

    fn attribute_seq(&self, tokens: &[Token]) -> AttributeSeq {
        self.extractor
            .extract_all(tokens)
            .iter()
            .map(|fs| {
                fs.attributes()
                    .filter_map(|(name, v)| self.attributes.get(name.as_str()).map(|a| (a, v)))
                    .collect()
            })
            .collect()
    }
}

impl Encode for CrfModel {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        Encode::encode(&self.extractor, encoder)?;
        Encode::encode(&self.labels, encoder)?;
        Encode::encode(&self.attributes, encoder)?;
        Encode::encode(&self.weights, encoder)?;
        Encode::encode(&self.metadata, encoder)?;
        Ok(())
    }
}

impl Decode for CrfModel {
    fn decode<D: Decoder>(decoder: &mut D) -> Result<Self, DecodeError> {
        let extractor: FeatureExtractor = Decode::decode(decoder)?;
        let labels: LabelSet = Decode::decode(decoder)?;
        let attributes: Indexer<String> = Decode::decode(decoder)?;
        let weights: CrfWeights = Decode::decode(decoder)?;
        let metadata: TrainingMetadata = Decode::decode(decoder)?;
        if labels.len() != weights.n_labels() || attributes.len() != weights.n_attributes() {
            return Err(DecodeError::OtherString(
                "weight table does not match the label set or the attribute index".to_string(),
            ));
        }
        Ok(Self {
            extractor,
            labels,
            attributes,
            weights,
            metadata,
        })
    }
}

impl<'de> BorrowDecode<'de> for CrfModel {
    fn borrow_decode<D: BorrowDecoder<'de>>(decoder: &mut D) -> Result<Self, DecodeError> {
        Self::decode(decoder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Deterministic pseudo-random values in [-2, 2).
    fn fill(xs: &mut [f64], seed: u64) {
        let mut state = seed;
        for x in xs {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            *x = ((state >> 11) as f64 / (1u64 << 53) as f64) * 4.0 - 2.0;
        }
    }

    fn all_paths(n: usize, l: usize) -> Vec<Vec<LabelId>> {
        let mut paths = vec![vec![]];
        for _ in 0..n {
            paths = paths
                .into_iter()
                .flat_map(|p| {
                    (0..l).map(move |y| {
                        let mut p = p.clone();
                        p.push(y);
                        p
                    })
                })
                .collect();
        }
        paths
    }

    fn random_lattice() -> (CrfWeights, Vec<f64>) {
        let mut weights = CrfWeights::new(0, 3);
        fill(weights.params_mut(), 42);
        let mut em = vec![0.0; 4 * 3];
        fill(&mut em, 7);
        (weights, em)
    }

    #[test]
    fn test_viterbi_matches_brute_force() {
        let (weights, em) = random_lattice();

        let mut best = f64::NEG_INFINITY;
        let mut best_path = vec![];
        for path in all_paths(4, 3) {
            let s = weights.path_score(&em, &path);
            if s > best {
                best = s;
                best_path = path;
            }
        }

        let path = weights.viterbi(&em);
        assert_eq!(best_path, path);
        assert!((best - weights.path_score(&em, &path)).abs() < 1e-12);
    }

    #[test]
    fn test_forward_backward_matches_brute_force() {
        let (weights, em) = random_lattice();
        let lattice = weights.forward_backward(&em);

        let scores: Vec<f64> = all_paths(4, 3)
            .iter()
            .map(|p| weights.path_score(&em, p))
            .collect();
        assert!((log_sum_exp(scores.iter().copied()) - lattice.log_z).abs() < 1e-9);

        for t in 0..4 {
            let total: f64 = (0..3).map(|y| lattice.marginal(t, y)).sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
        let total: f64 = (0..3)
            .flat_map(|p| (0..3).map(move |y| (p, y)))
            .map(|(p, y)| lattice.pair_marginal(&weights, &em, 2, p, y))
            .sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_viterbi_ties_go_to_lowest_label() {
        let weights = CrfWeights::new(0, 3);
        let em = vec![0.0; 5 * 3];

        assert_eq!(vec![0, 0, 0, 0, 0], weights.viterbi(&em));
    }

    #[test]
    fn test_viterbi_empty() {
        let weights = CrfWeights::new(2, 3);

        assert!(weights.viterbi(&[]).is_empty());
        assert_eq!(0.0, weights.forward_backward(&[]).log_z);
    }

    #[test]
    fn test_emissions() {
        let mut weights = CrfWeights::new(2, 2);
        let i = weights.emission_index(1, 0);
        weights.params_mut()[i] = 1.5;
        let i = weights.emission_index(0, 1);
        weights.params_mut()[i] = -1.0;

        let em = weights.emissions(&[vec![(0, 1.0), (1, 2.0)], vec![]]);
        assert_eq!(vec![3.0, -1.0, 0.0, 0.0], em);
    }

    #[test]
    fn test_crf_weights_decode_rejects_bad_length() {
        let weights = CrfWeights {
            n_attributes: 1,
            n_labels: 2,
            params: vec![0.0; 3],
        };
        let config = bincode::config::standard();
        let bytes = bincode::encode_to_vec(&weights, config).unwrap();

        assert!(bincode::decode_from_slice::<CrfWeights, _>(&bytes, config).is_err());
    }
}
