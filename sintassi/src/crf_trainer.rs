use std::thread;

use crate::crf::{AttributeSeq, CrfModel, CrfWeights, TrainingMetadata};
use crate::errors::{Result, SintassiError};
use crate::feature::{FeatureConfig, FeatureExtractor};
use crate::label::{LabelId, LabelSet};
use crate::optimizer::{Optimizer, OptimizerState};
use crate::token::LabeledSentence;
use crate::utils::{l2_norm, Indexer};

/// Options of CRF training.
#[derive(Clone, Debug, PartialEq)]
pub struct CrfTrainOptions {
    /// Feature extractor configuration stored with the model.
    pub features: FeatureConfig,

    /// Maximum number of iterations.
    pub iterations: usize,

    pub learning_rate: f64,

    /// L2 regularization strength.
    pub regularization: f64,

    /// Training stops when the gradient norm falls below this value.
    pub convergence: f64,

    pub optimizer: Optimizer,

    /// Number of threads computing gradients.
    pub n_threads: usize,
}

impl Default for CrfTrainOptions {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            iterations: 100,
            learning_rate: 0.1,
            regularization: 0.01,
            convergence: 0.01,
            optimizer: Optimizer::GradientDescent,
            n_threads: 1,
        }
    }
}

impl CrfTrainOptions {
    pub fn with_features(mut self, features: FeatureConfig) -> Self {
        self.features = features;
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_regularization(mut self, regularization: f64) -> Self {
        self.regularization = regularization;
        self
    }

    pub fn with_convergence(mut self, convergence: f64) -> Self {
        self.convergence = convergence;
        self
    }

    pub fn with_optimizer(mut self, optimizer: Optimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_n_threads(mut self, n_threads: usize) -> Self {
        self.n_threads = n_threads;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(SintassiError::invalid_argument(
                "iterations",
                "must be at least 1",
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(SintassiError::invalid_argument(
                "learning_rate",
                "must be a positive finite number",
            ));
        }
        if !(self.regularization.is_finite() && self.regularization >= 0.0) {
            return Err(SintassiError::invalid_argument(
                "regularization",
                "must be a non-negative finite number",
            ));
        }
        if !(self.convergence >= 0.0) {
            return Err(SintassiError::invalid_argument(
                "convergence",
                "must be non-negative",
            ));
        }
        if self.n_threads == 0 {
            return Err(SintassiError::invalid_argument(
                "n_threads",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

struct Example {
    xs: AttributeSeq,
    ys: Vec<LabelId>,
}

/// CRF trainer.
///
/// Sentences are compiled into attribute ids as they are pushed; the weights are fitted
/// by [`CrfTrainer::train()`].
///
/// # Examples
///
/// ```no_run
/// use std::fs::File;
/// use std::io::{prelude::*, BufReader};
///
/// use sintassi::{CrfTrainOptions, CrfTrainer, FeatureConfig, LabeledSentence};
///
/// let mut trainer = CrfTrainer::new(FeatureConfig::default()).unwrap();
/// let f = BufReader::new(File::open("train.txt").unwrap());
/// for line in f.lines() {
///     let s = LabeledSentence::from_annotated(line.unwrap()).unwrap();
///     trainer.push_sentence(&s).unwrap();
/// }
/// let model = trainer.train(&CrfTrainOptions::default()).unwrap();
/// ```
pub struct CrfTrainer {
    extractor: FeatureExtractor,
    labels: LabelSet,
    attributes: Indexer<String>,
    examples: Vec<Example>,
}

impl CrfTrainer {
    /// Creates a new trainer.
    ///
    /// # Errors
    ///
    /// If the feature configuration is invalid, an error variant will be returned.
    pub fn new(features: FeatureConfig) -> Result<Self> {
        Ok(Self {
            extractor: FeatureExtractor::new(features)?,
            labels: LabelSet::new(),
            attributes: Indexer::new(),
            examples: vec![],
        })
    }

    pub(crate) fn validate(i: usize, s: &LabeledSentence) -> Result<()> {
        if s.tokens.is_empty() {
            return Err(SintassiError::invalid_argument(
                "examples",
                format!("example {i} is empty"),
            ));
        }
        if s.tokens.len() != s.labels.len() {
            return Err(SintassiError::invalid_argument(
                "examples",
                format!(
                    "example {i} has {} tokens but {} labels",
                    s.tokens.len(),
                    s.labels.len()
                ),
            ));
        }
        if s.labels.iter().any(String::is_empty) {
            return Err(SintassiError::invalid_argument(
                "examples",
                format!("example {i} contains an empty label"),
            ));
        }
        Ok(())
    }

    /// Adds a sentence to the dataset.
    ///
    /// # Errors
    ///
    /// [`SintassiError::InvalidArgument`] will be returned if the sentence is empty or the
    /// numbers of tokens and labels differ.
    pub fn push_sentence(&mut self, s: &LabeledSentence) -> Result<()> {
        Self::validate(self.examples.len(), s)?;
        let xs = self
            .extractor
            .extract_all(&s.tokens)
            .iter()
            .map(|fs| {
                fs.attributes()
                    .map(|(name, v)| (self.attributes.get_id(name.as_str()), v))
                    .collect()
            })
            .collect();
        let ys = s.labels.iter().map(|label| self.labels.insert(label)).collect();
        self.examples.push(Example { xs, ys });
        Ok(())
    }

    /// Gets the number of sentences.
    pub fn n_examples(&self) -> usize {
        self.examples.len()
    }

    /// Gets the number of distinct attributes.
    pub fn n_attributes(&self) -> usize {
        self.attributes.len()
    }

    /// Fits the weights.
    ///
    /// # Errors
    ///
    /// [`SintassiError::InvalidArgument`] is returned for invalid options or an empty
    /// dataset, and [`SintassiError::Numerical`] when a loss, gradient or weight stops
    /// being finite.
    pub fn train(self, options: &CrfTrainOptions) -> Result<CrfModel> {
        options.validate()?;
        if self.examples.is_empty() {
            return Err(SintassiError::invalid_argument(
                "examples",
                "no training examples",
            ));
        }
        log::info!(
            "training a CRF: {} examples, {} labels, {} attributes, optimizer {}",
            self.examples.len(),
            self.labels.len(),
            self.attributes.len(),
            options.optimizer,
        );

        let mut weights = CrfWeights::new(self.attributes.len(), self.labels.len());
        let mut optimizer = OptimizerState::new(
            options.optimizer,
            options.learning_rate,
            weights.params().len(),
        );
        let mut metadata = TrainingMetadata {
            iterations: 0,
            final_loss: f64::NAN,
            final_gradient_norm: f64::NAN,
            converged: false,
            optimizer: options.optimizer,
            learning_rate: options.learning_rate,
            regularization: options.regularization,
            n_examples: self.examples.len(),
        };

        for it in 1..=options.iterations {
            let (loss, mut gradient) = self.loss_and_gradient(&weights, options.n_threads)?;
            for (g, w) in gradient.iter_mut().zip(weights.params()) {
                *g += options.regularization * w;
            }
            let norm = l2_norm(&gradient);
            if !loss.is_finite() || !norm.is_finite() {
                return Err(SintassiError::numerical(format!(
                    "iteration {it}: loss {loss}, gradient norm {norm}"
                )));
            }
            log::debug!("iteration {it}: loss={loss:.6} gradient_norm={norm:.6}");

            metadata.iterations = it;
            metadata.final_loss = loss;
            metadata.final_gradient_norm = norm;
            if norm < options.convergence {
                metadata.converged = true;
                break;
            }
            optimizer.step(weights.params_mut(), &gradient);
            if weights.params().iter().any(|w| !w.is_finite()) {
                return Err(SintassiError::numerical(format!(
                    "iteration {it}: weights are no longer finite"
                )));
            }
        }
        log::info!(
            "finished after {} iterations: loss={:.6} converged={}",
            metadata.iterations,
            metadata.final_loss,
            metadata.converged,
        );

        Ok(CrfModel {
            extractor: self.extractor,
            labels: self.labels,
            attributes: self.attributes,
            weights,
            metadata,
        })
    }

    /// Sums the negative log-likelihood and its gradient over all examples.
    ///
    /// Examples are split into contiguous chunks, one per thread, and the partial sums are
    /// added in chunk order.
    fn loss_and_gradient(&self, weights: &CrfWeights, n_threads: usize) -> Result<(f64, Vec<f64>)> {
        let n_threads = n_threads.min(self.examples.len()).max(1);
        if n_threads == 1 {
            return accumulate(weights, &self.examples);
        }
        let chunk_size = (self.examples.len() + n_threads - 1) / n_threads;
        let partials: Vec<Result<(f64, Vec<f64>)>> = thread::scope(|s| {
            let handles: Vec<_> = self
                .examples
                .chunks(chunk_size)
                .map(|chunk| s.spawn(move || accumulate(weights, chunk)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        });
        let mut loss = 0.0;
        let mut gradient = vec![0.0; weights.params().len()];
        for partial in partials {
            let (l, g) = partial?;
            loss += l;
            for (x, y) in gradient.iter_mut().zip(g) {
                *x += y;
            }
        }
        Ok((loss, gradient))
    }
}

/// Computes `Σ (log Z − gold score)` and `expected − observed` counts for a chunk.
fn accumulate(weights: &CrfWeights, examples: &[Example]) -> Result<(f64, Vec<f64>)> {
    let n_labels = weights.n_labels();
    let mut gradient = vec![0.0; weights.params().len()];
    let mut loss = 0.0;
    for example in examples {
        let n = example.ys.len();
        let em = weights.emissions(&example.xs);
        let lattice = weights.forward_backward(&em);
        if !lattice.log_z.is_finite() {
            return Err(SintassiError::numerical(
                "log partition function is not finite",
            ));
        }
        loss += lattice.log_z - weights.path_score(&em, &example.ys);

        // observed
        for (t, (attrs, &y)) in example.xs.iter().zip(&example.ys).enumerate() {
            for &(a, v) in attrs {
                gradient[weights.emission_index(a, y)] -= v;
            }
            if t != 0 {
                gradient[weights.transition_index(example.ys[t - 1], y)] -= 1.0;
            }
        }
        gradient[weights.start_index(example.ys[0])] -= 1.0;
        gradient[weights.end_index(example.ys[n - 1])] -= 1.0;

        // expected
        for (t, attrs) in example.xs.iter().enumerate() {
            for y in 0..n_labels {
                let p = lattice.marginal(t, y);
                for &(a, v) in attrs {
                    gradient[weights.emission_index(a, y)] += v * p;
                }
                if t == 0 {
                    gradient[weights.start_index(y)] += p;
                }
                if t == n - 1 {
                    gradient[weights.end_index(y)] += p;
                }
            }
            if t != 0 {
                for prev in 0..n_labels {
                    for y in 0..n_labels {
                        gradient[weights.transition_index(prev, y)] +=
                            lattice.pair_marginal(weights, &em, t, prev, y);
                    }
                }
            }
        }
    }
    Ok((loss, gradient))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::token::Token;

    fn sentence(line: &str) -> LabeledSentence {
        LabeledSentence::from_annotated(line).unwrap()
    }

    fn dataset() -> Vec<LabeledSentence> {
        vec![
            sentence("John/B-PER Smith/I-PER runs/O"),
            sentence("Mary/B-PER Jones/I-PER sleeps/O"),
            sentence("the/O dog/O barks/O"),
        ]
    }

    #[test]
    fn test_train_rejects_empty_dataset() {
        let result = CrfModel::train(&[], &CrfTrainOptions::default());

        assert_eq!(
            "InvalidArgumentError: examples: no training examples",
            &result.err().unwrap().to_string()
        );
    }

    #[test]
    fn test_train_rejects_length_mismatch() {
        let mut examples = dataset();
        examples.push(LabeledSentence::new(
            vec![Token::new("a"), Token::new("b")],
            vec!["O".to_string()],
        ));
        let result = CrfModel::train(&examples, &CrfTrainOptions::default());

        assert_eq!(
            "InvalidArgumentError: examples: example 3 has 2 tokens but 1 labels",
            &result.err().unwrap().to_string()
        );
    }

    #[test]
    fn test_train_rejects_empty_example() {
        let examples = vec![LabeledSentence::new(vec![], vec![])];
        let result = CrfModel::train(&examples, &CrfTrainOptions::default());

        assert_eq!(
            "InvalidArgumentError: examples: example 0 is empty",
            &result.err().unwrap().to_string()
        );
    }

    #[test]
    fn test_train_rejects_invalid_options() {
        let options = CrfTrainOptions::default().with_learning_rate(-1.0);
        let result = CrfModel::train(&dataset(), &options);

        assert!(matches!(result, Err(SintassiError::InvalidArgument(_))));
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let mut trainer = CrfTrainer::new(FeatureConfig::default().with_window(0)).unwrap();
        for s in dataset() {
            trainer.push_sentence(&s).unwrap();
        }
        let mut weights = CrfWeights::new(trainer.n_attributes(), 3);
        for (i, w) in weights.params_mut().iter_mut().enumerate() {
            *w = ((i * 7) % 11) as f64 * 0.05 - 0.25;
        }

        let (_, gradient) = accumulate(&weights, &trainer.examples).unwrap();
        let h = 1e-6;
        for i in [0, 5, weights.transition_index(1, 2), weights.start_index(0), weights.end_index(2)] {
            let mut plus = weights.clone();
            plus.params_mut()[i] += h;
            let mut minus = weights.clone();
            minus.params_mut()[i] -= h;
            let (lp, _) = accumulate(&plus, &trainer.examples).unwrap();
            let (lm, _) = accumulate(&minus, &trainer.examples).unwrap();
            let numeric = (lp - lm) / (2.0 * h);
            assert!((numeric - gradient[i]).abs() < 1e-5, "param {i}");
        }
    }

    #[test]
    fn test_gradient_is_independent_of_thread_count() {
        let mut trainer = CrfTrainer::new(FeatureConfig::default()).unwrap();
        for s in dataset() {
            trainer.push_sentence(&s).unwrap();
        }
        let weights = CrfWeights::new(trainer.n_attributes(), 3);

        let (l1, g1) = trainer.loss_and_gradient(&weights, 1).unwrap();
        let (l3, g3) = trainer.loss_and_gradient(&weights, 3).unwrap();
        assert!((l1 - l3).abs() < 1e-9);
        for (a, b) in g1.iter().zip(&g3) {
            assert!((a - b).abs() < 1e-9);
        }
        // All weights are zero, so every path is equally likely.
        assert!((l1 - 9.0 * 3f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn test_gradient_descent_decreases_loss() {
        let options = CrfTrainOptions::default()
            .with_iterations(2)
            .with_learning_rate(0.01);
        let model = CrfModel::train(&dataset(), &options).unwrap();

        assert_eq!(2, model.metadata().iterations);
        assert!(model.metadata().final_loss < 9.0 * 3f64.ln());
        assert!(!model.metadata().converged);
    }

    #[test]
    fn test_train_reaches_full_training_accuracy() {
        let options = CrfTrainOptions::default()
            .with_iterations(50)
            .with_optimizer(Optimizer::AdaGrad { epsilon: 1e-8 });
        let examples = dataset();
        let model = CrfModel::train(&examples, &options).unwrap();

        for s in &examples {
            assert_eq!(s.labels, model.predict(&s.tokens));
        }
        let eval = model.evaluate(&examples).unwrap();
        assert_eq!(1.0, eval.accuracy);
        assert_eq!(1.0, eval.entities.unwrap().f1());
        assert_eq!(
            vec!["B-PER", "I-PER", "O"],
            model.labels().iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_train_default_optimizer_reaches_full_accuracy() {
        let options = CrfTrainOptions::default().with_iterations(50);
        let examples = dataset();
        let model = CrfModel::train(&examples, &options).unwrap();

        assert_eq!(Optimizer::GradientDescent, options.optimizer);
        assert_eq!(0.1, options.learning_rate);
        for s in &examples {
            assert_eq!(s.labels, model.predict(&s.tokens));
        }
        assert_eq!(1.0, model.evaluate(&examples).unwrap().accuracy);
    }

    #[test]
    fn test_train_reports_numerical_failure() {
        let options = CrfTrainOptions::default()
            .with_iterations(10)
            .with_learning_rate(1e306);
        let result = CrfModel::train(&dataset(), &options);

        assert!(matches!(result, Err(SintassiError::Numerical(_))));
    }

    #[test]
    fn test_train_with_threads() {
        let options = CrfTrainOptions::default()
            .with_iterations(50)
            .with_n_threads(2)
            .with_optimizer(Optimizer::AdaGrad { epsilon: 1e-8 });
        let examples = dataset();
        let model = CrfModel::train(&examples, &options).unwrap();

        for s in &examples {
            assert_eq!(s.labels, model.predict(&s.tokens));
        }
    }

    #[test]
    fn test_marginals_are_distributions() {
        let options = CrfTrainOptions::default().with_iterations(5);
        let model = CrfModel::train(&dataset(), &options).unwrap();
        let tokens = dataset().remove(0).tokens;

        let marginals = model.marginals(&tokens);
        assert_eq!(3, marginals.len());
        for row in marginals {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_score_sequence_rejects_unknown_label() {
        let options = CrfTrainOptions::default().with_iterations(1);
        let model = CrfModel::train(&dataset(), &options).unwrap();
        let tokens = dataset().remove(0).tokens;

        let result = model.score_sequence(&tokens, &["B-PER", "B-LOC", "O"]);
        assert_eq!(
            "InvalidArgumentError: labels: unknown label `B-LOC`",
            &result.err().unwrap().to_string()
        );
        let lp = model.score_sequence(&tokens, &["B-PER", "I-PER", "O"]).unwrap();
        assert!(lp < 0.0);
    }
}
