#![cfg_attr(docsrs, feature(doc_cfg))]

//! # Sintassi
//!
//! Sintassi is a small statistical NLP core: a linear-chain CRF for sequence labeling and a
//! probabilistic context-free grammar with a CYK chart parser.
//!
//! ## Examples
//!
//! Labeling with a trained CRF:
//!
//! ```no_run
//! use std::fs::File;
//! use std::io::{prelude::*, stdin, BufReader};
//!
//! use sintassi::{annotate, tokens_from_annotated, CrfModel};
//!
//! let mut f = BufReader::new(File::open("ner.model").unwrap());
//! let model = CrfModel::read(&mut f).unwrap();
//!
//! for line in stdin().lock().lines() {
//!     let tokens = tokens_from_annotated(line.unwrap()).unwrap();
//!     let labels = model.predict(&tokens);
//!     println!("{}", annotate(&tokens, &labels));
//! }
//! ```
//!
//! Parsing with a grammar:
//!
//! ```
//! use sintassi::{tokens_from_annotated, Grammar, PcfgModel};
//!
//! let grammar: Grammar = "
//!     S -> NP VP [1]
//!     NP -> 'john' [0.5]
//!     NP -> 'mary' [0.5]
//!     VP -> 'runs' [1]
//! "
//! .parse()
//! .unwrap();
//! let model = PcfgModel::from_grammar(grammar).unwrap();
//!
//! let tokens = tokens_from_annotated("Mary runs").unwrap();
//! let outcome = model.predict(&tokens);
//! assert_eq!(
//!     "(S (NP Mary) (VP runs))",
//!     outcome.best().unwrap().tree.to_string(),
//! );
//! ```

mod utils;

mod cnf;
mod crf;
mod crf_trainer;
mod cyk;
mod feature;
mod grammar;
mod label;
mod metrics;
mod model;
mod optimizer;
mod token;
mod tree;

pub mod errors;

pub use cnf::is_synthetic;
pub use crf::{CrfModel, CrfWeight, TrainingMetadata};
pub use crf_trainer::{CrfTrainOptions, CrfTrainer};
pub use cyk::{CykParser, NoDerivation, Parse, ParseOptions, ParseOutcome, TerminalMatch};
pub use feature::{FeatureConfig, FeatureExtractor, FeatureSet, FeatureValue};
pub use grammar::{
    Grammar, GrammarTrainOptions, Rule, RuleCount, Symbol, TerminalKind, PROBABILITY_TOLERANCE,
};
pub use label::{LabelId, LabelSet};
pub use metrics::{entity_spans, Evaluation, LabelScore};
pub use model::{
    AnyModel, ModelKind, PcfgMetadata, PcfgModel, StatisticalModel, MODEL_MAGIC, MODEL_VERSION,
};
pub use optimizer::Optimizer;
pub use token::{annotate, tokens_from_annotated, LabeledSentence, Token};
pub use tree::ParseTree;
