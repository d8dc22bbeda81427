use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

use bincode::{
    de::{BorrowDecoder, Decoder},
    enc::Encoder,
    error::{DecodeError, EncodeError},
    BorrowDecode, Decode, Encode,
};

use crate::crf::CrfModel;
use crate::crf_trainer::CrfTrainOptions;
use crate::cyk::{CykParser, ParseOptions, ParseOutcome};
use crate::errors::{Result, SintassiError};
use crate::grammar::{Grammar, GrammarTrainOptions, RuleCount};
use crate::metrics::{phrase_brackets, BracketScorer, Evaluation};
use crate::token::{LabeledSentence, Token};
use crate::tree::ParseTree;

/// Bytes at the beginning of every model file.
pub const MODEL_MAGIC: &[u8; 8] = b"SINTASSI";

/// Version of the model file format.
pub const MODEL_VERSION: u32 = 1;

/// Kind of a stored model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    Crf,
    Pcfg,
}

impl FromStr for ModelKind {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "crf" => Ok(Self::Crf),
            "pcfg" => Ok(Self::Pcfg),
            _ => Err("Could not parse a model kind. Use crf or pcfg."),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Crf => write!(f, "crf"),
            Self::Pcfg => write!(f, "pcfg"),
        }
    }
}

/// Interface shared by the statistical models.
///
/// Models are immutable after training and can be shared between threads.
pub trait StatisticalModel: Sized + Send + Sync {
    /// Training example.
    type Example;

    /// Gold-standard item used by [`StatisticalModel::evaluate()`].
    type Gold;

    type Input: ?Sized;
    type Output;
    type Options;

    const KIND: ModelKind;

    /// Trains a model.
    ///
    /// # Errors
    ///
    /// Invalid examples or options are rejected before any training.
    fn train(examples: &[Self::Example], options: &Self::Options) -> Result<Self>;

    fn predict(&self, input: &Self::Input) -> Self::Output;

    /// Scores the model on held-out data.
    ///
    /// # Errors
    ///
    /// Malformed gold items are rejected.
    fn evaluate(&self, gold: &[Self::Gold]) -> Result<Evaluation>;

    /// Exports the model.
    ///
    /// # Errors
    ///
    /// When `wtr` generates an error, it will be returned as is.
    fn write<W>(&self, wtr: &mut W) -> Result<()>
    where
        W: Write;

    /// Reads a model written by [`StatisticalModel::write()`].
    ///
    /// # Errors
    ///
    /// [`SintassiError::InvalidModel`] is returned if the data is not a model of this kind.
    fn read<R>(rdr: &mut R) -> Result<Self>
    where
        R: Read;
}

/// Metadata of a trained grammar.
#[derive(Clone, Debug, PartialEq, Decode, Encode)]
pub struct PcfgMetadata {
    /// Additive smoothing constant used for estimation.
    pub smoothing: f64,

    /// Number of rules before conversion to normal form.
    pub n_source_rules: usize,

    /// Number of rules in normal form.
    pub n_rules: usize,

    /// Sum of all rule counts.
    pub total_count: f64,
}

/// A PCFG in Chomsky normal form with its compiled parser.
pub struct PcfgModel {
    grammar: Grammar,
    metadata: PcfgMetadata,
    parser: CykParser,
}

impl PcfgModel {
    /// Estimates a grammar from rule counts and converts it to normal form.
    ///
    /// # Errors
    ///
    /// See [`Grammar::train()`] and [`Grammar::to_cnf()`].
    pub fn train(counts: &[RuleCount], options: &GrammarTrainOptions) -> Result<Self> {
        let grammar = Grammar::train(counts, options)?;
        let metadata = PcfgMetadata {
            smoothing: options.smoothing,
            n_source_rules: grammar.rules().len(),
            n_rules: 0,
            total_count: counts.iter().map(|c| c.count).sum(),
        };
        Self::with_metadata(grammar.to_cnf()?, metadata)
    }

    /// Wraps a hand-written grammar, converting it to normal form.
    ///
    /// # Errors
    ///
    /// See [`Grammar::to_cnf()`].
    pub fn from_grammar(grammar: Grammar) -> Result<Self> {
        let metadata = PcfgMetadata {
            smoothing: 0.0,
            n_source_rules: grammar.rules().len(),
            n_rules: 0,
            total_count: 0.0,
        };
        Self::with_metadata(grammar.to_cnf()?, metadata)
    }

    fn with_metadata(grammar: Grammar, mut metadata: PcfgMetadata) -> Result<Self> {
        metadata.n_rules = grammar.rules().len();
        let parser = CykParser::new(&grammar)?;
        Ok(Self {
            grammar,
            metadata,
            parser,
        })
    }

    /// Parses with the default [`ParseOptions`].
    pub fn predict(&self, tokens: &[Token]) -> ParseOutcome {
        self.parse(tokens, &ParseOptions::default())
    }

    pub fn parse(&self, tokens: &[Token], options: &ParseOptions) -> ParseOutcome {
        self.parser.parse(tokens, options)
    }

    /// Computes labeled-bracket scores against gold trees.
    ///
    /// The input of each sentence is the leaves of the gold tree, tagged with its
    /// pre-terminals. Unary chains are folded by the normal form, so both sides are scored
    /// on brackets spanning two or more words, keeping the topmost label of each chain.
    pub fn evaluate(&self, trees: &[ParseTree]) -> Result<Evaluation> {
        let mut scorer = BracketScorer::new();
        for tree in trees {
            let outcome = self.predict(&tree.tokens());
            let predicted = outcome.best().map(|p| phrase_brackets(&p.tree.brackets()));
            scorer.push(&phrase_brackets(&tree.brackets()), predicted.as_deref());
        }
        Ok(scorer.finish())
    }

    /// Gets the grammar in normal form.
    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn metadata(&self) -> &PcfgMetadata {
        &self.metadata
    }
}

impl Encode for PcfgModel {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        Encode::encode(&self.grammar, encoder)?;
        Encode::encode(&self.metadata, encoder)?;
        Ok(())
    }
}

impl Decode for PcfgModel {
    fn decode<D: Decoder>(decoder: &mut D) -> Result<Self, DecodeError> {
        let grammar: Grammar = Decode::decode(decoder)?;
        let metadata: PcfgMetadata = Decode::decode(decoder)?;
        Self::with_metadata(grammar, metadata).map_err(|e| DecodeError::OtherString(e.to_string()))
    }
}

impl<'de> BorrowDecode<'de> for PcfgModel {
    fn borrow_decode<D: BorrowDecoder<'de>>(decoder: &mut D) -> Result<Self, DecodeError> {
        Self::decode(decoder)
    }
}

/// A model of any kind, as stored in a model file.
#[derive(Decode, Encode)]
pub enum AnyModel {
    Crf(CrfModel),
    Pcfg(PcfgModel),
}

// Encodes exactly like `AnyModel` without taking ownership.
#[derive(Encode)]
enum AnyModelRef<'a> {
    Crf(&'a CrfModel),
    Pcfg(&'a PcfgModel),
}

fn write_model<W>(model: AnyModelRef, wtr: &mut W) -> Result<()>
where
    W: Write,
{
    wtr.write_all(MODEL_MAGIC)?;
    wtr.write_all(&MODEL_VERSION.to_le_bytes())?;
    bincode::encode_into_std_write(model, wtr, bincode::config::standard())?;
    Ok(())
}

fn read_header<R>(rdr: &mut R) -> Result<()>
where
    R: Read,
{
    let mut header = [0; 12];
    rdr.read_exact(&mut header).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => SintassiError::invalid_model("the data is too short"),
        _ => SintassiError::IOError(e),
    })?;
    if &header[..8] != MODEL_MAGIC {
        return Err(SintassiError::invalid_model("not a model file"));
    }
    let version = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
    if version != MODEL_VERSION {
        return Err(SintassiError::invalid_model(format!(
            "unsupported format version {version}"
        )));
    }
    Ok(())
}

impl AnyModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            Self::Crf(_) => ModelKind::Crf,
            Self::Pcfg(_) => ModelKind::Pcfg,
        }
    }

    /// Exports the model with a header.
    ///
    /// # Errors
    ///
    /// When `wtr` generates an error, it will be returned as is.
    pub fn write<W>(&self, wtr: &mut W) -> Result<()>
    where
        W: Write,
    {
        match self {
            Self::Crf(model) => write_model(AnyModelRef::Crf(model), wtr),
            Self::Pcfg(model) => write_model(AnyModelRef::Pcfg(model), wtr),
        }
    }

    /// Reads a model of any kind.
    ///
    /// # Errors
    ///
    /// [`SintassiError::InvalidModel`] is returned for a wrong header, an unknown kind tag,
    /// or inconsistent tables.
    pub fn read<R>(rdr: &mut R) -> Result<Self>
    where
        R: Read,
    {
        read_header(rdr)?;
        bincode::decode_from_std_read(rdr, bincode::config::standard()).map_err(|e| match e {
            DecodeError::Io { inner, .. } => SintassiError::IOError(inner),
            e => SintassiError::invalid_model(e.to_string()),
        })
    }
}

fn kind_mismatch(expected: ModelKind, found: ModelKind) -> SintassiError {
    SintassiError::invalid_model(format!("expected a {expected} model, found a {found} model"))
}

impl CrfModel {
    /// Exports the model.
    ///
    /// # Errors
    ///
    /// When `wtr` generates an error, it will be returned as is.
    pub fn write<W>(&self, wtr: &mut W) -> Result<()>
    where
        W: Write,
    {
        write_model(AnyModelRef::Crf(self), wtr)
    }

    /// Reads a CRF model.
    ///
    /// # Errors
    ///
    /// [`SintassiError::InvalidModel`] is returned if the data is not a CRF model.
    pub fn read<R>(rdr: &mut R) -> Result<Self>
    where
        R: Read,
    {
        match AnyModel::read(rdr)? {
            AnyModel::Crf(model) => Ok(model),
            other => Err(kind_mismatch(ModelKind::Crf, other.kind())),
        }
    }
}

impl PcfgModel {
    /// Exports the model.
    ///
    /// # Errors
    ///
    /// When `wtr` generates an error, it will be returned as is.
    pub fn write<W>(&self, wtr: &mut W) -> Result<()>
    where
        W: Write,
    {
        write_model(AnyModelRef::Pcfg(self), wtr)
    }

    /// Reads a PCFG model.
    ///
    /// # Errors
    ///
    /// [`SintassiError::InvalidModel`] is returned if the data is not a PCFG model.
    pub fn read<R>(rdr: &mut R) -> Result<Self>
    where
        R: Read,
    {
        match AnyModel::read(rdr)? {
            AnyModel::Pcfg(model) => Ok(model),
            other => Err(kind_mismatch(ModelKind::Pcfg, other.kind())),
        }
    }
}

impl StatisticalModel for CrfModel {
    type Example = LabeledSentence;
    type Gold = LabeledSentence;
    type Input = [Token];
    type Output = Vec<String>;
    type Options = CrfTrainOptions;

    const KIND: ModelKind = ModelKind::Crf;

    fn train(examples: &[LabeledSentence], options: &CrfTrainOptions) -> Result<Self> {
        CrfModel::train(examples, options)
    }

    fn predict(&self, input: &[Token]) -> Vec<String> {
        CrfModel::predict(self, input)
    }

    fn evaluate(&self, gold: &[LabeledSentence]) -> Result<Evaluation> {
        CrfModel::evaluate(self, gold)
    }

    fn write<W>(&self, wtr: &mut W) -> Result<()>
    where
        W: Write,
    {
        CrfModel::write(self, wtr)
    }

    fn read<R>(rdr: &mut R) -> Result<Self>
    where
        R: Read,
    {
        CrfModel::read(rdr)
    }
}

impl StatisticalModel for PcfgModel {
    type Example = RuleCount;
    type Gold = ParseTree;
    type Input = [Token];
    type Output = ParseOutcome;
    type Options = GrammarTrainOptions;

    const KIND: ModelKind = ModelKind::Pcfg;

    fn train(examples: &[RuleCount], options: &GrammarTrainOptions) -> Result<Self> {
        PcfgModel::train(examples, options)
    }

    fn predict(&self, input: &[Token]) -> ParseOutcome {
        PcfgModel::predict(self, input)
    }

    fn evaluate(&self, gold: &[ParseTree]) -> Result<Evaluation> {
        PcfgModel::evaluate(self, gold)
    }

    fn write<W>(&self, wtr: &mut W) -> Result<()>
    where
        W: Write,
    {
        PcfgModel::write(self, wtr)
    }

    fn read<R>(rdr: &mut R) -> Result<Self>
    where
        R: Read,
    {
        PcfgModel::read(rdr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::grammar::TerminalKind;
    use crate::optimizer::Optimizer;
    use crate::token::tokens_from_annotated;

    fn round_trip<M>(model: &M) -> M
    where
        M: StatisticalModel,
    {
        let mut buf = vec![];
        model.write(&mut buf).unwrap();
        M::read(&mut buf.as_slice()).unwrap()
    }

    fn crf_dataset() -> Vec<LabeledSentence> {
        [
            "John/B-PER Smith/I-PER runs/O",
            "Mary/B-PER Jones/I-PER sleeps/O",
            "the/O dog/O barks/O",
        ]
        .iter()
        .map(|line| LabeledSentence::from_annotated(line).unwrap())
        .collect()
    }

    fn train_crf() -> CrfModel {
        let options = CrfTrainOptions::default()
            .with_iterations(50)
            .with_learning_rate(0.1)
            .with_optimizer(Optimizer::AdaGrad { epsilon: 1e-8 });
        CrfModel::train(&crf_dataset(), &options).unwrap()
    }

    const TREEBANK: &[&str] = &[
        "(S (NP (DT the) (NN dog)) (VP (VBZ barks)))",
        "(S (NP (NNP John)) (VP (VBZ sees) (NP (DT the) (NN cat))))",
        "(S (NP (DT the) (NN cat)) (VP (VBZ sleeps)))",
    ];

    fn train_pcfg(kind: TerminalKind) -> PcfgModel {
        let mut counts = vec![];
        for line in TREEBANK {
            let tree: ParseTree = line.parse().unwrap();
            counts.extend(RuleCount::from_tree(&tree, kind));
        }
        PcfgModel::train(&counts, &GrammarTrainOptions::default()).unwrap()
    }

    #[test]
    fn test_crf_end_to_end() {
        let model = train_crf();
        let examples = crf_dataset();

        let eval = StatisticalModel::evaluate(&model, &examples).unwrap();
        assert_eq!(1.0, eval.accuracy);

        let loaded = round_trip(&model);
        for s in &examples {
            assert_eq!(s.labels, loaded.predict(&s.tokens));
        }
        assert_eq!(model.metadata(), loaded.metadata());
        assert_eq!(model.weights, loaded.weights);
        for (a, b) in model.weights().zip(loaded.weights()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_crf_empty_input() {
        let model = train_crf();

        assert!(model.predict(&[]).is_empty());
        assert!(round_trip(&model).predict(&[]).is_empty());
    }

    #[test]
    fn test_pcfg_round_trip() {
        let model = train_pcfg(TerminalKind::Surface);
        let loaded = round_trip(&model);
        let tokens = tokens_from_annotated("the cat sees the dog").unwrap();

        let expected = model.predict(&tokens);
        assert!(expected.is_parsed());
        assert_eq!(expected, loaded.predict(&tokens));
        assert_eq!(model.grammar(), loaded.grammar());
        assert_eq!(model.metadata(), loaded.metadata());
        for (a, b) in model.grammar().rules().iter().zip(loaded.grammar().rules()) {
            assert_eq!(a.probability.to_bits(), b.probability.to_bits());
        }
    }

    #[test]
    fn test_pcfg_grammar_invariant() {
        let model = train_pcfg(TerminalKind::Surface);

        assert!(model.grammar().is_cnf());
        for (_, sum) in model.grammar().sums() {
            assert!((sum - 1.0).abs() <= 1e-6);
        }
        assert_eq!(20.0, model.metadata().total_count);
    }

    #[test]
    fn test_pcfg_tag_terminals() {
        let model = train_pcfg(TerminalKind::Tag);
        let tokens = tokens_from_annotated("a/DT bird/NN sleeps/VBZ").unwrap();
        let outcome = model.predict(&tokens);

        assert_eq!(
            "(S (NP a bird) (VP sleeps))",
            outcome.best().unwrap().tree.to_string()
        );

        let tokens = tokens_from_annotated("a/DT bird/NN sleeps/XYZ").unwrap();
        assert!(!model.predict(&tokens).is_parsed());
    }

    #[test]
    fn test_pcfg_empty_input() {
        let model = train_pcfg(TerminalKind::Surface);

        assert_eq!(
            ParseOutcome::NoDerivation(crate::cyk::NoDerivation::EmptyInput),
            model.predict(&[])
        );
    }

    #[test]
    fn test_pcfg_evaluate() {
        let model = train_pcfg(TerminalKind::Surface);
        let trees: Vec<ParseTree> = TREEBANK.iter().map(|t| t.parse().unwrap()).collect();
        let eval = model.evaluate(&trees).unwrap();

        assert_eq!(None, eval.entities);
        assert_eq!(1.0, eval.accuracy);
        assert_eq!(1.0, eval.overall.precision());
        assert_eq!(1.0, eval.overall.recall());
        assert_eq!(3, eval.per_label["S"].true_positives);
    }

    #[test]
    fn test_any_model_dispatch() {
        let mut buf = vec![];
        train_pcfg(TerminalKind::Surface).write(&mut buf).unwrap();

        let model = AnyModel::read(&mut buf.as_slice()).unwrap();
        assert_eq!(ModelKind::Pcfg, model.kind());

        let result = CrfModel::read(&mut buf.as_slice());
        assert_eq!(
            "InvalidModelError: expected a crf model, found a pcfg model",
            &result.err().unwrap().to_string()
        );
    }

    #[test]
    fn test_read_rejects_bad_header() {
        let result = AnyModel::read(&mut &b"NOTAMODEL..."[..]);
        assert_eq!(
            "InvalidModelError: not a model file",
            &result.err().unwrap().to_string()
        );

        let mut data = MODEL_MAGIC.to_vec();
        data.extend(99u32.to_le_bytes());
        let result = AnyModel::read(&mut data.as_slice());
        assert_eq!(
            "InvalidModelError: unsupported format version 99",
            &result.err().unwrap().to_string()
        );

        let result = AnyModel::read(&mut &b"SIN"[..]);
        assert!(matches!(result, Err(SintassiError::InvalidModel(_))));
    }

    #[test]
    fn test_read_rejects_unknown_kind_tag() {
        let mut data = MODEL_MAGIC.to_vec();
        data.extend(MODEL_VERSION.to_le_bytes());
        data.push(7);
        let result = AnyModel::read(&mut data.as_slice());

        assert!(matches!(result, Err(SintassiError::InvalidModel(_))));
    }
}
