use std::error::Error;
use std::fs::{self, File};
use std::io::{prelude::*, stderr, BufReader};
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;
use sintassi::{
    AnyModel, CrfModel, CrfTrainOptions, FeatureConfig, GrammarTrainOptions, LabeledSentence,
    ModelKind, Optimizer, ParseTree, PcfgModel, RuleCount, TerminalKind,
};

#[derive(Parser, Debug)]
#[command(about = "A program to train models of Sintassi.")]
struct Args {
    /// The kind of model to train: {crf, pcfg}
    #[arg(long, default_value = "crf")]
    kind: ModelKind,

    /// A training corpus. CRF corpora contain one `word[/pos]/label` sentence per line. PCFG
    /// corpora contain bracketed trees and `LHS -> rhs [count]` lines.
    #[arg(long, required = true)]
    corpus: Vec<PathBuf>,

    /// The file to write the trained model to
    #[arg(long)]
    output: PathBuf,

    /// The number of training iterations
    #[arg(long, default_value = "100")]
    iterations: usize,

    /// The step size of the optimizer
    #[arg(long, default_value = "0.1")]
    learning_rate: f64,

    /// The L2 regularization coefficient
    #[arg(long, default_value = "0.01")]
    regularization: f64,

    /// Training stops when the gradient norm falls below this value
    #[arg(long, default_value = "0.01")]
    convergence: f64,

    /// The optimizer: {gd, momentum, adagrad}
    #[arg(long, default_value = "gd")]
    optimizer: Optimizer,

    /// The context window of token features
    #[arg(long, default_value = "2")]
    window: usize,

    /// The maximum length of prefix and suffix features, in characters
    #[arg(long, default_value = "4")]
    max_affix: usize,

    /// A gazetteer CSV file with `category` and `phrase` columns
    #[arg(long)]
    gazetteer: Vec<PathBuf>,

    /// The number of threads used to compute gradients
    #[arg(long, default_value = "1")]
    n_threads: usize,

    /// The additive smoothing constant of grammar estimation
    #[arg(long, default_value = "0.001")]
    smoothing: f64,

    /// The start symbol of the grammar (the root label of the first tree by default)
    #[arg(long)]
    start: Option<String>,

    /// Which tree nodes become grammar terminals: {surface, tag}
    #[arg(long, default_value = "surface")]
    terminals: TerminalKind,

    /// The number of workers for zstd (0 means multithreaded will be disabled)
    #[arg(long, default_value = "0")]
    zstd_workers: u32,
}

#[derive(Deserialize)]
struct GazetteerRecord {
    category: String,
    phrase: String,
}

fn corpus_lines(path: &Path) -> Result<Vec<String>, Box<dyn Error>> {
    eprintln!("Loading {path:?} ...");
    let f = BufReader::new(File::open(path)?);
    let mut lines = vec![];
    for (i, line) in f.lines().enumerate() {
        if i % 10000 == 0 {
            eprint!("# of lines: {i}\r");
            stderr().flush()?;
        }
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        lines.push(trimmed.to_string());
    }
    eprintln!("# of lines: {}", lines.len());
    Ok(lines)
}

fn load_gazetteer(paths: &[PathBuf]) -> Result<Vec<(String, String)>, Box<dyn Error>> {
    let mut entries = vec![];
    for path in paths {
        eprintln!("Loading {path:?} ...");
        let mut rdr = csv::Reader::from_reader(File::open(path)?);
        for result in rdr.deserialize() {
            let record: GazetteerRecord = result?;
            entries.push((record.phrase, record.category));
        }
    }
    eprintln!("# of gazetteer entries: {}", entries.len());
    Ok(entries)
}

fn train_crf(args: &Args) -> Result<CrfModel, Box<dyn Error>> {
    let mut examples = vec![];
    for path in &args.corpus {
        for line in corpus_lines(path)? {
            examples.push(LabeledSentence::from_annotated(&line)?);
        }
    }
    eprintln!("# of sentences: {}", examples.len());

    let features = FeatureConfig::default()
        .with_window(args.window)
        .with_max_affix(args.max_affix)
        .with_gazetteer(load_gazetteer(&args.gazetteer)?);
    let options = CrfTrainOptions::default()
        .with_features(features)
        .with_iterations(args.iterations)
        .with_learning_rate(args.learning_rate)
        .with_regularization(args.regularization)
        .with_convergence(args.convergence)
        .with_optimizer(args.optimizer)
        .with_n_threads(args.n_threads);

    eprintln!("Start training...");
    let model = CrfModel::train(&examples, &options)?;
    let metadata = model.metadata();
    eprintln!(
        "Finish training. iterations: {}, loss: {}, gradient norm: {}, converged: {}",
        metadata.iterations, metadata.final_loss, metadata.final_gradient_norm, metadata.converged,
    );
    Ok(model)
}

fn train_pcfg(args: &Args) -> Result<PcfgModel, Box<dyn Error>> {
    let mut counts = vec![];
    let mut root = None;
    for path in &args.corpus {
        for line in corpus_lines(path)? {
            if line.starts_with('(') {
                let tree: ParseTree = line.parse()?;
                root.get_or_insert_with(|| tree.label().to_string());
                counts.extend(RuleCount::from_tree(&tree, args.terminals));
            } else {
                counts.push(line.parse()?);
            }
        }
    }
    eprintln!("# of rule counts: {}", counts.len());

    let mut options = GrammarTrainOptions::default().with_smoothing(args.smoothing);
    if let Some(start) = args.start.clone().or(root) {
        options = options.with_start(start);
    }

    eprintln!("Start training...");
    let model = PcfgModel::train(&counts, &options)?;
    let metadata = model.metadata();
    eprintln!(
        "Finish training. # of rules: {} ({} in normal form)",
        metadata.n_source_rules, metadata.n_rules,
    );
    Ok(model)
}

/// Writes a compressed model next to `path` and renames it into place once complete, so a
/// failure leaves the previous file untouched.
fn write_model_file<F>(path: &Path, zstd_workers: u32, write: F) -> Result<(), Box<dyn Error>>
where
    F: FnOnce(&mut zstd::Encoder<'static, File>) -> Result<(), Box<dyn Error>>,
{
    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);

    let result = (|| -> Result<(), Box<dyn Error>> {
        let mut f = zstd::Encoder::new(File::create(&tmp_path)?, 19)?;
        f.multithread(zstd_workers)?;
        write(&mut f)?;
        f.finish()?.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();
    if result.is_err() {
        fs::remove_file(&tmp_path).ok();
    }
    result
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let model = match args.kind {
        ModelKind::Crf => AnyModel::Crf(train_crf(&args)?),
        ModelKind::Pcfg => AnyModel::Pcfg(train_pcfg(&args)?),
    };
    write_model_file(&args.output, args.zstd_workers, |f| Ok(model.write(f)?))?;

    Ok(())
}
