use std::fs::File;
use std::io::{prelude::*, stdin, stdout, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use sintassi::{tokens_from_annotated, ParseOptions, ParseOutcome, PcfgModel, TerminalMatch};

#[derive(Parser, Debug)]
#[command(about = "A program to parse token sequences with a PCFG model.")]
struct Args {
    /// The model file to use when parsing
    #[arg(long)]
    model: PathBuf,

    /// A sentence of `word[/pos]` tokens. Lines of stdin are parsed if not specified.
    #[arg(long)]
    input: Option<String>,

    /// Number of parses printed for each sentence
    #[arg(long, default_value = "1")]
    n_best: usize,

    /// Keeps only this many symbols in each chart cell
    #[arg(long)]
    beam: Option<usize>,

    /// How terminals are matched against tokens: {tag, surface, both}
    #[arg(long, default_value = "both")]
    terminal_match: TerminalMatch,
}

/// Prints the parses of one sentence and returns whether a parse was found.
fn parse_line<W>(
    model: &PcfgModel,
    options: &ParseOptions,
    line: &str,
    out: &mut W,
) -> Result<bool, Box<dyn std::error::Error>>
where
    W: Write,
{
    let tokens = tokens_from_annotated(line)?;
    match model.parse(&tokens, options) {
        ParseOutcome::Parsed(parses) => {
            for parse in parses {
                writeln!(out, "{}\t{}", parse.log_probability, parse.tree)?;
            }
            Ok(true)
        }
        ParseOutcome::NoDerivation(reason) => {
            writeln!(out, "# no parse: {reason}")?;
            Ok(false)
        }
    }
}

fn run(args: Args) -> Result<bool, Box<dyn std::error::Error>> {
    eprintln!("Loading model file...");
    let mut f = zstd::Decoder::new(File::open(&args.model)?)?;
    let model = PcfgModel::read(&mut f)?;

    let options = ParseOptions::default()
        .with_n_best(args.n_best)
        .with_beam_width(args.beam)
        .with_terminal_match(args.terminal_match);

    let mut out = BufWriter::new(stdout().lock());
    let all_parsed = if let Some(input) = &args.input {
        parse_line(&model, &options, input, &mut out)?
    } else {
        eprintln!("Start parsing");
        let start = Instant::now();
        let mut n_sentences = 0;
        let mut n_failures = 0;
        for line in stdin().lock().lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            n_sentences += 1;
            if !parse_line(&model, &options, &line, &mut out)? {
                n_failures += 1;
            }
        }
        eprintln!("Elapsed: {} [sec]", start.elapsed().as_secs_f64());
        eprintln!("# of sentences: {n_sentences}, # of failures: {n_failures}");
        n_failures == 0
    };
    out.flush()?;

    Ok(all_parsed)
}

fn main() -> ExitCode {
    match run(Args::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(2)
        }
    }
}
