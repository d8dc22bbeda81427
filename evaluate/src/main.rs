use std::fs::File;
use std::io::{prelude::*, BufReader};
use std::path::{Path, PathBuf};

use clap::Parser;
use sintassi::{AnyModel, LabeledSentence, ParseTree, StatisticalModel};

#[derive(Parser, Debug)]
#[command(about = "A program to evaluate the accuracy of Sintassi models.")]
struct Args {
    /// The model file to evaluate
    #[arg(long)]
    model: PathBuf,

    /// A held-out file: tagged sentences for a CRF model, bracketed trees for a PCFG model
    #[arg(long)]
    test: PathBuf,
}

fn load_lines(path: &Path) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let f = BufReader::new(File::open(path)?);
    let mut lines = vec![];
    for line in f.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    eprintln!("Loading model file...");
    let mut f = zstd::Decoder::new(File::open(&args.model)?)?;
    let model = AnyModel::read(&mut f)?;

    eprintln!("Loading test data...");
    let lines = load_lines(&args.test)?;
    eprintln!("# of sentences: {}", lines.len());

    let evaluation = match model {
        AnyModel::Crf(model) => {
            let gold = lines
                .iter()
                .map(LabeledSentence::from_annotated)
                .collect::<Result<Vec<_>, _>>()?;
            StatisticalModel::evaluate(&model, &gold)?
        }
        AnyModel::Pcfg(model) => {
            let gold = lines
                .iter()
                .map(|line| line.parse::<ParseTree>())
                .collect::<Result<Vec<_>, _>>()?;
            StatisticalModel::evaluate(&model, &gold)?
        }
    };
    println!("{evaluation}");

    Ok(())
}
