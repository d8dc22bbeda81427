use std::fs;
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};
use sintassi::{AnyModel, CrfModel, CrfWeight, PcfgModel};

#[derive(Parser, Debug)]
#[command(about = "A program to manipulate trained models.")]
struct Args {
    /// Input path of the model file
    #[arg(long)]
    model_in: PathBuf,

    /// Output path of the model file
    #[arg(long)]
    model_out: Option<PathBuf>,

    /// Output the weights of a CRF model.
    #[arg(long)]
    dump_weights: Option<PathBuf>,

    /// Output the rules of a PCFG model.
    #[arg(long)]
    dump_rules: Option<PathBuf>,

    /// Replace the gazetteer of a CRF model if the argument is specified.
    #[arg(long)]
    replace_gazetteer: Option<PathBuf>,
}

#[derive(Serialize)]
struct WeightRecord<'a> {
    kind: &'static str,
    source: &'a str,
    label: &'a str,
    weight: f64,
}

impl<'a> From<CrfWeight<'a>> for WeightRecord<'a> {
    fn from(w: CrfWeight<'a>) -> Self {
        match w {
            CrfWeight::Emission {
                attribute,
                label,
                weight,
            } => Self {
                kind: "emission",
                source: attribute,
                label,
                weight,
            },
            CrfWeight::Transition { from, to, weight } => Self {
                kind: "transition",
                source: from,
                label: to,
                weight,
            },
            CrfWeight::Start { label, weight } => Self {
                kind: "start",
                source: "",
                label,
                weight,
            },
            CrfWeight::End { label, weight } => Self {
                kind: "end",
                source: "",
                label,
                weight,
            },
        }
    }
}

#[derive(Serialize)]
struct RuleRecord {
    lhs: String,
    rhs: String,
    probability: f64,
}

#[derive(Deserialize)]
struct GazetteerRecord {
    category: String,
    phrase: String,
}

fn dump_weights(model: &CrfModel, path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("Saving weight file...");
    let mut wtr = csv::Writer::from_writer(fs::File::create(path)?);
    for w in model.weights() {
        wtr.serialize(WeightRecord::from(w))?;
    }
    wtr.flush()?;
    Ok(())
}

fn dump_rules(model: &PcfgModel, path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("Saving rule file...");
    let mut wtr = csv::Writer::from_writer(fs::File::create(path)?);
    for rule in model.grammar().rules() {
        let rhs: Vec<String> = rule.rhs.iter().map(|s| s.to_string()).collect();
        wtr.serialize(RuleRecord {
            lhs: rule.lhs.clone(),
            rhs: rhs.join(" "),
            probability: rule.probability,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

fn load_gazetteer(path: PathBuf) -> Result<Vec<(String, String)>, Box<dyn std::error::Error>> {
    eprintln!("Loading gazetteer file...");
    let mut rdr = csv::Reader::from_reader(fs::File::open(path)?);
    let mut entries = vec![];
    for result in rdr.deserialize() {
        let record: GazetteerRecord = result?;
        entries.push((record.phrase, record.category));
    }
    Ok(entries)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    eprintln!("Loading model file...");
    let mut f = zstd::Decoder::new(fs::File::open(args.model_in)?)?;
    let mut model = AnyModel::read(&mut f)?;

    match &model {
        AnyModel::Crf(crf) => {
            if let Some(path) = args.dump_weights {
                dump_weights(crf, path)?;
            }
            if args.dump_rules.is_some() {
                return Err("--dump-rules requires a PCFG model".into());
            }
        }
        AnyModel::Pcfg(pcfg) => {
            if let Some(path) = args.dump_rules {
                dump_rules(pcfg, path)?;
            }
            if args.dump_weights.is_some() || args.replace_gazetteer.is_some() {
                return Err("--dump-weights and --replace-gazetteer require a CRF model".into());
            }
        }
    }

    if let Some(path) = args.replace_gazetteer {
        let gazetteer = load_gazetteer(path)?;
        model = match model {
            AnyModel::Crf(crf) => AnyModel::Crf(crf.with_gazetteer(gazetteer)?),
            other => other,
        };
    }

    if let Some(path) = args.model_out {
        eprintln!("Saving model file...");
        let mut f = zstd::Encoder::new(fs::File::create(path)?, 19)?;
        model.write(&mut f)?;
        f.finish()?;
    }

    Ok(())
}
