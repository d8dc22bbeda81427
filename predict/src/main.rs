use std::fs::File;
use std::io::{prelude::*, stdin, stdout, BufWriter};
use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use clap::Parser;
use sintassi::{annotate, tokens_from_annotated, CrfModel, Token};

#[derive(Parser, Debug)]
#[command(about = "A program to label token sequences with a CRF model.")]
struct Args {
    /// The model file to use when labeling text
    #[arg(long)]
    model: PathBuf,

    /// Number of threads (0 or 1 labels sentences on the main thread)
    #[arg(long, default_value = "0")]
    n_threads: usize,

    /// Number of sentences given to each thread at once
    #[arg(long, default_value = "64")]
    mt_chunk_size: usize,
}

fn label_batch(model: &CrfModel, batch: &[Vec<Token>], n_threads: usize) -> Vec<Vec<String>> {
    if n_threads <= 1 || batch.len() <= 1 {
        return batch.iter().map(|tokens| model.predict(tokens)).collect();
    }
    let chunk_size = (batch.len() + n_threads - 1) / n_threads;
    thread::scope(|s| {
        let handles: Vec<_> = batch
            .chunks(chunk_size)
            .map(|chunk| {
                s.spawn(move || {
                    chunk
                        .iter()
                        .map(|tokens| model.predict(tokens))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| match h.join() {
                Ok(labels) => labels,
                Err(e) => std::panic::resume_unwind(e),
            })
            .collect()
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    eprintln!("Loading model file...");
    let mut f = zstd::Decoder::new(File::open(args.model)?)?;
    let model = CrfModel::read(&mut f)?;

    eprintln!("Start labeling");
    let batch_size = args.mt_chunk_size.max(1) * args.n_threads.max(1);
    let mut out = BufWriter::new(stdout().lock());
    let mut n_tokens = 0;
    let start = Instant::now();
    let mut lines = stdin().lock().lines().peekable();
    while lines.peek().is_some() {
        let mut batch = vec![];
        for line in lines.by_ref().take(batch_size) {
            batch.push(tokens_from_annotated(line?)?);
        }
        for (tokens, labels) in batch.iter().zip(label_batch(&model, &batch, args.n_threads)) {
            n_tokens += tokens.len();
            writeln!(out, "{}", annotate(tokens, &labels))?;
        }
    }
    out.flush()?;
    let duration = start.elapsed();
    eprintln!("Elapsed: {} [sec]", duration.as_secs_f64());
    eprintln!(
        "Speed: {} [tokens/sec]",
        n_tokens as f64 / duration.as_secs_f64()
    );

    Ok(())
}
