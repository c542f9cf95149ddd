//! embedkit CLI: build vocabularies, corpora and embedding models from
//! pre-filtered text.
//!
//! Thin wrapper over the `embedkit` library crate.

use std::error::Error;
use std::fs::File;
use std::io::{self, BufWriter, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use embedkit::{Corpus, Model, ModelKind, Vocabulary, corpus_from_files, vocabulary_from_files};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use tracing_subscriber::EnvFilter;

/// Word embeddings with CBOW, co-occurrence SVD or GloVe.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count the words of text files into a vocabulary.
    Vocab {
        /// Output vocabulary file.
        #[arg(short, long)]
        output: PathBuf,

        /// Drop words seen fewer times than this.
        #[arg(long, default_value_t = 1)]
        min_count: u32,

        /// Input text, one sentence per line.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// List a vocabulary: id, word, count and code length.
    PrintVocab {
        vocab: PathBuf,
    },

    /// Encode text files against a vocabulary.
    Corpus {
        #[arg(long)]
        vocab: PathBuf,

        /// Output corpus file.
        #[arg(short, long)]
        output: PathBuf,

        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Train a model on a corpus, creating the model file if it does not exist.
    Train {
        #[arg(long)]
        vocab: PathBuf,

        #[arg(long)]
        corpus: PathBuf,

        /// Model file; loaded and trained further if present.
        #[arg(long)]
        model: PathBuf,

        #[command(flatten)]
        params: TrainParams,
    },

    /// Write one vector per vocabulary word.
    Generate {
        #[arg(long)]
        vocab: PathBuf,

        #[arg(long)]
        model: PathBuf,

        /// Output file; text goes to stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write `word v0 v1 ...` lines instead of the binary format.
        #[arg(long)]
        text: bool,

        /// PRNG seed for the randomized algorithms.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print a model's kind and sizes as JSON.
    Info {
        #[arg(long)]
        vocab: PathBuf,

        #[arg(long)]
        model: PathBuf,
    },
}

#[derive(Args, Debug)]
struct TrainParams {
    /// Algorithm for a new model.
    #[arg(long, default_value_t = ModelKind::Cbow)]
    kind: ModelKind,

    /// Hidden size (CBOW) or hash bucket count (SVD, GloVe) for a new model.
    #[arg(long)]
    layer: Option<usize>,

    /// Embedding size for a new model.
    #[arg(long)]
    vector: Option<usize>,

    /// Context window radius.
    #[arg(long)]
    window: Option<usize>,

    /// Passes over the corpus (CBOW).
    #[arg(long)]
    iterations: Option<usize>,

    /// PRNG seed for reproducible training.
    #[arg(long)]
    seed: Option<u64>,
}

fn rng(seed: Option<u64>) -> SmallRng {
    let seed = seed.unwrap_or_else(|| {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    });
    tracing::debug!(seed, "seeded rng");
    SmallRng::seed_from_u64(seed)
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();

    match cli.command {
        Command::Vocab {
            output,
            min_count,
            inputs,
        } => {
            let vocab = vocabulary_from_files(&inputs, min_count)?;
            vocab.save(&output)?;
            tracing::info!(words = vocab.len(), path = %output.display(), "wrote vocabulary");
        }

        Command::PrintVocab { vocab } => {
            let vocab = Vocabulary::open(&vocab)?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            for (id, entry) in vocab.iter().enumerate() {
                writeln!(out, "{id}\t{}\t{}\t{}", entry.word, entry.count, entry.code_len())?;
            }
            out.flush()?;
        }

        Command::Corpus {
            vocab,
            output,
            inputs,
        } => {
            let vocab = Vocabulary::open(&vocab)?;
            let corpus = corpus_from_files(&vocab, &inputs)?;
            corpus.save(&output)?;
            tracing::info!(
                sentences = corpus.len(),
                words = corpus.word_count(),
                path = %output.display(),
                "wrote corpus"
            );
        }

        Command::Train {
            vocab,
            corpus,
            model,
            params,
        } => {
            let vocab = Vocabulary::open(&vocab)?;
            let corpus = Corpus::open(&corpus, &vocab)?;
            let rng = rng(params.seed);

            let mut m = if model.exists() {
                let m = Model::open(&vocab, &model, rng)?;
                if params.layer.is_some() || params.vector.is_some() {
                    tracing::warn!("--layer and --vector only apply to new models; ignored");
                }
                m
            } else {
                let mut m = Model::new(&vocab, params.kind, rng);
                if let Some(layer) = params.layer {
                    m.set_layer(layer);
                }
                if let Some(vector) = params.vector {
                    m.set_vector(vector);
                }
                m
            };
            if let Some(window) = params.window {
                m.set_window(window);
            }
            if let Some(iterations) = params.iterations {
                m.set_iterations(iterations);
            }

            m.train(&corpus)?;
            m.save(&model)?;
        }

        Command::Generate {
            vocab,
            model,
            output,
            text,
            seed,
        } => {
            let vocab = Vocabulary::open(&vocab)?;
            let mut m = Model::open(&vocab, &model, rng(seed))?;
            let embeddings = m.generate()?;
            match output {
                Some(path) if !text => embeddings.save(&path)?,
                Some(path) => {
                    let mut w = BufWriter::new(File::create(&path)?);
                    embeddings.write_text(&mut w)?;
                    w.flush()?;
                }
                None => {
                    let stdout = io::stdout();
                    let mut out = BufWriter::new(stdout.lock());
                    embeddings.write_text(&mut out)?;
                    out.flush()?;
                }
            }
        }

        Command::Info { vocab, model } => {
            let vocab = Vocabulary::open(&vocab)?;
            let m = Model::open(&vocab, &model, rng(Some(0)))?;
            println!("{}", serde_json::to_string_pretty(&m.info())?);
        }
    }

    Ok(())
}
