//! Word-embedding pipeline built from pre-filtered text.
//!
//! This is the facade crate that wires together the lower-level components:
//! - [`embed_core`]: hashing, fallible allocation, the checksummed container
//! - [`embed_vocab`]: vocabulary, pruning and Huffman coding
//! - [`embed_corpus`]: packed sentence buffer
//! - [`embed_model`]: CBOW, co-occurrence SVD and GloVe models
//! - [`embed_linalg`]: dense SVD kernels
//!
//! # Quick Start
//!
//! ```
//! use embedkit::{Corpus, Model, ModelKind, Vocabulary};
//! use rand::SeedableRng;
//! use rand::rngs::SmallRng;
//!
//! let text = "the cat sat on the mat\nthe dog sat on the cat\n";
//!
//! let mut vocab = Vocabulary::new().unwrap();
//! vocab.parse(text.as_bytes()).unwrap();
//! vocab.encode().unwrap();
//!
//! let mut corpus = Corpus::new().unwrap();
//! corpus.parse(&vocab, text.as_bytes()).unwrap();
//!
//! let mut model = Model::new(&vocab, ModelKind::Cbow, SmallRng::seed_from_u64(42));
//! model.set_layer(8);
//! model.train(&corpus).unwrap();
//! let embeddings = model.generate().unwrap();
//! assert_eq!(embeddings.len(), vocab.len());
//! ```

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use embed_core::format::FormatError;
pub use embed_core::{AllocError, fnv1a, hash_word};
pub use embed_corpus::{Corpus, CorpusError, Sentence};
pub use embed_linalg::{LinalgError, Matrix, Svd, TopK, svd_full, svd_topk};
pub use embed_model::{Embeddings, Model, ModelError, ModelInfo, ModelKind, ModelSize};
pub use embed_vocab::{MAX_WORD_LENGTH, VocabEntry, VocabError, Vocabulary};

/// Errors from the file-level helpers.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot open {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Vocab(#[from] VocabError),
    #[error(transparent)]
    Corpus(#[from] CorpusError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

fn reader(path: &Path) -> Result<BufReader<File>, Error> {
    File::open(path).map(BufReader::new).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })
}

/// Count every token of the given text files, drop words seen fewer than
/// `min_count` times and assign Huffman codes.
pub fn vocabulary_from_files<P: AsRef<Path>>(
    paths: &[P],
    min_count: u32,
) -> Result<Vocabulary, Error> {
    let mut vocab = Vocabulary::new()?;
    for path in paths {
        let path = path.as_ref();
        let tokens = vocab.parse(reader(path)?)?;
        tracing::info!(path = %path.display(), tokens, words = vocab.len(), "read vocabulary input");
    }
    vocab.prune(min_count);
    vocab.encode()?;
    Ok(vocab)
}

/// Encode the lines of the given text files against a frozen vocabulary.
pub fn corpus_from_files<P: AsRef<Path>>(vocab: &Vocabulary, paths: &[P]) -> Result<Corpus, Error> {
    let mut corpus = Corpus::new()?;
    for path in paths {
        let path = path.as_ref();
        let kept = corpus.parse(vocab, reader(path)?)?;
        tracing::info!(path = %path.display(), sentences = kept, "read corpus input");
    }
    Ok(corpus)
}
