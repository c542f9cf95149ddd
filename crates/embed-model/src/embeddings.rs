//! Generated word vectors and their word-keyed file format.
//!
//! Unlike model files, embedding files are keyed by word: each record is a
//! length-prefixed word followed by its vector. Loading therefore works
//! against any vocabulary, not just the one the vectors were generated from.

use std::io::{Read, Write};
use std::path::Path;

use embed_core::format::{self, Header};
use embed_linalg::Matrix;
use embed_vocab::{MAX_WORD_LENGTH, Vocabulary};

use crate::ModelError;

/// File magic for embedding files.
pub const MAGIC: [u8; 4] = *b"EMBD";

const FIELD_COUNT: usize = 0;
const FIELD_DIMENSION: usize = 1;

/// One vector per vocabulary entry, row `i` belonging to word id `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct Embeddings {
    words: Vec<String>,
    vectors: Matrix,
}

impl Embeddings {
    /// Pair the rows of `vectors` with the words of `vocab`.
    pub fn new(vocab: &Vocabulary, vectors: Matrix) -> Result<Self, ModelError> {
        if vectors.rows != vocab.len() {
            return Err(ModelError::VocabularyMismatch {
                expected: vocab.len(),
                found: vectors.rows,
            });
        }
        Ok(Self {
            words: vocab.iter().map(|e| e.word.clone()).collect(),
            vectors,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Vector length.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.vectors.cols
    }

    #[inline]
    pub fn matrix(&self) -> &Matrix {
        &self.vectors
    }

    pub fn word(&self, id: usize) -> Option<&str> {
        self.words.get(id).map(String::as_str)
    }

    pub fn vector(&self, id: usize) -> Option<&[f32]> {
        (id < self.words.len()).then(|| self.vectors.row(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> + '_ {
        self.words
            .iter()
            .enumerate()
            .map(|(i, w)| (w.as_str(), self.vectors.row(i)))
    }

    /// Cosine similarity of two rows; 0 when either is the zero vector.
    pub fn similarity(&self, a: usize, b: usize) -> Option<f32> {
        let (x, y) = (self.vector(a)?, self.vector(b)?);
        let dot: f32 = x.iter().zip(y).map(|(p, q)| p * q).sum();
        let nx = x.iter().map(|v| v * v).sum::<f32>().sqrt();
        let ny = y.iter().map(|v| v * v).sum::<f32>().sqrt();
        if nx == 0.0 || ny == 0.0 {
            return Some(0.0);
        }
        Some(dot / (nx * ny))
    }

    /// The `k` rows most similar to `id`, best first, excluding `id` itself.
    pub fn nearest(&self, id: usize, k: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = (0..self.len())
            .filter(|&j| j != id)
            .filter_map(|j| self.similarity(id, j).map(|s| (j, s)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        scored
    }

    /// Write `word v0 v1 ...` lines.
    pub fn write_text<W: Write>(&self, w: &mut W) -> Result<(), ModelError> {
        for (word, vector) in self.iter() {
            write!(w, "{word}")?;
            for v in vector {
                write!(w, " {v:.6}")?;
            }
            writeln!(w)?;
        }
        Ok(())
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), ModelError> {
        Header::new(MAGIC)
            .with_field(FIELD_COUNT, self.len() as u64)
            .with_field(FIELD_DIMENSION, self.dimension() as u64)
            .write(w)?;
        for (word, vector) in self.iter() {
            format::write_str(w, word)?;
            format::write_f32s(w, vector)?;
        }
        Ok(())
    }

    /// Read vectors for the words of `vocab`.
    ///
    /// Words missing from `vocab` are skipped; vocabulary words missing from
    /// the file keep a zero vector.
    pub fn read_from<R: Read>(r: &mut R, vocab: &Vocabulary) -> Result<Self, ModelError> {
        let header = Header::read(r, MAGIC)?;
        let count = header.field_usize(FIELD_COUNT)?;
        let dimension = header.field_usize(FIELD_DIMENSION)?;

        let mut vectors = Matrix::zeros(vocab.len(), dimension)?;
        let mut row: Vec<f32> = embed_core::zeroed(dimension)?;
        let (mut matched, mut skipped) = (0usize, 0usize);
        for _ in 0..count {
            let word = format::read_str(r, MAX_WORD_LENGTH)?;
            format::read_f32s_into(r, &mut row)?;
            match vocab.find(&word) {
                Some(id) => {
                    let id = id as usize;
                    vectors.data[id * dimension..(id + 1) * dimension].copy_from_slice(&row);
                    matched += 1;
                }
                None => skipped += 1,
            }
        }
        tracing::debug!(matched, skipped, "read embeddings");
        Self::new(vocab, vectors)
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let mut w = format::create(path)?;
        self.write_to(&mut w)?;
        w.flush()?;
        Ok(())
    }

    pub fn open(path: &Path, vocab: &Vocabulary) -> Result<Self, ModelError> {
        let mut r = format::open(path)?;
        Self::read_from(&mut r, vocab)
    }
}
