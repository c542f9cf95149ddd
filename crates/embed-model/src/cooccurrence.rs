//! Hashed co-occurrence counts and the two models built on them.
//!
//! Row `i` of the `vocab x layer` count matrix holds the context of word `i`;
//! each context word lands in column `hash(word) % layer`, so the column count
//! is a fixed feature width rather than the vocabulary size.
//!
//! - [`Weighting::Flat`]: every co-occurrence adds 1, reduced with randomized
//!   SVD over the square-rooted counts.
//! - [`Weighting::InverseDistance`]: adds `1 / distance`, factored with
//!   weighted least squares (GloVe) under AdaGrad.

use embed_corpus::Corpus;
use embed_linalg::{Matrix, svd_topk};
use embed_vocab::{VocabEntry, Vocabulary};
use rand::Rng;

use crate::{ModelError, ModelSize, PROGRESS_INTERVAL};

/// GloVe weighting cutoff.
const XMAX: f32 = 100.0;
/// GloVe weighting exponent.
const POWER: f32 = 0.75;
/// GloVe learning rate.
const ETA: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Weighting {
    Flat,
    InverseDistance,
}

#[derive(Debug, Clone)]
pub(crate) struct Cooccurrence {
    pub(crate) counts: Vec<f32>,
}

impl Cooccurrence {
    pub(crate) fn zeroed(size: &ModelSize) -> Result<Self, ModelError> {
        let len = embed_core::checked_len(size.vocab, size.layer)?;
        Ok(Self {
            counts: embed_core::zeroed(len)?,
        })
    }

    /// Buckets must be at least twice the embedding size.
    pub(crate) fn verify_svd(size: &mut ModelSize) {
        size.vector = size.vector.max(1);
        size.layer = size.layer.max(2 * size.vector);
        if size.layer == 2 * size.vector {
            tracing::warn!(
                layer = size.layer,
                "consider using a larger layer size (>= {})",
                4 * size.vector
            );
        }
    }

    pub(crate) fn verify_glove(size: &mut ModelSize) {
        size.layer = size.layer.max(1);
        size.vector = size.vector.max(1);
        size.window = size.window.max(1);
    }

    /// Accumulate one pass over `corpus`.
    pub(crate) fn train(
        &mut self,
        vocab: &Vocabulary,
        corpus: &Corpus,
        size: &ModelSize,
        weighting: Weighting,
    ) {
        let total = corpus.len();
        for (i, sentence) in corpus.iter().enumerate() {
            if i % PROGRESS_INTERVAL == 0 {
                tracing::info!(done = i, total, "training");
            }
            self.accumulate(vocab.entries(), sentence, size, weighting);
        }
    }

    fn accumulate(
        &mut self,
        entries: &[VocabEntry],
        sentence: &[u32],
        size: &ModelSize,
        weighting: Weighting,
    ) {
        let layer = size.layer;
        let window = size.window;
        for (i, &word) in sentence.iter().enumerate() {
            let row = word as usize * layer;
            let lo = i.saturating_sub(window);
            let hi = (i + window + 1).min(sentence.len());
            for k in lo..hi {
                if k == i {
                    continue;
                }
                let col = entries[sentence[k] as usize].hash as usize % layer;
                self.counts[row + col] += match weighting {
                    Weighting::Flat => 1.0,
                    Weighting::InverseDistance => 1.0 / i.abs_diff(k) as f32,
                };
            }
        }
    }

    /// Left singular vectors of the square-rooted counts (`vocab x vector`).
    pub(crate) fn generate_svd<R: Rng + ?Sized>(
        &self,
        size: &ModelSize,
        rng: &mut R,
    ) -> Result<Matrix, ModelError> {
        let mut data: Vec<f32> = embed_core::zeroed(self.counts.len())?;
        for (d, c) in data.iter_mut().zip(&self.counts) {
            *d = c.sqrt();
        }
        let stabilized = Matrix::new(data, size.vocab, size.layer)?;
        let top = svd_topk(&stabilized, size.vector, rng)?;
        tracing::info!(
            vocab = size.vocab,
            layer = size.layer,
            vector = size.vector,
            "reduced co-occurrence counts"
        );
        Ok(top.u)
    }

    /// One AdaGrad pass of weighted least squares over the nonzero counts,
    /// returning the word vectors (`vocab x vector`).
    ///
    /// Each cell `x` fits `w_i . c_j + b_i + b_j = ln x`, weighted by
    /// `min(1, (x / XMAX)^POWER)`.
    pub(crate) fn generate_glove<R: Rng + ?Sized>(
        &self,
        size: &ModelSize,
        rng: &mut R,
    ) -> Result<Matrix, ModelError> {
        let (sv, sl, se) = (size.vocab, size.layer, size.vector);
        let scale = se as f32;

        let mut vec0: Vec<f32> = embed_core::zeroed(embed_core::checked_len(sv, se)?)?;
        let mut vec1: Vec<f32> = embed_core::zeroed(embed_core::checked_len(sl, se)?)?;
        for x in vec0.iter_mut().chain(vec1.iter_mut()) {
            *x = (rng.random::<f32>() - 0.5) / scale;
        }
        let mut grad0: Vec<f32> = embed_core::zeroed(vec0.len())?;
        let mut grad1: Vec<f32> = embed_core::zeroed(vec1.len())?;
        grad0.fill(1.0);
        grad1.fill(1.0);
        let mut bias0: Vec<f32> = embed_core::zeroed(sv)?;
        let mut bias1: Vec<f32> = embed_core::zeroed(sl)?;
        let mut bgrad0: Vec<f32> = embed_core::zeroed(sv)?;
        let mut bgrad1: Vec<f32> = embed_core::zeroed(sl)?;
        bgrad0.fill(1.0);
        bgrad1.fill(1.0);

        let mut cost = 0.0f64;
        let mut cells = 0u64;
        for i in 0..sv {
            for j in 0..sl {
                let x = self.counts[i * sl + j];
                if x == 0.0 {
                    continue;
                }
                cells += 1;

                let w = &mut vec0[i * se..(i + 1) * se];
                let c = &mut vec1[j * se..(j + 1) * se];
                let g0 = &mut grad0[i * se..(i + 1) * se];
                let g1 = &mut grad1[j * se..(j + 1) * se];

                let dot: f32 = w.iter().zip(c.iter()).map(|(a, b)| a * b).sum();
                let diff = dot + bias0[i] + bias1[j] - x.ln();
                let mut fdiff = if x > XMAX {
                    diff
                } else {
                    diff * (x / XMAX).powf(POWER)
                };
                cost += f64::from(0.5 * diff * fdiff);

                fdiff *= ETA;
                for k in 0..se {
                    let t0 = fdiff * c[k];
                    let t1 = fdiff * w[k];
                    w[k] -= t0 / g0[k].sqrt();
                    c[k] -= t1 / g1[k].sqrt();
                    g0[k] += t0 * t0;
                    g1[k] += t1 * t1;
                }
                bias0[i] -= fdiff / bgrad0[i].sqrt();
                bias1[j] -= fdiff / bgrad1[j].sqrt();
                bgrad0[i] += fdiff * fdiff;
                bgrad1[j] += fdiff * fdiff;
            }
        }

        tracing::info!(cells, cost, "factored co-occurrence counts");
        Ok(Matrix::new(vec0, sv, se)?)
    }
}
