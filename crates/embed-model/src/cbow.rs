//! Continuous bag-of-words with hierarchical softmax.
//!
//! Each center word is predicted from the average of its context vectors by
//! walking the center word's Huffman path; the error signal is accumulated and
//! then added to every context word's input vector.

use embed_corpus::Corpus;
use embed_vocab::{VocabEntry, Vocabulary};
use rand::Rng;

use crate::{ModelError, ModelSize, PROGRESS_INTERVAL};

/// Initial learning rate.
pub const ALPHA: f32 = 0.05;

/// Floor of the decayed learning rate, relative to [`ALPHA`].
const ALPHA_FLOOR: f32 = 1e-4;

/// Longest subsampled sentence trained on.
pub const MAX_SENTENCE_LEN: usize = 511;

/// Keep threshold numerator: the most frequent word survives half the time.
const SUBSAMPLE: f64 = std::f64::consts::FRAC_1_SQRT_2;

const MAX_EXP: f32 = 6.0;
const EXP_TABLE_SIZE: usize = 1000;

/// Precomputed logistic function over `(-MAX_EXP, MAX_EXP)`.
#[derive(Debug, Clone)]
pub(crate) struct SigmoidTable {
    table: Vec<f32>,
}

impl SigmoidTable {
    pub(crate) fn new() -> Self {
        let table = (0..EXP_TABLE_SIZE)
            .map(|i| {
                let x = (i as f32 / EXP_TABLE_SIZE as f32 * 2.0 - 1.0) * MAX_EXP;
                let e = x.exp();
                e / (e + 1.0)
            })
            .collect();
        Self { table }
    }

    /// `None` when `x` is saturated; such nodes are skipped.
    #[inline]
    pub(crate) fn get(&self, x: f32) -> Option<f32> {
        if x <= -MAX_EXP || x >= MAX_EXP {
            return None;
        }
        let i = ((x + MAX_EXP) * (EXP_TABLE_SIZE as f32 / MAX_EXP / 2.0)) as usize;
        self.table.get(i).copied()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Cbow {
    /// Input vectors, `vocab x layer`.
    pub(crate) syn0: Vec<f32>,
    /// Output (inner-node) vectors, `vocab x layer`.
    pub(crate) syn1: Vec<f32>,
    neu1: Vec<f32>,
    neu2: Vec<f32>,
    alpha: f32,
    sigmoid: SigmoidTable,
}

impl Cbow {
    /// Zeroed buffers, ready to be filled from a saved model.
    pub(crate) fn zeroed(size: &ModelSize) -> Result<Self, ModelError> {
        let len = embed_core::checked_len(size.vocab, size.layer)?;
        Ok(Self {
            syn0: embed_core::zeroed(len)?,
            syn1: embed_core::zeroed(len)?,
            neu1: embed_core::zeroed(size.layer)?,
            neu2: embed_core::zeroed(size.layer)?,
            alpha: ALPHA,
            sigmoid: SigmoidTable::new(),
        })
    }

    /// Fresh parameters: `syn0` uniform in `[-0.5/layer, 0.5/layer)`, `syn1` zero.
    pub(crate) fn new<R: Rng + ?Sized>(size: &ModelSize, rng: &mut R) -> Result<Self, ModelError> {
        let mut cbow = Self::zeroed(size)?;
        let layer = size.layer as f32;
        for x in &mut cbow.syn0 {
            *x = (rng.random::<f32>() - 0.5) / layer;
        }
        Ok(cbow)
    }

    /// Clamp iterations and window, and force `layer == vector`.
    pub(crate) fn verify(size: &mut ModelSize) {
        size.iterations = size.iterations.max(1);
        if size.iterations < 5 {
            tracing::warn!(iterations = size.iterations, "consider using >= 5 iterations");
        }
        size.window = size.window.max(1);
        size.vector = size.layer.max(size.vector);
        size.layer = size.vector;
    }

    pub(crate) fn train<R: Rng + ?Sized>(
        &mut self,
        vocab: &Vocabulary,
        corpus: &Corpus,
        size: &ModelSize,
        rng: &mut R,
    ) -> Result<(), ModelError> {
        if !vocab.is_encoded() {
            return Err(ModelError::NotEncoded);
        }

        let sentences = corpus.len();
        let total = size.iterations.saturating_mul(sentences);
        let mut sample = Vec::with_capacity(MAX_SENTENCE_LEN);

        self.alpha = ALPHA;
        for iteration in 0..size.iterations {
            for (j, sentence) in corpus.iter().enumerate() {
                if j % PROGRESS_INTERVAL == 0 {
                    tracing::info!(
                        iteration = iteration + 1,
                        iterations = size.iterations,
                        done = j,
                        total = sentences,
                        "training"
                    );
                    self.decay(iteration * sentences + j, total);
                }
                subsample(sentence, &mut sample, rng);
                if sample.len() <= 1 {
                    continue;
                }
                self.train_sentence(vocab.entries(), &sample, size, rng);
            }
        }
        Ok(())
    }

    /// Linear decay toward `ALPHA * ALPHA_FLOOR`.
    fn decay(&mut self, done: usize, total: usize) {
        let progress = done as f32 / (total as f32 + 1.0);
        self.alpha = (ALPHA * (1.0 - progress)).max(ALPHA * ALPHA_FLOOR);
    }

    fn train_sentence<R: Rng + ?Sized>(
        &mut self,
        entries: &[VocabEntry],
        sentence: &[u32],
        size: &ModelSize,
        rng: &mut R,
    ) {
        let layer = size.layer;
        let window = size.window;
        let len = sentence.len();

        for i in 0..len {
            // Shrink the window by a random amount per center word.
            let b = rng.random_range(0..window);
            let context = (b..2 * window + 1 - b)
                .filter(|&a| a != window)
                .filter_map(|a| (i + a).checked_sub(window))
                .filter(|&c| c < len);

            let mut d = 0usize;
            for c in context.clone() {
                let row = sentence[c] as usize * layer;
                for (h, x) in self.neu1.iter_mut().zip(&self.syn0[row..row + layer]) {
                    *h += x;
                }
                d += 1;
            }
            if d == 0 {
                continue;
            }
            let inv = 1.0 / d as f32;
            for h in &mut self.neu1 {
                *h *= inv;
            }

            self.hierarchical_softmax(&entries[sentence[i] as usize], layer);

            for c in context {
                let row = sentence[c] as usize * layer;
                for (x, g) in self.syn0[row..row + layer].iter_mut().zip(&self.neu2) {
                    *x += g;
                }
            }
            self.neu1.fill(0.0);
            self.neu2.fill(0.0);
        }
    }

    fn hierarchical_softmax(&mut self, entry: &VocabEntry, layer: usize) {
        for (bit, point) in entry.path() {
            let row = point as usize * layer;
            let out = &mut self.syn1[row..row + layer];
            let f: f32 = self.neu1.iter().zip(out.iter()).map(|(h, w)| h * w).sum();
            let Some(f) = self.sigmoid.get(f) else {
                continue;
            };
            let g = (1.0 - f32::from(u8::from(bit)) - f) * self.alpha;
            for (e, w) in self.neu2.iter_mut().zip(out.iter()) {
                *e += g * w;
            }
            for (w, h) in out.iter_mut().zip(&self.neu1) {
                *w += g * h;
            }
        }
    }
}

/// Copy `src` into `dst`, keeping word rank `r` with probability
/// `1 - sqrt(0.5) / sqrt(r + 2)`. Ranks are ids, so this relies on the
/// vocabulary being sorted by frequency.
fn subsample<R: Rng + ?Sized>(src: &[u32], dst: &mut Vec<u32>, rng: &mut R) {
    dst.clear();
    for &id in src {
        if dst.len() >= MAX_SENTENCE_LEN {
            break;
        }
        if rng.random::<f64>() > SUBSAMPLE / (f64::from(id) + 2.0).sqrt() {
            dst.push(id);
        }
    }
}
