//! Word-embedding models over a frozen vocabulary.
//!
//! A [`Model`] wraps one of three algorithms:
//! - [`ModelKind::Cbow`]: continuous bag-of-words with hierarchical softmax
//! - [`ModelKind::Svd`]: hashed co-occurrence counts reduced by randomized SVD
//! - [`ModelKind::Glove`]: inverse-distance co-occurrence factored with AdaGrad
//!
//! Lifecycle: [`Model::new`] picks default sizes without allocating; the first
//! [`Model::train`] or [`Model::save`] verifies the sizes and allocates the
//! parameter buffers. Training may be repeated; [`Model::generate`] turns the
//! current parameters into [`Embeddings`].

use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;
use std::str::FromStr;

use embed_core::AllocError;
use embed_core::format::{self, FormatError, Header};
use embed_corpus::Corpus;
use embed_linalg::LinalgError;
use embed_vocab::Vocabulary;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod cbow;
mod cooccurrence;
mod embeddings;

use cbow::Cbow;
use cooccurrence::{Cooccurrence, Weighting};
pub use embeddings::Embeddings;

/// File magic for model files.
pub const MAGIC: [u8; 4] = *b"MODL";

/// Sentences between progress events (and CBOW learning-rate updates).
pub const PROGRESS_INTERVAL: usize = 4096;

const FIELD_KIND: usize = 0;
const FIELD_ITERATIONS: usize = 1;
const FIELD_LAYER: usize = 2;
const FIELD_VECTOR: usize = 3;
const FIELD_VOCAB: usize = 4;
const FIELD_WINDOW: usize = 5;
const FIELD_FINGERPRINT: usize = 6;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Linalg(#[from] LinalgError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("vocabulary has no huffman codes; encode it before training")]
    NotEncoded,
    #[error("model expects a vocabulary of {expected} words, found {found}")]
    VocabularyMismatch { expected: usize, found: usize },
    #[error("vocabulary fingerprint {found:#010x} does not match the model's {expected:#010x}")]
    FingerprintMismatch { expected: u32, found: u32 },
    #[error("corpus id {id} is outside the vocabulary of {len} words")]
    CorpusMismatch { id: u32, len: usize },
    #[error("unknown model kind {0:?}")]
    UnknownKind(String),
}

/// Training algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Glove,
    Cbow,
    Svd,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [ModelKind::Glove, ModelKind::Cbow, ModelKind::Svd];

    /// Persisted tag.
    pub const fn tag(self) -> u64 {
        match self {
            ModelKind::Glove => 0,
            ModelKind::Cbow => 1,
            ModelKind::Svd => 2,
        }
    }

    pub fn from_tag(tag: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }

    pub const fn name(self) -> &'static str {
        match self {
            ModelKind::Glove => "glove",
            ModelKind::Cbow => "cbow",
            ModelKind::Svd => "svd",
        }
    }

    /// Default sizes for this algorithm (vocabulary size left at 0).
    pub const fn default_size(self) -> ModelSize {
        match self {
            ModelKind::Cbow => ModelSize {
                iterations: 5,
                layer: 64,
                vector: 64,
                vocab: 0,
                window: 5,
            },
            ModelKind::Svd | ModelKind::Glove => ModelSize {
                iterations: 1,
                layer: 320,
                vector: 64,
                vocab: 0,
                window: 5,
            },
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ModelError::UnknownKind(s.to_owned()))
    }
}

/// Model dimensions.
///
/// `layer` is the hidden size for CBOW and the number of hash buckets for the
/// co-occurrence models; `vector` is the embedding size. `iterations` only
/// affects CBOW: the co-occurrence models accumulate one pass per
/// [`Model::train`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSize {
    pub iterations: usize,
    pub layer: usize,
    pub vector: usize,
    pub vocab: usize,
    pub window: usize,
}

/// Summary of a model's state, for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub kind: ModelKind,
    pub size: ModelSize,
    pub allocated: bool,
    pub changed: bool,
}

#[derive(Debug, Clone)]
enum Params {
    Cbow(Cbow),
    Svd(Cooccurrence),
    Glove(Cooccurrence),
}

impl Params {
    fn zeroed(kind: ModelKind, size: &ModelSize) -> Result<Self, ModelError> {
        Ok(match kind {
            ModelKind::Cbow => Params::Cbow(Cbow::zeroed(size)?),
            ModelKind::Svd => Params::Svd(Cooccurrence::zeroed(size)?),
            ModelKind::Glove => Params::Glove(Cooccurrence::zeroed(size)?),
        })
    }

    fn buffers(&self) -> Vec<&[f32]> {
        match self {
            Params::Cbow(m) => vec![m.syn0.as_slice(), m.syn1.as_slice()],
            Params::Svd(m) | Params::Glove(m) => vec![m.counts.as_slice()],
        }
    }

    fn buffers_mut(&mut self) -> Vec<&mut [f32]> {
        match self {
            Params::Cbow(m) => vec![m.syn0.as_mut_slice(), m.syn1.as_mut_slice()],
            Params::Svd(m) | Params::Glove(m) => vec![m.counts.as_mut_slice()],
        }
    }
}

/// An embedding model bound to a vocabulary.
///
/// The model borrows the vocabulary for its whole life, so the vocabulary
/// cannot change under it. All randomness comes from the owned `rng`.
pub struct Model<'v, R: Rng> {
    vocab: &'v Vocabulary,
    kind: ModelKind,
    size: ModelSize,
    params: Option<Params>,
    changed: bool,
    rng: R,
}

impl<'v, R: Rng> Model<'v, R> {
    /// A model with the algorithm's default sizes. Nothing is allocated yet.
    pub fn new(vocab: &'v Vocabulary, kind: ModelKind, rng: R) -> Self {
        let mut size = kind.default_size();
        size.vocab = vocab.len();
        Model {
            vocab,
            kind,
            size,
            params: None,
            changed: false,
            rng,
        }
    }

    #[inline]
    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    #[inline]
    pub fn size(&self) -> &ModelSize {
        &self.size
    }

    #[inline]
    pub fn vocabulary(&self) -> &'v Vocabulary {
        self.vocab
    }

    /// Whether the parameter buffers exist.
    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.params.is_some()
    }

    /// Whether the model changed since it was created, loaded or saved.
    #[inline]
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            kind: self.kind,
            size: self.size,
            allocated: self.is_allocated(),
            changed: self.changed,
        }
    }

    pub fn set_iterations(&mut self, iterations: usize) {
        // Iterations do not shape any buffer.
        if self.size.iterations != iterations {
            self.size.iterations = iterations;
            self.revalidate();
        }
    }

    pub fn set_layer(&mut self, layer: usize) {
        if self.size.layer != layer {
            self.size.layer = layer;
            self.invalidate();
        }
    }

    pub fn set_vector(&mut self, vector: usize) {
        if self.size.vector != vector {
            self.size.vector = vector;
            self.invalidate();
        }
    }

    pub fn set_window(&mut self, window: usize) {
        if self.size.window != window {
            self.size.window = window;
            self.revalidate();
        }
    }

    /// Keep allocated buffers; re-run `verify` so trained and saved sizes
    /// stay valid. Unallocated models are verified on allocation.
    fn revalidate(&mut self) {
        if self.is_allocated() {
            self.verify();
        }
        self.changed = true;
    }

    /// Drop the buffers so the next train/save reallocates them.
    fn invalidate(&mut self) {
        if self.params.take().is_some() {
            tracing::debug!(kind = %self.kind, "model sizes changed; buffers dropped");
        }
        self.changed = true;
    }

    /// Normalize the sizes for the algorithm, warning about poor choices.
    pub fn verify(&mut self) {
        match self.kind {
            ModelKind::Cbow => Cbow::verify(&mut self.size),
            ModelKind::Svd => Cooccurrence::verify_svd(&mut self.size),
            ModelKind::Glove => Cooccurrence::verify_glove(&mut self.size),
        }
    }

    /// Verify the sizes and (re)allocate every parameter buffer.
    pub fn alloc(&mut self) -> Result<(), ModelError> {
        self.params = None;
        let params = self.fresh_params()?;
        self.params = Some(params);
        Ok(())
    }

    fn fresh_params(&mut self) -> Result<Params, ModelError> {
        self.size.vocab = self.vocab.len();
        self.verify();
        let params = match self.kind {
            ModelKind::Cbow => Params::Cbow(Cbow::new(&self.size, &mut self.rng)?),
            kind => Params::zeroed(kind, &self.size)?,
        };
        self.changed = true;
        tracing::debug!(kind = %self.kind, size = ?self.size, "allocated model");
        Ok(params)
    }

    /// Take the buffers out, allocating them on first use. Callers put them back.
    fn take_params(&mut self) -> Result<Params, ModelError> {
        match self.params.take() {
            Some(params) => Ok(params),
            None => self.fresh_params(),
        }
    }

    /// Train on a corpus encoded against this model's vocabulary.
    pub fn train(&mut self, corpus: &Corpus) -> Result<(), ModelError> {
        let len = self.vocab.len();
        if let Some(&id) = corpus.iter().flatten().find(|&&id| id as usize >= len) {
            return Err(ModelError::CorpusMismatch { id, len });
        }
        if self.kind == ModelKind::Cbow && !self.vocab.is_encoded() {
            return Err(ModelError::NotEncoded);
        }

        let mut params = self.take_params()?;
        let (vocab, size) = (self.vocab, self.size);
        let result = match &mut params {
            Params::Cbow(m) => m.train(vocab, corpus, &size, &mut self.rng),
            Params::Svd(m) => {
                m.train(vocab, corpus, &size, Weighting::Flat);
                Ok(())
            }
            Params::Glove(m) => {
                m.train(vocab, corpus, &size, Weighting::InverseDistance);
                Ok(())
            }
        };
        self.params = Some(params);
        self.changed = true;
        result?;
        tracing::info!(kind = %self.kind, sentences = corpus.len(), "trained model");
        Ok(())
    }

    /// Compute one embedding vector per vocabulary entry.
    pub fn generate(&mut self) -> Result<Embeddings, ModelError> {
        let params = self.take_params()?;
        let size = self.size;
        let vectors = match &params {
            Params::Cbow(m) => {
                embed_linalg::Matrix::new(m.syn0.clone(), size.vocab, size.layer).map_err(Into::into)
            }
            Params::Svd(m) => m.generate_svd(&size, &mut self.rng),
            Params::Glove(m) => m.generate_glove(&size, &mut self.rng),
        };
        self.params = Some(params);
        Embeddings::new(self.vocab, vectors?)
    }

    /// Content hash of the parameter buffers; 0 before allocation.
    pub fn checksum(&self) -> u32 {
        self.params.as_ref().map_or(0, |p| {
            p.buffers().into_iter().fold(embed_core::FNV_OFFSET, |h, b| {
                embed_core::fnv1a_update(h, &embed_core::hash_f32s(b).to_le_bytes())
            })
        })
    }

    /// Serialize header and parameters, allocating first if needed.
    pub fn write_to<W: Write>(&mut self, w: &mut W) -> Result<(), ModelError> {
        let params = self.take_params()?;
        let result = self.write_params(&params, w);
        self.params = Some(params);
        result
    }

    fn write_params<W: Write>(&self, params: &Params, w: &mut W) -> Result<(), ModelError> {
        let size = self.size;
        Header::new(MAGIC)
            .with_field(FIELD_KIND, self.kind.tag())
            .with_field(FIELD_ITERATIONS, size.iterations as u64)
            .with_field(FIELD_LAYER, size.layer as u64)
            .with_field(FIELD_VECTOR, size.vector as u64)
            .with_field(FIELD_VOCAB, size.vocab as u64)
            .with_field(FIELD_WINDOW, size.window as u64)
            .with_field(FIELD_FINGERPRINT, u64::from(self.vocab.fingerprint()))
            .write(w)?;
        for buffer in params.buffers() {
            format::write_f32s(w, buffer)?;
        }
        Ok(())
    }

    /// Save to a file and clear the changed flag.
    pub fn save(&mut self, path: &Path) -> Result<(), ModelError> {
        let mut w = format::create(path)?;
        self.write_to(&mut w)?;
        w.flush()?;
        self.changed = false;
        tracing::info!(path = %path.display(), kind = %self.kind, "saved model");
        Ok(())
    }

    /// Deserialize a model trained on `vocab`.
    ///
    /// Fails if `vocab` is not the vocabulary the model was saved with.
    pub fn read_from<Rd: Read>(vocab: &'v Vocabulary, r: &mut Rd, rng: R) -> Result<Self, ModelError> {
        let header = Header::read(r, MAGIC)?;
        let kind = ModelKind::from_tag(header.fields[FIELD_KIND]).ok_or_else(|| {
            FormatError::Corrupt(format!("unknown model kind {}", header.fields[FIELD_KIND]))
        })?;
        let size = ModelSize {
            iterations: header.field_usize(FIELD_ITERATIONS)?,
            layer: header.field_usize(FIELD_LAYER)?,
            vector: header.field_usize(FIELD_VECTOR)?,
            vocab: header.field_usize(FIELD_VOCAB)?,
            window: header.field_usize(FIELD_WINDOW)?,
        };

        if size.vocab != vocab.len() {
            return Err(ModelError::VocabularyMismatch {
                expected: size.vocab,
                found: vocab.len(),
            });
        }
        let fingerprint = vocab.fingerprint();
        if header.fields[FIELD_FINGERPRINT] != u64::from(fingerprint) {
            return Err(ModelError::FingerprintMismatch {
                expected: header.fields[FIELD_FINGERPRINT] as u32,
                found: fingerprint,
            });
        }

        let mut model = Model {
            vocab,
            kind,
            size,
            params: None,
            changed: false,
            rng,
        };
        // A saved model always carries verified sizes.
        model.verify();
        if model.size != size {
            return Err(FormatError::Corrupt(format!("inconsistent sizes {size:?}")).into());
        }

        let mut params = Params::zeroed(kind, &size)?;
        for buffer in params.buffers_mut() {
            format::read_f32s_into(r, buffer)?;
        }
        model.params = Some(params);
        Ok(model)
    }

    /// Load a model file saved against `vocab`.
    pub fn open(vocab: &'v Vocabulary, path: &Path, rng: R) -> Result<Self, ModelError> {
        let mut r = format::open(path)?;
        let model = Self::read_from(vocab, &mut r, rng)?;
        tracing::info!(path = %path.display(), kind = %model.kind, "loaded model");
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    const TEXT: &str = "\
the quick brown fox jumps over the lazy dog
the dog sleeps under the old tree
a quick red fox runs past the sleeping dog
the lazy cat watches the quick fox
a brown dog and a red fox play in the tree
";

    fn vocab() -> Vocabulary {
        let mut v = Vocabulary::with_capacity(64).unwrap();
        v.parse(TEXT.as_bytes()).unwrap();
        v.encode().unwrap();
        v
    }

    fn corpus(v: &Vocabulary) -> Corpus {
        let mut c = Corpus::new().unwrap();
        c.parse(v, TEXT.as_bytes()).unwrap();
        c
    }

    fn rng(seed: u64) -> SmallRng {
        SmallRng::seed_from_u64(seed)
    }

    // --- lifecycle ---

    #[test]
    fn new_does_not_allocate() {
        let v = vocab();
        let m = Model::new(&v, ModelKind::Cbow, rng(0));
        assert!(!m.is_allocated());
        assert!(!m.is_changed());
        assert_eq!(m.size().vocab, v.len());
        assert_eq!(m.size().layer, 64);
        assert_eq!(m.checksum(), 0);
    }

    #[test]
    fn defaults_per_kind() {
        let v = vocab();
        let svd = Model::new(&v, ModelKind::Svd, rng(0));
        assert_eq!((svd.size().layer, svd.size().vector), (320, 64));
        let glove = Model::new(&v, ModelKind::Glove, rng(0));
        assert_eq!(glove.size().window, 5);
    }

    #[test]
    fn changing_layer_drops_buffers() {
        let v = vocab();
        let mut m = Model::new(&v, ModelKind::Svd, rng(0));
        m.alloc().unwrap();
        assert!(m.is_allocated());
        m.set_layer(400);
        assert!(!m.is_allocated());
        m.set_iterations(3);
        assert!(m.is_changed());
    }

    #[test]
    fn kind_parsing_and_tags() {
        assert_eq!("CBOW".parse::<ModelKind>().unwrap(), ModelKind::Cbow);
        assert!("word2vec".parse::<ModelKind>().is_err());
        for k in ModelKind::ALL {
            assert_eq!(ModelKind::from_tag(k.tag()), Some(k));
            assert_eq!(k.to_string().parse::<ModelKind>().unwrap(), k);
        }
        assert_eq!(ModelKind::from_tag(7), None);
    }

    #[test]
    fn size_serde_roundtrip() {
        let size = ModelKind::Cbow.default_size();
        let json = serde_json::to_string(&size).unwrap();
        let back: ModelSize = serde_json::from_str(&json).unwrap();
        assert_eq!(back, size);
        let kind = serde_json::to_string(&ModelKind::Glove).unwrap();
        assert_eq!(kind, "\"glove\"");
    }

    #[test]
    fn zero_window_after_allocation_is_clamped() {
        let v = vocab();
        let c = corpus(&v);
        let mut m = Model::new(&v, ModelKind::Cbow, rng(0));
        m.set_layer(8);
        m.alloc().unwrap();
        m.set_window(0);
        assert_eq!(m.size().window, 1);
        m.train(&c).unwrap();
    }

    #[test]
    fn zero_iterations_after_training_still_loads() {
        let v = vocab();
        let c = corpus(&v);
        let mut m = Model::new(&v, ModelKind::Cbow, rng(0));
        m.set_layer(8);
        m.train(&c).unwrap();
        m.set_iterations(0);
        m.train(&c).unwrap();

        let mut bytes = Vec::new();
        m.write_to(&mut bytes).unwrap();
        let loaded = Model::read_from(&v, &mut Cursor::new(bytes), rng(0)).unwrap();
        assert_eq!(loaded.size().iterations, 1);
        assert_eq!(loaded.size(), m.size());
    }

    #[test]
    fn glove_zero_window_after_allocation_still_loads() {
        let v = vocab();
        let c = corpus(&v);
        let mut m = Model::new(&v, ModelKind::Glove, rng(0));
        m.set_layer(16);
        m.set_vector(4);
        m.alloc().unwrap();
        m.set_window(0);
        m.train(&c).unwrap();

        let mut bytes = Vec::new();
        m.write_to(&mut bytes).unwrap();
        let loaded = Model::read_from(&v, &mut Cursor::new(bytes), rng(0)).unwrap();
        assert_eq!(loaded.size().window, 1);
        assert_eq!(loaded.checksum(), m.checksum());
    }

    // --- cbow ---

    #[test]
    fn cbow_training_updates_syn0() {
        let v = vocab();
        let c = corpus(&v);
        let mut m = Model::new(&v, ModelKind::Cbow, rng(1));
        m.set_layer(16);
        m.set_vector(16);
        m.alloc().unwrap();
        let before = match &m.params {
            Some(Params::Cbow(p)) => embed_core::hash_f32s(&p.syn0),
            _ => unreachable!(),
        };
        m.train(&c).unwrap();
        assert!(m.is_changed());
        let after = match &m.params {
            Some(Params::Cbow(p)) => embed_core::hash_f32s(&p.syn0),
            _ => unreachable!(),
        };
        assert_ne!(before, after);
    }

    #[test]
    fn cbow_requires_encoded_vocabulary() {
        let mut v = Vocabulary::with_capacity(16).unwrap();
        v.parse(TEXT.as_bytes()).unwrap();
        let c = corpus(&v);
        let mut m = Model::new(&v, ModelKind::Cbow, rng(0));
        assert!(matches!(m.train(&c), Err(ModelError::NotEncoded)));
    }

    #[test]
    fn cbow_is_deterministic_for_a_seed() {
        let v = vocab();
        let c = corpus(&v);
        let run = |seed| {
            let mut m = Model::new(&v, ModelKind::Cbow, rng(seed));
            m.set_layer(8);
            m.train(&c).unwrap();
            m.checksum()
        };
        assert_eq!(run(4), run(4));
        assert_ne!(run(4), run(5));
    }

    #[test]
    fn cbow_generate_copies_syn0() {
        let v = vocab();
        let c = corpus(&v);
        let mut m = Model::new(&v, ModelKind::Cbow, rng(2));
        m.set_layer(8);
        m.set_vector(8);
        m.train(&c).unwrap();
        let e = m.generate().unwrap();
        assert_eq!(e.len(), v.len());
        assert_eq!(e.dimension(), 8);
        match &m.params {
            Some(Params::Cbow(p)) => assert_eq!(e.matrix().data, p.syn0),
            _ => unreachable!(),
        }
    }

    // --- co-occurrence ---

    #[test]
    fn svd_generate_produces_requested_dimension() {
        let v = vocab();
        let c = corpus(&v);
        let mut m = Model::new(&v, ModelKind::Svd, rng(3));
        m.set_vector(4);
        m.set_layer(16);
        m.train(&c).unwrap();
        let e = m.generate().unwrap();
        assert_eq!(e.dimension(), 4);
        assert_eq!(e.len(), v.len());
        assert!(e.matrix().data.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn svd_generate_rejects_too_small_vocabulary() {
        let v = vocab();
        let c = corpus(&v);
        let mut m = Model::new(&v, ModelKind::Svd, rng(3));
        // 2 * vector >= vocabulary size
        m.set_vector(v.len());
        m.train(&c).unwrap();
        assert!(matches!(
            m.generate(),
            Err(ModelError::Linalg(LinalgError::RankTooLarge { .. }))
        ));
    }

    #[test]
    fn glove_generate_produces_vectors() {
        let v = vocab();
        let c = corpus(&v);
        let mut m = Model::new(&v, ModelKind::Glove, rng(4));
        m.set_vector(6);
        m.set_layer(32);
        m.train(&c).unwrap();
        let e = m.generate().unwrap();
        assert_eq!((e.len(), e.dimension()), (v.len(), 6));
        assert!(e.matrix().data.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn train_rejects_foreign_corpus() {
        let v = vocab();
        let c = corpus(&v);
        let mut small = Vocabulary::with_capacity(4).unwrap();
        small.add("the").unwrap();
        let mut m = Model::new(&small, ModelKind::Svd, rng(0));
        assert!(matches!(
            m.train(&c),
            Err(ModelError::CorpusMismatch { .. })
        ));
    }

    // --- persistence ---

    #[test]
    fn save_load_is_bit_exact() {
        let v = vocab();
        let c = corpus(&v);
        let mut m = Model::new(&v, ModelKind::Cbow, rng(6));
        m.set_layer(12);
        m.train(&c).unwrap();

        let mut bytes = Vec::new();
        m.write_to(&mut bytes).unwrap();
        let loaded = Model::read_from(&v, &mut Cursor::new(bytes), rng(0)).unwrap();
        assert_eq!(loaded.kind(), ModelKind::Cbow);
        assert_eq!(loaded.size(), m.size());
        assert_eq!(loaded.checksum(), m.checksum());
        assert!(!loaded.is_changed());
        match (&m.params, &loaded.params) {
            (Some(Params::Cbow(a)), Some(Params::Cbow(b))) => {
                assert_eq!(a.syn0, b.syn0);
                assert_eq!(a.syn1, b.syn1);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn save_allocates_and_clears_changed() {
        let v = vocab();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glove.model");
        let mut m = Model::new(&v, ModelKind::Glove, rng(0));
        m.save(&path).unwrap();
        assert!(m.is_allocated());
        assert!(!m.is_changed());
        let loaded = Model::open(&v, &path, rng(0)).unwrap();
        assert_eq!(loaded.kind(), ModelKind::Glove);
        assert_eq!(loaded.size().layer, 320);
    }

    #[test]
    fn load_rejects_other_vocabulary() {
        let v = vocab();
        let mut m = Model::new(&v, ModelKind::Svd, rng(0));
        let mut bytes = Vec::new();
        m.write_to(&mut bytes).unwrap();

        let mut other = Vocabulary::with_capacity(4).unwrap();
        other.add("x").unwrap();
        assert!(matches!(
            Model::read_from(&other, &mut Cursor::new(bytes.clone()), rng(0)),
            Err(ModelError::VocabularyMismatch { .. })
        ));

        // Same length, different counts.
        let mut same_len = v.clone();
        same_len.add("the").unwrap();
        assert!(matches!(
            Model::read_from(&same_len, &mut Cursor::new(bytes), rng(0)),
            Err(ModelError::FingerprintMismatch { .. })
        ));
    }

    #[test]
    fn load_rejects_truncated_payload() {
        let v = vocab();
        let mut m = Model::new(&v, ModelKind::Svd, rng(0));
        let mut bytes = Vec::new();
        m.write_to(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 4);
        assert!(matches!(
            Model::read_from(&v, &mut Cursor::new(bytes), rng(0)),
            Err(ModelError::Format(FormatError::Truncated))
        ));
    }
}
