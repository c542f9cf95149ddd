//! Tokenized sentences packed into a single id buffer.
//!
//! The buffer is a sequence of `[len, id_0, .., id_{len-1}]` runs. Each
//! [`Sentence`] is an `(offset, len)` handle into it, so growing the buffer
//! never invalidates a handle. The handles can always be recomputed from the
//! length prefixes with [`Corpus::rebuild`], which is how a loaded corpus gets
//! them back (they are never persisted).
//!
//! Sentences are encoded against a frozen [`Vocabulary`]: unknown tokens are
//! dropped, and a sentence left with fewer than two ids is discarded whole.

use std::io::{self, BufRead, Read, Write};
use std::path::Path;

use embed_core::AllocError;
use embed_core::format::{self, FormatError, Header};
use embed_vocab::Vocabulary;
use thiserror::Error;

/// File magic for corpus files.
pub const MAGIC: [u8; 4] = *b"CRPS";

/// Initial capacity of the id buffer.
const WORDS_CAPACITY: usize = 32768;

/// Initial capacity of the sentence handle array.
const SENTENCES_CAPACITY: usize = 1024;

/// Shortest sentence kept; anything shorter has no context to learn from.
pub const MIN_SENTENCE_LEN: usize = 2;

/// Words read per step when loading.
const READ_CHUNK: usize = 4096;

const FIELD_WORDS: usize = 0;
const FIELD_SENTENCES: usize = 1;

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Handle to one sentence: `offset` indexes its length prefix in the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sentence {
    pub offset: usize,
    pub len: usize,
}

impl Sentence {
    /// Range of the sentence's ids within the buffer.
    #[inline]
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset + 1..self.offset + 1 + self.len
    }
}

/// A packed corpus of vocabulary ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corpus {
    words: Vec<u32>,
    sentences: Vec<Sentence>,
}

impl Corpus {
    pub fn new() -> Result<Self, CorpusError> {
        let mut words = Vec::new();
        let mut sentences = Vec::new();
        embed_core::reserve_pow2(&mut words, WORDS_CAPACITY)?;
        embed_core::reserve_pow2(&mut sentences, SENTENCES_CAPACITY)?;
        Ok(Self { words, sentences })
    }

    /// Number of sentences.
    #[inline]
    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    /// Number of ids across all sentences (length prefixes excluded).
    #[inline]
    pub fn word_count(&self) -> usize {
        self.words.len() - self.sentences.len()
    }

    /// The raw `[len, ids..]` buffer.
    #[inline]
    pub fn buffer(&self) -> &[u32] {
        &self.words
    }

    #[inline]
    pub fn handles(&self) -> &[Sentence] {
        &self.sentences
    }

    /// Ids of sentence `i`.
    #[inline]
    pub fn sentence(&self, i: usize) -> Option<&[u32]> {
        self.sentences.get(i).map(|s| &self.words[s.range()])
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &[u32]> + '_ {
        self.sentences.iter().map(|s| &self.words[s.range()])
    }

    /// Forget every sentence but keep the allocated capacity.
    pub fn clear(&mut self) {
        self.words.clear();
        self.sentences.clear();
    }

    /// Encode one line of whitespace-separated tokens.
    ///
    /// Returns whether the sentence was kept. On error the corpus is unchanged.
    pub fn add_sentence(&mut self, vocab: &Vocabulary, line: &str) -> Result<bool, CorpusError> {
        let start = self.words.len();
        let result = self.push_sentence(vocab, line, start);
        if !matches!(result, Ok(true)) {
            self.words.truncate(start);
        }
        result
    }

    fn push_sentence(
        &mut self,
        vocab: &Vocabulary,
        line: &str,
        start: usize,
    ) -> Result<bool, CorpusError> {
        embed_core::reserve_pow2(&mut self.words, 1)?;
        self.words.push(0);
        for token in line.split_whitespace() {
            if let Some(id) = vocab.find(token) {
                embed_core::reserve_pow2(&mut self.words, 1)?;
                self.words.push(id);
            }
        }

        let len = self.words.len() - start - 1;
        if len < MIN_SENTENCE_LEN {
            return Ok(false);
        }
        embed_core::reserve_pow2(&mut self.sentences, 1)?;
        self.words[start] = len as u32;
        self.sentences.push(Sentence { offset: start, len });
        Ok(true)
    }

    /// Encode every line of a reader. Returns the number of sentences kept.
    pub fn parse<R: BufRead>(
        &mut self,
        vocab: &Vocabulary,
        reader: R,
    ) -> Result<usize, CorpusError> {
        let mut kept = 0;
        let mut lines = 0u64;
        for line in reader.lines() {
            lines += 1;
            if self.add_sentence(vocab, &line?)? {
                kept += 1;
            }
        }
        tracing::debug!(lines, kept, words = self.word_count(), "parsed corpus input");
        Ok(kept)
    }

    /// Recompute every sentence handle from the length prefixes.
    ///
    /// A linear scan over the buffer; fails if a prefix runs past the end.
    pub fn rebuild(&mut self) -> Result<(), CorpusError> {
        self.sentences.clear();
        let mut offset = 0;
        while offset < self.words.len() {
            let len = self.words[offset] as usize;
            let end = offset + 1 + len;
            if end > self.words.len() {
                return Err(FormatError::Corrupt(format!(
                    "sentence at {offset} overruns the buffer"
                ))
                .into());
            }
            embed_core::reserve_pow2(&mut self.sentences, 1)?;
            self.sentences.push(Sentence { offset, len });
            offset = end;
        }
        Ok(())
    }

    /// Serialize to a writer. Handles are not written.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), CorpusError> {
        Header::new(MAGIC)
            .with_field(FIELD_WORDS, self.words.len() as u64)
            .with_field(FIELD_SENTENCES, self.sentences.len() as u64)
            .write(w)?;
        format::write_u32s(w, &self.words)?;
        Ok(())
    }

    /// Deserialize from a reader, rebuild the handles and check every id
    /// against `vocab`.
    pub fn read_from<R: Read>(r: &mut R, vocab: &Vocabulary) -> Result<Self, CorpusError> {
        let header = Header::read(r, MAGIC)?;
        let len = header.field_usize(FIELD_WORDS)?;
        let expected = header.field_usize(FIELD_SENTENCES)?;

        // Grow with the bytes actually read, not the header's claim.
        let mut words: Vec<u32> = Vec::new();
        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(READ_CHUNK);
            embed_core::reserve_pow2(&mut words, n)?;
            let start = words.len();
            words.resize(start + n, 0);
            format::read_u32s_into(r, &mut words[start..])?;
            remaining -= n;
        }
        let mut corpus = Self {
            words,
            sentences: Vec::new(),
        };
        corpus.rebuild()?;

        if corpus.sentences.len() != expected {
            return Err(FormatError::Corrupt(format!(
                "expected {expected} sentences, found {}",
                corpus.sentences.len()
            ))
            .into());
        }
        for s in &corpus.sentences {
            if s.len < MIN_SENTENCE_LEN {
                return Err(FormatError::Corrupt(format!("short sentence at {}", s.offset)).into());
            }
            let ids = &corpus.words[s.range()];
            if let Some(&id) = ids.iter().find(|&&id| id as usize >= vocab.len()) {
                return Err(FormatError::Corrupt(format!(
                    "id {id} outside vocabulary of {}",
                    vocab.len()
                ))
                .into());
            }
        }
        Ok(corpus)
    }

    pub fn save(&self, path: &Path) -> Result<(), CorpusError> {
        let mut w = format::create(path)?;
        self.write_to(&mut w)?;
        w.flush()?;
        tracing::debug!(path = %path.display(), sentences = self.len(), "saved corpus");
        Ok(())
    }

    pub fn open(path: &Path, vocab: &Vocabulary) -> Result<Self, CorpusError> {
        let mut r = format::open(path)?;
        let corpus = Self::read_from(&mut r, vocab)?;
        tracing::debug!(path = %path.display(), sentences = corpus.len(), "loaded corpus");
        Ok(corpus)
    }
}
