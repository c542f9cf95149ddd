//! Word vocabulary: a dense entry array behind an open-addressing hash index.
//!
//! The vocabulary maintains two parallel structures:
//! - `entries`: [`VocabEntry`] values in id order (index = word id)
//! - `table`: a power-of-two slot array mapping `hash % capacity` (with linear
//!   probing) to an entry id
//!
//! Every operation that reorders or grows `entries` rebuilds `table` before
//! returning, so the index always reflects the current entry array.
//!
//! Once the vocabulary is complete it is pruned ([`Vocabulary::prune`]) and
//! Huffman-coded ([`Vocabulary::encode`]); after that it is treated as frozen
//! by the corpus and the models.

use std::io::{self, BufRead};

use embed_core::{AllocError, FNV_OFFSET, fnv1a_update, format::FormatError, hash_word};
use thiserror::Error;

mod huffman;
mod persist;

pub use huffman::MAX_CODE_LENGTH;
pub use persist::{MAGIC, RECORD_LEN};

/// Longest word kept, in bytes. Longer words are truncated at a char boundary.
pub const MAX_WORD_LENGTH: usize = 79;

/// Initial index capacity of [`Vocabulary::new`].
pub const DEFAULT_CAPACITY: usize = 32768;

/// Maximum load factor before the index grows.
const MAX_LOAD: f64 = 0.7;

/// Errors from vocabulary operations.
#[derive(Debug, Error)]
pub enum VocabError {
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("vocabulary is empty")]
    EmptyVocabulary,
    #[error("vocabulary of {len} entries exceeds the id range")]
    TooLarge { len: usize },
    #[error("huffman code of depth {depth} exceeds {MAX_CODE_LENGTH}")]
    CodeTooLong { depth: usize },
}

/// One word of the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VocabEntry {
    pub word: String,
    pub hash: u32,
    pub count: u32,
    /// Huffman code with a leading sentinel bit; 0 until [`Vocabulary::encode`].
    pub code: u64,
    /// Internal-node indices from the root down, one per code bit.
    pub points: Vec<u32>,
}

impl VocabEntry {
    fn new(word: &str, hash: u32, count: u32) -> Self {
        Self {
            word: word.to_owned(),
            hash,
            count,
            code: 0,
            points: Vec::new(),
        }
    }

    /// Number of bits in the Huffman code (excluding the sentinel).
    #[inline]
    pub fn code_len(&self) -> usize {
        if self.code == 0 {
            0
        } else {
            63 - self.code.leading_zeros() as usize
        }
    }

    /// Iterate the code as `(bit, point)` pairs from the root down to the leaf.
    pub fn path(&self) -> impl Iterator<Item = (bool, u32)> + '_ {
        let code = self.code;
        self.points
            .iter()
            .enumerate()
            .map(move |(d, &p)| ((code >> d) & 1 == 1, p))
    }
}

/// Clip a word to [`MAX_WORD_LENGTH`] bytes without splitting a character.
pub fn clip(word: &str) -> &str {
    if word.len() <= MAX_WORD_LENGTH {
        return word;
    }
    let mut end = MAX_WORD_LENGTH;
    while !word.is_char_boundary(end) {
        end -= 1;
    }
    &word[..end]
}

/// A word vocabulary with frequency counts and optional Huffman codes.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    /// Entries in id order.
    entries: Vec<VocabEntry>,
    /// Open-addressing slots holding entry ids; length is the capacity.
    table: Vec<Option<u32>>,
    /// Set by [`Vocabulary::encode`], cleared by anything that reorders entries.
    encoded: bool,
}

impl Vocabulary {
    /// Create an empty vocabulary with [`DEFAULT_CAPACITY`] index slots.
    pub fn new() -> Result<Self, VocabError> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create an empty vocabulary whose index starts with at least `capacity`
    /// slots (rounded up to a power of two).
    pub fn with_capacity(capacity: usize) -> Result<Self, VocabError> {
        let cap = capacity
            .max(1)
            .checked_next_power_of_two()
            .ok_or(AllocError::Overflow {
                len: capacity,
                size: 1,
            })?;
        Ok(Self {
            entries: Vec::new(),
            table: embed_core::zeroed(cap)?,
            encoded: false,
        })
    }

    /// Number of words.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of index slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.table.len()
    }

    /// Whether Huffman codes are current.
    #[inline]
    pub fn is_encoded(&self) -> bool {
        self.encoded
    }

    /// Entry for `id`, if in range.
    #[inline]
    pub fn entry(&self, id: u32) -> Option<&VocabEntry> {
        self.entries.get(id as usize)
    }

    /// Entries in id order.
    #[inline]
    pub fn entries(&self) -> &[VocabEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, VocabEntry> {
        self.entries.iter()
    }

    /// Record one occurrence of `word`, returning its id.
    pub fn add(&mut self, word: &str) -> Result<u32, VocabError> {
        self.add_count(word, 1)
    }

    /// Record `n` occurrences of `word`, returning its id.
    ///
    /// Counts saturate at `u32::MAX`. Inserting a new word grows the index
    /// (4x, then rebuild) when the load factor would pass 0.7; on failure the
    /// vocabulary is left unchanged.
    pub fn add_count(&mut self, word: &str, n: u32) -> Result<u32, VocabError> {
        let word = clip(word);
        let hash = hash_word(word);
        let mut slot = self.probe(hash, word);

        if let Some(id) = self.table[slot] {
            let entry = &mut self.entries[id as usize];
            entry.count = entry.count.saturating_add(n);
            return Ok(id);
        }

        let len = self.entries.len();
        if len >= (u32::MAX / 2) as usize {
            return Err(VocabError::TooLarge { len });
        }
        if (len + 1) as f64 > MAX_LOAD * self.table.len() as f64 {
            let cap = self.table.len().checked_mul(4).ok_or(AllocError::Overflow {
                len: self.table.len(),
                size: 4,
            })?;
            self.table = embed_core::zeroed(cap)?;
            self.rebuild_index();
            slot = self.probe(hash, word);
        }
        embed_core::reserve_pow2(&mut self.entries, 1)?;

        let id = len as u32;
        self.entries.push(VocabEntry::new(word, hash, n));
        self.table[slot] = Some(id);
        self.encoded = false;
        Ok(id)
    }

    /// Look up a word's id.
    pub fn find(&self, word: &str) -> Option<u32> {
        let word = clip(word);
        self.table[self.probe(hash_word(word), word)]
    }

    /// Count of `word`, or 0 when absent.
    pub fn count(&self, word: &str) -> u32 {
        self.find(word)
            .and_then(|id| self.entry(id))
            .map_or(0, |e| e.count)
    }

    /// Add every whitespace-separated token of every line.
    ///
    /// Returns the number of tokens read.
    pub fn parse<R: BufRead>(&mut self, reader: R) -> Result<u64, VocabError> {
        let mut tokens = 0u64;
        for line in reader.lines() {
            for word in line?.split_whitespace() {
                self.add(word)?;
                tokens += 1;
            }
        }
        tracing::debug!(tokens, words = self.len(), "parsed vocabulary input");
        Ok(tokens)
    }

    /// Drop every word seen fewer than `min_count` times.
    ///
    /// Entries are stably sorted by descending count first, so surviving ids
    /// are frequency ranks and equal counts keep their insertion order.
    /// Returns the number of entries removed.
    pub fn prune(&mut self, min_count: u32) -> usize {
        if min_count == 0 {
            return 0;
        }
        let before = self.entries.len();
        self.sort_by_count();
        let keep = self.entries.partition_point(|e| e.count >= min_count);
        self.entries.truncate(keep);
        self.rebuild_index();
        let removed = before - keep;
        tracing::info!(min_count, removed, kept = keep, "pruned vocabulary");
        removed
    }

    /// Fingerprint of the words and counts, used to pair saved models with
    /// the vocabulary they were trained on.
    pub fn fingerprint(&self) -> u32 {
        self.entries.iter().fold(FNV_OFFSET, |h, e| {
            let h = fnv1a_update(h, e.word.as_bytes());
            let h = fnv1a_update(h, &[0]);
            fnv1a_update(h, &e.count.to_le_bytes())
        })
    }

    /// Stable sort by descending count; invalidates codes and the index.
    fn sort_by_count(&mut self) {
        self.entries.sort_by(|a, b| b.count.cmp(&a.count));
        for e in &mut self.entries {
            e.code = 0;
            e.points.clear();
        }
        self.encoded = false;
    }

    /// Slot holding `word`, or the empty slot where it would be inserted.
    fn probe(&self, hash: u32, word: &str) -> usize {
        let mask = self.table.len() - 1;
        let mut i = hash as usize & mask;
        loop {
            match self.table[i] {
                None => return i,
                Some(id) => {
                    let e = &self.entries[id as usize];
                    if e.hash == hash && e.word == word {
                        return i;
                    }
                }
            }
            i = (i + 1) & mask;
        }
    }

    /// Rebuild the index from scratch against the current entries.
    fn rebuild_index(&mut self) {
        self.table.fill(None);
        let mask = self.table.len() - 1;
        for (id, e) in self.entries.iter().enumerate() {
            let mut i = e.hash as usize & mask;
            while self.table[i].is_some() {
                i = (i + 1) & mask;
            }
            self.table[i] = Some(id as u32);
        }
    }
}

impl<'a> IntoIterator for &'a Vocabulary {
    type Item = &'a VocabEntry;
    type IntoIter = std::slice::Iter<'a, VocabEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Vocabulary {
        Vocabulary::with_capacity(8).unwrap()
    }

    // --- add / find ---

    #[test]
    fn add_assigns_sequential_ids() {
        let mut v = small();
        assert_eq!(v.add("cat").unwrap(), 0);
        assert_eq!(v.add("dog").unwrap(), 1);
        assert_eq!(v.add("cat").unwrap(), 0);
        assert_eq!(v.len(), 2);
        assert_eq!(v.find("dog"), Some(1));
        assert_eq!(v.find("frog"), None);
    }

    #[test]
    fn counts_survive_interleaving() {
        let mut v = small();
        let words = ["a", "b", "c", "d", "e"];
        // word i is added i+1 times, interleaved round-robin
        for round in 0..5 {
            for (i, w) in words.iter().enumerate() {
                if round <= i {
                    v.add(w).unwrap();
                }
            }
        }
        for (i, w) in words.iter().enumerate() {
            let id = v.find(w).unwrap();
            assert_eq!(v.entry(id).unwrap().count, i as u32 + 1, "{w}");
        }
    }

    #[test]
    fn resize_preserves_entries() {
        let mut v = small();
        for i in 0..200 {
            for _ in 0..(i % 3 + 1) {
                v.add(&format!("w{i}")).unwrap();
            }
        }
        assert!(v.capacity() > 8);
        assert!(v.capacity().is_power_of_two());
        assert!((v.len() as f64) / (v.capacity() as f64) <= 0.7);
        for i in 0..200 {
            assert_eq!(v.count(&format!("w{i}")), i % 3 + 1);
        }
    }

    #[test]
    fn add_count_bulk_increments() {
        let mut v = small();
        v.add_count("x", 5).unwrap();
        v.add_count("x", 2).unwrap();
        v.add("x").unwrap();
        assert_eq!(v.count("x"), 8);
    }

    #[test]
    fn long_words_are_clipped_consistently() {
        let mut v = small();
        let long = "é".repeat(60); // 120 bytes
        v.add(&long).unwrap();
        let id = v.find(&long).unwrap();
        let stored = &v.entry(id).unwrap().word;
        assert!(stored.len() <= MAX_WORD_LENGTH);
        assert!(long.starts_with(stored.as_str()));
        assert_eq!(v.count(&long), 1);
    }

    #[test]
    fn parse_counts_tokens() {
        let mut v = small();
        let text = "the cat sat\non the  mat\n\n";
        let tokens = v.parse(text.as_bytes()).unwrap();
        assert_eq!(tokens, 6);
        assert_eq!(v.count("the"), 2);
        assert_eq!(v.count("mat"), 1);
        assert_eq!(v.len(), 5);
    }

    // --- prune ---

    #[test]
    fn prune_removes_exactly_rare_words() {
        let mut v = small();
        for (w, n) in [("a", 1), ("b", 5), ("c", 2), ("d", 3), ("e", 2)] {
            v.add_count(w, n).unwrap();
        }
        let removed = v.prune(2);
        assert_eq!(removed, 1);
        assert_eq!(v.find("a"), None);
        // Descending count; c before e (insertion order on ties).
        let words: Vec<_> = v.iter().map(|e| e.word.as_str()).collect();
        assert_eq!(words, ["b", "d", "c", "e"]);
        for w in ["b", "c", "d", "e"] {
            let id = v.find(w).unwrap();
            assert_eq!(v.entry(id).unwrap().word, w);
        }
        assert_eq!(v.count("b"), 5);
    }

    #[test]
    fn prune_zero_is_noop() {
        let mut v = small();
        v.add("a").unwrap();
        assert_eq!(v.prune(0), 0);
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn prune_everything() {
        let mut v = small();
        v.add("a").unwrap();
        v.add("b").unwrap();
        assert_eq!(v.prune(10), 2);
        assert!(v.is_empty());
        assert_eq!(v.find("a"), None);
        v.add("a").unwrap();
        assert_eq!(v.find("a"), Some(0));
    }

    // --- fingerprint ---

    #[test]
    fn fingerprint_tracks_words_and_counts() {
        let mut a = small();
        let mut b = small();
        a.add("x").unwrap();
        b.add("x").unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.add("x").unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
