//! Vocabulary files: a header holding the entry count, then one fixed-size
//! record per entry.
//!
//! Record layout (little-endian, [`RECORD_LEN`] bytes):
//!
//! | bytes | field                                   |
//! |-------|-----------------------------------------|
//! | 4     | hash                                    |
//! | 4     | count                                   |
//! | 8     | code (0 when not encoded)               |
//! | 160   | 40 points, zero-padded                  |
//! | 80    | word, NUL-padded                        |

use std::io::{Read, Write};
use std::path::Path;

use embed_core::format::{self, FormatError, Header};
use embed_core::hash_word;

use crate::{MAX_CODE_LENGTH, MAX_WORD_LENGTH, VocabEntry, VocabError, Vocabulary};

/// File magic for vocabulary files.
pub const MAGIC: [u8; 4] = *b"VOCB";

const WORD_FIELD: usize = MAX_WORD_LENGTH + 1;

/// Size of one persisted entry.
pub const RECORD_LEN: usize = 4 + 4 + 8 + 4 * MAX_CODE_LENGTH + WORD_FIELD;

const FIELD_LEN: usize = 0;
const FIELD_ENCODED: usize = 1;

fn encode_record(e: &VocabEntry, out: &mut [u8; RECORD_LEN]) {
    out.fill(0);
    out[0..4].copy_from_slice(&e.hash.to_le_bytes());
    out[4..8].copy_from_slice(&e.count.to_le_bytes());
    out[8..16].copy_from_slice(&e.code.to_le_bytes());
    let points = &mut out[16..16 + 4 * MAX_CODE_LENGTH];
    for (chunk, p) in points.chunks_exact_mut(4).zip(&e.points) {
        chunk.copy_from_slice(&p.to_le_bytes());
    }
    let word = e.word.as_bytes();
    out[RECORD_LEN - WORD_FIELD..RECORD_LEN - WORD_FIELD + word.len()].copy_from_slice(word);
}

fn decode_record(buf: &[u8; RECORD_LEN], len: usize) -> Result<VocabEntry, FormatError> {
    let u32_at = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
    let hash = u32_at(0);
    let count = u32_at(4);
    let mut code = [0u8; 8];
    code.copy_from_slice(&buf[8..16]);
    let code = u64::from_le_bytes(code);

    let word_bytes = &buf[RECORD_LEN - WORD_FIELD..];
    let end = word_bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| FormatError::Corrupt("unterminated word".into()))?;
    let word = std::str::from_utf8(&word_bytes[..end])
        .map_err(|e| FormatError::Corrupt(e.to_string()))?
        .to_owned();
    if hash != hash_word(&word) {
        return Err(FormatError::Corrupt(format!("hash mismatch for {word:?}")));
    }

    let mut entry = VocabEntry::new(&word, hash, count);
    entry.code = code;
    let depth = entry.code_len();
    if depth > MAX_CODE_LENGTH {
        return Err(FormatError::Corrupt(format!("code of {depth} bits")));
    }
    entry.points = (0..depth).map(|d| u32_at(16 + 4 * d)).collect();
    if entry.points.iter().any(|&p| p as usize + 1 >= len) {
        return Err(FormatError::Corrupt(format!("point out of range for {word:?}")));
    }
    Ok(entry)
}

impl Vocabulary {
    /// Serialize to a writer.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), VocabError> {
        Header::new(MAGIC)
            .with_field(FIELD_LEN, self.entries.len() as u64)
            .with_field(FIELD_ENCODED, u64::from(self.encoded))
            .write(w)?;
        let mut buf = [0u8; RECORD_LEN];
        for e in &self.entries {
            encode_record(e, &mut buf);
            w.write_all(&buf)?;
        }
        Ok(())
    }

    /// Deserialize from a reader, rebuilding the index.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, VocabError> {
        let header = Header::read(r, MAGIC)?;
        let len = header.field_usize(FIELD_LEN)?;
        if len >= (u32::MAX / 2) as usize {
            return Err(FormatError::Corrupt(format!("{len} entries")).into());
        }

        // Smallest default-or-larger capacity keeping the load factor at 0.7.
        let mut cap = crate::DEFAULT_CAPACITY;
        while len as f64 > 0.7 * cap as f64 {
            cap = cap.checked_mul(4).ok_or(embed_core::AllocError::Overflow {
                len: cap,
                size: 4,
            })?;
        }
        let mut vocab = Self::with_capacity(cap)?;
        embed_core::reserve_pow2(&mut vocab.entries, len)?;

        let mut buf = [0u8; RECORD_LEN];
        for _ in 0..len {
            r.read_exact(&mut buf).map_err(FormatError::from)?;
            vocab.entries.push(decode_record(&buf, len)?);
        }
        vocab.rebuild_index();
        for (id, e) in vocab.entries.iter().enumerate() {
            if vocab.find(&e.word) != Some(id as u32) {
                return Err(FormatError::Corrupt(format!("duplicate word {:?}", e.word)).into());
            }
        }
        vocab.encoded = header.fields[FIELD_ENCODED] != 0
            && vocab.entries.iter().all(|e| e.code != 0);
        Ok(vocab)
    }

    /// Save to a file.
    pub fn save(&self, path: &Path) -> Result<(), VocabError> {
        let mut w = format::create(path)?;
        self.write_to(&mut w)?;
        w.flush()?;
        tracing::debug!(path = %path.display(), words = self.len(), "saved vocabulary");
        Ok(())
    }

    /// Load from a file.
    pub fn open(path: &Path) -> Result<Self, VocabError> {
        let mut r = format::open(path)?;
        let vocab = Self::read_from(&mut r)?;
        tracing::debug!(path = %path.display(), words = vocab.len(), "loaded vocabulary");
        Ok(vocab)
    }
}
