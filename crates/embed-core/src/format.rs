//! Checksummed binary container.
//!
//! Every persisted file starts with a fixed 64-byte [`Header`]:
//!
//! | offset | size | content                                   |
//! |--------|------|-------------------------------------------|
//! | 0      | 4    | magic identifying the file kind           |
//! | 4      | 4    | FNV-1a checksum over the field bytes      |
//! | 8      | 56   | seven little-endian `u64` size fields     |
//!
//! The payload that follows is raw little-endian data whose layout is owned
//! by the component writing it. Readers validate magic and checksum before
//! touching the payload, and a short read anywhere is reported as
//! [`FormatError::Truncated`].

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use thiserror::Error;

use crate::{fnv1a, AllocError};

/// Number of size fields carried by a header.
pub const FIELD_COUNT: usize = 7;

/// Encoded header length in bytes.
pub const HEADER_LEN: usize = 8 + FIELD_COUNT * 8;

/// Elements converted per chunk when streaming numeric buffers.
const CHUNK: usize = 4096;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("i/o error: {0}")]
    Io(io::Error),
    #[error("file is truncated")]
    Truncated,
    #[error("bad magic: expected {expected:?}, found {found:?}")]
    BadMagic { expected: [u8; 4], found: [u8; 4] },
    #[error("header checksum mismatch: expected {expected:#010x}, found {found:#010x}")]
    ChecksumMismatch { expected: u32, found: u32 },
    #[error("corrupt data: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Alloc(#[from] AllocError),
}

impl From<io::Error> for FormatError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            FormatError::Truncated
        } else {
            FormatError::Io(e)
        }
    }
}

/// Fixed-size file header: magic, checksum and size fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 4],
    pub fields: [u64; FIELD_COUNT],
}

impl Header {
    /// A header of the given kind with all fields zero.
    pub const fn new(magic: [u8; 4]) -> Self {
        Header {
            magic,
            fields: [0; FIELD_COUNT],
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, index: usize, value: u64) -> Self {
        self.fields[index] = value;
        self
    }

    /// Read a field as `usize`, rejecting values the platform cannot index.
    pub fn field_usize(&self, index: usize) -> Result<usize, FormatError> {
        usize::try_from(self.fields[index])
            .map_err(|_| FormatError::Corrupt(format!("field {index} out of range")))
    }

    fn field_bytes(&self) -> [u8; FIELD_COUNT * 8] {
        let mut out = [0u8; FIELD_COUNT * 8];
        for (chunk, field) in out.chunks_exact_mut(8).zip(self.fields.iter()) {
            chunk.copy_from_slice(&field.to_le_bytes());
        }
        out
    }

    /// Checksum over the size fields.
    pub fn checksum(&self) -> u32 {
        fnv1a(&self.field_bytes())
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), FormatError> {
        w.write_all(&self.magic)?;
        w.write_all(&self.checksum().to_le_bytes())?;
        w.write_all(&self.field_bytes())?;
        Ok(())
    }

    /// Read and validate a header, expecting the given magic.
    pub fn read<R: Read>(r: &mut R, expected: [u8; 4]) -> Result<Self, FormatError> {
        let mut buf = [0u8; HEADER_LEN];
        r.read_exact(&mut buf)?;

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        if magic != expected {
            return Err(FormatError::BadMagic {
                expected,
                found: magic,
            });
        }

        let stored = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let mut fields = [0u64; FIELD_COUNT];
        for (field, chunk) in fields.iter_mut().zip(buf[8..].chunks_exact(8)) {
            let mut b = [0u8; 8];
            b.copy_from_slice(chunk);
            *field = u64::from_le_bytes(b);
        }

        let header = Header { magic, fields };
        let computed = header.checksum();
        if computed != stored {
            return Err(FormatError::ChecksumMismatch {
                expected: computed,
                found: stored,
            });
        }
        Ok(header)
    }
}

/// Create (truncating) a file for buffered writing.
pub fn create(path: &Path) -> Result<BufWriter<File>, FormatError> {
    Ok(BufWriter::new(File::create(path)?))
}

/// Open a file for buffered reading.
pub fn open(path: &Path) -> Result<BufReader<File>, FormatError> {
    Ok(BufReader::new(File::open(path)?))
}

pub fn write_u32<W: Write>(w: &mut W, v: u32) -> Result<(), FormatError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn read_u32<R: Read>(r: &mut R) -> Result<u32, FormatError> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

pub fn write_u64<W: Write>(w: &mut W, v: u64) -> Result<(), FormatError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn read_u64<R: Read>(r: &mut R) -> Result<u64, FormatError> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

pub fn write_u32s<W: Write>(w: &mut W, values: &[u32]) -> Result<(), FormatError> {
    let mut buf = Vec::with_capacity(CHUNK.min(values.len()) * 4);
    for chunk in values.chunks(CHUNK) {
        buf.clear();
        for v in chunk {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        w.write_all(&buf)?;
    }
    Ok(())
}

/// Fill `out` from the stream. Fails with `Truncated` on a short read.
pub fn read_u32s_into<R: Read>(r: &mut R, out: &mut [u32]) -> Result<(), FormatError> {
    let mut buf = vec![0u8; CHUNK.min(out.len()) * 4];
    for chunk in out.chunks_mut(CHUNK) {
        let bytes = &mut buf[..chunk.len() * 4];
        r.read_exact(bytes)?;
        for (v, b) in chunk.iter_mut().zip(bytes.chunks_exact(4)) {
            *v = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        }
    }
    Ok(())
}

pub fn write_f32s<W: Write>(w: &mut W, values: &[f32]) -> Result<(), FormatError> {
    let mut buf = Vec::with_capacity(CHUNK.min(values.len()) * 4);
    for chunk in values.chunks(CHUNK) {
        buf.clear();
        for v in chunk {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        w.write_all(&buf)?;
    }
    Ok(())
}

/// Fill `out` from the stream. Fails with `Truncated` on a short read.
pub fn read_f32s_into<R: Read>(r: &mut R, out: &mut [f32]) -> Result<(), FormatError> {
    let mut buf = vec![0u8; CHUNK.min(out.len()) * 4];
    for chunk in out.chunks_mut(CHUNK) {
        let bytes = &mut buf[..chunk.len() * 4];
        r.read_exact(bytes)?;
        for (v, b) in chunk.iter_mut().zip(bytes.chunks_exact(4)) {
            *v = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        }
    }
    Ok(())
}

/// Write a `u64` length prefix followed by the string bytes.
pub fn write_str<W: Write>(w: &mut W, s: &str) -> Result<(), FormatError> {
    write_u64(w, s.len() as u64)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

/// Read a length-prefixed string no longer than `max` bytes.
pub fn read_str<R: Read>(r: &mut R, max: usize) -> Result<String, FormatError> {
    let len = read_u64(r)?;
    if len > max as u64 {
        return Err(FormatError::Corrupt(format!(
            "string of {len} bytes exceeds limit {max}"
        )));
    }
    let mut bytes = vec![0u8; len as usize];
    r.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| FormatError::Corrupt(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const MAGIC: [u8; 4] = *b"TEST";

    fn sample_header() -> Header {
        Header::new(MAGIC).with_field(0, 42).with_field(3, u64::MAX)
    }

    #[test]
    fn header_roundtrip() {
        let header = sample_header();
        let mut bytes = Vec::new();
        header.write(&mut bytes).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);

        let back = Header::read(&mut Cursor::new(bytes), MAGIC).unwrap();
        assert_eq!(back, header);
        assert_eq!(back.field_usize(0).unwrap(), 42);
    }

    #[test]
    fn header_checksum_mismatch_is_rejected() {
        let mut bytes = Vec::new();
        sample_header().write(&mut bytes).unwrap();
        // Flip a bit inside field 0.
        bytes[8] ^= 0x01;
        let err = Header::read(&mut Cursor::new(bytes), MAGIC).unwrap_err();
        assert!(matches!(err, FormatError::ChecksumMismatch { .. }));
    }

    #[test]
    fn header_wrong_magic_is_rejected() {
        let mut bytes = Vec::new();
        sample_header().write(&mut bytes).unwrap();
        let err = Header::read(&mut Cursor::new(bytes), *b"NOPE").unwrap_err();
        assert!(matches!(err, FormatError::BadMagic { .. }));
    }

    #[test]
    fn header_short_read_is_truncated() {
        let mut bytes = Vec::new();
        sample_header().write(&mut bytes).unwrap();
        bytes.truncate(20);
        let err = Header::read(&mut Cursor::new(bytes), MAGIC).unwrap_err();
        assert!(matches!(err, FormatError::Truncated));
    }

    #[test]
    fn f32_buffer_roundtrip_is_bit_exact() {
        let values: Vec<f32> = (0..10_000).map(|i| (i as f32).sin() * 1e-3).collect();
        let mut bytes = Vec::new();
        write_f32s(&mut bytes, &values).unwrap();
        assert_eq!(bytes.len(), values.len() * 4);

        let mut back = vec![0.0f32; values.len()];
        read_f32s_into(&mut Cursor::new(bytes), &mut back).unwrap();
        let a: Vec<u32> = values.iter().map(|v| v.to_bits()).collect();
        let b: Vec<u32> = back.iter().map(|v| v.to_bits()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn u32_buffer_short_read_is_truncated() {
        let mut bytes = Vec::new();
        write_u32s(&mut bytes, &[1, 2, 3]).unwrap();
        let mut back = [0u32; 4];
        let err = read_u32s_into(&mut Cursor::new(bytes), &mut back).unwrap_err();
        assert!(matches!(err, FormatError::Truncated));
    }

    #[test]
    fn string_roundtrip_and_limit() {
        let mut bytes = Vec::new();
        write_str(&mut bytes, "giraffe").unwrap();
        assert_eq!(read_str(&mut Cursor::new(&bytes), 80).unwrap(), "giraffe");
        let err = read_str(&mut Cursor::new(&bytes), 3).unwrap_err();
        assert!(matches!(err, FormatError::Corrupt(_)));
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("header.bin");
        {
            let mut w = create(&path).unwrap();
            sample_header().write(&mut w).unwrap();
            write_u32(&mut w, 7).unwrap();
            w.flush().unwrap();
        }
        let mut r = open(&path).unwrap();
        assert_eq!(Header::read(&mut r, MAGIC).unwrap(), sample_header());
        assert_eq!(read_u32(&mut r).unwrap(), 7);
    }
}
