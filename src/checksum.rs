//! Post-hoc content digests (BLAKE3).
//!
//! Reporting only: nothing in the protocol depends on these values.  Both
//! ends print the digest so a user can compare them by eye.

use std::io::{self, Write};

/// Hex-encoded BLAKE3 digest of `data`.
pub fn hex_digest(data: &[u8]) -> String {
    hex::encode(blake3::hash(data).as_bytes())
}

/// A sink that hashes everything written through it.
///
/// Wraps the receiver's output so the digest is computed over exactly the
/// bytes that reached the sink, in order, without reading the file back.
#[derive(Debug)]
pub struct HashingWriter<W> {
    inner: W,
    hasher: blake3::Hasher,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
        }
    }

    /// Hex digest of the bytes written so far.
    pub fn hex_digest(&self) -> String {
        hex::encode(self.hasher.finalize().as_bytes())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
