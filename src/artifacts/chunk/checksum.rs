//! Hashing writer for index files
//!
//! Every byte that goes into an index file also goes into a running SHA-1; closing the
//! writer appends that digest. The digest doubles as the file's identity (commit-graph
//! layers and reverse indexes are named after it).

use crate::artifacts::chunk::CHECKSUM_SIZE;
use crate::artifacts::objects::object_id::ObjectId;
use sha1::{Digest, Sha1};
use std::io::{self, Write};

pub struct Checksum<W: Write> {
    inner: W,
    digest: Sha1,
    written: u64,
}

impl<W: Write> Checksum<W> {
    pub fn new(inner: W) -> Self {
        Checksum {
            inner,
            digest: Sha1::new(),
            written: 0,
        }
    }

    /// Number of bytes written so far, checksum excluded
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Append the digest of everything written, flush, and hand back the sink
    pub fn write_checksum(mut self) -> io::Result<(W, ObjectId)> {
        let digest = self.digest.finalize_reset();
        self.inner.write_all(&digest)?;
        self.inner.flush()?;

        let mut raw = [0u8; CHECKSUM_SIZE];
        raw.copy_from_slice(&digest);
        Ok((self.inner, ObjectId::from_raw(raw)))
    }
}

impl<W: Write> Write for Checksum<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.digest.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Hash stored in the last bytes of a file
pub fn stored_checksum(data: &[u8]) -> Option<ObjectId> {
    let start = data.len().checked_sub(CHECKSUM_SIZE)?;
    let mut raw = [0u8; CHECKSUM_SIZE];
    raw.copy_from_slice(&data[start..]);
    Some(ObjectId::from_raw(raw))
}

/// Check the trailing hash of a whole file against its content
pub fn verify(data: &[u8]) -> bool {
    let Some(stored) = stored_checksum(data) else {
        return false;
    };

    let actual = Sha1::digest(&data[..data.len() - CHECKSUM_SIZE]);
    actual.as_slice() == stored.as_bytes()
}
