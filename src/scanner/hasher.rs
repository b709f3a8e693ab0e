//! Streaming content hasher.
//!
//! Files are read in fixed-size chunks into a single reusable buffer, so memory
//! use per hash is bounded by the chunk size no matter how large the file is.

#![allow(missing_docs)]

use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::core::errors::{PsyncError, Result};

/// Default read chunk: 16 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Digest algorithms a manifest can be built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    #[default]
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    pub const ALL: [Self; 4] = [Self::Md5, Self::Sha1, Self::Sha256, Self::Sha512];

    /// Lowercase name as accepted on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Length of the hex digest this algorithm produces.
    #[must_use]
    pub const fn hex_len(self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha1 => 40,
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = PsyncError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|algo| algo.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| PsyncError::UnsupportedAlgorithm {
                name: wanted.to_string(),
            })
    }
}

impl TryFrom<String> for HashAlgorithm {
    type Error = PsyncError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<HashAlgorithm> for String {
    fn from(value: HashAlgorithm) -> Self {
        value.name().to_string()
    }
}

/// Computes hex digests of byte streams with one algorithm.
#[derive(Debug)]
pub struct ContentHasher {
    algorithm: HashAlgorithm,
    chunk_size: usize,
    buf: Vec<u8>,
}

impl ContentHasher {
    /// A zero chunk size is bumped to one byte.
    pub fn new(algorithm: HashAlgorithm, chunk_size: usize) -> Self {
        Self {
            algorithm,
            chunk_size: chunk_size.max(1),
            buf: Vec::new(),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Digest everything `reader` yields.
    pub fn digest_reader<R: Read>(&mut self, reader: R) -> std::io::Result<String> {
        if self.buf.len() != self.chunk_size {
            self.buf.resize(self.chunk_size, 0);
        }
        match self.algorithm {
            HashAlgorithm::Md5 => stream::<Md5, R>(reader, &mut self.buf),
            HashAlgorithm::Sha1 => stream::<Sha1, R>(reader, &mut self.buf),
            HashAlgorithm::Sha256 => stream::<Sha256, R>(reader, &mut self.buf),
            HashAlgorithm::Sha512 => stream::<Sha512, R>(reader, &mut self.buf),
        }
    }

    /// Digest the file at `path`.
    ///
    /// Any failure to open or read the file maps to `FileUnavailable`; the
    /// caller decides whether that means the file was deleted mid-run.
    pub fn digest_file(&mut self, path: &Path) -> Result<String> {
        let unavailable = |source| PsyncError::FileUnavailable {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(unavailable)?;
        self.digest_reader(file).map_err(unavailable)
    }
}

fn stream<D: Digest, R: Read>(mut reader: R, buf: &mut [u8]) -> std::io::Result<String> {
    let mut hasher = D::new();
    loop {
        let n = match reader.read(buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(to_hex(&hasher.finalize()))
}

/// Lowercase hex encoding.
pub fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
            let _ = write!(out, "{b:02x}");
            out
        })
}
