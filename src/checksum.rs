//! Content checksums for integrity checking
//!
//! Files are streamed through the selected hash in fixed-size chunks, so
//! memory use does not depend on file size. Digests are lowercase hex and
//! fully determined by (content, algorithm); the check diff relies on that.

use crate::error::{Error, Result};
use blake2::{Blake2b512, Digest};
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const CHUNK_SIZE: usize = 64 * 1024; // 64KB

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// BLAKE2b-512, the default
    #[default]
    Blake2b,
    /// Legacy MD5, kept for old baselines
    Md5,
    /// BLAKE3-256
    Blake3,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [Algorithm::Blake2b, Algorithm::Md5, Algorithm::Blake3];

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Blake2b => "blake2b",
            Algorithm::Md5 => "md5",
            Algorithm::Blake3 => "blake3",
        }
    }

    /// Length of the hex digest this algorithm produces
    pub fn hex_len(self) -> usize {
        match self {
            Algorithm::Blake2b => 128,
            Algorithm::Md5 => 32,
            Algorithm::Blake3 => 64,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Algorithm::ALL
            .into_iter()
            .find(|algo| algo.name() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Algorithm::ALL.iter().map(|a| a.name()).collect();
                Error::config(format!(
                    "unknown checksum algorithm '{}' (expected one of: {})",
                    s,
                    known.join(", ")
                ))
            })
    }
}

enum StreamHasher {
    Blake2b(Blake2b512),
    Md5(md5::Context),
    Blake3(Box<blake3::Hasher>),
}

impl StreamHasher {
    fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Blake2b => StreamHasher::Blake2b(Blake2b512::new()),
            Algorithm::Md5 => StreamHasher::Md5(md5::Context::new()),
            Algorithm::Blake3 => StreamHasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            StreamHasher::Blake2b(h) => h.update(bytes),
            StreamHasher::Md5(ctx) => ctx.consume(bytes),
            StreamHasher::Blake3(h) => {
                h.update(bytes);
            }
        }
    }

    fn finish_hex(self) -> String {
        match self {
            StreamHasher::Blake2b(h) => format!("{:x}", h.finalize()),
            StreamHasher::Md5(ctx) => format!("{:x}", ctx.compute()),
            StreamHasher::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// Compute the hex digest of everything `reader` yields.
pub fn digest_reader<R: Read>(mut reader: R, algorithm: Algorithm) -> std::io::Result<String> {
    let mut hasher = StreamHasher::new(algorithm);
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finish_hex())
}

/// Compute the digest of a file's content.
///
/// Fails with [`Error::Io`] when the file cannot be opened or a read fails
/// part way through; callers treat that as a per-file outcome.
pub fn compute_digest(path: &Path, algorithm: Algorithm) -> Result<String> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    digest_reader(file, algorithm).map_err(|e| Error::io(path, e))
}

/// Digest a batch of files on a fixed-size worker pool.
///
/// `workers == 0` uses one thread per CPU. Results come back in the same
/// order as `paths` regardless of completion order. `on_file` is called
/// from worker threads once each file has been processed.
pub fn digest_files<F>(
    paths: &[PathBuf],
    algorithm: Algorithm,
    workers: usize,
    on_file: F,
) -> Result<Vec<Result<String>>>
where
    F: Fn(&Path) + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("checkr-digest-{}", i))
        .build()
        .map_err(|e| Error::config(format!("failed to start checksum workers: {}", e)))?;

    let digests = pool.install(|| {
        paths
            .par_iter()
            .map(|path| {
                let digest = compute_digest(path, algorithm);
                on_file(path);
                digest
            })
            .collect()
    });

    Ok(digests)
}
