//! Extraction fingerprint shared by the graph and restriction artifacts

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Bumped whenever either artifact layout changes
pub const FORMAT_TAG: &[u8] = b"butterfly-extract/v1";

pub type Fingerprint = [u8; 32];

/// SHA-256 of a file's contents
pub fn hash_file(path: &Path) -> io::Result<[u8; 32]> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// Combine the format tag with the input and profile digests
pub fn combine(input_sha: &[u8; 32], profile_sha: &[u8; 32]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(FORMAT_TAG);
    hasher.update(input_sha);
    hasher.update(profile_sha);
    hasher.finalize().into()
}

pub fn compute(input: &Path, profile: &Path) -> io::Result<Fingerprint> {
    Ok(combine(&hash_file(input)?, &hash_file(profile)?))
}

/// Short hex form for log lines
pub fn short(fingerprint: &Fingerprint) -> String {
    hex::encode(&fingerprint[..8])
}
