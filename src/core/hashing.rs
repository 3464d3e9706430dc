//! Content identity: SHA-1 digests of file bytes and display names.

use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Length of a hex-encoded SHA-1 digest.
pub const HASH_LEN: usize = 40;

/// Length of the shard key taken from the front of a digest.
pub const PREFIX_LEN: usize = 2;

const BLOCK_SIZE: usize = 1024 * 1024;

/// Hash a stream, reading at most `BLOCK_SIZE` bytes at a time.
pub fn hash_of<R: Read>(mut stream: R) -> std::io::Result<String> {
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; BLOCK_SIZE];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn hash_of_file(path: &Path) -> std::io::Result<String> {
    hash_of(File::open(path)?)
}

pub fn hash_of_string(text: &str) -> String {
    hex::encode(Sha1::digest(text.as_bytes()))
}

/// Shard key for a digest (its first two hex characters).
pub fn prefix_of(hash: &str) -> &str {
    &hash[..PREFIX_LEN.min(hash.len())]
}

pub fn is_hash(s: &str) -> bool {
    s.len() == HASH_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Split a link filename `hash+display_name` into its parts.
pub fn split_link_name(link: &str) -> Option<(&str, &str)> {
    if link.len() <= HASH_LEN || !link.is_char_boundary(HASH_LEN) {
        return None;
    }
    let (hash, name) = link.split_at(HASH_LEN);
    is_hash(hash).then_some((hash, name))
}
