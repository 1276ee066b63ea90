//! Content fingerprint used to tell translation inputs apart.

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the SHA-256 digest.
pub const FINGERPRINT_LEN: usize = 16;

/// Fingerprint an ordered paragraph sequence.
///
/// Paragraphs are joined with `\n` before hashing, so order and whitespace are
/// significant. The digest is truncated: this discriminates cache inputs, it is
/// not a security primitive.
pub fn hash_paragraphs<S: AsRef<str>>(paragraphs: &[S]) -> String {
    let mut hasher = Sha256::new();
    for (index, paragraph) in paragraphs.iter().enumerate() {
        if index > 0 {
            hasher.update(b"\n");
        }
        hasher.update(paragraph.as_ref().as_bytes());
    }
    let mut encoded = hex::encode(hasher.finalize());
    encoded.truncate(FINGERPRINT_LEN);
    encoded
}
