//! Synthetic payloads standing in for image data.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// One mebibyte, the unit payload sizes are given in on the command line.
pub const MEBIBYTE: usize = 1024 * 1024;

/// Returns `megabytes` MiB of random bytes.
#[must_use]
pub fn random_payload(megabytes: usize) -> Vec<u8> {
    random_bytes(megabytes * MEBIBYTE)
}

/// Returns `len` random bytes from the thread-local generator.
#[must_use]
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut payload = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut payload);
    payload
}

/// Returns `len` bytes from a generator seeded with `seed`.
///
/// Same seed, same bytes; used where both ends must agree on content.
#[must_use]
pub fn seeded_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut payload = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut payload);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_payload_size() {
        assert_eq!(random_payload(0).len(), 0);
        assert_eq!(random_payload(1).len(), MEBIBYTE);
    }

    #[test]
    fn test_seeded_bytes_deterministic() {
        assert_eq!(seeded_bytes(64, 7), seeded_bytes(64, 7));
        assert_ne!(seeded_bytes(64, 7), seeded_bytes(64, 8));
    }
}
