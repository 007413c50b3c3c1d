//! OneDrive-compatible quickXorHash algorithm.
//!
//! Shared by the local filesystem adapter (hashing content before upload) and
//! the content store (verifying downloaded bytes against the inode's known
//! hash) so both sides of a sync agree on what "matches" means.
//!
//! The algorithm works on a 160-bit (20-byte) hash state. For each input
//! byte, it is XOR-ed into the state at the current *bit* position and the
//! position advances by 11 bits (mod 160). After processing all input bytes
//! the total length (as a little-endian `u64`) is XOR-ed into the first 8
//! bytes of the state. The final 20-byte result is Base64-encoded.

use base64::Engine;

use super::newtypes::FileHash;

struct QuickXorHash {
    data: [u8; 20],
    shift: usize,
    length: u64,
}

impl QuickXorHash {
    const WIDTH_BITS: usize = 160;
    const SHIFT_STEP: usize = 11;

    fn new() -> Self {
        Self {
            data: [0u8; 20],
            shift: 0,
            length: 0,
        }
    }

    fn update(&mut self, input: &[u8]) {
        for &byte in input {
            let byte_pos = self.shift / 8;
            let bit_offset = self.shift % 8;

            self.data[byte_pos % 20] ^= byte << bit_offset;
            if bit_offset > 0 {
                self.data[(byte_pos + 1) % 20] ^= byte >> (8 - bit_offset);
            }

            self.shift = (self.shift + Self::SHIFT_STEP) % Self::WIDTH_BITS;
        }
        self.length += input.len() as u64;
    }

    fn finalize(mut self) -> [u8; 20] {
        let length_bytes = self.length.to_le_bytes();
        for (i, &lb) in length_bytes.iter().enumerate() {
            self.data[i] ^= lb;
        }
        self.data
    }
}

/// Computes the quickXorHash of `data`, Base64-encoded, as a [`FileHash`].
#[must_use]
pub fn quick_xor_hash(data: &[u8]) -> FileHash {
    let mut hasher = QuickXorHash::new();
    hasher.update(data);
    let bytes = hasher.finalize();
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    // The hasher always produces a valid 20-byte/28-char Base64 value.
    FileHash::new(encoded).expect("quickXorHash output is always valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_is_all_zero_length_xored() {
        let hash = quick_xor_hash(b"");
        // Length 0 XORed into an all-zero state leaves it all-zero.
        assert_eq!(hash.as_str(), "AAAAAAAAAAAAAAAAAAAAAAAAAAA=");
    }

    #[test]
    fn test_same_input_produces_same_hash() {
        let a = quick_xor_hash(b"hello world");
        let b = quick_xor_hash(b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_input_produces_different_hash() {
        let a = quick_xor_hash(b"hello world");
        let b = quick_xor_hash(b"hello world!");
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_is_sensitive_to_byte_order() {
        let a = quick_xor_hash(b"ab");
        let b = quick_xor_hash(b"ba");
        assert_ne!(a, b);
    }
}
