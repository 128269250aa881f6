//! Adler-32 checksum used for record header and payload integrity.
//!
//! The on-disk format fixes the exact variant: modulus 65521, initial state
//! `a = 1, b = 0`, bytes folded in order. The implementation below defers
//! the modulo across blocks of input; the result is bit-identical to the
//! byte-at-a-time definition.

const MOD_ADLER: u32 = 65521;

/// Largest number of bytes that can be summed before `b` can overflow a
/// `u32` (the standard zlib bound for deferred reduction).
const NMAX: usize = 5552;

/// Computes the Adler-32 checksum of `data`.
pub fn adler32(data: &[u8]) -> u32 {
    let mut a: u32 = 1;
    let mut b: u32 = 0;

    for chunk in data.chunks(NMAX) {
        for &byte in chunk {
            a += byte as u32;
            b += a;
        }
        a %= MOD_ADLER;
        b %= MOD_ADLER;
    }

    (b << 16) | a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_one() {
        assert_eq!(adler32(&[]), 1);
    }

    #[test]
    fn known_vectors() {
        // Reference values from the zlib definition.
        assert_eq!(adler32(b"Wikipedia"), 0x11E6_0398);
        assert_eq!(adler32(b"a"), 0x0062_0062);
        assert_eq!(adler32(b"abc"), 0x024D_0127);
    }

    #[test]
    fn deferred_reduction_matches_naive_loop() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i * 31 % 256) as u8).collect();

        let mut a: u32 = 1;
        let mut b: u32 = 0;
        for &byte in &data {
            a = (a + byte as u32) % MOD_ADLER;
            b = (b + a) % MOD_ADLER;
        }
        let naive = (b << 16) | a;

        assert_eq!(adler32(&data), naive);
    }

    #[test]
    fn sensitive_to_byte_order() {
        assert_ne!(adler32(b"ab"), adler32(b"ba"));
    }
}
