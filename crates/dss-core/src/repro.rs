// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

/// Seed used when a configuration does not name one.
pub const DEFAULT_SEED: u64 = 42;

/// Derives an independent, stable sub-seed for a named consumer.
///
/// The same `(base, stream, index)` always gives the same seed, so CV splits,
/// HPO candidates and model initialization stay reproducible while not
/// sharing one random sequence.
pub fn derive_seed(base: u64, stream: &str, index: u64) -> u64 {
    let mut state = splitmix64(base);
    for byte in stream.bytes() {
        state = splitmix64(state ^ u64::from(byte));
    }
    splitmix64(state ^ index)
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::derive_seed;

    #[test]
    fn derive_seed_is_stable() {
        assert_eq!(derive_seed(42, "cv", 0), derive_seed(42, "cv", 0));
    }

    #[test]
    fn derive_seed_separates_streams_and_indices() {
        let a = derive_seed(42, "cv", 0);
        assert_ne!(a, derive_seed(42, "hpo", 0));
        assert_ne!(a, derive_seed(42, "cv", 1));
        assert_ne!(a, derive_seed(43, "cv", 0));
    }
}
