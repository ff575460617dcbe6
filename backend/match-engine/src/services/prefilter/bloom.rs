use crate::models::FeatureCode;
use serde::{Deserialize, Serialize};

/// Bloom signature of a job's feature set
///
/// A pure function of the feature codes and the (bits, hashes) parameters:
/// `may_contain` is always true for an inserted code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureBloom {
    bits: Vec<u64>,
    hashes: u32,
}

impl FeatureBloom {
    /// `bit_count` is rounded up to a whole number of 64-bit words
    pub fn new(bit_count: usize, hashes: u32) -> Self {
        let words = bit_count.div_ceil(64).max(1);
        Self {
            bits: vec![0; words],
            hashes: hashes.max(1),
        }
    }

    pub fn from_codes(codes: &[FeatureCode], bit_count: usize, hashes: u32) -> Self {
        let mut bloom = Self::new(bit_count, hashes);
        for &code in codes {
            bloom.insert(code);
        }
        bloom
    }

    pub fn insert(&mut self, code: FeatureCode) {
        let m = self.bit_count() as u64;
        for pos in probe(code, self.hashes, m) {
            self.bits[(pos / 64) as usize] |= 1 << (pos % 64);
        }
    }

    /// `false` means the code is definitely absent
    pub fn may_contain(&self, code: FeatureCode) -> bool {
        let m = self.bit_count() as u64;
        probe(code, self.hashes, m).all(|pos| self.bits[(pos / 64) as usize] & (1 << (pos % 64)) != 0)
    }

    /// True when any of `codes` may be present
    pub fn may_contain_any(&self, codes: &[FeatureCode]) -> bool {
        codes.iter().any(|&code| self.may_contain(code))
    }

    pub fn bit_count(&self) -> usize {
        self.bits.len() * 64
    }

    pub fn hashes(&self) -> u32 {
        self.hashes
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|word| *word == 0)
    }
}

/// Double hashing: position_i = h1 + i * h2 (mod m)
fn probe(code: FeatureCode, hashes: u32, m: u64) -> impl Iterator<Item = u64> {
    let h1 = mix64(code as u64);
    let h2 = mix64(h1 ^ 0x9e37_79b9_7f4a_7c15) | 1;
    (0..hashes as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % m)
}

/// splitmix64 finalizer
fn mix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}
