//! # Band Index
//!
//! Hamming-distance neighbourhood lookups without comparing every pair.
//!
//! ## How It Works
//! 1. Split each 64-bit hash into 4 bands of 16 bits
//! 2. If two hashes differ in at most `d` bits, at least one band differs
//!    in at most `d / 4` bits (pigeonhole)
//! 3. For each query band, enumerate every 16-bit value within that radius
//!    and look those values up
//! 4. Filter the candidates by exact distance
//!
//! Recall is exact: every hash within `d` is a candidate. For the default
//! threshold of 8 a query touches 4 x 137 band values.
//!
//! The same lookup runs against SQLite (indexed `band0..band3` columns) for
//! incremental queries and against [`BandIndex`] in memory for full
//! recomputes.

use crate::core::hasher::{PerceptualHash, BAND_COUNT};
use std::collections::HashMap;

/// Above this many values per band, a linear scan beats the lookups
pub const MAX_ENUMERATED_VALUES: usize = 4096;

/// Radius each band must be searched with for a total distance bound
pub fn band_radius(max_distance: u32) -> u32 {
    max_distance / BAND_COUNT as u32
}

/// Number of 16-bit values within `radius` bits of any value
pub fn neighbourhood_size(radius: u32) -> usize {
    (0..=radius.min(16)).map(|k| binomial(16, k)).sum()
}

/// Whether enumerating band values is worthwhile for this bound
pub fn use_band_lookup(max_distance: u32) -> bool {
    neighbourhood_size(band_radius(max_distance)) <= MAX_ENUMERATED_VALUES
}

/// Every 16-bit value within `radius` bits of `value`, including itself
pub fn values_within(value: u16, radius: u32) -> Vec<u16> {
    let radius = radius.min(16);
    let mut out = Vec::with_capacity(neighbourhood_size(radius));
    flip_bits(value, 0, radius, &mut out);
    out
}

fn flip_bits(value: u16, from_bit: u32, remaining: u32, out: &mut Vec<u16>) {
    out.push(value);
    if remaining == 0 {
        return;
    }
    for bit in from_bit..16 {
        flip_bits(value ^ (1 << bit), bit + 1, remaining - 1, out);
    }
}

fn binomial(n: u32, k: u32) -> usize {
    let mut result = 1usize;
    for i in 0..k {
        result = result * (n - i) as usize / (i + 1) as usize;
    }
    result
}

/// In-memory band tables over a fixed set of hashes
pub struct BandIndex {
    /// Band tables: band -> (band value -> positions in `entries`)
    tables: Vec<HashMap<u16, Vec<usize>>>,
    entries: Vec<(i64, PerceptualHash)>,
}

impl BandIndex {
    /// Build an index from `(id, hash)` pairs
    pub fn build(entries: Vec<(i64, PerceptualHash)>) -> Self {
        let mut tables: Vec<HashMap<u16, Vec<usize>>> = vec![HashMap::new(); BAND_COUNT];
        for (pos, (_, hash)) in entries.iter().enumerate() {
            for (band, value) in hash.bands().into_iter().enumerate() {
                tables[band].entry(value).or_default().push(pos);
            }
        }
        Self { tables, entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(i64, PerceptualHash)] {
        &self.entries
    }

    /// Ids whose hash is within `max_distance` of `hash`
    pub fn neighbours(&self, hash: PerceptualHash, max_distance: u32) -> Vec<i64> {
        let mut hits: Vec<i64> = if use_band_lookup(max_distance) {
            let radius = band_radius(max_distance);
            let mut positions: Vec<usize> = Vec::new();
            for (band, value) in hash.bands().into_iter().enumerate() {
                for near in values_within(value, radius) {
                    if let Some(found) = self.tables[band].get(&near) {
                        positions.extend_from_slice(found);
                    }
                }
            }
            positions.sort_unstable();
            positions.dedup();
            positions
                .into_iter()
                .map(|pos| self.entries[pos])
                .filter(|(_, other)| hash.distance(other) <= max_distance)
                .map(|(id, _)| id)
                .collect()
        } else {
            self.entries
                .iter()
                .filter(|(_, other)| hash.distance(other) <= max_distance)
                .map(|(id, _)| *id)
                .collect()
        };
        hits.sort_unstable();
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumeration_sizes_match_binomial_sums() {
        assert_eq!(values_within(0, 0), vec![0]);
        assert_eq!(values_within(0xABCD, 1).len(), 17);
        assert_eq!(values_within(0xABCD, 2).len(), 137);
        assert_eq!(neighbourhood_size(2), 137);
    }

    #[test]
    fn enumerated_values_are_unique_and_in_radius() {
        let mut values = values_within(0x0F0F, 2);
        assert!(values.iter().all(|v| (v ^ 0x0F0F).count_ones() <= 2));
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), 137);
    }

    #[test]
    fn large_bounds_fall_back_to_scanning() {
        assert!(use_band_lookup(8));
        assert!(use_band_lookup(15));
        assert!(!use_band_lookup(40));
    }

    #[test]
    fn finds_every_hash_within_bound() {
        let base = 0x1234_5678_9ABC_DEF0u64;
        // Eight flipped bits spread over all bands
        let spread = base ^ 0x0003_0003_0003_0003;
        // Eight flipped bits in one band
        let packed = base ^ 0x00FF_0000_0000_0000;
        let far = !base;

        let index = BandIndex::build(vec![
            (1, PerceptualHash(base)),
            (2, PerceptualHash(spread)),
            (3, PerceptualHash(packed)),
            (4, PerceptualHash(far)),
        ]);

        assert_eq!(index.neighbours(PerceptualHash(base), 8), vec![1, 2, 3]);
        assert_eq!(index.neighbours(PerceptualHash(base), 7), vec![1]);
    }

    #[test]
    fn brute_force_and_band_lookup_agree() {
        let hashes: Vec<(i64, PerceptualHash)> = (0..200u64)
            .map(|i| {
                let h = i.wrapping_mul(0x9E37_79B9_7F4A_7C15);
                (i as i64, PerceptualHash(h))
            })
            .collect();
        let index = BandIndex::build(hashes.clone());

        for (_, query) in hashes.iter().take(20) {
            let expected: Vec<i64> = hashes
                .iter()
                .filter(|(_, h)| query.distance(h) <= 12)
                .map(|(id, _)| *id)
                .collect();
            assert_eq!(index.neighbours(*query, 12), expected);
        }
    }
}
