//! Choosing the prefix / suffix / value bit split.
//!
//! The table costs `2^P` 64-bit bucket boundaries plus `N (K - P + V)` packed
//! bits. Small `P` gives the densest table, larger `P` shorter binary searches.
//! With a budget we take the largest `P` that still fits; without one the
//! smallest table.

use crate::error::{LookupError, Result};
use crate::source::Histogram;

/// Bits per bucket boundary.
pub const POINTER_BITS: u64 = 64;

/// Operator-supplied planning inputs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlanRequest {
    /// K-mer width in bits (`2 * mer_size`).
    pub kmer_bits: u32,
    /// Smallest count kept; defaults to 1.
    pub min_value: Option<u64>,
    /// Largest count kept; defaults to (and is capped at) the histogram maximum.
    pub max_value: Option<u64>,
    /// Memory ceiling in bits; `None` means unlimited.
    pub memory_bits: Option<u64>,
    /// The prefix must cover at least the shard bits.
    pub min_prefix_bits: u32,
}

/// The chosen layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexPlan {
    pub kmer_bits: u32,
    pub prefix_bits: u32,
    pub suffix_bits: u32,
    pub value_bits: u32,
    pub min_value: u64,
    pub max_value: u64,
    /// Distinct k-mers the histogram says will be retained.
    pub n_kmers: u64,
    /// Estimated size of the chosen layout.
    pub total_bits: u128,
    /// Size of the smallest layout.
    pub min_total_bits: u128,
}

impl IndexPlan {
    /// Number of buckets, `2^prefix_bits`.
    pub fn bucket_count(&self) -> usize {
        1usize << self.prefix_bits
    }

    /// Stored form of an in-range count.
    #[inline]
    pub fn encode_value(&self, value: u64) -> u64 {
        value - (self.min_value - 1)
    }

    #[inline]
    pub fn decode_value(&self, stored: u64) -> u64 {
        stored + (self.min_value - 1)
    }
}

/// `ceil(log2(x))`, with `ceil_log2(0) == ceil_log2(1) == 0`.
pub fn ceil_log2(x: u128) -> u32 {
    if x <= 1 {
        0
    } else {
        128 - (x - 1).leading_zeros()
    }
}

/// Estimated size of a layout with `prefix_bits` of prefix.
pub fn table_bits(kmer_bits: u32, prefix_bits: u32, value_bits: u32, n_kmers: u64) -> u128 {
    let n = n_kmers as u128;
    (1u128 << prefix_bits) * POINTER_BITS as u128
        + n * (kmer_bits - prefix_bits) as u128
        + n * value_bits as u128
}

/// Pick the bit widths for `request` over `histogram`.
pub fn configure(request: &PlanRequest, histogram: &Histogram) -> Result<IndexPlan> {
    let kmer_bits = request.kmer_bits;
    if !(2..=64).contains(&kmer_bits) {
        return Err(LookupError::Config(format!(
            "k-mer width must be 2..=64 bits, got {kmer_bits}"
        )));
    }
    if request.min_prefix_bits >= kmer_bits {
        return Err(LookupError::Config(format!(
            "{} prefix bits needed for sharding leave no suffix in a {kmer_bits}-bit k-mer",
            request.min_prefix_bits
        )));
    }

    let min_value = request.min_value.unwrap_or(1).max(1);
    let hist_max = histogram.max_value().unwrap_or(0);
    let max_value = request.max_value.unwrap_or(hist_max).min(hist_max);

    let (n_kmers, value_bits) = if max_value < min_value {
        (0, 0)
    } else {
        (
            histogram.distinct_in(min_value, max_value),
            ceil_log2((max_value - min_value) as u128 + 2),
        )
    };

    let lower = request.min_prefix_bits.max(1);
    let upper = ceil_log2(32 * n_kmers as u128)
        .saturating_sub(1)
        .max(lower)
        .min(kmer_bits - 1);

    log::debug!(
        "planning {n_kmers} k-mers, values {min_value}..={max_value} in {value_bits} bits, prefix {lower}..={upper}"
    );

    let mut min_prefix = lower;
    let mut min_total = u128::MAX;
    let mut fit: Option<(u32, u128)> = None;

    for p in lower..=upper {
        let total = table_bits(kmer_bits, p, value_bits, n_kmers);
        log::debug!(
            "  prefix {p:2} suffix {:2}: {:>14} bits ({:.3} GB)",
            kmer_bits - p,
            total,
            total as f64 / 8.0 / 1024.0 / 1024.0 / 1024.0
        );
        if total < min_total {
            min_total = total;
            min_prefix = p;
        }
        if request.memory_bits.is_some_and(|budget| total <= budget as u128) {
            fit = Some((p, total));
        }
    }

    let (prefix_bits, total_bits) = match (request.memory_bits, fit) {
        (None, _) => (min_prefix, min_total),
        (Some(_), Some(best)) => best,
        (Some(budget), None) => {
            return Err(LookupError::InsufficientMemory {
                n_kmers,
                min_bits: min_total,
                budget_bits: budget,
            });
        }
    };

    let plan = IndexPlan {
        kmer_bits,
        prefix_bits,
        suffix_bits: kmer_bits - prefix_bits,
        value_bits,
        min_value,
        max_value,
        n_kmers,
        total_bits,
        min_total_bits: min_total,
    };
    log::info!(
        "lookup table: {} prefix bits, {} suffix bits, {} value bits; {:.3} GB for {} k-mers (smallest possible {:.3} GB)",
        plan.prefix_bits,
        plan.suffix_bits,
        plan.value_bits,
        total_bits as f64 / 8.0 / 1024.0 / 1024.0 / 1024.0,
        n_kmers,
        min_total as f64 / 8.0 / 1024.0 / 1024.0 / 1024.0
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kmer_bits: u32) -> PlanRequest {
        PlanRequest {
            kmer_bits,
            ..PlanRequest::default()
        }
    }

    #[test]
    fn ceil_log2_values() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(4), 2);
        assert_eq!(ceil_log2(5), 3);
        assert_eq!(ceil_log2(1 << 40), 40);
    }

    #[test]
    fn value_bits_cover_the_offset_range() {
        let h = Histogram::from_counts([1, 2, 3, 50]);
        let req = PlanRequest {
            min_value: Some(2),
            max_value: Some(50),
            ..request(8)
        };
        let plan = configure(&req, &h).unwrap();
        assert_eq!(plan.n_kmers, 3);
        // Stored values run 1..=49, which needs 6 bits.
        assert_eq!(plan.value_bits, 6);
        assert_eq!(plan.encode_value(50), 49);
        assert_eq!(plan.decode_value(49), 50);
    }

    #[test]
    fn defaults_and_clamps() {
        let h = Histogram::from_counts([4, 7, 9]);
        let plan = configure(
            &PlanRequest {
                min_value: Some(0),
                max_value: Some(u64::MAX),
                ..request(16)
            },
            &h,
        )
        .unwrap();
        assert_eq!(plan.min_value, 1);
        assert_eq!(plan.max_value, 9);
        assert_eq!(plan.n_kmers, 3);
    }

    #[test]
    fn empty_range_needs_no_value_bits() {
        let h = Histogram::from_counts([4, 7, 9]);
        let plan = configure(
            &PlanRequest {
                min_value: Some(20),
                ..request(16)
            },
            &h,
        )
        .unwrap();
        assert_eq!(plan.n_kmers, 0);
        assert_eq!(plan.value_bits, 0);
    }

    #[test]
    fn unlimited_budget_takes_the_smallest_table() {
        let h = Histogram::from_pairs([(1, 1_000_000)]);
        let plan = configure(&request(42), &h).unwrap();
        assert_eq!(plan.total_bits, plan.min_total_bits);
        for p in 1..=plan.kmer_bits - 1 {
            assert!(table_bits(42, p, plan.value_bits, plan.n_kmers) >= plan.min_total_bits);
        }
    }

    #[test]
    fn budget_buys_a_sparser_table() {
        let h = Histogram::from_pairs([(1, 1_000_000)]);
        let tight = configure(&request(42), &h).unwrap();
        let roomy = configure(
            &PlanRequest {
                memory_bits: Some((tight.min_total_bits * 4) as u64),
                ..request(42)
            },
            &h,
        )
        .unwrap();
        assert!(roomy.prefix_bits > tight.prefix_bits);
        assert!(roomy.total_bits <= tight.min_total_bits * 4);
    }

    #[test]
    fn one_bit_budget_fails() {
        let h = Histogram::from_pairs([(5, 1000)]);
        let err = configure(
            &PlanRequest {
                memory_bits: Some(1),
                ..request(42)
            },
            &h,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            LookupError::InsufficientMemory {
                n_kmers: 1000,
                budget_bits: 1,
                ..
            }
        ));
    }

    #[test]
    fn prefix_covers_the_shards() {
        let h = Histogram::from_pairs([(1, 4)]);
        let plan = configure(
            &PlanRequest {
                min_prefix_bits: 6,
                ..request(40)
            },
            &h,
        )
        .unwrap();
        assert!(plan.prefix_bits >= 6);
        assert!(configure(
            &PlanRequest {
                min_prefix_bits: 8,
                ..request(8)
            },
            &h
        )
        .is_err());
    }
}
