//! Error type shared by the whole library.
//!
//! Binaries wrap these in `anyhow` for reporting; library code returns
//! [`LookupError`] so callers can tell an infeasible memory budget (which they
//! may recover from by changing the filter or budget) apart from I/O failures.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors returned while planning, building or reading count data.
#[derive(Debug, Error)]
pub enum LookupError {
    /// I/O error with the offending path.
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Count file exists but is not in the expected layout.
    #[error("invalid count file '{}': {detail}", path.display())]
    Format { path: PathBuf, detail: String },

    /// Invalid parameters (mer size, shard layout, bit width).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No prefix width fits the memory budget.
    #[error(
        "not enough memory for {n_kmers} distinct k-mers: the smallest table needs {min_bits} bits, the budget is {budget_bits} bits"
    )]
    InsufficientMemory {
        n_kmers: u64,
        min_bits: u128,
        budget_bits: u64,
    },

    /// Packed storage could not be reserved.
    #[error("cannot allocate {bits} bits of packed storage")]
    Allocation { bits: u128 },

    /// A shard supplied a k-mer whose prefix belongs to another shard.
    #[error("shard {shard} supplied k-mer {kmer:#x} outside its prefix range")]
    ShardPartition { shard: usize, kmer: u64 },

    /// The same k-mer appeared twice.
    #[error("k-mer {kmer:#x} appears more than once in shard {shard}")]
    DuplicateKmer { shard: usize, kmer: u64 },

    /// The source returned different data on the second pass.
    #[error("shard {shard} changed between passes: counted {counted} k-mers, loaded {loaded}")]
    Inconsistent {
        shard: usize,
        counted: u64,
        loaded: u64,
    },

    /// A bucket received more k-mers on the second pass than were counted for it.
    #[error(
        "bucket {prefix:#x} of shard {shard} changed between passes: counted {counted} k-mers, loaded more"
    )]
    BucketOverflow {
        shard: usize,
        prefix: u64,
        counted: u64,
    },
}

impl LookupError {
    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        LookupError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn format(path: impl AsRef<Path>, detail: impl Into<String>) -> Self {
        LookupError::Format {
            path: path.as_ref().to_path_buf(),
            detail: detail.into(),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, LookupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_names_the_path() {
        let e = LookupError::io(
            "/data/shard-0003.kmc",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let msg = e.to_string();
        assert!(msg.contains("/data/shard-0003.kmc"));
        assert!(msg.contains("gone"));
    }

    #[test]
    fn insufficient_memory_message_is_actionable() {
        let e = LookupError::InsufficientMemory {
            n_kmers: 1000,
            min_bits: 20_000,
            budget_bits: 1,
        };
        assert!(e.to_string().starts_with("not enough memory for 1000 distinct k-mers"));
    }
}
