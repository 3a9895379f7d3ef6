//! Exact k-mer count lookup with a memory-budgeted, bit-packed layout.
//!
//! K-mers are split into a bucket-selecting prefix and a stored suffix. The
//! prefix width is chosen from the count histogram so the whole table fits an
//! operator-supplied memory budget ([`planner::configure`]). The table is
//! built in two parallel passes over a sharded count source ([`LookupBuilder`])
//! and is read-only afterwards: [`ExactLookup::exists`] and
//! [`ExactLookup::value`] answer by binary search within one bucket.
//!
//! ```no_run
//! use kmer_exact_lookup::{BuildConfig, ExactLookup, ShardedCountFiles, encode_kmer};
//!
//! let counts = ShardedCountFiles::open("reads.counts")?;
//! let lookup = ExactLookup::build(&counts, BuildConfig::default().min_value(2).memory_gb(4.0))?;
//! let kmer = encode_kmer(b"ACGTACGTACGTACGTACGTA").unwrap();
//! println!("{:?}", lookup.value(kmer));
//! # Ok::<(), kmer_exact_lookup::LookupError>(())
//! ```

mod buckets;
mod builder;
pub mod encode;
mod error;
mod index;
mod io;
pub mod logging;
mod packed;
pub mod planner;
mod radix;
pub mod report;
mod source;

pub use buckets::{BucketCounts, BucketOffsets};
pub use builder::{BuildConfig, LookupBuilder, ShardCounts, ShardStats, TableStorage};
pub use encode::{canonical, decode_kmer, encode_kmer, revcomp};
pub use error::{LookupError, Result};
pub use index::ExactLookup;
pub use io::{CountFileWriter, IndexHeader, ShardFile, ShardedCountFiles};
pub use packed::{BitPackedArray, DEFAULT_BLOCK_BYTES};
pub use planner::IndexPlan;
pub use source::{CountBlock, CountSource, Histogram, MemoryCounts, MemoryShard, ShardReader};
