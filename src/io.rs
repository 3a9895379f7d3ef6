//! On-disk sharded count files.
//!
//! A count directory holds one index file and one file per shard. All integers
//! are little-endian.
//!
//! `counts.idx`:
//! ```text
//! magic u32 | version u32 | mer_size u32 | shard_bits u32 | block_bits u32
//! hist_len u64 | hist_len × (value u64, occurrences u64)
//! ```
//!
//! `shard-NNNN.kmc`:
//! ```text
//! magic u32 | version u32 | shard u32
//! blocks: tag u32 | prefix u64 | suffix_bits u32 | n u32 | n × suffix u64 | n × value u64
//! ```
//! A shard ends at a clean end-of-file where the next block tag would start.

use byteorder::{ByteOrder, LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{LookupError, Result};
use crate::source::{
    CountBlock, CountSource, DEFAULT_BLOCK_BITS, Histogram, ShardReader, check_layout,
    partition_counts,
};

pub const INDEX_MAGIC: u32 = 0x31_43_4D_4B; // "KMC1"
pub const SHARD_MAGIC: u32 = 0x31_53_4D_4B; // "KMS1"
pub const BLOCK_TAG: u32 = 0x31_4B_4C_42; // "BLK1"
pub const FORMAT_VERSION: u32 = 1;

const INDEX_FILE: &str = "counts.idx";

/// Bytes per block entry: one suffix and one value.
const ENTRY_BYTES: u64 = 16;

/// Path of shard `shard` inside `dir`.
pub fn shard_path(dir: &Path, shard: usize) -> PathBuf {
    dir.join(format!("shard-{shard:04}.kmc"))
}

/// Contents of `counts.idx`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexHeader {
    pub mer_size: u32,
    pub shard_bits: u32,
    pub block_bits: u32,
    pub histogram: Histogram,
}

impl IndexHeader {
    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u32::<LE>(INDEX_MAGIC)?;
        w.write_u32::<LE>(FORMAT_VERSION)?;
        w.write_u32::<LE>(self.mer_size)?;
        w.write_u32::<LE>(self.shard_bits)?;
        w.write_u32::<LE>(self.block_bits)?;
        w.write_u64::<LE>(self.histogram.len() as u64)?;
        for (value, occ) in self.histogram.iter() {
            w.write_u64::<LE>(value)?;
            w.write_u64::<LE>(occ)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R, path: &Path) -> Result<Self> {
        let io = |e| LookupError::io(path, e);

        let magic = r.read_u32::<LE>().map_err(io)?;
        if magic != INDEX_MAGIC {
            return Err(LookupError::format(path, "bad magic"));
        }
        let version = r.read_u32::<LE>().map_err(io)?;
        if version != FORMAT_VERSION {
            return Err(LookupError::format(path, format!("unsupported version {version}")));
        }
        let mer_size = r.read_u32::<LE>().map_err(io)?;
        let shard_bits = r.read_u32::<LE>().map_err(io)?;
        let block_bits = r.read_u32::<LE>().map_err(io)?;
        let hist_len = r.read_u64::<LE>().map_err(io)?;

        let mut pairs = Vec::new();
        for _ in 0..hist_len {
            let value = r.read_u64::<LE>().map_err(io)?;
            let occ = r.read_u64::<LE>().map_err(io)?;
            pairs.push((value, occ));
        }

        Ok(IndexHeader {
            mer_size,
            shard_bits,
            block_bits,
            histogram: Histogram::from_pairs(pairs),
        })
    }
}

/// Writes a count directory from `(kmer, count)` pairs.
#[derive(Clone, Debug)]
pub struct CountFileWriter {
    shard_bits: u32,
    block_bits: u32,
}

impl CountFileWriter {
    /// Writer producing `2^shard_bits` shard files.
    pub fn new(shard_bits: u32) -> Self {
        Self {
            shard_bits,
            block_bits: DEFAULT_BLOCK_BITS,
        }
    }

    /// Extra prefix bits shared by the k-mers of one block.
    pub fn block_bits(mut self, bits: u32) -> Self {
        self.block_bits = bits;
        self
    }

    /// Sort, partition and write `counts` under `dir` (created if missing).
    pub fn write(&self, dir: &Path, mer_size: usize, counts: &mut [(u64, u64)]) -> Result<()> {
        let shards = partition_counts(mer_size, self.shard_bits, self.block_bits, counts)?;
        std::fs::create_dir_all(dir).map_err(|e| LookupError::io(dir, e))?;

        let header = IndexHeader {
            mer_size: mer_size as u32,
            shard_bits: self.shard_bits,
            block_bits: self.block_bits,
            histogram: Histogram::from_counts(counts.iter().map(|&(_, v)| v)),
        };
        let index_path = dir.join(INDEX_FILE);
        write_file(&index_path, |w| header.write_to(w))?;

        for (s, blocks) in shards.iter().enumerate() {
            write_file(&shard_path(dir, s), |w| write_shard(w, s as u32, blocks))?;
        }

        log::info!(
            "wrote {} k-mers into {} shards under '{}'",
            counts.len(),
            shards.len(),
            dir.display()
        );
        Ok(())
    }
}

fn write_file(
    path: &Path,
    body: impl FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
) -> Result<()> {
    let io = |e| LookupError::io(path, e);
    let mut w = BufWriter::new(File::create(path).map_err(io)?);
    body(&mut w).map_err(io)?;
    w.flush().map_err(io)
}

fn write_shard<W: Write>(w: &mut W, shard: u32, blocks: &[CountBlock]) -> std::io::Result<()> {
    w.write_u32::<LE>(SHARD_MAGIC)?;
    w.write_u32::<LE>(FORMAT_VERSION)?;
    w.write_u32::<LE>(shard)?;
    for b in blocks {
        w.write_u32::<LE>(BLOCK_TAG)?;
        w.write_u64::<LE>(b.prefix)?;
        w.write_u32::<LE>(b.suffix_bits)?;
        w.write_u32::<LE>(b.n_kmers() as u32)?;
        for &s in &b.suffixes {
            w.write_u64::<LE>(s)?;
        }
        for &v in &b.values {
            w.write_u64::<LE>(v)?;
        }
    }
    Ok(())
}

/// A count directory opened for reading.
#[derive(Clone, Debug)]
pub struct ShardedCountFiles {
    dir: PathBuf,
    header: IndexHeader,
}

impl ShardedCountFiles {
    /// Read `counts.idx` from `dir` and check that every shard file exists.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let index_path = dir.join(INDEX_FILE);
        let file = File::open(&index_path).map_err(|e| LookupError::io(&index_path, e))?;
        let header = IndexHeader::read_from(&mut BufReader::new(file), &index_path)?;
        check_layout(header.mer_size as usize, header.shard_bits)
            .map_err(|e| LookupError::format(&index_path, e.to_string()))?;

        for s in 0..1usize << header.shard_bits {
            let p = shard_path(&dir, s);
            if !p.is_file() {
                return Err(LookupError::format(&p, "missing shard file"));
            }
        }

        log::debug!(
            "opened '{}': k={}, {} shards, {} distinct k-mers",
            dir.display(),
            header.mer_size,
            1usize << header.shard_bits,
            header.histogram.total()
        );
        Ok(Self { dir, header })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }
}

impl CountSource for ShardedCountFiles {
    type Reader = ShardFile;

    fn mer_size(&self) -> usize {
        self.header.mer_size as usize
    }

    fn shard_bits(&self) -> u32 {
        self.header.shard_bits
    }

    fn open_shard(&self, shard: usize) -> Result<ShardFile> {
        ShardFile::open(shard_path(&self.dir, shard), shard as u32)
    }

    fn histogram(&self) -> &Histogram {
        &self.header.histogram
    }
}

/// Streaming reader over one shard file.
pub struct ShardFile {
    path: PathBuf,
    reader: BufReader<File>,
    pending: usize,
}

impl ShardFile {
    fn open(path: PathBuf, shard: u32) -> Result<Self> {
        let file = File::open(&path).map_err(|e| LookupError::io(&path, e))?;
        let mut reader = BufReader::new(file);
        let io = |e| LookupError::io(&path, e);

        if reader.read_u32::<LE>().map_err(io)? != SHARD_MAGIC {
            return Err(LookupError::format(&path, "bad magic"));
        }
        let version = reader.read_u32::<LE>().map_err(io)?;
        if version != FORMAT_VERSION {
            return Err(LookupError::format(&path, format!("unsupported version {version}")));
        }
        let stored = reader.read_u32::<LE>().map_err(io)?;
        if stored != shard {
            return Err(LookupError::format(
                &path,
                format!("holds shard {stored}, expected {shard}"),
            ));
        }

        Ok(Self {
            path,
            reader,
            pending: 0,
        })
    }
}

impl ShardReader for ShardFile {
    fn load_block(&mut self, block: &mut CountBlock) -> Result<bool> {
        let path = &self.path;
        let io = |e| LookupError::io(path, e);

        block.clear();
        if self.reader.fill_buf().map_err(io)?.is_empty() {
            return Ok(false);
        }

        let tag = self.reader.read_u32::<LE>().map_err(io)?;
        if tag != BLOCK_TAG {
            return Err(LookupError::format(path, format!("bad block tag {tag:#x}")));
        }
        block.prefix = self.reader.read_u64::<LE>().map_err(io)?;
        block.suffix_bits = self.reader.read_u32::<LE>().map_err(io)?;
        if block.suffix_bits > 64 {
            return Err(LookupError::format(
                path,
                format!("block suffix width {} exceeds 64 bits", block.suffix_bits),
            ));
        }
        let n = self.reader.read_u32::<LE>().map_err(io)?;

        // Read no more than the file holds; a corrupt `n` must not size the buffer.
        let want = n as u64 * ENTRY_BYTES;
        let got = (&mut self.reader)
            .take(want)
            .read_to_end(&mut block.raw)
            .map_err(io)? as u64;
        if got != want {
            return Err(LookupError::format(
                path,
                format!(
                    "block at prefix {:#x} declares {n} entries, only {got} of {want} bytes present",
                    block.prefix
                ),
            ));
        }
        self.pending = n as usize;
        Ok(true)
    }

    fn decode_block(&mut self, block: &mut CountBlock) -> Result<()> {
        let n = std::mem::take(&mut self.pending);
        let half = n * std::mem::size_of::<u64>();
        if block.raw.len() != 2 * half {
            return Err(LookupError::format(&self.path, "block payload size mismatch"));
        }
        block.suffixes.resize(n, 0);
        block.values.resize(n, 0);
        LE::read_u64_into(&block.raw[..half], &mut block.suffixes);
        LE::read_u64_into(&block.raw[half..], &mut block.values);
        block.raw.clear();
        Ok(())
    }
}
