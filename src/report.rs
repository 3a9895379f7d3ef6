//! Reports comparing sequences against a loaded [`ExactLookup`].
//!
//! A k-mer of a sequence counts as present when either its forward or its
//! reverse-complement form is in the table.

use anyhow::{Context, Result, anyhow, bail};
use needletail::{FastxReader, parse_fastx_file};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::encode::{KmerWalker, decode_kmer};
use crate::index::ExactLookup;

/// One FASTA/FASTQ record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeqRecord {
    pub name: String,
    pub seq: Vec<u8>,
    /// Present for FASTQ input.
    pub qual: Option<Vec<u8>>,
}

impl SeqRecord {
    pub fn fasta(name: &str, seq: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            seq: seq.to_vec(),
            qual: None,
        }
    }

    /// Write as FASTQ when qualities are present, FASTA otherwise.
    fn write_to<W: Write + ?Sized>(&self, w: &mut W, suffix: Option<u64>) -> std::io::Result<()> {
        let marker = if self.qual.is_some() { '@' } else { '>' };
        match suffix {
            Some(n) => writeln!(w, "{marker}{} {n}", self.name)?,
            None => writeln!(w, "{marker}{}", self.name)?,
        }
        w.write_all(&self.seq)?;
        writeln!(w)?;
        if let Some(q) = &self.qual {
            writeln!(w, "+")?;
            w.write_all(q)?;
            writeln!(w)?;
        }
        Ok(())
    }
}

/// Owned-record iterator over a FASTA/FASTQ file (plain or compressed).
pub struct FastxRecords {
    path: PathBuf,
    reader: Box<dyn FastxReader>,
}

impl FastxRecords {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = parse_fastx_file(&path)
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("cannot open sequences '{}'", path.display()))?;
        Ok(Self { path, reader })
    }
}

impl Iterator for FastxRecords {
    type Item = Result<SeqRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let rec = match self.reader.next()? {
            Ok(rec) => rec,
            Err(e) => return Some(Err(anyhow!("{e}").context(format!("reading '{}'", self.path.display())))),
        };
        Some(Ok(SeqRecord {
            name: String::from_utf8_lossy(rec.id()).into_owned(),
            seq: rec.seq().into_owned(),
            qual: rec.qual().map(|q| q.to_vec()),
        }))
    }
}

/// `(k-mers in seq, k-mers also in the table)`.
pub fn count_hits(index: &ExactLookup, seq: &[u8]) -> (u64, u64) {
    let mut n = 0;
    let mut found = 0;
    for km in KmerWalker::new(seq, index.mer_size()) {
        n += 1;
        if index.exists(km.fwd) || index.exists(km.rev) {
            found += 1;
        }
    }
    (n, found)
}

/// Per sequence: `name  kmersInSeq  kmersInTable  kmersInBoth`.
pub fn existence<W: Write>(
    index: &ExactLookup,
    records: impl Iterator<Item = Result<SeqRecord>>,
    out: &mut W,
) -> Result<()> {
    for rec in records {
        let rec = rec?;
        let (n, found) = count_hits(index, &rec.seq);
        writeln!(out, "{}\t{}\t{}\t{}", rec.name, n, index.n_kmers(), found)?;
    }
    Ok(())
}

/// Per k-mer: `name  pos  T|F  fwdMer  fwdValue  revMer  revValue` (absent = 0).
pub fn dump<W: Write>(
    index: &ExactLookup,
    records: impl Iterator<Item = Result<SeqRecord>>,
    out: &mut W,
) -> Result<()> {
    let k = index.mer_size();
    for rec in records {
        let rec = rec?;
        for km in KmerWalker::new(&rec.seq, k) {
            let fv = index.value(km.fwd);
            let rv = index.value(km.rev);
            writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}",
                rec.name,
                km.pos,
                if fv.is_some() || rv.is_some() { 'T' } else { 'F' },
                decode_kmer(km.fwd, k),
                fv.unwrap_or(0),
                decode_kmer(km.rev, k),
                rv.unwrap_or(0)
            )?;
        }
    }
    Ok(())
}

/// Which reads [`select`] keeps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selection {
    /// Reads (pairs) sharing at least one k-mer with the table; the hit count
    /// is appended to the name.
    Include,
    /// Reads (pairs) sharing no k-mer with the table.
    Exclude,
}

/// Reads kept and reads seen by [`select`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SelectStats {
    pub selected: u64,
    pub total: u64,
}

/// Filter single or paired reads by k-mer content.
///
/// With `mates`, the i-th mate is judged together with the i-th read and
/// written to `mate_out`.
pub fn select<W: Write, M: Write>(
    index: &ExactLookup,
    mode: Selection,
    reads: impl Iterator<Item = Result<SeqRecord>>,
    mut mates: Option<(&mut dyn Iterator<Item = Result<SeqRecord>>, &mut M)>,
    out: &mut W,
) -> Result<SelectStats> {
    let mut stats = SelectStats::default();

    for rec in reads {
        let rec = rec?;
        stats.total += 1;
        let (_, mut found) = count_hits(index, &rec.seq);

        let mate = match mates.as_mut() {
            Some((iter, _)) => {
                let Some(m) = iter.next() else {
                    bail!("second sequence file ended before the first, at '{}'", rec.name);
                };
                let m = m?;
                found += count_hits(index, &m.seq).1;
                Some(m)
            }
            None => None,
        };

        let keep = match mode {
            Selection::Include => found > 0,
            Selection::Exclude => found == 0,
        };
        if !keep {
            continue;
        }
        stats.selected += 1;

        let suffix = (mode == Selection::Include).then_some(found);
        rec.write_to(out, suffix)?;
        if let (Some(m), Some((_, mate_out))) = (&mate, mates.as_mut()) {
            m.write_to(&mut **mate_out, suffix)?;
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BuildConfig;
    use crate::encode::encode_kmer;
    use crate::source::MemoryCounts;

    fn index() -> ExactLookup {
        let counts = [("ACGT", 4), ("GGGA", 2), ("CCCC", 9)]
            .map(|(s, c)| (encode_kmer(s.as_bytes()).unwrap(), c));
        let src = MemoryCounts::new(4, 1, counts).unwrap();
        ExactLookup::build(&src, BuildConfig::default()).unwrap()
    }

    fn recs(v: &[SeqRecord]) -> impl Iterator<Item = Result<SeqRecord>> + '_ {
        v.iter().cloned().map(Ok)
    }

    #[test]
    fn existence_counts_both_strands() {
        let idx = index();
        // TCCC is the reverse complement of GGGA.
        let reads = [SeqRecord::fasta("r1", b"ACGTCCC"), SeqRecord::fasta("r2", b"AAAAAA")];
        let mut out = Vec::new();
        existence(&idx, recs(&reads), &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "r1\t4\t3\t2\nr2\t3\t3\t0\n");
    }

    #[test]
    fn dump_reports_values_per_strand() {
        let idx = index();
        let mut out = Vec::new();
        dump(&idx, recs(&[SeqRecord::fasta("s", b"TCCCN")]), &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "s\t0\tT\tTCCC\t0\tGGGA\t2\n");
    }

    #[test]
    fn include_and_exclude_partition_reads() {
        let idx = index();
        let reads = [
            SeqRecord::fasta("hit", b"TTACGTTT"),
            SeqRecord {
                name: "miss".into(),
                seq: b"AAAAAAAA".to_vec(),
                qual: Some(b"IIIIIIII".to_vec()),
            },
        ];

        let mut out = Vec::new();
        let s = select::<_, Vec<u8>>(&idx, Selection::Include, recs(&reads), None, &mut out).unwrap();
        assert_eq!(s, SelectStats { selected: 1, total: 2 });
        assert_eq!(String::from_utf8(out).unwrap(), ">hit 1\nTTACGTTT\n");

        let mut out = Vec::new();
        let s = select::<_, Vec<u8>>(&idx, Selection::Exclude, recs(&reads), None, &mut out).unwrap();
        assert_eq!(s.selected, 1);
        assert_eq!(String::from_utf8(out).unwrap(), "@miss\nAAAAAAAA\n+\nIIIIIIII\n");
    }

    #[test]
    fn pairs_are_judged_together() {
        let idx = index();
        let r1 = [SeqRecord::fasta("a", b"AAAAA"), SeqRecord::fasta("b", b"AAAAA")];
        let r2 = [SeqRecord::fasta("a2", b"CCCCC"), SeqRecord::fasta("b2", b"AAAAA")];
        let mut r2_iter = recs(&r2);
        let mates: &mut dyn Iterator<Item = Result<SeqRecord>> = &mut r2_iter;
        let mut out = Vec::new();
        let mut mate_out = Vec::new();
        let s = select(
            &idx,
            Selection::Include,
            recs(&r1),
            Some((mates, &mut mate_out)),
            &mut out,
        )
        .unwrap();
        assert_eq!(s.selected, 1);
        assert_eq!(String::from_utf8(out).unwrap(), ">a 2\nAAAAA\n");
        assert_eq!(String::from_utf8(mate_out).unwrap(), ">a2 2\nCCCCC\n");
    }

    #[test]
    fn short_mate_file_is_an_error() {
        let idx = index();
        let r1 = [SeqRecord::fasta("a", b"AAAAA")];
        let mut none = std::iter::empty();
        let mates: &mut dyn Iterator<Item = Result<SeqRecord>> = &mut none;
        let mut out = Vec::new();
        let mut mate_out = Vec::new();
        assert!(select(
            &idx,
            Selection::Exclude,
            recs(&r1),
            Some((mates, &mut mate_out)),
            &mut out
        )
        .is_err());
    }
}
