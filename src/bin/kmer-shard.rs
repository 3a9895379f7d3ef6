use anyhow::{Context, Result, bail};
use clap::Parser;
use kmer_exact_lookup::{CountFileWriter, encode_kmer, logging};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

/// Write a sharded k-mer count database from a `kmer<TAB>count` table.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Input table, one `ACGT...<TAB>count` per line
    #[arg(short, long)]
    input: PathBuf,

    /// Output database directory
    #[arg(short, long)]
    output: PathBuf,

    /// K-mer length (<= 32)
    #[arg(short = 'k', long)]
    mer_size: usize,

    /// log2 of the number of shard files
    #[arg(long, default_value_t = 4)]
    shard_bits: u32,

    /// Extra prefix bits shared by the k-mers of one block
    #[arg(long, default_value_t = 4)]
    block_bits: u32,

    /// Log progress
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn parse_line(line: &str, mer_size: usize) -> Result<(u64, u64)> {
    let mut fields = line.split_whitespace();
    let (Some(mer), Some(count)) = (fields.next(), fields.next()) else {
        bail!("expected `kmer<TAB>count`");
    };
    if mer.len() != mer_size {
        bail!("k-mer '{mer}' is not {mer_size} bases");
    }
    let kmer = encode_kmer(mer.as_bytes()).with_context(|| format!("k-mer '{mer}' is not ACGT"))?;
    let count = count.parse().with_context(|| format!("bad count '{count}'"))?;
    Ok((kmer, count))
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_logger(args.verbose);

    let file = File::open(&args.input)
        .with_context(|| format!("cannot open '{}'", args.input.display()))?;

    let mut counts = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading '{}'", args.input.display()))?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let pair = parse_line(&line, args.mer_size)
            .with_context(|| format!("{}:{}", args.input.display(), n + 1))?;
        counts.push(pair);
    }

    CountFileWriter::new(args.shard_bits)
        .block_bits(args.block_bits)
        .write(&args.output, args.mer_size, &mut counts)?;
    Ok(())
}
