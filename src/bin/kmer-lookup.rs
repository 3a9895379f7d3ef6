use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use kmer_exact_lookup::report::{self, FastxRecords, SeqRecord, Selection};
use kmer_exact_lookup::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

/// Query the k-mers of FASTA/FASTQ sequences against a sharded k-mer count database.
#[derive(Parser, Debug)]
#[command(author, version, about)]
#[command(group(
    ArgGroup::new("report")
        .required(true)
        .args(["existence", "dump", "include", "exclude"])
))]
struct Args {
    /// Input sequences (FASTA or FASTQ, optionally compressed)
    #[arg(long)]
    sequence: PathBuf,

    /// Mate sequences for --include / --exclude
    #[arg(long, requires = "r2")]
    sequence2: Option<PathBuf>,

    /// Output file for the selected mates
    #[arg(long, requires = "sequence2")]
    r2: Option<PathBuf>,

    /// Count database directory
    #[arg(long)]
    mers: PathBuf,

    /// Ignore k-mers with a count below this
    #[arg(long)]
    min: Option<u64>,

    /// Ignore k-mers with a count above this
    #[arg(long)]
    max: Option<u64>,

    /// Threads used to build the lookup table
    #[arg(long)]
    threads: Option<usize>,

    /// Memory limit for the lookup table, in GB
    #[arg(long)]
    memory: Option<f64>,

    /// Per sequence: name, k-mers in sequence, k-mers in database, k-mers in both
    #[arg(long)]
    existence: bool,

    /// Per k-mer: name, position, found, forward mer and value, reverse mer and value
    #[arg(long)]
    dump: bool,

    /// Emit sequences containing database k-mers
    #[arg(long)]
    include: bool,

    /// Emit sequences containing no database k-mers
    #[arg(long)]
    exclude: bool,

    /// Log progress
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    logging::init_logger(args.verbose);

    let mut cfg = BuildConfig::default();
    if let Some(v) = args.min {
        cfg = cfg.min_value(v);
    }
    if let Some(v) = args.max {
        cfg = cfg.max_value(v);
    }
    if let Some(gb) = args.memory {
        cfg = cfg.memory_gb(gb);
    }
    if let Some(n) = args.threads {
        cfg = cfg.threads(n);
    }

    log::info!("loading k-mers from '{}'", args.mers.display());
    let counts = ShardedCountFiles::open(&args.mers)?;
    let lookup = match LookupBuilder::configure(&counts, cfg) {
        Ok(builder) => builder.build()?,
        Err(e @ LookupError::InsufficientMemory { .. }) => {
            eprintln!("{e}");
            eprintln!("Increase --memory, or narrow the --min/--max range.");
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    };
    drop(counts);

    let reads = FastxRecords::open(&args.sequence)?;
    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    if args.existence {
        report::existence(&lookup, reads, &mut out)?;
    } else if args.dump {
        report::dump(&lookup, reads, &mut out)?;
    } else {
        let mode = if args.include {
            Selection::Include
        } else {
            Selection::Exclude
        };

        let mut mates = args.sequence2.as_ref().map(FastxRecords::open).transpose()?;
        let mut mate_out = match &args.r2 {
            Some(p) => Some(BufWriter::new(
                File::create(p).with_context(|| format!("cannot create '{}'", p.display()))?,
            )),
            None => None,
        };
        let paired = match (mates.as_mut(), mate_out.as_mut()) {
            (Some(m), Some(w)) => Some((m as &mut dyn Iterator<Item = Result<SeqRecord>>, w)),
            _ => None,
        };

        let stats = report::select(&lookup, mode, reads, paired, &mut out)?;
        if let Some(w) = mate_out.as_mut() {
            w.flush()?;
        }
        log::info!(
            "selected {} reads (or read pairs) out of {}",
            stats.selected,
            stats.total
        );
    }

    out.flush()?;
    Ok(ExitCode::SUCCESS)
}
