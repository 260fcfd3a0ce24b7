use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;

use seedalign::align::{self, AlignOpt, AlignmentMode};
use seedalign::index::{self, HashIndexReader, IndexOpt, MemoryMode, SeedShape};
use seedalign::util::alphabet::{Alphabet, SequenceType, DEFAULT_REDUCTION};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(name = "seedalign", author, version, about = "Spaced-seed index and banded aligner", arg_required_else_help = true)]
struct Cli {
    /// 提高日志级别（-v info，-vv debug）
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a seed index from references (one sequence per line)
    Index {
        references: PathBuf,
        /// Output directory
        #[arg(short, long, default_value = "index")]
        output: PathBuf,
        /// References are protein sequences
        #[arg(long)]
        protein: bool,
        /// Protein alphabet reduction (or UNREDUCED)
        #[arg(long, default_value = DEFAULT_REDUCTION)]
        reduction: String,
        /// Seed shape, repeat for several tables; defaults to the canonical shape
        #[arg(long = "shape")]
        shapes: Vec<String>,
        /// Number of published protein shapes to use when no --shape is given
        #[arg(long = "protein-shapes", default_value_t = 1)]
        protein_shapes: usize,
        #[arg(short = 't', long, default_value_t = 0)]
        threads: usize,
        #[arg(long = "max-hits", default_value_t = 1000)]
        max_hits_per_hash: u32,
        #[arg(long = "load-factor", default_value_t = 0.8)]
        load_factor: f64,
        #[arg(long = "step", default_value_t = 1)]
        step_size: u32,
        #[arg(long = "seed", default_value_t = 666)]
        random_seed: i32,
    },
    /// Print index headers and build reports
    Info { index: PathBuf },
    /// Align two sequences at an anchor and print the alignment
    Align {
        query: String,
        reference: String,
        #[arg(long = "query-pos", default_value_t = 0)]
        query_pos: usize,
        #[arg(long = "ref-pos", default_value_t = 0)]
        ref_pos: usize,
        #[command(flatten)]
        scoring: ScoringArgs,
    },
    /// Search queries (one per line) against an index
    Search {
        index: PathBuf,
        /// The references the index was built from, one per line
        references: PathBuf,
        queries: PathBuf,
        /// Output TSV path (stdout if omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// load, page or mmap
        #[arg(short = 'm', long = "memory", default_value = "load")]
        memory: MemoryMode,
        #[arg(long = "max-hits-per-seed", default_value_t = 100)]
        max_hits_per_seed: usize,
        #[arg(long = "min-bits", default_value_t = 0.0)]
        min_bit_score: f64,
        #[arg(short = 'e', long = "evalue", default_value_t = 10.0)]
        max_expected: f64,
        #[arg(long = "max-alignments", default_value_t = 25)]
        max_alignments: usize,
        #[arg(long = "no-quick-check")]
        no_quick_check: bool,
        #[arg(short = 't', long, default_value_t = 0)]
        threads: usize,
        #[command(flatten)]
        scoring: ScoringArgs,
    },
}

#[derive(Args, Debug)]
struct ScoringArgs {
    #[arg(long = "semi-global")]
    semi_global: bool,
    #[arg(long = "band", default_value_t = 4)]
    band_width: usize,
    /// Protein scoring matrix, e.g. BLOSUM62; nucleotide scoring if omitted
    #[arg(long)]
    matrix: Option<String>,
    #[arg(long = "match", default_value_t = 2)]
    match_score: i32,
    #[arg(long = "mismatch", default_value_t = -3, allow_hyphen_values = true)]
    mismatch_score: i32,
    #[arg(long = "gap-open")]
    gap_open: Option<i32>,
    #[arg(long = "gap-ext")]
    gap_extend: Option<i32>,
    #[arg(long)]
    lambda: Option<f64>,
    #[arg(long)]
    k: Option<f64>,
    #[arg(long = "db-length", default_value_t = 0)]
    db_length: u64,
}

impl ScoringArgs {
    fn to_opt(&self) -> AlignOpt {
        let base = if self.matrix.is_some() { AlignOpt::protein() } else { AlignOpt::default() };
        AlignOpt {
            mode: if self.semi_global { AlignmentMode::SemiGlobal } else { AlignmentMode::Local },
            band_width: self.band_width,
            gap_open: self.gap_open.unwrap_or(base.gap_open),
            gap_extend: self.gap_extend.unwrap_or(base.gap_extend),
            matrix: self.matrix.clone(),
            match_score: self.match_score,
            mismatch_score: self.mismatch_score,
            lambda: self.lambda,
            k: self.k,
            db_length: self.db_length,
            ..base
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .format_target(false)
        .init();

    match cli.command {
        Commands::Index {
            references,
            output,
            protein,
            reduction,
            shapes,
            protein_shapes,
            threads,
            max_hits_per_hash,
            load_factor,
            step_size,
            random_seed,
        } => {
            let opt = IndexOpt { threads, max_hits_per_hash, load_factor, step_size, random_seed };
            run_index(&references, &output, protein, &reduction, &shapes, protein_shapes, &opt)
        }
        Commands::Info { index } => run_info(&index),
        Commands::Align { query, reference, query_pos, ref_pos, scoring } => {
            run_align(query.as_bytes(), reference.as_bytes(), query_pos, ref_pos, &scoring.to_opt())
        }
        Commands::Search {
            index,
            references,
            queries,
            out,
            memory,
            max_hits_per_seed,
            min_bit_score,
            max_expected,
            max_alignments,
            no_quick_check,
            threads,
            scoring,
        } => {
            let opt = AlignOpt {
                max_hits_per_seed,
                min_bit_score,
                max_expected,
                max_alignments,
                quick_check: !no_quick_check,
                ..scoring.to_opt()
            };
            run_search(&index, &references, &queries, out.as_deref(), memory, threads, &opt)
        }
    }
}

/// 每行一条序列，跳过空行和 `#` 注释行
fn read_sequences(path: &Path) -> Result<Vec<Vec<u8>>> {
    let fh = std::fs::File::open(path).with_context(|| format!("cannot open '{}'", path.display()))?;
    let mut seqs = Vec::new();
    for line in BufReader::new(fh).lines() {
        let line = line.with_context(|| format!("cannot read '{}'", path.display()))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        seqs.push(line.as_bytes().to_vec());
    }
    Ok(seqs)
}

fn run_index(
    references: &Path,
    output: &Path,
    protein: bool,
    reduction: &str,
    shapes: &[String],
    protein_shapes: usize,
    opt: &IndexOpt,
) -> Result<()> {
    let refs = read_sequences(references)?;
    if refs.is_empty() {
        bail!("'{}' contains no sequences", references.display());
    }
    let alphabet = if protein { Alphabet::reduction(reduction)? } else { Alphabet::dna() };
    let shapes: Vec<SeedShape> = if !shapes.is_empty() {
        shapes.iter().map(|s| s.parse()).collect::<seedalign::Result<_>>()?
    } else if protein && protein_shapes > 1 {
        SeedShape::protein_shapes(protein_shapes)?
    } else {
        let seq_type = if protein { SequenceType::Protein } else { SequenceType::Dna };
        vec![SeedShape::canonical(seq_type)]
    };

    std::fs::create_dir_all(output).with_context(|| format!("cannot create '{}'", output.display()))?;
    info!("indexing {} references from {} with alphabet {}", refs.len(), references.display(), alphabet.name());
    let reports = index::build_index(&refs, &shapes, &alphabet, opt, output)
        .with_context(|| format!("building index in '{}'", output.display()))?;
    for (table, report) in reports.iter().enumerate() {
        println!("table {}:\n{}", table, report);
    }
    Ok(())
}

fn run_info(dir: &Path) -> Result<()> {
    let tables = HashIndexReader::open_all(dir, MemoryMode::Mapped)
        .with_context(|| format!("cannot open index '{}'", dir.display()))?;
    for t in &tables {
        let h = t.header();
        println!("table {}", t.table());
        println!("  alphabet:    {} ({} letters)", t.alphabet().name(), t.alphabet().size());
        println!("  shape:       {} (weight {})", h.shape, h.shape.weight());
        println!("  table size:  {}", h.table_size);
        println!("  entries:     {}", h.entry_count);
        println!("  step size:   {}", h.step_size);
        println!("  random seed: {}", h.random_seed);
        if let Some(report) = t.build_report() {
            println!("{}", report);
        }
    }
    Ok(())
}

fn run_align(query: &[u8], reference: &[u8], query_pos: usize, ref_pos: usize, opt: &AlignOpt) -> Result<()> {
    let refs = [reference];
    let mut aligner = opt.aligner(&refs[..])?;
    let raw = aligner.compute_alignment(query, reference, query_pos, ref_pos);
    let Some(view) = aligner.alignment_by_traceback() else {
        println!("no alignment (raw score {})", raw);
        return Ok(());
    };
    let a = &view.alignment;
    println!(
        "score {} bits ({}), expect {:.2e}",
        a.bit_score.round(),
        a.raw_score,
        a.expected
    );
    println!(
        "identities {}/{} ({:.0}%), gaps {}/{}",
        a.identities,
        a.length,
        a.percent_identity(),
        a.gaps,
        a.length
    );
    println!("Query {:>6} {} {}", a.query_start + 1, String::from_utf8_lossy(view.query_track), a.query_end);
    println!("             {}", String::from_utf8_lossy(view.mid_track));
    println!("Sbjct {:>6} {} {}", a.ref_start + 1, String::from_utf8_lossy(view.ref_track), a.ref_end);
    println!("CIGAR {}", view.cigar());
    Ok(())
}

fn run_search(
    dir: &Path,
    references: &Path,
    queries: &Path,
    out: Option<&Path>,
    memory: MemoryMode,
    threads: usize,
    opt: &AlignOpt,
) -> Result<()> {
    let tables = HashIndexReader::open_all(dir, memory).with_context(|| format!("cannot open index '{}'", dir.display()))?;
    let refs = read_sequences(references)?;
    let queries = read_sequences(queries)?;
    info!("searching {} queries against {} tables ({} mode)", queries.len(), tables.len(), memory);

    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
    let results = pool.install(|| align::align_queries(&tables, &refs, &queries, opt))?;

    let mut w: Box<dyn Write> = match out {
        Some(p) => Box::new(BufWriter::new(
            std::fs::File::create(p).with_context(|| format!("cannot create '{}'", p.display()))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout())),
    };
    writeln!(w, "#query\tref\tframe\tidentity\tlength\tmismatches\tgap_opens\tq_start\tq_end\tr_start\tr_end\tevalue\tbits\tcigar")?;
    for (qi, hits) in results.iter().enumerate() {
        for h in hits {
            let a = &h.alignment;
            writeln!(
                w,
                "{}\t{}\t{}\t{:.2}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:.2e}\t{:.1}\t{}",
                qi,
                h.ref_id,
                h.frame_rank,
                a.percent_identity(),
                a.length,
                a.mismatches,
                a.gap_opens,
                a.query_start + 1,
                a.query_end,
                a.ref_start + 1,
                a.ref_end,
                a.expected,
                a.bit_score,
                h.cigar
            )?;
        }
    }
    w.flush()?;
    for t in tables {
        t.close();
    }
    Ok(())
}
