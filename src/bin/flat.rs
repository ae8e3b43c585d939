//! Binary entry point for the FLAT index CLI.
#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use dias::build::{BuildOptions, PackerKind, SeedBuilderKind, DEFAULT_CHUNK_SIZE, DEFAULT_SORT_BUDGET};
use dias::cli::{build_command, gen_queries_command, query_command, ReportFormat};
use dias::hilbert::DEFAULT_BITS_PER_DIM;
use dias::primitives::pagefile::DEFAULT_PAGE_SIZE;
use dias::query::prefetch::{DEFAULT_CACHE_PAGES, DEFAULT_PREFETCH_FANOUT};
use dias::query::workload::QueryKind;
use dias::query::EngineKind;
use dias::types::{DiasError, Result};

#[derive(Parser, Debug)]
#[command(
    name = "flat",
    version,
    about = "External-memory spatial range queries over Delaunay-meshed 3D point sets",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bulk-build an index from a Delaunay stream (.sva)
    Build(BuildCmd),
    /// Run a workload file against a built index
    Query(QueryCmd),
    /// Generate a reproducible workload file
    GenQueries(GenQueriesCmd),
}

#[derive(Args, Debug)]
struct BuildCmd {
    #[arg(value_name = "STREAM", help = "Input Delaunay stream (.sva)")]
    input: PathBuf,

    #[arg(value_name = "STEM", help = "Output stem; files land at <stem>_graph etc.")]
    stem: PathBuf,

    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, help = "Page size in bytes")]
    page_size: usize,

    #[arg(long, value_enum, default_value_t = PackerArg::Flat, help = "Page packing strategy")]
    packer: PackerArg,

    #[arg(
        long,
        default_value_t = DEFAULT_CHUNK_SIZE,
        help = "Vertices handed to the packer per chunk"
    )]
    chunk_size: usize,

    #[arg(
        long,
        default_value_t = DEFAULT_SORT_BUDGET,
        help = "External-sort buffer in records"
    )]
    sort_buffer: usize,

    #[arg(
        long,
        default_value_t = DEFAULT_BITS_PER_DIM,
        help = "Hilbert curve resolution in bits per dimension (1-32)"
    )]
    hilbert_bits: u32,

    #[arg(long, value_enum, default_value_t = SeedArg::Str, help = "Seed R-tree construction")]
    seed_index: SeedArg,
}

#[derive(Args, Debug)]
struct QueryCmd {
    #[arg(value_name = "STEM", help = "Index stem used at build time")]
    stem: PathBuf,

    #[arg(value_name = "QUERIES", help = "Workload file")]
    queries: PathBuf,

    #[arg(long, value_enum, default_value_t = EngineArg::Exact, help = "Crawler variant")]
    engine: EngineArg,

    #[arg(
        long,
        default_value_t = DEFAULT_CACHE_PAGES,
        help = "Page-cache capacity of the prefetching crawler"
    )]
    cache_pages: usize,

    #[arg(
        long,
        default_value_t = DEFAULT_PREFETCH_FANOUT,
        help = "Speculative reads issued per visited page"
    )]
    prefetch_fanout: usize,

    #[arg(long, value_enum, default_value_t = FormatArg::Text, help = "Report format")]
    format: FormatArg,
}

#[derive(Args, Debug)]
struct GenQueriesCmd {
    #[arg(value_name = "OUT", help = "Workload file to write")]
    out: PathBuf,

    #[arg(
        long,
        required = true,
        value_delimiter = ',',
        value_name = "lx,ly,lz,hx,hy,hz",
        help = "World box the queries fall into"
    )]
    world: Vec<f32>,

    #[arg(long, default_value_t = 100, help = "Number of queries")]
    count: usize,

    #[arg(long, default_value_t = 1000.0, help = "Target box volume")]
    volume: f64,

    #[arg(long, value_enum, default_value_t = KindArg::Range, help = "Query type")]
    query_type: KindArg,

    #[arg(long, default_value_t = 10, help = "Steps per moving trajectory")]
    steps: usize,

    #[arg(long, default_value_t = 42, help = "Deterministic generator seed")]
    rng_seed: u64,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PackerArg {
    Flat,
    Halt,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SeedArg {
    Str,
    Rins,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum EngineArg {
    Exact,
    Prefetch,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FormatArg {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum KindArg {
    Range,
    Point,
    Moving,
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Build(cmd) => {
            let opts = BuildOptions {
                page_size: cmd.page_size,
                packer: match cmd.packer {
                    PackerArg::Flat => PackerKind::Flat,
                    PackerArg::Halt => PackerKind::Halt,
                },
                chunk_size: cmd.chunk_size,
                sort_budget: cmd.sort_buffer,
                hilbert_bits: cmd.hilbert_bits,
                seed_builder: match cmd.seed_index {
                    SeedArg::Str => SeedBuilderKind::Str,
                    SeedArg::Rins => SeedBuilderKind::Rins,
                },
            };
            build_command(&cmd.input, &cmd.stem, &opts)
        }
        Command::Query(cmd) => query_command(
            &cmd.stem,
            &cmd.queries,
            match cmd.engine {
                EngineArg::Exact => EngineKind::Exact,
                EngineArg::Prefetch => EngineKind::Prefetch,
            },
            cmd.cache_pages,
            cmd.prefetch_fanout,
            match cmd.format {
                FormatArg::Text => ReportFormat::Text,
                FormatArg::Json => ReportFormat::Json,
            },
        ),
        Command::GenQueries(cmd) => {
            if cmd.world.len() != 6 {
                return Err(DiasError::Invalid("--world needs six comma-separated floats"));
            }
            let world = [
                cmd.world[0],
                cmd.world[1],
                cmd.world[2],
                cmd.world[3],
                cmd.world[4],
                cmd.world[5],
            ];
            gen_queries_command(
                &cmd.out,
                world,
                cmd.count,
                cmd.volume,
                match cmd.query_type {
                    KindArg::Range => QueryKind::Range,
                    KindArg::Point => QueryKind::Point,
                    KindArg::Moving => QueryKind::Moving,
                },
                cmd.steps,
                cmd.rng_seed,
            )
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
