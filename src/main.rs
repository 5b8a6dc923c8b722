//! tarvault CLI - content-addressed tarball store command line interface

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tarvault::index::open_index;
use tarvault::ops::{clean_scratch, fsck, ingest, open_archive, stats};
use tarvault::{list_names, list_names_matching, IoResultExt, Store};

#[derive(Parser)]
#[command(name = "tarvault")]
#[command(about = "content-addressed tarball store with per-file deduplication")]
#[command(version)]
struct Cli {
    /// store root path
    #[arg(short, long, env = "TARVAULT_ROOT", default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// initialize a new store
    Init,

    /// serve GET/PUT of archives over http
    #[cfg(feature = "server")]
    Serve {
        /// address to listen on
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// port to listen on
        #[arg(long, default_value_t = 12625)]
        port: u16,
    },

    /// store a gzip or zstd compressed tarball under a name
    Store {
        /// name to store the archive under
        name: String,

        /// archive to read (stdin if omitted)
        file: Option<PathBuf>,
    },

    /// write a stored archive back out
    Fetch {
        /// stored name
        name: String,

        /// output file (stdout if omitted)
        file: Option<PathBuf>,
    },

    /// list stored names
    Ls {
        /// glob pattern to filter names
        pattern: Option<String>,
    },

    /// show the members recorded for a name
    Show {
        /// stored name
        name: String,
    },

    /// verify store integrity
    Fsck,

    /// show store statistics
    Stats,

    /// remove leftover scratch files (only while nothing is writing)
    CleanTmp,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run(cli: Cli) -> tarvault::Result<()> {
    match cli.command {
        Commands::Init => {
            Store::init(&cli.root)?;
            println!("initialized tarvault store at {}", cli.root.display());
        }

        #[cfg(feature = "server")]
        Commands::Serve { host, port } => {
            let store = std::sync::Arc::new(Store::open_or_init(&cli.root)?);
            let addr: std::net::SocketAddr = format!("{}:{}", host, port)
                .parse()
                .map_err(|e| tarvault::Error::Io {
                    path: cli.root.clone(),
                    source: io::Error::new(io::ErrorKind::InvalidInput, e),
                })?;

            let runtime = tokio::runtime::Runtime::new().with_path(&cli.root)?;
            runtime
                .block_on(tarvault::server::serve(store, addr))
                .with_path(&cli.root)?;
        }

        Commands::Store { name, file } => {
            let store = Store::open(&cli.root)?;
            let report = match file {
                Some(path) => {
                    let input = File::open(&path).with_path(&path)?;
                    ingest(&store, &name, BufReader::new(input))?
                }
                None => ingest(&store, &name, io::stdin().lock())?,
            };
            println!(
                "stored {} ({}): {} entries, {} files, {} new blobs, {} bytes",
                name,
                report.compression,
                report.entries,
                report.regular_files,
                report.blobs_stored,
                report.bytes
            );
        }

        Commands::Fetch { name, file } => {
            let store = Store::open(&cli.root)?;
            // open first so a missing name leaves no output file behind
            let retrieval = open_archive(&store, &name)?;
            match file {
                Some(path) => {
                    let output = File::create(&path).with_path(&path)?;
                    let mut output = retrieval.write_to(BufWriter::new(output))?;
                    output.flush().with_path(&path)?;
                }
                None => {
                    let mut output = retrieval.write_to(io::stdout().lock())?;
                    output.flush().with_path("stdout")?;
                }
            }
        }

        Commands::Ls { pattern } => {
            let store = Store::open(&cli.root)?;
            let names = match pattern {
                Some(pattern) => list_names_matching(&store, &pattern)?,
                None => list_names(&store)?,
            };
            for name in names {
                println!("{}", name);
            }
        }

        Commands::Show { name } => {
            let store = Store::open(&cli.root)?;
            let index = open_index(&store, &name)?;
            println!("compression: {}", index.compression());

            for record in index {
                let record = record?;
                let entry = &record.entry;
                let mut line = format!(
                    "{:<8} {:o} {}/{} {:>10} {}",
                    entry.kind().type_name(),
                    entry.mode,
                    entry.uid,
                    entry.gid,
                    entry.size,
                    entry.display_path()
                );
                if let Some(link) = &entry.link_name {
                    line.push_str(&format!(" -> {}", String::from_utf8_lossy(link)));
                }
                if let Some(hash) = &record.content {
                    line.push_str(&format!(" {}", hash));
                }
                println!("{}", line);
            }
        }

        Commands::Fsck => {
            let store = Store::open(&cli.root)?;
            let report = fsck(&store)?;

            println!("indexes checked: {}", report.indexes_checked);
            println!("blobs checked: {}", report.blobs_checked);

            if !report.corrupt_blobs.is_empty() {
                println!("\ncorrupt blobs:");
                for hash in &report.corrupt_blobs {
                    println!("  {}", hash);
                }
            }

            if !report.corrupt_indexes.is_empty() {
                println!("\ncorrupt indexes:");
                for index in &report.corrupt_indexes {
                    println!("  {}: {}", index.name, index.message);
                }
            }

            if !report.missing_blobs.is_empty() {
                println!("\nmissing blobs:");
                for blob in &report.missing_blobs {
                    println!("  {} ({} in {})", blob.hash, blob.path, blob.name);
                }
            }

            if report.unreferenced_blobs > 0 {
                println!("\nunreferenced blobs: {}", report.unreferenced_blobs);
            }

            if report.is_ok() {
                println!("\nstore is healthy");
            } else {
                println!("\nstore has issues");
                return Err(tarvault::Error::IntegrityCheck(
                    "store integrity check failed".to_string(),
                ));
            }
        }

        Commands::Stats => {
            let store = Store::open(&cli.root)?;
            let s = stats(&store)?;

            println!("names:              {}", s.total_names);
            println!("entries:            {}", s.total_entries);
            println!("blobs:              {} ({} bytes)", s.total_blobs, s.total_blobs_bytes);
            println!("referenced blobs:   {}", s.referenced_blobs);
            println!("unreferenced bytes: {}", s.unreferenced_blobs_bytes);
        }

        Commands::CleanTmp => {
            let store = Store::open(&cli.root)?;
            let removed = clean_scratch(&store)?;
            println!("removed {} scratch entries", removed);
        }
    }

    Ok(())
}
