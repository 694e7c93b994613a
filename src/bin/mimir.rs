//! mimir: storage client CLI
//!
//! Upload, fetch and resolve content on the pinning service or the
//! permanent store, using `~/.mimir/config.toml` and credentials from the
//! environment.

use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use mimir::{
    BatchItem, Config, Credentials, ProviderKind, StorageProvider, StorageStack, UploadSource,
};

/// Mimir storage CLI
#[derive(Parser)]
#[command(name = "mimir")]
#[command(version = mimir::PKG_VERSION)]
#[command(about = "Resilient content-addressed storage client")]
struct Args {
    /// Config file (default: ~/.mimir/config.toml)
    #[arg(short, long, env = "MIMIR_CONFIG")]
    config: Option<PathBuf>,

    /// Backing store
    #[arg(short, long, value_enum, default_value_t = Provider::Pinning)]
    provider: Provider,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Provider {
    Pinning,
    Permanent,
}

impl From<Provider> for ProviderKind {
    fn from(p: Provider) -> Self {
        match p {
            Provider::Pinning => ProviderKind::Pinning,
            Provider::Permanent => ProviderKind::Permanent,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Upload a file (or a JSON document with --json)
    Upload {
        /// File to upload
        path: PathBuf,
        /// Logical name to cache the identifier under (default: file name)
        #[arg(short, long)]
        name: Option<String>,
        /// Upload the file's content as a JSON document
        #[arg(long)]
        json: bool,
    },

    /// Download content by identifier
    Download {
        identifier: String,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Upload many files concurrently
    Batch {
        paths: Vec<PathBuf>,
        /// Worker pool size (default: from config)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Print the public URL for an identifier
    Url { identifier: String },

    /// Resolve a logical name to an identifier
    Lookup { name: String },

    /// Verify pinning service credentials
    AuthCheck,

    /// Write a metrics snapshot now
    MetricsFlush {
        /// Directory (default: from config)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;
    let stack = StorageStack::from_config(&config, &Credentials::from_env())?;
    let kind = ProviderKind::from(args.provider);

    match args.command {
        Command::Upload { path, name, json } => {
            let name = name.or_else(|| {
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            });
            let source = if json {
                let content = std::fs::read_to_string(&path)?;
                UploadSource::json(serde_json::from_str(&content)?)
            } else {
                UploadSource::file(&path)
            };
            let store = stack.provider(kind)?;
            let id = store.upload(source, name.as_deref()).await?;
            println!("{id}");
            eprintln!("{}", store.public_url(&id));
        }

        Command::Download { identifier, output } => {
            let payload = stack.provider(kind)?.download(&identifier).await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &payload.bytes)?;
                    eprintln!("wrote {} bytes to {}", payload.len(), path.display());
                }
                None => io::stdout().write_all(&payload.bytes)?,
            }
        }

        Command::Batch { paths, workers } => {
            let mut uploader = stack.batch_uploader(kind)?;
            if let Some(n) = workers {
                uploader = uploader.workers(n);
            }
            let items = paths.into_iter().map(BatchItem::file).collect();
            let report = uploader.upload_all(items).await;

            let mut ok: Vec<_> = report.succeeded().collect();
            ok.sort();
            for (name, id) in ok {
                println!("{name}\t{id}");
            }
            let mut failed: Vec<_> = report.failed().collect();
            failed.sort_by_key(|(name, _)| *name);
            for (name, err) in &failed {
                eprintln!("{name}\terror: {err}");
            }
            eprintln!(
                "{} uploaded, {} failed in {:.1}s",
                report.success_count(),
                report.failure_count(),
                report.elapsed.as_secs_f64()
            );
            if !failed.is_empty() {
                std::process::exit(1);
            }
        }

        Command::Url { identifier } => {
            let store = stack.provider(kind)?;
            if !store.is_valid_identifier(&identifier) {
                eprintln!("warning: {identifier:?} is not a valid {kind} identifier");
            }
            println!("{}", store.public_url(&identifier));
        }

        Command::Lookup { name } => match stack.provider(kind)?.lookup(&name).await? {
            Some(id) => println!("{id}"),
            None => {
                eprintln!("{name}: not found");
                std::process::exit(1);
            }
        },

        Command::AuthCheck => {
            stack.pinning()?.test_authentication().await?;
            println!("pinning credentials ok");
        }

        Command::MetricsFlush { dir } => {
            let metrics = stack.metrics();
            let path = match dir {
                Some(dir) => metrics.flush_to_dir(&dir)?,
                None => metrics.flush()?,
            };
            println!("{}", path.display());
        }
    }

    Ok(())
}
