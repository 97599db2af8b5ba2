//! Portor CLI — query the sole proprietorship registry from a terminal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use portor::{CaptchaSolver, LookupParams, Portor, RegistryConfig, TesseractEngine};

#[derive(Parser)]
#[command(
    name = "portor",
    about = "Look up sole proprietorships in the CAPTCHA-gated public registry",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Registry origin. Also reads PORTOR_ORIGIN.
    #[arg(long)]
    origin: Option<String>,

    /// Bypass the result caches.
    #[arg(long)]
    no_cache: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the full record of one sole proprietorship.
    Lookup {
        /// 8-digit business id (MBO).
        #[arg(long)]
        id: Option<String>,

        /// 11-digit owner VAT id (OIB).
        #[arg(long)]
        vat_id: Option<String>,

        /// Registry id from an earlier search.
        #[arg(long)]
        registry_id: Option<String>,
    },

    /// Search by business id, VAT id, or trade name.
    Search {
        /// 8 digits match the business id, 11 the VAT id, anything else the name.
        query: String,

        /// Result page, starting at 1.
        #[arg(long, default_value_t = 1)]
        page: u32,
    },

    /// Run the OCR consensus solver on local CAPTCHA images.
    Solve {
        /// Image files, one per challenge.
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   portor completions bash > ~/.local/share/bash-completion/completions/portor
    ///   portor completions zsh > ~/.zfunc/_portor
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = RegistryConfig::from_env();
    if let Some(origin) = cli.origin {
        config.origin = origin;
    }
    if cli.no_cache {
        config.cache_enabled = false;
    }
    tracing::debug!("Registry: {}", config.origin);
    tracing::debug!(
        "Caches: {}",
        if config.cache_enabled { "enabled" } else { "disabled" }
    );

    match cli.command {
        Commands::Lookup {
            id,
            vat_id,
            registry_id,
        } => {
            let params = LookupParams {
                registry_id,
                business_id: id,
                vat_id,
            };
            let portor = Portor::new(config)?;
            let detail = portor.lookup(&params).await?;
            println!("{}", serde_json::to_string_pretty(&detail)?);
        }

        Commands::Search { query, page } => {
            let portor = Portor::new(config)?;
            let results = portor.search(&query, page).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }

        Commands::Solve { images } => {
            let mut payloads = Vec::with_capacity(images.len());
            for path in &images {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                payloads.push(bytes);
            }

            let engine = Arc::new(TesseractEngine::new(config.ocr.clone()));
            let captcha = CaptchaSolver::new(engine).solve(&payloads).await;
            let report = serde_json::json!({
                "images": images.len(),
                "captcha": captcha,
                "solved": !captcha.is_empty(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            if captcha.is_empty() {
                std::process::exit(1);
            }
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "portor", &mut std::io::stdout());
        }
    }

    Ok(())
}
