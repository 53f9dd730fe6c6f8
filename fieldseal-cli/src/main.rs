//! `fieldseal` CLI for generating configs and working with stored column values.

#![warn(clippy::pedantic, clippy::nursery)]

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use fieldseal::prelude::*;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const GENERATED_SECRET_LEN: usize = 32;

#[derive(Parser)]
#[command(name = "fieldseal")]
#[command(about = "Field-level encryption CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a new config with random secrets
    Init,
    /// Encrypt a value
    Encrypt {
        #[command(flatten)]
        scheme: SchemeArgs,
        /// Plaintext to encrypt
        value: String,
    },
    /// Decrypt a stored value
    Decrypt {
        #[command(flatten)]
        scheme: SchemeArgs,
        /// Stored (encrypted) value
        stored: String,
    },
    /// Print every stored form a value may have, one per line
    Query {
        #[command(flatten)]
        scheme: SchemeArgs,
        /// Plaintext to look up
        value: String,
    },
}

#[derive(Args)]
struct SchemeArgs {
    /// JSON config file
    #[arg(short, long)]
    config: PathBuf,
    /// Attribute name
    #[arg(short, long, default_value = "value")]
    attribute: String,
    /// Use deterministic encryption
    #[arg(long)]
    deterministic: bool,
    /// Lowercase values before encryption
    #[arg(long)]
    downcase: bool,
}

impl SchemeArgs {
    fn build(&self, deterministic: bool) -> Result<Arc<EncryptionScheme>> {
        let config = load_config(&self.config)?;
        let scheme = EncryptionScheme::builder(self.attribute.as_str())
            .deterministic(deterministic)
            .downcase(self.downcase)
            .build(&config)
            .with_context(|| format!("invalid scheme for {}", self.attribute))?;
        debug!(attribute = %self.attribute, deterministic, "built scheme");
        Ok(scheme)
    }
}

fn load_config(path: &Path) -> Result<EncryptionConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config {}", path.display()))?;
    let config: EncryptionConfig = serde_json::from_str(&raw)
        .with_context(|| format!("cannot parse config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_SECRET_LEN)
        .map(char::from)
        .collect()
}

fn generate_config() -> EncryptionConfig {
    EncryptionConfig::new(random_secret(), random_secret()).with_deterministic_key(random_secret())
}

fn run(command: Commands) -> Result<()> {
    let engine = EncryptionEngine::new();

    match command {
        Commands::Init => {
            println!("{}", serde_json::to_string_pretty(&generate_config())?);
        }
        Commands::Encrypt { scheme, value } => {
            let scheme = scheme.build(scheme.deterministic)?;
            println!("{}", engine.encrypt(&value, &scheme)?);
        }
        Commands::Decrypt { scheme, stored } => {
            let scheme = scheme.build(scheme.deterministic)?;
            println!("{}", engine.decrypt(&stored, &scheme)?);
        }
        Commands::Query { scheme, value } => {
            let scheme = scheme.build(true)?;
            for candidate in QueryRewriter::new(engine).rewrite_equality_query(&value, &scheme)? {
                println!("{candidate}");
            }
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    run(Cli::parse().command)
}
