use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_ROOT: &str = "./storage";

/// Centralized server configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Store root; `data/`, `metadata/` and `journal/` live beneath it.
    pub root: PathBuf,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Filesystem-backed object store server")]
pub struct Args {
    /// Host to bind to (overrides OBJSTORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides OBJSTORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Store root directory (overrides OBJSTORE_ROOT)
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Run crash recovery and exit
    #[arg(long)]
    pub recover_only: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the
    /// recover-only flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let recover_only = args.recover_only;
        let cfg = Self::merge(args, |name| env::var(name))?;
        Ok((cfg, recover_only))
    }

    /// CLI values win over environment values, which win over defaults.
    fn merge<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let env_host = lookup("OBJSTORE_HOST").unwrap_or_else(|_| DEFAULT_HOST.into());
        let env_port = match lookup("OBJSTORE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing OBJSTORE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => DEFAULT_PORT,
            Err(err) => return Err(err).context("reading OBJSTORE_PORT"),
        };
        let env_root = lookup("OBJSTORE_ROOT").unwrap_or_else(|_| DEFAULT_ROOT.into());

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            root: args.root.unwrap_or_else(|| PathBuf::from(env_root)),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
