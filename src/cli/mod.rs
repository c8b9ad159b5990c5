//! Command-line client for the object store's HTTP API.

pub mod client;
pub mod commands;

use clap::{Parser, Subcommand};

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

#[derive(Parser, Debug)]
#[command(name = "objstore", version, about = "Command-line client for the objstore server")]
pub struct Cli {
    /// Storage server URL
    #[arg(long, env = "OBJSTORE_SERVER", default_value = DEFAULT_SERVER_URL, global = true)]
    pub server: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Create a new bucket
    #[command(name = "mb", alias = "makebucket")]
    MakeBucket { bucket: String },

    /// List buckets, or the objects in a bucket
    #[command(name = "ls", alias = "list")]
    List { bucket: Option<String> },

    /// Upload (`file bucket/key`) or download (`bucket/key file`)
    #[command(name = "cp", alias = "copy")]
    Copy { source: String, destination: String },

    /// Delete an object
    #[command(name = "rm", alias = "remove")]
    Remove { path: String },

    /// Write object content to stdout
    Cat { path: String },

    /// Show object information
    Stat { path: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_to_the_same_command() {
        let short = Cli::parse_from(["objstore", "mb", "photos"]);
        let long = Cli::parse_from(["objstore", "makebucket", "photos"]);
        assert_eq!(short.command, long.command);
        assert_eq!(
            short.command,
            Command::MakeBucket {
                bucket: "photos".into()
            }
        );
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::parse_from([
            "objstore",
            "ls",
            "photos",
            "-v",
            "--server",
            "http://store:9000",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.server, "http://store:9000");
        assert_eq!(
            cli.command,
            Command::List {
                bucket: Some("photos".into())
            }
        );
    }

    #[test]
    fn list_without_bucket_lists_buckets() {
        let cli = Cli::parse_from(["objstore", "list"]);
        assert_eq!(cli.command, Command::List { bucket: None });
    }
}
