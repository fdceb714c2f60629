use clap::{Parser, Subcommand};
use std::collections::BTreeMap;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP daemon
    Daemon {},

    /// Fetch a single URL and print the extracted metadata
    Fetch {
        /// The URL to fetch
        url: String,

        /// HTTP method (GET, POST, PUT, DELETE, PATCH, HEAD)
        #[clap(short, long)]
        method: Option<String>,

        /// Extra request header, "Name: value". Repeatable.
        #[clap(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Request body (POST/PUT/PATCH only)
        #[clap(long)]
        body: Option<String>,

        /// Don't escalate to a headless browser
        #[clap(long, default_value = "false")]
        no_headless: bool,
    },
}

/// Parse repeated "Name: value" arguments; malformed entries are skipped
/// with a warning.
pub fn parse_header_args(raw: &[String]) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    for entry in raw {
        match entry.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                headers.insert(name.trim().to_string(), value.trim().to_string());
            }
            _ => log::warn!("ignoring malformed header argument: {entry:?}"),
        }
    }
    headers
}
