//! Command-line interface definitions for thread_feeds.
//!
//! All options can also be provided through environment variables.

use clap::Parser;
use std::path::PathBuf;

/// Generate Atom feeds from Hong Kong forum and news listing pages.
///
/// # Examples
///
/// ```sh
/// # Every built-in source, feeds written to the current directory
/// thread_feeds
///
/// # Only the money and house forums
/// thread_feeds --feeds money house
///
/// # Custom source file, feeds written to ./public
/// thread_feeds --config sources.yaml --output-dir ./public
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Sources to generate, by name, or `all`
    #[arg(short, long, num_args = 1.., value_delimiter = ',', default_value = "all")]
    pub feeds: Vec<String>,

    /// Optional path to a sources.yaml file (defaults to the built-in sources)
    #[arg(short, long, env = "THREAD_FEEDS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory the Atom files are written to
    #[arg(short, long, env = "THREAD_FEEDS_OUTPUT_DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Directory holding the currently published feeds, read for deduplication
    #[arg(short, long, env = "THREAD_FEEDS_DEPLOY_DIR", default_value = "gh-pages-deploy")]
    pub deploy_dir: PathBuf,

    /// Per-request timeout in seconds
    #[arg(short, long, env = "THREAD_FEEDS_TIMEOUT_SECS", default_value_t = 10)]
    pub timeout_secs: u64,

    /// Print the configured sources and exit
    #[arg(long)]
    pub list_sources: bool,
}
