use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::{document::MediaKind, settings::keys};

#[derive(Debug, Parser)]
#[command(
    name = "mediasearch",
    about = "Caption-based search over your images and videos"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Directory of images to index
    #[arg(long, global = true)]
    pub images_dir: Option<PathBuf>,

    /// Directory of videos to index
    #[arg(long, global = true)]
    pub videos_dir: Option<PathBuf>,

    /// Base URL of the caption service
    #[arg(long, global = true)]
    pub caption_url: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Settings given on the command line, keyed like the config database.
    pub fn overrides(&self) -> Vec<(&'static str, String)> {
        let mut overrides = Vec::new();
        if let Some(dir) = &self.images_dir {
            overrides
                .push((keys::IMAGES_DIR, dir.to_string_lossy().to_string()));
        }
        if let Some(dir) = &self.videos_dir {
            overrides
                .push((keys::VIDEOS_DIR, dir.to_string_lossy().to_string()));
        }
        if let Some(url) = &self.caption_url {
            overrides.push((keys::CAPTION_URL, url.clone()));
        }
        if let Command::Serve(ServeArgs {
            listen: Some(listen),
            ..
        }) = &self.command
        {
            overrides.push((keys::LISTEN, listen.clone()));
        }
        overrides
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Rebuild the index, ingest in the background and serve HTTP
    Serve(ServeArgs),
    /// Rebuild the index and run one ingestion pass
    Ingest(IngestArgs),
    /// Search the index left by the last run
    Search(SearchArgs),
    /// Caption a single image file
    Caption(CaptionArgs),
    /// Manage stored settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

// -- Serve --

#[derive(Debug, Parser)]
pub struct ServeArgs {
    /// Address to listen on (e.g. 127.0.0.1:3000)
    #[arg(long)]
    pub listen: Option<String>,

    /// Serve the existing index without rebuilding or ingesting
    #[arg(long)]
    pub no_ingest: bool,
}

// -- Ingest --

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Media type to search
    #[arg(short = 't', long = "type", value_enum, default_value_t)]
    pub kind: MediaKind,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Caption --

#[derive(Debug, Parser)]
pub struct CaptionArgs {
    /// Image file to caption
    pub file: PathBuf,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Store a setting
    Set { key: String, value: String },
    /// Print a stored setting
    Get { key: String },
    /// Remove a stored setting (revert to default)
    Unset { key: String },
    /// List stored settings
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
