//! mediasearch - caption-based search over local images and videos.
//!
//! Images and sampled video frames are captioned by an external model, the
//! captions are indexed with
//! [Tantivy](https://github.com/quickwit-oss/tantivy), and text queries
//! filtered by media type return the matching files (and, for videos, the
//! offset of the matching frame).
//!
//! # Quick start
//!
//! ```no_run
//! use std::{num::NonZeroU64, sync::Arc, time::Duration};
//!
//! use mediasearch::{
//!     HttpCaptionClient, IndexManager, IngestionCoordinator,
//!     frames::Ffmpeg,
//!     index::IndexLocation,
//!     ingestion::IngestOptions,
//!     search::{self, QueryRequest},
//!     MediaKind,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> mediasearch::Result<()> {
//! let index = Arc::new(IndexManager::create(IndexLocation::Memory)?);
//! let captioner = Arc::new(HttpCaptionClient::new(
//!     "http://127.0.0.1:8000",
//!     Duration::from_secs(120),
//!     16,
//! )?);
//! let ingestion = IngestionCoordinator::new(
//!     Arc::clone(&index),
//!     captioner,
//!     Arc::new(Ffmpeg::default()),
//!     IngestOptions {
//!         images_dir: "media/images".into(),
//!         videos_dir: "media/videos".into(),
//!         batch_size: 16,
//!         frame_interval: NonZeroU64::new(5).unwrap(),
//!     },
//! );
//! ingestion.run(&CancellationToken::new()).await?;
//!
//! let request = QueryRequest::new("a dog on the beach", MediaKind::Image, 10);
//! for hit in search::execute_query(&index, &request)? {
//!     println!("{} ({})", hit.filename, hit.caption);
//! }
//! # Ok(())
//! # }
//! ```

pub mod caption;
pub mod cli;
pub mod codec;
pub mod config_db;
pub mod data_dir;
pub mod document;
pub mod error;
pub mod frames;
pub mod index;
pub mod ingestion;
pub mod search;
pub mod server;
pub mod settings;
pub mod static_cache;
pub mod walker;

pub use caption::{CaptionClient, HttpCaptionClient};
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use document::{Document, MediaKind};
pub use error::{Error, Result};
pub use index::IndexManager;
pub use ingestion::IngestionCoordinator;
pub use settings::Settings;
