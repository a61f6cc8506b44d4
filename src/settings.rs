use std::{
    net::SocketAddr,
    num::NonZeroU64,
    path::PathBuf,
    time::Duration,
};

use crate::{
    config_db::ConfigDb,
    data_dir::DataDir,
    error::{Error, Result},
};

/// Setting keys understood by [`Settings::resolve`].
pub mod keys {
    pub const IMAGES_DIR: &str = "images_dir";
    pub const VIDEOS_DIR: &str = "videos_dir";
    pub const CAPTION_URL: &str = "caption_url";
    pub const BATCH_SIZE: &str = "batch_size";
    pub const FRAME_INTERVAL: &str = "frame_interval";
    pub const LISTEN: &str = "listen";
    pub const QUERY_TIMEOUT_MS: &str = "query_timeout_ms";
    pub const CAPTION_TIMEOUT_SECS: &str = "caption_timeout_secs";
    pub const FFMPEG: &str = "ffmpeg";
    pub const FFPROBE: &str = "ffprobe";
    pub const IMAGE_CACHE_SIZE: &str = "image_cache_size";
    pub const VIDEO_CACHE_SIZE: &str = "video_cache_size";

    pub const ALL: &[&str] = &[
        IMAGES_DIR,
        VIDEOS_DIR,
        CAPTION_URL,
        BATCH_SIZE,
        FRAME_INTERVAL,
        LISTEN,
        QUERY_TIMEOUT_MS,
        CAPTION_TIMEOUT_SECS,
        FFMPEG,
        FFPROBE,
        IMAGE_CACHE_SIZE,
        VIDEO_CACHE_SIZE,
    ];
}

pub const DEFAULT_CAPTION_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_BATCH_SIZE: usize = 16;
pub const DEFAULT_FRAME_INTERVAL: u64 = 5;
pub const DEFAULT_LISTEN: &str = "127.0.0.1:3000";
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_CAPTION_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_IMAGE_CACHE_SIZE: usize = 128;
pub const DEFAULT_VIDEO_CACHE_SIZE: usize = 512;

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub images_dir: PathBuf,
    pub videos_dir: PathBuf,
    pub caption_url: String,
    pub batch_size: usize,
    pub frame_interval: NonZeroU64,
    pub listen: SocketAddr,
    pub query_timeout: Duration,
    pub caption_timeout: Duration,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub image_cache_size: usize,
    pub video_cache_size: usize,
}

impl Settings {
    /// Resolve every setting from, in order of priority:
    /// 1. `overrides` (command-line flags)
    /// 2. values stored in the config database
    /// 3. built-in defaults
    pub fn resolve(
        data_dir: &DataDir,
        config_db: &ConfigDb,
        overrides: &[(&str, String)],
    ) -> Result<Self> {
        let lookup = |key: &str| -> Result<Option<String>> {
            if let Some((_, v)) = overrides.iter().find(|(k, _)| *k == key) {
                return Ok(Some(v.clone()));
            }
            config_db.get_setting(key)
        };

        let images_dir = lookup(keys::IMAGES_DIR)?
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.default_images_dir());
        let videos_dir = lookup(keys::VIDEOS_DIR)?
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.default_videos_dir());
        let caption_url = lookup(keys::CAPTION_URL)?
            .unwrap_or_else(|| DEFAULT_CAPTION_URL.to_string());

        let batch_size = parse_or(
            keys::BATCH_SIZE,
            lookup(keys::BATCH_SIZE)?,
            DEFAULT_BATCH_SIZE,
        )?;
        if batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }

        let interval = parse_or(
            keys::FRAME_INTERVAL,
            lookup(keys::FRAME_INTERVAL)?,
            DEFAULT_FRAME_INTERVAL,
        )?;
        let frame_interval = NonZeroU64::new(interval).ok_or_else(|| {
            Error::Config("frame_interval must be a positive integer".into())
        })?;

        let listen = parse_or(
            keys::LISTEN,
            lookup(keys::LISTEN)?,
            parse_listen(DEFAULT_LISTEN)?,
        )?;

        let query_timeout = Duration::from_millis(parse_or(
            keys::QUERY_TIMEOUT_MS,
            lookup(keys::QUERY_TIMEOUT_MS)?,
            DEFAULT_QUERY_TIMEOUT_MS,
        )?);
        let caption_timeout = Duration::from_secs(parse_or(
            keys::CAPTION_TIMEOUT_SECS,
            lookup(keys::CAPTION_TIMEOUT_SECS)?,
            DEFAULT_CAPTION_TIMEOUT_SECS,
        )?);

        let ffmpeg = lookup(keys::FFMPEG)?
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("ffmpeg"));
        let ffprobe = lookup(keys::FFPROBE)?
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("ffprobe"));

        let image_cache_size = parse_or(
            keys::IMAGE_CACHE_SIZE,
            lookup(keys::IMAGE_CACHE_SIZE)?,
            DEFAULT_IMAGE_CACHE_SIZE,
        )?;
        let video_cache_size = parse_or(
            keys::VIDEO_CACHE_SIZE,
            lookup(keys::VIDEO_CACHE_SIZE)?,
            DEFAULT_VIDEO_CACHE_SIZE,
        )?;

        Ok(Self {
            images_dir,
            videos_dir,
            caption_url,
            batch_size,
            frame_interval,
            listen,
            query_timeout,
            caption_timeout,
            ffmpeg,
            ffprobe,
            image_cache_size,
            video_cache_size,
        })
    }
}

/// Reject unknown keys before they are written to the config database.
pub fn validate_key(key: &str) -> Result<()> {
    if keys::ALL.contains(&key) {
        Ok(())
    } else {
        Err(Error::NotFound {
            kind: "setting",
            name: key.to_string(),
        })
    }
}

/// Store `value` under `key`, keeping the previous value if the result no
/// longer resolves.
pub fn store(
    data_dir: &DataDir,
    config_db: &ConfigDb,
    key: &str,
    value: &str,
) -> Result<()> {
    validate_key(key)?;
    let previous = config_db.get_setting(key)?;
    config_db.set_setting(key, value)?;

    if let Err(e) = Settings::resolve(data_dir, config_db, &[]) {
        match previous {
            Some(old) => config_db.set_setting(key, &old)?,
            None => {
                config_db.remove_setting(key)?;
            }
        }
        return Err(e);
    }
    Ok(())
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e| {
            Error::Config(format!("invalid value '{value}' for {key}: {e}"))
        }),
    }
}

fn parse_listen(value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .map_err(|e| Error::Config(format!("invalid listen address: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, DataDir, ConfigDb) {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let config_db = ConfigDb::open(&data_dir.config_db()).unwrap();
        (tmp, data_dir, config_db)
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let (_tmp, data_dir, db) = fixture();
        let settings = Settings::resolve(&data_dir, &db, &[]).unwrap();

        assert_eq!(settings.batch_size, 16);
        assert_eq!(settings.frame_interval.get(), 5);
        assert_eq!(settings.caption_url, DEFAULT_CAPTION_URL);
        assert_eq!(settings.query_timeout, Duration::from_millis(5_000));
        assert_eq!(settings.images_dir, data_dir.default_images_dir());
        assert_eq!(settings.image_cache_size, 128);
        assert_eq!(settings.video_cache_size, 512);
    }

    #[test]
    fn overrides_beat_stored_settings() {
        let (_tmp, data_dir, db) = fixture();
        db.set_setting(keys::BATCH_SIZE, "4").unwrap();
        db.set_setting(keys::CAPTION_URL, "http://stored:1").unwrap();

        let overrides = [(keys::CAPTION_URL, "http://flag:2".to_string())];
        let settings = Settings::resolve(&data_dir, &db, &overrides).unwrap();

        assert_eq!(settings.batch_size, 4);
        assert_eq!(settings.caption_url, "http://flag:2");
    }

    #[test]
    fn zero_interval_is_rejected() {
        let (_tmp, data_dir, db) = fixture();
        db.set_setting(keys::FRAME_INTERVAL, "0").unwrap();
        let err = Settings::resolve(&data_dir, &db, &[]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn garbage_numbers_are_rejected() {
        let (_tmp, data_dir, db) = fixture();
        db.set_setting(keys::BATCH_SIZE, "lots").unwrap();
        let err = Settings::resolve(&data_dir, &db, &[]).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn rejected_value_restores_the_previous_one() {
        let (_tmp, data_dir, db) = fixture();
        store(&data_dir, &db, keys::BATCH_SIZE, "8").unwrap();

        let err = store(&data_dir, &db, keys::BATCH_SIZE, "0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(
            db.get_setting(keys::BATCH_SIZE).unwrap().as_deref(),
            Some("8")
        );
    }

    #[test]
    fn rejected_first_value_is_not_kept() {
        let (_tmp, data_dir, db) = fixture();
        assert!(store(&data_dir, &db, keys::LISTEN, "nowhere").is_err());
        assert_eq!(db.get_setting(keys::LISTEN).unwrap(), None);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(validate_key("batch_size").is_ok());
        assert!(matches!(
            validate_key("colour"),
            Err(Error::NotFound { kind: "setting", .. })
        ));
    }
}
