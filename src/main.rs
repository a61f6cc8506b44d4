use std::sync::Arc;

use clap::Parser;
use mediasearch::{
    caption::{self, CaptionClient, HttpCaptionClient},
    cli::{self, Cli, Command, ConfigAction},
    config_db::ConfigDb,
    data_dir::DataDir,
    error::{self, Error},
    frames::Ffmpeg,
    index::{IndexLocation, IndexManager},
    ingestion::{IngestOptions, IngestReport, IngestionCoordinator},
    search::{self, QueryExecutor, QueryRequest},
    server::{self, AppState},
    settings::{self, Settings},
    static_cache::StaticCache,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("MEDIASEARCH_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;
    let overrides = cli.overrides();
    let resolve = || Settings::resolve(&data_dir, &config_db, &overrides);

    match cli.command {
        Command::Serve(ref args) => cmd_serve(&data_dir, resolve()?, args)?,
        Command::Ingest(ref args) => {
            let report = cmd_ingest(&data_dir, resolve()?)?;
            print_report(&report, args.json)?;
        }
        Command::Search(ref args) => cmd_search(&data_dir, args)?,
        Command::Caption(ref args) => cmd_caption(resolve()?, args)?,
        Command::Config { ref action } => match action {
            ConfigAction::Set { key, value } => {
                // Surface bad values now rather than on the next serve.
                settings::store(&data_dir, &config_db, key, value)?;
                println!("{key} = {value}");
            }
            ConfigAction::Get { key } => {
                settings::validate_key(key)?;
                match config_db.get_setting(key)? {
                    Some(value) => println!("{value}"),
                    None => {
                        return Err(Error::NotFound {
                            kind: "setting",
                            name: key.clone(),
                        });
                    }
                }
            }
            ConfigAction::Unset { key } => {
                settings::validate_key(key)?;
                if !config_db.remove_setting(key)? {
                    return Err(Error::NotFound {
                        kind: "setting",
                        name: key.clone(),
                    });
                }
                println!("Removed {key}");
            }
            ConfigAction::List { json } => {
                config_list(&config_db, *json)?;
            }
        },
    }

    Ok(())
}

fn runtime() -> error::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            Error::Config(format!("failed to start tokio runtime: {e}"))
        })
}

fn caption_client(
    settings: &Settings,
) -> error::Result<Arc<dyn CaptionClient>> {
    Ok(Arc::new(HttpCaptionClient::new(
        &settings.caption_url,
        settings.caption_timeout,
        settings.batch_size,
    )?))
}

fn coordinator(
    index: Arc<IndexManager>,
    captioner: Arc<dyn CaptionClient>,
    settings: &Settings,
) -> Arc<IngestionCoordinator> {
    Arc::new(IngestionCoordinator::new(
        index,
        captioner,
        Arc::new(Ffmpeg::new(
            settings.ffmpeg.clone(),
            settings.ffprobe.clone(),
        )),
        IngestOptions::from(settings),
    ))
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down");
            token.cancel();
        }
    });
}

fn cmd_serve(
    data_dir: &DataDir,
    settings: Settings,
    args: &cli::ServeArgs,
) -> error::Result<()> {
    // A fresh run never parses what a previous process left behind.
    let index = if args.no_ingest {
        IndexManager::open(&data_dir.index_dir())?
    } else {
        IndexManager::create(IndexLocation::Disk(data_dir.index_dir()))?
    };
    let index = Arc::new(index);
    let captioner = caption_client(&settings)?;
    let ingestion =
        coordinator(Arc::clone(&index), Arc::clone(&captioner), &settings);
    let shutdown = CancellationToken::new();

    let state = Arc::new(AppState {
        executor: QueryExecutor::new(index, settings.query_timeout),
        captioner,
        ingestion: Arc::clone(&ingestion),
        images: StaticCache::new(
            &settings.images_dir,
            settings.image_cache_size,
        ),
        videos: StaticCache::new(
            &settings.videos_dir,
            settings.video_cache_size,
        ),
        shutdown: shutdown.clone(),
    });

    runtime()?.block_on(async move {
        cancel_on_ctrl_c(shutdown.clone());
        if !args.no_ingest {
            ingestion.spawn(shutdown.child_token())?;
        }
        server::serve(state, settings.listen).await
    })
}

fn cmd_ingest(
    data_dir: &DataDir,
    settings: Settings,
) -> error::Result<IngestReport> {
    let index = Arc::new(IndexManager::create(IndexLocation::Disk(
        data_dir.index_dir(),
    ))?);
    let ingestion = coordinator(index, caption_client(&settings)?, &settings);

    runtime()?.block_on(async move {
        let cancel = CancellationToken::new();
        cancel_on_ctrl_c(cancel.clone());
        ingestion.run(&cancel).await
    })
}

fn print_report(report: &IngestReport, json: bool) -> error::Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }

    println!(
        "Files:      {} ({} failed)",
        report.files_seen, report.files_failed
    );
    println!(
        "Batches:    {} committed, {} failed",
        report.batches_committed, report.batches_failed
    );
    println!("Documents:  {}", report.documents_indexed);
    println!("Duplicates: {}", report.duplicates_dropped);
    if report.captions_missing > 0 {
        println!("Missing:    {} caption(s)", report.captions_missing);
    }
    if report.cancelled {
        println!("Run was cancelled before completion.");
    }
    Ok(())
}

fn cmd_search(data_dir: &DataDir, args: &cli::SearchArgs) -> error::Result<()> {
    let index = IndexManager::open(&data_dir.index_dir())?;
    let request = QueryRequest::new(args.query.clone(), args.kind, args.count);
    let hits = search::execute_query(&index, &request)?;

    if args.json {
        search::format_json(&hits)?;
    } else {
        search::format_human(&hits);
    }
    Ok(())
}

fn cmd_caption(
    settings: Settings,
    args: &cli::CaptionArgs,
) -> error::Result<()> {
    let image = std::fs::read(&args.file)?;
    let captioner = caption_client(&settings)?;

    let text = runtime()?.block_on(async move {
        caption::caption_one(captioner.as_ref(), image).await
    })?;
    println!("{text}");
    Ok(())
}

fn config_list(config_db: &ConfigDb, json: bool) -> error::Result<()> {
    let stored = config_db.list_settings()?;

    if json {
        let map: serde_json::Map<String, serde_json::Value> = stored
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();
        println!("{}", serde_json::Value::Object(map));
    } else if stored.is_empty() {
        println!("No settings stored.");
    } else {
        for (key, value) in &stored {
            println!("{key}\t{value}");
        }
    }
    Ok(())
}
