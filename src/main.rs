use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use video_library::{ContentId, DownloadManager, DownloadStatus, JsonFileStore, LibraryConfig};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "videolib", version, about = "Download videos into a personal library")]
struct Cli {
    /// Directory downloads and the library index are written to
    #[arg(long, global = true)]
    media_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download a video and add it to the library
    Download {
        url: String,
        /// best, <height>p (e.g. 720p) or audio
        #[arg(short, long, default_value = "best")]
        quality: String,
    },
    /// Print remote metadata without downloading
    Metadata { url: String },
    /// Print the video identifier of a URL or a downloaded file name
    Identify { input: String },
    /// Print the effective configuration
    Config {
        /// Also write it to the user config file
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Command::Identify { input } => identify(&input),
        Command::Config { save } => {
            let config = load_config(cli.media_path);
            if save {
                config.save()?;
                info!("Configuration saved");
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(0)
        }
        Command::Metadata { url } => {
            let manager = build_manager(cli.media_path).await?;
            let metadata = manager.resolve_metadata(&url).await?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
            Ok(0)
        }
        Command::Download { url, quality } => {
            let manager = build_manager(cli.media_path).await?;
            download(&manager, &url, &quality).await
        }
    }
}

fn load_config(media_path: Option<PathBuf>) -> LibraryConfig {
    let mut config = match LibraryConfig::load() {
        Ok(config) => {
            info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            log::error!("Failed to load configuration: {}", e);
            LibraryConfig::default()
        }
    };
    if let Some(path) = media_path {
        config.media_path = path;
    }
    config
}

async fn build_manager(media_path: Option<PathBuf>) -> anyhow::Result<DownloadManager> {
    let config = load_config(media_path);
    let index = JsonFileStore::index_path(&config.media_path);
    let store = JsonFileStore::open(&index)
        .await
        .with_context(|| format!("opening library index {:?}", index))?;
    info!("Library index at {:?}", store.path());
    Ok(DownloadManager::from_config(&config, Arc::new(store))?)
}

fn identify(input: &str) -> anyhow::Result<i32> {
    let name = std::path::Path::new(input)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| input.to_string());

    let id = ContentId::parse(input)
        .or_else(|| ContentId::from_url(input).ok())
        .or_else(|| ContentId::from_filename(&name));

    match id {
        Some(id) => {
            println!("{}", id);
            Ok(0)
        }
        None => {
            eprintln!("No video identifier found in {}", input);
            Ok(1)
        }
    }
}

async fn download(manager: &DownloadManager, url: &str, quality: &str) -> anyhow::Result<i32> {
    let task_id = manager.start_task(url, quality).await?;
    info!("Started task {}", task_id);

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")?
            .progress_chars("#>-"),
    );

    let snapshot = loop {
        let snapshot = manager.get_status(&task_id).await?;
        bar.set_position(snapshot.progress as u64);
        bar.set_message(format!(
            "{:?} {} ETA {}",
            snapshot.status,
            snapshot.speed.as_deref().unwrap_or("-"),
            snapshot.eta.as_deref().unwrap_or("-")
        ));

        if snapshot.status.is_terminal() {
            break snapshot;
        }

        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = tokio::signal::ctrl_c() => {
                manager.cancel_task(&task_id).await;
            }
        }
    };

    bar.finish_and_clear();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    Ok(match snapshot.status {
        DownloadStatus::Error | DownloadStatus::Cancelled => 1,
        _ => 0,
    })
}
