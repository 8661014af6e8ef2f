use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use crate::config::LibraryConfig;
use crate::downloader::progress::{ProgressReporter, RawProgressEvent};
use crate::downloader::{AcquireRequest, AcquisitionStrategy};
use crate::errors::{AppError, Result};
use super::find_downloaded_file;

/// Marker on machine-readable progress lines requested with `--progress-template`.
const PROGRESS_MARKER: &str = "[vlib] ";
const PROGRESS_TEMPLATE: &str = concat!(
    "download:[vlib] %(progress.status)s",
    "|%(progress.downloaded_bytes)s",
    "|%(progress.total_bytes)s",
    "|%(progress.total_bytes_estimate)s",
    "|%(progress.speed)s",
    "|%(progress.eta)s",
    "|%(progress.fragment_index)s",
    "|%(progress.filename)s",
);
const STDERR_TAIL: usize = 8;

/// Environment that turns off CA verification in the Python-based tools.
const RELAXED_TLS_ENV: [(&str, &str); 4] = [
    ("PYTHONHTTPSVERIFY", "0"),
    ("CURL_CA_BUNDLE", ""),
    ("REQUESTS_CA_BUNDLE", ""),
    ("SSL_VERIFY", "False"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolFlavor {
    YtDlp,
    YoutubeDl,
}

#[derive(Debug, Clone)]
struct CommandSettings {
    socket_timeout_secs: u64,
    retries: u32,
    fragment_retries: u32,
    timeout: Duration,
    audio_bitrate_kbps: u32,
    user_agent: String,
    referer: String,
    proxy: Option<String>,
}

impl CommandSettings {
    fn from_config(config: &LibraryConfig) -> Self {
        Self {
            socket_timeout_secs: config.socket_timeout_secs,
            retries: config.retries,
            fragment_retries: config.fragment_retries,
            timeout: config.command_timeout(),
            audio_bitrate_kbps: config.audio_bitrate_kbps,
            user_agent: config.user_agent.clone(),
            referer: config.referer.clone(),
            proxy: config.proxy.clone(),
        }
    }
}

/// Acquisition through an external extraction executable.
pub struct CommandStrategy {
    name: String,
    program: String,
    flavor: ToolFlavor,
    track_progress: bool,
    relax_environment: bool,
    settings: CommandSettings,
}

impl CommandStrategy {
    /// yt-dlp with machine-readable progress and alternate player clients.
    pub fn ytdlp_tracked(config: &LibraryConfig) -> Self {
        Self {
            name: "yt-dlp".to_string(),
            program: config.ytdlp_path.clone(),
            flavor: ToolFlavor::YtDlp,
            track_progress: true,
            relax_environment: false,
            settings: CommandSettings::from_config(config),
        }
    }

    /// yt-dlp preferring insecure transports, with CA checks disabled in its environment.
    pub fn ytdlp_relaxed(config: &LibraryConfig) -> Self {
        Self {
            name: "yt-dlp-relaxed".to_string(),
            program: config.ytdlp_path.clone(),
            flavor: ToolFlavor::YtDlp,
            track_progress: false,
            relax_environment: true,
            settings: CommandSettings::from_config(config),
        }
    }

    pub fn youtube_dl(config: &LibraryConfig) -> Self {
        Self {
            name: "youtube-dl".to_string(),
            program: config.youtube_dl_path.clone(),
            flavor: ToolFlavor::YoutubeDl,
            track_progress: false,
            relax_environment: true,
            settings: CommandSettings::from_config(config),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn build_args(&self, request: &AcquireRequest) -> Vec<String> {
        let settings = &self.settings;
        let template = request.output_template();

        let mut args: Vec<String> = vec![
            "--no-playlist".into(),
            "--no-check-certificate".into(),
            "--format".into(),
            request.quality.format_selector(),
            "--output".into(),
            template.to_string_lossy().to_string(),
            "--socket-timeout".into(),
            settings.socket_timeout_secs.to_string(),
            "--retries".into(),
            settings.retries.to_string(),
            "--user-agent".into(),
            settings.user_agent.clone(),
            "--referer".into(),
            settings.referer.clone(),
        ];

        match self.flavor {
            ToolFlavor::YtDlp => {
                args.extend([
                    "--fragment-retries".to_string(),
                    settings.fragment_retries.to_string(),
                ]);
                if !request.quality.is_audio() {
                    args.extend(["--merge-output-format".to_string(), "mp4".to_string()]);
                }
                if self.track_progress {
                    args.extend([
                        "--newline".to_string(),
                        "--progress-template".to_string(),
                        PROGRESS_TEMPLATE.to_string(),
                        "--extractor-args".to_string(),
                        "youtube:player_client=android,web,ios;skip=hls".to_string(),
                    ]);
                }
                if self.relax_environment {
                    args.push("--prefer-insecure".to_string());
                }
            }
            ToolFlavor::YoutubeDl => {
                args.push("--ignore-errors".to_string());
            }
        }

        if request.quality.is_audio() {
            args.extend([
                "--extract-audio".to_string(),
                "--audio-format".to_string(),
                "mp3".to_string(),
                "--audio-quality".to_string(),
                format!("{}K", settings.audio_bitrate_kbps),
            ]);
        }

        if let Some(proxy) = &settings.proxy {
            args.extend(["--proxy".to_string(), proxy.clone()]);
        }

        args.push(request.url.clone());
        args
    }

    fn command(&self, request: &AcquireRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.build_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if self.relax_environment {
            cmd.envs(RELAXED_TLS_ENV);
        }
        cmd
    }

    async fn run(&self, request: &AcquireRequest, progress: &ProgressReporter) -> Result<()> {
        let mut cmd = self.command(request);
        log::debug!("[{}] Running {:?}", self.name, cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| AppError::Strategy(format!("failed to start {}: {}", self.program, e)))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn_line_reader(child.stdout.take(), false, tx.clone());
        spawn_line_reader(child.stderr.take(), true, tx);

        let mut stderr_tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL);
        let track_progress = self.track_progress;

        let drive = async {
            while let Some((from_stderr, line)) = rx.recv().await {
                if track_progress {
                    if let Some(event) = parse_progress_line(&line) {
                        progress.report(event).await;
                        continue;
                    }
                }
                if from_stderr {
                    if stderr_tail.len() == STDERR_TAIL {
                        stderr_tail.pop_front();
                    }
                    stderr_tail.push_back(line);
                } else {
                    log::debug!("[{}] {}", self.name, line);
                }
            }
            child.wait().await
        };

        let status = match tokio::time::timeout(self.settings.timeout, drive).await {
            Ok(status) => status?,
            Err(_) => {
                return Err(AppError::Strategy(format!(
                    "{} timed out after {}s",
                    self.program,
                    self.settings.timeout.as_secs()
                )));
            }
        };

        if !status.success() {
            let stderr: Vec<String> = stderr_tail.into_iter().collect();
            return Err(AppError::Strategy(format!(
                "{} exited with {}: {}",
                self.program,
                status,
                stderr.join(" | ")
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl AcquisitionStrategy for CommandStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(
        &self,
        request: &AcquireRequest,
        progress: &ProgressReporter,
    ) -> Result<Option<PathBuf>> {
        log::info!("[{}] Downloading {}", self.name, request.id);
        self.run(request, progress).await?;

        let file = find_downloaded_file(&request.output_dir, &request.id).await?;
        match &file {
            Some(path) => log::info!("[{}] Produced {:?}", self.name, path),
            None => log::warn!(
                "[{}] Finished but no file matching {} was found",
                self.name,
                request.id
            ),
        }
        Ok(file)
    }
}

fn spawn_line_reader<R>(
    reader: Option<R>,
    from_stderr: bool,
    tx: mpsc::UnboundedSender<(bool, String)>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(reader) = reader else {
        return;
    };
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send((from_stderr, line)).is_err() {
                break;
            }
        }
    });
}

/// Parses one line produced by `PROGRESS_TEMPLATE`.
pub fn parse_progress_line(line: &str) -> Option<RawProgressEvent> {
    let payload = line.trim().strip_prefix(PROGRESS_MARKER)?;
    let fields: Vec<&str> = payload.splitn(8, '|').collect();
    if fields.len() != 8 {
        return None;
    }

    let filename = optional_field(fields[7]).map(str::to_string);
    match fields[0] {
        "downloading" => Some(RawProgressEvent::Downloading {
            downloaded_bytes: number(fields[1]).map(|n| n as u64),
            total_bytes: number(fields[2]).map(|n| n as u64),
            total_bytes_estimate: number(fields[3]).map(|n| n as u64),
            speed: number(fields[4]),
            eta: number(fields[5]),
            fragment_index: number(fields[6]).map(|n| n as u64),
            filename,
        }),
        "finished" => Some(RawProgressEvent::Finished { filename }),
        _ => None,
    }
}

fn optional_field(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    match raw {
        "" | "NA" | "None" | "null" => None,
        value => Some(value),
    }
}

fn number(raw: &str) -> Option<f64> {
    optional_field(raw)?
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n >= 0.0)
}
