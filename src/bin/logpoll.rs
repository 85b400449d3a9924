use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use logpoll::logs::{LogBatch, LogFormat};
use logpoll::sink::{ConsumerPool, Writer, WriterMessage, WriterSet};
use logpoll::{CollectorConfig, JsonKey, Scheduler};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::{fs::File, sync::mpsc};
use tracing::{error, info, warn, Instrument};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};
use tracing_tree::{time::UtcDateTime, HierarchicalLayer};

#[derive(Debug, Clone, ValueEnum)]
enum Mode {
    File,
    Stdout,
}

/// Poll HTTP endpoints for logs on an interval, and write them to files, or stdout
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// A TOML file describing the collection interval and the targets to poll
    #[arg(short = 'c', long)]
    config: PathBuf,
    /// Mode - If file, batches are written to a file named after the batch's service.name, if stdout, logs will be written to stdout
    #[arg(short = 'o', long, default_value = "stdout")]
    output_mode: Mode,
    /// Where batches with no service.name are written to. If mode is stdout, this is ignored.
    #[arg(short = 'f', long, default_value = "output.log")]
    default_output: String,
    /// A file to load a formatting config from. The formatting config is a newline separated list of dot-path keys, looked up
    /// in each log entry - each output line will be the found value of each of those keys, joined by " | ". The batch's resource
    /// attributes are available under "resource". If none is provided, a default format of "timestamp | severity_text | body" is used.
    #[arg(long)]
    format_file: Option<PathBuf>,
    /// If true, structured json will be written to the output instead of formatted logs, with one entry written per line.
    #[arg(short = 's', long)]
    structured: bool,
    /// Poll every target once, then exit, rather than polling on the configured interval
    #[arg(long)]
    once: bool,
    /// Write logpoll's own logs to this file rather than stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

// Tokio main function
#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Cli::parse();
    let _guard = init_tracing(args.log_file.as_deref())?;

    run(args).await
}

fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>, anyhow::Error> {
    let layer = || {
        HierarchicalLayer::new(2)
            .with_targets(true)
            .with_bracketed_fields(true)
            .with_indent_lines(true)
            .with_timer(UtcDateTime)
    };
    let registry = Registry::default().with(EnvFilter::from_default_env());

    let Some(path) = log_file else {
        registry.with(layer()).init();
        return Ok(None);
    };

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(file);
    registry
        .with(layer().with_ansi(false).with_writer(writer))
        .init();
    Ok(Some(guard))
}

async fn run(args: Cli) -> Result<(), anyhow::Error> {
    let format = if args.structured {
        LogFormat::Structured
    } else {
        get_format_config(args.format_file).await?
    };

    let config = CollectorConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;

    let pool = Arc::new(ConsumerPool::new(Box::new(OutputMode::new(
        args.output_mode,
        format,
        args.default_output,
    ))));
    let scheduler = Scheduler::from_config(config, pool.clone())?;

    if args.once {
        let outcomes = scheduler.poll_all().await;
        pool.finish(Duration::from_secs(5)).await;

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        if failed > 0 {
            anyhow::bail!("{} of {} targets failed", failed, outcomes.len());
        }
        return Ok(());
    }

    scheduler.start()?;
    tokio::signal::ctrl_c().await?;
    info!("Interrupted, shutting down");

    scheduler.shutdown().await;
    pool.finish(Duration::from_secs(5)).await;

    Ok(())
}

struct OutputMode {
    mode: Mode,
    format: LogFormat,
    default: String,
}

impl OutputMode {
    fn new(mode: Mode, format: LogFormat, default: String) -> Self {
        OutputMode {
            mode,
            format,
            default,
        }
    }
}

impl WriterSet for OutputMode {
    fn construct_output(&self, batch: &LogBatch, runtime: &tokio::runtime::Handle) -> Writer {
        let id = self.get_writer_id(batch);
        let (tx, rx) = mpsc::channel(100);
        let handle = match self.mode {
            Mode::File => runtime.spawn(file_writer(id.clone(), self.format.clone(), rx)),
            Mode::Stdout => runtime.spawn(stdout_writer(self.format.clone(), rx)),
        };
        Writer::new(id, handle, tx)
    }

    fn get_writer_id(&self, batch: &LogBatch) -> String {
        if let Mode::Stdout = self.mode {
            return "stdout".to_string();
        }
        batch
            .resource_attr("service.name")
            .filter(|s| !s.is_empty())
            .map(|s| format!("{}.log", s))
            .unwrap_or_else(|| self.default.clone())
    }
}

async fn get_format_config(path: Option<PathBuf>) -> Result<LogFormat, anyhow::Error> {
    let Some(path) = path else {
        return Ok(LogFormat::default());
    };

    let mut file = File::open(&path)
        .await
        .with_context(|| format!("Failed to open format file {}", path.display()))?;
    let mut buf = String::new();
    file.read_to_string(&mut buf).await?;
    let keys: Vec<JsonKey> = buf
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(JsonKey::from)
        .collect();
    if keys.is_empty() {
        warn!("Format file {} has no keys, using the default format", path.display());
        return Ok(LogFormat::default());
    }
    Ok(LogFormat::text(" | ".to_string(), keys))
}

// If a writer fails, its receiver is dropped, so the next batch sent to it fails and the
// poll that produced it reports the error
async fn file_writer(writer_id: String, format: LogFormat, recv: mpsc::Receiver<WriterMessage>) {
    info!("Started writing to file: {}", writer_id);
    let span = tracing::trace_span!("write_to_file", writer_id = writer_id.as_str());
    let result = async {
        let file = File::options()
            .append(true)
            .create(true)
            .open(&writer_id)
            .await?;
        write_batches(file, &format, recv).await
    }
    .instrument(span)
    .await;

    match result {
        Ok(()) => info!("Finished writing to file: {}", writer_id),
        Err(e) => error!("Writing to file {} failed: {:#}", writer_id, e),
    }
}

async fn stdout_writer(format: LogFormat, recv: mpsc::Receiver<WriterMessage>) {
    info!("Started writing to stdout");
    match write_batches(tokio::io::stdout(), &format, recv).await {
        Ok(()) => info!("Finished writing to stdout"),
        Err(e) => error!("Writing to stdout failed: {:#}", e),
    }
}

async fn write_batches<W: AsyncWrite + Unpin>(
    mut out: W,
    format: &LogFormat,
    mut recv: mpsc::Receiver<WriterMessage>,
) -> Result<(), anyhow::Error> {
    while let Some(msg) = recv.recv().await {
        match msg {
            WriterMessage::New(batch) => {
                let mut buf: Vec<u8> = Vec::new();
                for entry in &batch.entries {
                    writeln!(buf, "{}", format.format(&batch, entry)?)?;
                }
                out.write_all(&buf).await?;
                out.flush().await?;
            }
        }
    }
    Ok(())
}
