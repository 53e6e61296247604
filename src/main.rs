use anyhow::{bail, Context};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use topic_connector::config::{parameters, RawConfig};
use topic_connector::record::{Change, Operation, Position};
use topic_connector::{
    specification, Config, Destination, Record, Source, TopicDestination, TopicSource,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "topic-connector")]
#[command(about = "Kafka topic source and destination connector", long_about = None)]
struct Args {
    #[arg(short, long, help = "Enable JSON output for logs", global = true)]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the connector specification and parameter schema as JSON
    Spec,

    /// Publish JSON line records from a file or stdin to the topic
    Write {
        #[arg(short, long, value_name = "FILE", default_value = "connector.toml")]
        config: PathBuf,

        #[arg(short, long, value_name = "FILE", help = "Records file, stdin when omitted")]
        input: Option<PathBuf>,

        #[arg(long, default_value_t = 100)]
        batch_size: usize,

        #[arg(long, help = "Keys and payloads are base64 encoded")]
        base64: bool,
    },

    /// Consume records from the topic and print them as JSON lines
    Read {
        #[arg(short, long, value_name = "FILE", default_value = "connector.toml")]
        config: PathBuf,

        #[arg(long, help = "Stop after this many records")]
        limit: Option<usize>,

        #[arg(long, help = "Print keys and payloads base64 encoded")]
        base64: bool,
    },
}

/// One record on the command line's input or output.
#[derive(Debug, Serialize, Deserialize)]
struct LineRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<String>,
    #[serde(default)]
    operation: Operation,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
    #[serde(default)]
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    after: Option<String>,
}

impl LineRecord {
    fn into_record(self, base64: bool) -> anyhow::Result<Record> {
        let decode = |value: String| -> anyhow::Result<Bytes> {
            if base64 {
                Ok(Bytes::from(BASE64.decode(value).context("invalid base64")?))
            } else {
                Ok(Bytes::from(value))
            }
        };

        Ok(Record {
            position: Position::default(),
            operation: self.operation,
            metadata: self.metadata,
            key: decode(self.key)?,
            payload: Change {
                before: self.before.map(decode).transpose()?,
                after: self.after.map(decode).transpose()?,
            },
        })
    }

    fn from_record(record: Record, base64: bool) -> Self {
        let encode = |value: &Bytes| -> String {
            if base64 {
                BASE64.encode(value)
            } else {
                String::from_utf8_lossy(value).into_owned()
            }
        };

        Self {
            position: Some(String::from_utf8_lossy(record.position.as_bytes()).into_owned()),
            operation: record.operation,
            key: encode(&record.key),
            before: record.payload.before.as_ref().map(encode),
            after: record.payload.after.as_ref().map(encode),
            metadata: record.metadata,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    match args.command {
        Command::Spec => print_spec(),
        Command::Write {
            config,
            input,
            batch_size,
            base64,
        } => run_write(load_raw_config(&config)?, input, batch_size.max(1), base64).await,
        Command::Read {
            config,
            limit,
            base64,
        } => run_read(load_raw_config(&config)?, limit, base64).await,
    }
}

fn print_spec() -> anyhow::Result<()> {
    let spec = serde_json::json!({
        "specification": specification(),
        "parameters": parameters(),
    });
    println!("{}", serde_json::to_string_pretty(&spec)?);
    Ok(())
}

fn load_raw_config(path: &Path) -> anyhow::Result<RawConfig> {
    info!("Loading configuration from {:?}", path);

    let raw = Config::raw_from_file(path)
        .with_context(|| format!("failed to load configuration from {:?}", path))?;
    Ok(raw)
}

async fn run_write(
    raw: RawConfig,
    input: Option<PathBuf>,
    batch_size: usize,
    base64: bool,
) -> anyhow::Result<()> {
    let mut destination = TopicDestination::kafka();
    destination.configure(&raw).await?;

    if let Err(e) = destination.open().await {
        error!("Failed to open destination: {}", e);
        destination.teardown().await.ok();
        return Err(e.into());
    }

    let result = publish_lines(&destination, input, batch_size, base64).await;

    if let Err(e) = destination.teardown().await {
        warn!("Teardown reported an error: {}", e);
    }

    let total = result?;
    info!(total, "All records written");
    Ok(())
}

async fn publish_lines(
    destination: &TopicDestination,
    input: Option<PathBuf>,
    batch_size: usize,
    base64: bool,
) -> anyhow::Result<usize> {
    let reader: Box<dyn tokio::io::AsyncRead + Unpin + Send> = match input {
        Some(path) => Box::new(
            tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("failed to open {:?}", path))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };
    let mut lines = BufReader::new(reader).lines();

    let mut total = 0;
    let mut batch = Vec::with_capacity(batch_size);
    let mut line_no = 0;

    loop {
        let line = lines.next_line().await?;
        if let Some(line) = &line {
            line_no += 1;
            if !line.trim().is_empty() {
                let parsed: LineRecord = serde_json::from_str(line)
                    .with_context(|| format!("invalid record on line {}", line_no))?;
                batch.push(parsed.into_record(base64)?);
            }
        }

        let done = line.is_none();
        if batch.len() >= batch_size || (done && !batch.is_empty()) {
            let outcome = destination.write(&batch).await;
            total += outcome.written;
            if let Some(e) = outcome.error {
                bail!(
                    "batch failed after {} of {} records ({} written in total): {}",
                    outcome.written,
                    batch.len(),
                    total,
                    e
                );
            }
            batch.clear();
        }

        if done {
            return Ok(total);
        }
    }
}

async fn run_read(raw: RawConfig, limit: Option<usize>, base64: bool) -> anyhow::Result<()> {
    let mut source = TopicSource::new();
    source.configure(&raw).await?;

    if let Err(e) = source.open(None).await {
        error!("Failed to open source: {}", e);
        source.teardown().await.ok();
        return Err(e.into());
    }

    let result = consume(&source, limit, base64).await;
    source.teardown().await?;
    result
}

async fn consume(source: &TopicSource, limit: Option<usize>, base64: bool) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    let mut count = 0;

    while limit.map_or(true, |limit| count < limit) {
        let record = tokio::select! {
            record = source.read() => record?,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        };

        let position = record.position.clone();
        let line = serde_json::to_string(&LineRecord::from_record(record, base64))?;
        writeln!(stdout, "{}", line)?;
        source.ack(&position).await?;
        count += 1;
    }

    info!(count, "Stopped reading");
    Ok(())
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("topic_connector=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("topic_connector=info,warn"))
    };

    // stdout carries records, so logs go to stderr.
    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
