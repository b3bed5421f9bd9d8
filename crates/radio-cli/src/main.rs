//! `radio-cli`: talk to a `radio-server` over its raw TCP protocol.
//!
//! - `status`: print what is on air
//! - `add`: ask the server to ingest a file from its own filesystem
//! - `listen`: join the broadcast and write the received bytes to a file or stdout

mod client;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use radio_proto::Reply;
use tracing_subscriber::EnvFilter;

use crate::client::ListenOptions;

#[derive(Parser, Debug)]
#[command(name = "radio-cli", version = radio_proto::VERSION)]
struct Args {
    /// Server address, e.g. 192.168.1.10:8000
    #[arg(long, default_value = "127.0.0.1:8000")]
    server: String,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Show the track currently on air.
    Status {
        /// Print the raw JSON payload.
        #[arg(long)]
        json: bool,
    },
    /// Add a track by path on the server host.
    Add {
        #[arg(long)]
        key: String,
        #[arg(long)]
        path: String,
    },
    /// Receive the broadcast.
    Listen {
        /// Output file; stdout when omitted.
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Stop after this many blocks.
        #[arg(long)]
        max_blocks: Option<u64>,
        /// Server block size in bytes.
        #[arg(long, default_value_t = 90_000)]
        block_size: usize,
        /// Milliseconds of silence that end a short block.
        #[arg(long, default_value_t = 500)]
        block_gap_ms: u64,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    match args.cmd {
        Cmd::Status { json } => match client::status(&args.server)? {
            None => println!("nothing playing"),
            Some(report) if json => println!("{}", serde_json::to_string_pretty(&report)?),
            Some(report) => {
                let now = &report.current;
                println!("#{} {} - {}", now.index, now.author, now.title);
                println!("  {}s / {}s", now.elapsed, now.length);
                println!("  radio time {}s, up {}s", report.radio_time, report.uptime);
            }
        },
        Cmd::Add { key, path } => match client::add_track(&args.server, &key, &path)? {
            Reply::Added => println!("added {path}"),
            Reply::Unauthorized => return Err(anyhow!("server rejected the key")),
            Reply::NotFound => return Err(anyhow!("server cannot find {path}")),
            Reply::Invalid => return Err(anyhow!("server rejected the request as malformed")),
        },
        Cmd::Listen {
            output,
            max_blocks,
            block_size,
            block_gap_ms,
        } => {
            let opts = ListenOptions {
                block_size,
                block_gap: Duration::from_millis(block_gap_ms),
                max_blocks,
            };
            let mut out: Box<dyn Write> = match output.as_ref() {
                Some(path) => Box::new(BufWriter::new(
                    File::create(path).with_context(|| format!("create {:?}", path))?,
                )),
                None => Box::new(io::stdout().lock()),
            };
            let summary = client::listen(&args.server, &opts, &mut out)?;
            tracing::info!(blocks = summary.blocks, bytes = summary.bytes, "listen finished");
        }
    }
    Ok(())
}
