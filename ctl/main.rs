#![forbid(unsafe_code)]

//! `exec-relay-ctl` — terminal client for `exec-relay`.
//!
//! Opens a chat stream against a running relay and prints assistant
//! content as it arrives.

use std::io::Write;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Deserialize;

#[derive(Debug, Parser)]
#[command(
    name = "exec-relay-ctl",
    about = "Terminal client for the exec-relay server",
    version,
    long_about = None
)]
struct Cli {
    /// Base URL of the relay server.
    #[arg(long, global = true, default_value = "http://127.0.0.1:5463")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

/// Job kind selector.
///
/// Mirrors `exec_relay::models::job::JobKind` but is defined locally
/// because the ctl binary does not depend on the library crate.
#[derive(Debug, Copy, Clone, Eq, PartialEq, clap::ValueEnum)]
enum Kind {
    /// Multi-node pipeline.
    Pipeline,
    /// Single model.
    Model,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Pipeline => "pipeline",
            Self::Model => "model",
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a message and stream the answer.
    Chat {
        /// Conversation identifier.
        #[arg(long)]
        session: String,
        /// Pipeline or model identifier.
        #[arg(long)]
        job: String,
        /// Job kind.
        #[arg(long, value_enum, default_value_t = Kind::Pipeline)]
        kind: Kind,
        /// Message text.
        message: String,
    },

    /// Check that the server is up.
    Health,
}

/// Stream event as sent by the server.
#[derive(Debug, Deserialize, PartialEq, Eq)]
struct WireEvent {
    #[serde(default)]
    text: Option<String>,
    #[serde(rename = "type")]
    kind: String,
}

/// Split complete SSE frames off the front of `buffer` and decode their
/// `data:` payloads. Incomplete trailing input stays in the buffer as raw
/// bytes, so a character split across network chunks decodes intact.
fn drain_frames(buffer: &mut Vec<u8>) -> Vec<WireEvent> {
    let mut events = Vec::new();
    while let Some(end) = buffer.windows(2).position(|pair| pair == b"\n\n") {
        let raw: Vec<u8> = buffer.drain(..end + 2).collect();
        let frame = String::from_utf8_lossy(&raw);
        let data: Vec<&str> = frame
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(str::trim_start)
            .collect();
        if data.is_empty() {
            continue;
        }
        match serde_json::from_str::<WireEvent>(&data.join("\n")) {
            Ok(event) => events.push(event),
            Err(err) => eprintln!("skipping undecodable frame: {err}"),
        }
    }
    events
}

async fn chat(server: &str, session: &str, job: &str, kind: Kind, message: &str) -> ExitCode {
    let mut url = match reqwest::Url::parse(&format!("{}/chat", server.trim_end_matches('/'))) {
        Ok(url) => url,
        Err(err) => {
            eprintln!("invalid server url: {err}");
            return ExitCode::FAILURE;
        }
    };
    url.query_pairs_mut()
        .append_pair("session_id", session)
        .append_pair("message", message)
        .append_pair("job_id", job)
        .append_pair("kind", kind.as_str());

    let mut response = match reqwest::get(url).await {
        Ok(resp) if resp.status().is_success() => resp,
        Ok(resp) => {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            eprintln!("request rejected ({status}): {body}");
            return ExitCode::FAILURE;
        }
        Err(err) => {
            eprintln!("failed to reach server: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut buffer = Vec::new();
    let mut saw_error = false;
    let stdout = std::io::stdout();
    loop {
        let chunk = match response.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(err) => {
                eprintln!("stream interrupted: {err}");
                return ExitCode::FAILURE;
            }
        };
        buffer.extend_from_slice(&chunk);

        for event in drain_frames(&mut buffer) {
            match event.kind.as_str() {
                "system" => {
                    let mut out = stdout.lock();
                    let _ = write!(out, "{}", event.text.unwrap_or_default());
                    let _ = out.flush();
                }
                "error" => {
                    saw_error = true;
                    eprintln!("\nerror: {}", event.text.unwrap_or_default());
                }
                "done" => {
                    println!();
                    return if saw_error {
                        ExitCode::FAILURE
                    } else {
                        ExitCode::SUCCESS
                    };
                }
                other => eprintln!("unknown event type '{other}'"),
            }
        }
    }

    eprintln!("stream ended without a done marker");
    ExitCode::FAILURE
}

async fn health(server: &str) -> ExitCode {
    match reqwest::get(format!("{}/health", server.trim_end_matches('/'))).await {
        Ok(resp) if resp.status().is_success() => {
            println!("ok");
            ExitCode::SUCCESS
        }
        Ok(resp) => {
            eprintln!("unhealthy: {}", resp.status());
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("failed to reach server: {err}");
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let args = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async {
        match args.command {
            Command::Chat {
                session,
                job,
                kind,
                message,
            } => chat(&args.server, &session, &job, kind, &message).await,
            Command::Health => health(&args.server).await,
        }
    })
}
