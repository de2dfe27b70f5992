//! CLI entry point for the requestor tool.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use requestor::{
    DelaySequence, FutureError, PollingRequest, RequestEvent, Response, Session, SessionConfig,
};
use reqwest::Method;
use serde::de::IgnoredAny;
use tracing::{debug, info};

mod cli;
mod progress;

use cli::Args;
use progress::attach_progress;

/// How often the CLI checks for the next polling cycle.
const POLL_CHECK_INTERVAL: Duration = Duration::from_millis(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (warn)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let method = Method::from_bytes(args.method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid HTTP method '{}'", args.method))?;

    let config = SessionConfig::from_env()?;
    let session = Session::tokio(config)?;

    let mut builder = session.req(args.url.clone());
    for header in &args.headers {
        let (name, value) = parse_header(header)?;
        builder = builder.header(name, value);
    }
    if let Some(data) = args.data.clone() {
        builder = builder.body(data);
    }
    if let Some(ms) = args.timeout {
        builder = builder.timeout(Duration::from_millis(ms));
    }
    if !args.retry.is_empty() {
        let events = parse_events(&args.retry_on)?;
        builder = builder.retry(DelaySequence::millis(&args.retry), events);
    }
    if let Some(strategy) = args.poll {
        builder = builder.poll(strategy, Duration::from_millis(args.interval), args.limit);
    }

    let request = builder.send::<IgnoredAny>(method);
    let progress = attach_progress(args.progress, &request);
    let include = args.include;
    let printer = progress.clone();
    request
        .on_load(move |response| match &printer {
            Some(bar) => bar.suspend(|| print_response(response, include)),
            None => print_response(response, include),
        })
        .on_error(|error| eprintln!("error: {error}"));

    let handle = request.clone();
    let outcome = tokio::task::spawn_blocking(move || wait_for_completion(&handle)).await?;
    if let Some(bar) = progress {
        bar.finish_and_clear();
    }

    info!(cycles = request.polling_count(), "request finished");
    outcome.map(|_| ())
}

/// Waits for every cycle of `request`; fails when the last one rejected.
fn wait_for_completion(request: &PollingRequest<IgnoredAny>) -> Result<Arc<Response<IgnoredAny>>> {
    loop {
        let cycle = request.polling_count();
        let outcome = request.get();
        if !request.is_polling() && request.polling_count() == cycle {
            return outcome.map_err(|e| match e {
                FutureError::Execution(error) => anyhow!("{error}"),
                other => anyhow!(other),
            });
        }
        while request.is_polling() && request.polling_count() == cycle {
            thread::sleep(POLL_CHECK_INTERVAL);
        }
    }
}

fn print_response(response: &Response<IgnoredAny>, include: bool) {
    println!("HTTP {}", response.status());
    if include {
        for (name, value) in response.headers() {
            println!("{name}: {}", value.to_str().unwrap_or("<binary>"));
        }
        println!();
    }
    let body = response.text();
    if !body.is_empty() {
        println!("{body}");
    }
}

fn parse_header(raw: &str) -> Result<(&str, &str)> {
    let Some((name, value)) = raw.split_once(':') else {
        bail!("invalid header '{raw}': expected 'Name: value'");
    };
    Ok((name.trim(), value.trim()))
}

fn parse_events(names: &[String]) -> Result<Vec<RequestEvent>> {
    names
        .iter()
        .map(|name| {
            RequestEvent::parse(name).ok_or_else(|| anyhow!("unknown retry event '{name}'"))
        })
        .collect()
}
