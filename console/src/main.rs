#![warn(clippy::all, rust_2018_idioms)]

use std::{sync::mpsc, thread, time::Duration};

use anyhow::Context;
use cloud::PointCloud;
use pubsub::PubSub;
use tracing::info;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use config::Config;

mod config;

fn main() -> anyhow::Result<()> {
    // Log to stdout (if you run with `RUST_LOG=debug`).
    tracing_subscriber::fmt::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_span_events(FmtSpan::CLOSE)
        .init();

    let path = std::env::args()
        .nth(1)
        .context("usage: console <config.yaml>")?;
    let config =
        Config::from_file(&path).with_context(|| format!("could not load config file {path}"))?;

    let mut pubsub = PubSub::new();
    let mut finished = config
        .settings
        .exit_on_complete
        .then(|| pubsub.subscribe::<PointCloud>(&config.settings.topic_finished));
    let mut nodes = config.instantiate_nodes(&mut pubsub);
    info!("running {} nodes from {path}", nodes.len());

    let stdin_closed = watch_stdin();
    let tick = Duration::from_millis(config.settings.tick_ms);

    loop {
        for node in nodes.iter_mut() {
            node.update();
        }
        let moved = pubsub.tick();

        if let Some(finished) = &mut finished {
            if finished.try_recv().is_some() {
                info!("scan finished, shutting down");
                break;
            }
        }
        if stdin_closed.try_recv().is_ok() {
            info!("stdin closed, shutting down");
            break;
        }

        // spin while messages are moving, otherwise take a breath
        if !moved {
            thread::sleep(tick);
        }
    }

    for node in nodes.iter_mut() {
        node.terminate();
    }

    Ok(())
}

/// Fires once stdin reaches end of file, Ctrl-D at a terminal.
fn watch_stdin() -> mpsc::Receiver<()> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let mut line = String::new();
        while matches!(std::io::stdin().read_line(&mut line), Ok(n) if n > 0) {
            line.clear();
        }
        sender.send(()).ok();
    });
    receiver
}
