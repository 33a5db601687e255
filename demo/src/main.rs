//! amtcp demo
//!
//! ```text
//! amtcp-demo server --bind 127.0.0.1:13337
//! amtcp-demo client --server 127.0.0.1:13337 --count 1000 --size 512 --metrics
//! ```
//!
//! Logs go to stderr; stdout only carries the optional metrics snapshot.

mod cli;

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use amtcp_tcp::{AmEndpoint, AmId, TcpIfaceConfig, Token, TransportError, Worker};
use amtcp_transport_traits::{PendingRequest, PendingStatus};
use anyhow::{Context, Result, bail};
use clap::Parser;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::{Cli, ClientArgs, Commands, LogFormat, ServerArgs};

const PING: u8 = 1;
const PONG: u8 = 2;
const TICK: Duration = Duration::from_millis(100);

type Inbox = Arc<Mutex<Vec<(Token, AmId, Vec<u8>)>>>;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format)?;

    let config = match &cli.config {
        Some(path) => TcpIfaceConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => TcpIfaceConfig::default(),
    };
    debug!("iface config: {:?}", config);

    match cli.command {
        Commands::Server(args) => run_server(config, &args),
        Commands::Client(args) => run_client(config, &args),
    }
}

fn init_logging(level: &str, format: LogFormat) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => subscriber
            .with(fmt::layer().json().with_writer(io::stderr))
            .try_init()
            .map_err(|e| io::Error::other(e.to_string())),
        LogFormat::Pretty => subscriber
            .with(fmt::layer().with_writer(io::stderr))
            .try_init()
            .map_err(|e| io::Error::other(e.to_string())),
    }
}

/// Copies `payload` into the bulk region, reporting its full size when it does not fit.
fn pack_copy(payload: &[u8]) -> impl FnMut(&mut [u8]) -> usize + '_ {
    move |dst| {
        if let Some(region) = dst.get_mut(..payload.len()) {
            region.copy_from_slice(payload);
        }
        payload.len()
    }
}

/// An echo that found the endpoint busy.
#[derive(Debug)]
struct Echo {
    id: AmId,
    payload: Vec<u8>,
}

impl PendingRequest for Echo {
    fn dispatch(&mut self, ep: &mut dyn AmEndpoint) -> PendingStatus {
        match ep.send_bulk(self.id, &mut pack_copy(&self.payload)) {
            Ok(_) => PendingStatus::Done,
            Err(TransportError::NoResource) => PendingStatus::Retry,
            Err(e) => {
                warn!("dropping echo: {}", e);
                PendingStatus::Done
            }
        }
    }
}

fn run_server(config: TcpIfaceConfig, args: &ServerArgs) -> Result<()> {
    let inbox = Inbox::default();
    let sink = Arc::clone(&inbox);
    let mut worker = Worker::new(config, move |token: Token, id: AmId, payload: &[u8]| {
        sink.lock().push((token, id, payload.to_vec()));
    })?;
    let addr = worker.listen(args.bind)?;
    info!("echo server listening on {}", addr);

    let pong = AmId::new(PONG)?;
    loop {
        worker.progress(Some(TICK))?;

        let requests: Vec<_> = inbox.lock().drain(..).collect();
        for (token, id, payload) in requests {
            if id.get() != PING {
                debug!("ignoring {} from {}", id, token.0);
                continue;
            }
            let Some(ep) = worker.endpoint_mut(token) else {
                continue;
            };
            let sent = ep.send_bulk(pong, &mut pack_copy(&payload));
            match sent {
                Ok(_) => {}
                Err(TransportError::NoResource) => {
                    let echo = Box::new(Echo { id: pong, payload });
                    if let Err(rejected) = ep.pending_add(echo) {
                        warn!("could not queue echo: {}", rejected);
                    }
                }
                Err(e) => warn!("echo to {} failed: {}", token.0, e),
            }
        }
    }
}

fn run_client(config: TcpIfaceConfig, args: &ClientArgs) -> Result<()> {
    let pongs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&pongs);
    let mut worker = Worker::new(config, move |_token: Token, id: AmId, _payload: &[u8]| {
        if id.get() == PONG {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    })?;
    let token = worker.connect(args.server)?;
    info!("connected to {}", args.server);

    let ping = AmId::new(PING)?;
    let payload = vec![0x5a; args.size];
    let started = Instant::now();

    for round in 0..args.count {
        loop {
            let Some(ep) = worker.endpoint_mut(token) else {
                bail!("server closed the connection after {round} round trips");
            };
            match ep.send_bulk(ping, &mut pack_copy(&payload)) {
                Ok(_) => break,
                // a frame in flight or a half-received one; both need the loop
                Err(TransportError::NoResource) => {}
                Err(e) => return Err(e.into()),
            }
            worker.progress(Some(TICK))?;
        }

        while pongs.load(Ordering::Relaxed) <= round {
            worker.progress(Some(TICK))?;
            if worker.endpoint(token).is_none() {
                bail!("server closed the connection after {round} round trips");
            }
        }
    }

    let elapsed = started.elapsed();
    info!(
        "{} round trips of {} bytes in {:?} ({:.1} us each)",
        args.count,
        args.size,
        elapsed,
        elapsed.as_secs_f64() * 1e6 / args.count.max(1) as f64
    );

    if args.metrics {
        println!("{}", serde_json::to_string_pretty(&worker.iface().metrics())?);
    }
    worker.close(token)?;
    Ok(())
}
