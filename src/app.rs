//! Core application runner for `beacon-listener`.
//!
//! This module is decoupled from CLI parsing and process exit codes so it can
//! be tested deterministically with an injected scanner, an injected save
//! action and in-memory I/O.

use crate::aggregator::Aggregator;
use crate::mac_address::MacAddress;
use crate::observation::BeaconObservation;
use crate::output::{Format, OutputFormatter, write_snapshot};
use crate::persist::{
    JsonLinesStore, MemoryStore, PersistError, Persister, RecordStore, SaveOutcome, SavePolicy,
};
use crate::scanner::{Backend, ObservationResult, ScanError};
use crate::subscription::Subscription;
use crate::throttle::RefreshLimiter;
use clap::Parser;
use std::future::Future;
use std::io::{self, Write};
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

/// Configuration for the core run loop.
#[derive(Parser, Debug, Clone)]
#[command(about, version)]
pub struct Options {
    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// Verbose logging, including advertisements that could not be decoded
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// How beacons are printed
    #[arg(long, default_value_t, value_enum)]
    pub format: Format,

    /// Minimum time between redraws of the beacon list.
    /// Accepts duration with suffix: 3s, 1m, 500ms, 2h.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, default_value = "1s", value_parser = crate::throttle::parse_duration)]
    pub refresh: Duration,

    /// Append saved readings to this file as JSON lines.
    /// Without it, saved readings are kept in memory only.
    #[arg(long, value_name = "PATH")]
    pub save_to: Option<PathBuf>,

    /// Whether saving a beacon that was already saved creates another record
    #[arg(long, default_value_t, value_enum)]
    pub save_policy: SavePolicy,
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
        backend: Backend,
        verbose: bool,
    ) -> Pin<
        Box<dyn Future<Output = Result<mpsc::Receiver<ObservationResult>, ScanError>> + Send + '_>,
    >;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
        backend: Backend,
        verbose: bool,
    ) -> Pin<
        Box<dyn Future<Output = Result<mpsc::Receiver<ObservationResult>, ScanError>> + Send + '_>,
    > {
        Box::pin(async move { crate::scanner::start_scan(backend, verbose).await })
    }
}

pub type SaveFuture<'a> =
    Pin<Box<dyn Future<Output = Result<SaveOutcome, PersistError>> + Send + 'a>>;

/// What happens when the user asks to keep a beacon reading.
///
/// Receives an immutable copy taken from a snapshot; implementations forward
/// it to durable storage.
pub trait SaveAction: Send + Sync {
    fn save<'a>(&'a self, entry: &'a BeaconObservation) -> SaveFuture<'a>;
}

impl SaveAction for Persister {
    fn save<'a>(&'a self, entry: &'a BeaconObservation) -> SaveFuture<'a> {
        Box::pin(Persister::save(self, entry))
    }
}

/// Tally of a bulk save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SaveSummary {
    pub saved: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Save every entry independently; one failure does not stop the rest.
pub async fn save_all(action: &dyn SaveAction, entries: &[BeaconObservation]) -> SaveSummary {
    let mut summary = SaveSummary::default();
    for entry in entries {
        match action.save(entry).await {
            Ok(SaveOutcome::Saved(_)) => summary.saved += 1,
            Ok(SaveOutcome::Skipped) => summary.skipped += 1,
            Err(_) => summary.failed += 1,
        }
    }
    summary
}

/// Build the persister described by `options`.
///
/// # Errors
/// Returns `PersistError` if the `--save-to` file cannot be opened.
pub fn open_persister(options: &Options) -> Result<Persister, PersistError> {
    let store: Arc<dyn RecordStore> = match &options.save_to {
        Some(path) => Arc::new(JsonLinesStore::open(path)?),
        None => {
            info!("no --save-to given, saved readings are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };
    Ok(Persister::new(store, options.save_policy))
}

const SAVE_FAILED: &str = "Could not save this beacon at this time. Please try again later.";

const HELP: &str = "\
commands:
  save <address>  save the current reading of one beacon
  save-all        save the current reading of every beacon
  list            redraw the beacon list
  clear           forget every beacon seen so far
  pause           stop scanning
  resume          restart scanning with an empty list
  quit            exit";

/// A line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Save(String),
    SaveAll,
    List,
    Clear,
    Pause,
    Resume,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["save", identity] => Ok(Command::Save(MacAddress::canonicalize(identity))),
            ["save", ..] => Err("usage: save <address>".to_string()),
            ["save-all"] => Ok(Command::SaveAll),
            ["list"] => Ok(Command::List),
            ["clear"] => Ok(Command::Clear),
            ["pause"] => Ok(Command::Pause),
            ["resume"] => Ok(Command::Resume),
            ["help"] => Ok(Command::Help),
            ["quit"] | ["exit"] => Ok(Command::Quit),
            _ => Err(format!("unknown command: {} (try 'help')", line.trim())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Everything the run loop owns between iterations.
struct Session<'a> {
    options: &'a Options,
    scanner: &'a dyn Scanner,
    saver: &'a dyn SaveAction,
    aggregator: Arc<Aggregator>,
    subscription: Option<Subscription>,
    /// Present while a subscription is delivering
    updates: Option<watch::Receiver<u64>>,
    formatter: Box<dyn OutputFormatter>,
    limiter: RefreshLimiter,
    pending_redraw: bool,
}

impl<'a> Session<'a> {
    fn new(options: &'a Options, scanner: &'a dyn Scanner, saver: &'a dyn SaveAction) -> Self {
        Self {
            options,
            scanner,
            saver,
            aggregator: Arc::new(Aggregator::new()),
            subscription: None,
            updates: None,
            formatter: options.format.formatter(),
            limiter: RefreshLimiter::new(options.refresh),
            pending_redraw: false,
        }
    }

    fn is_observing(&self) -> bool {
        self.updates.is_some()
    }

    /// Start observing from an empty beacon list, replacing any running scan.
    async fn resume(&mut self) -> Result<(), ScanError> {
        self.pause();
        self.aggregator.clear();

        let observations = self
            .scanner
            .start_scan(self.options.backend, self.options.verbose)
            .await?;
        let subscription = Subscription::start(Arc::clone(&self.aggregator), observations);
        self.updates = Some(subscription.updates());
        self.subscription = Some(subscription);
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
        self.updates = None;
    }

    fn redraw(&mut self, out: &mut dyn Write) -> io::Result<()> {
        self.pending_redraw = false;
        write_snapshot(self.formatter.as_ref(), &self.aggregator.snapshot(), out)
    }

    fn on_update(&mut self, out: &mut dyn Write) -> io::Result<()> {
        if self.limiter.should_refresh() {
            self.redraw(out)
        } else {
            self.pending_redraw = true;
            Ok(())
        }
    }

    fn on_stream_end(&mut self, out: &mut dyn Write) -> io::Result<()> {
        info!("scanner stopped delivering observations");
        self.updates = None;
        if self.pending_redraw {
            self.redraw(out)?;
        }
        Ok(())
    }

    async fn save(
        &mut self,
        identity: &str,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> io::Result<()> {
        let Some(entry) = self.aggregator.get(identity) else {
            return writeln!(err, "No beacon {identity} in view.");
        };

        match self.saver.save(&entry).await {
            Ok(SaveOutcome::Saved(_)) => writeln!(out, "Mac ID {} pushed to db.", entry.identity),
            Ok(SaveOutcome::Skipped) => {
                writeln!(out, "Mac ID {} was already saved.", entry.identity)
            }
            Err(_) => writeln!(err, "{SAVE_FAILED}"),
        }
    }

    async fn save_all(&mut self, out: &mut dyn Write, err: &mut dyn Write) -> io::Result<()> {
        let summary = save_all(self.saver, &self.aggregator.snapshot()).await;
        if summary.failed > 0 {
            writeln!(err, "{SAVE_FAILED}")?;
        }
        writeln!(
            out,
            "All detected BLE scan pushed to db. (saved {}, skipped {}, failed {})",
            summary.saved, summary.skipped, summary.failed
        )
    }

    async fn handle_line(
        &mut self,
        line: &str,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<Flow, RunError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Flow::Continue);
        }

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(message) => {
                writeln!(err, "{message}")?;
                return Ok(Flow::Continue);
            }
        };
        debug!(?command, "user command");

        match command {
            Command::Save(identity) => self.save(&identity, out, err).await?,
            Command::SaveAll => self.save_all(out, err).await?,
            Command::List => self.redraw(out)?,
            Command::Clear => {
                self.aggregator.clear();
                self.redraw(out)?;
            }
            Command::Pause => {
                self.pause();
                writeln!(out, "Paused.")?;
            }
            Command::Resume => match self.resume().await {
                Ok(()) => writeln!(out, "Resumed.")?,
                Err(e) => {
                    error!(error = %e, "could not restart scan");
                    writeln!(err, "error: {e}")?;
                }
            },
            Command::Help => writeln!(out, "{HELP}")?,
            Command::Quit => return Ok(Flow::Quit),
        }

        Ok(Flow::Continue)
    }
}

async fn next_update(
    updates: &mut Option<watch::Receiver<u64>>,
) -> Result<(), watch::error::RecvError> {
    match updates {
        Some(updates) => updates.changed().await,
        None => std::future::pending().await,
    }
}

/// Run the core loop until the user quits, or until both the scanner and
/// `input` are exhausted.
///
/// - Each batch of new observations redraws the beacon list on `out`, at most
///   once per `options.refresh`.
/// - Each line of `input` is a command (see `help`); command feedback goes to
///   `out`, failures to `err`.
pub async fn run_with_io<R>(
    options: Options,
    scanner: &dyn Scanner,
    saver: &dyn SaveAction,
    input: R,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<(), RunError>
where
    R: AsyncBufRead + Unpin,
{
    let mut session = Session::new(&options, scanner, saver);
    session.resume().await?;

    let mut lines = input.lines();
    let mut input_open = true;

    while input_open || session.is_observing() {
        tokio::select! {
            changed = next_update(&mut session.updates) => match changed {
                Ok(()) => session.on_update(out)?,
                Err(_) => session.on_stream_end(out)?,
            },
            _ = tokio::time::sleep(options.refresh), if session.pending_redraw => {
                if session.limiter.should_refresh() {
                    session.redraw(out)?;
                }
            }
            line = lines.next_line(), if input_open => match line? {
                Some(line) => {
                    if session.handle_line(&line, out, err).await? == Flow::Quit {
                        break;
                    }
                }
                None => {
                    debug!("input closed");
                    input_open = false;
                }
            },
        }
    }

    session.pause();
    Ok(())
}
