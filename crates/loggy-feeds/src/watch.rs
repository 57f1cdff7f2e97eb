//! Watch loop. Ties discovery, the registry and the tail workers together.
//!
//! A single coordinating task owns the [`Discovery`] engine and the push-mode
//! [`DirectoryWatch`]. It never touches file contents: it only admits and
//! retires registry entries and spawns one [`run_worker`] task per admitted
//! path. Records flow from the workers through the [`Router`] to the sink.
//!
//! ```text
//!  periodic scan ──┐
//!                  ├──► Registry::admit ──► run_worker ──► RouterHandle ──► Router ──► Sink
//!  notify events ──┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use loggy_core::config::{Config, StartAt};
use loggy_core::Decoder;

use crate::backoff::Backoff;
use crate::discovery::{DirEvent, DirEventKind, DirectoryWatch, Discovery};
use crate::error::{Error, Result};
use crate::registry::{Admission, Registry};
use crate::router::{Router, RouterHandle, RouterStats, StatsSnapshot};
use crate::sink::Sink;
use crate::tail::{run_worker, TailOptions, WorkerContext};

/// The tailing engine.
///
/// Build one with [`Tailer::new`], keep a [`CancellationToken`] for
/// shutdown, then drive it with [`Tailer::run`].
pub struct Tailer<S> {
    config: Config,
    registry: Registry,
    router: Router<S>,
    handle: RouterHandle,
}

impl<S: Sink> Tailer<S> {
    pub fn new(config: Config, sink: S) -> Result<Self> {
        config.validate().map_err(|e| Error::Config(e.to_string()))?;
        let (router, handle) = Router::new(&config.router, sink);
        Ok(Self {
            config,
            registry: Registry::new(),
            router,
            handle,
        })
    }

    /// Shared view of the files currently under tail.
    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    /// Live delivery counters.
    pub fn stats(&self) -> Arc<RouterStats> {
        self.handle.stats()
    }

    /// Run until `shutdown` is cancelled, then retire every file, drain the
    /// delivery queue (bounded by `router.drain_timeout_ms`) and return the
    /// final counters.
    ///
    /// Only configuration problems are returned as errors; a missing or
    /// unreadable log directory is retried on the discovery backoff.
    pub async fn run(self, shutdown: CancellationToken) -> Result<StatsSnapshot> {
        let Self {
            config,
            registry,
            router,
            handle,
        } = self;

        let discovery = Discovery::from_config(&config.discovery)?;
        info!(
            directory = %discovery.directory().display(),
            include = ?config.discovery.include,
            exclude = ?config.discovery.exclude,
            "starting log tailer"
        );

        let mut router_task = tokio::spawn(router.run());

        let mut watch_loop = WatchLoop {
            discovery,
            registry: registry.clone(),
            ctx: WorkerContext {
                decoder: Decoder::new(config.tail.format),
                router: handle.clone(),
                registry,
                poll_interval: config.tail.poll_interval(),
                options: TailOptions::from_config(&config.tail),
            },
            workers: JoinSet::new(),
            watch: None,
            backoff: Backoff::new(
                config.discovery.backoff_initial(),
                config.discovery.backoff_max(),
            ),
            rescan_interval: config.discovery.rescan_interval(),
            new_file_start: config.tail.new_file_start,
            initial_scan_done: false,
        };
        watch_loop.run(&shutdown).await;
        watch_loop.stop().await;

        handle.close();
        let stats = match tokio::time::timeout(config.router.drain_timeout(), &mut router_task).await {
            Ok(Ok(stats)) => stats,
            Ok(Err(e)) => {
                error!(error = %e, "record router task failed");
                handle.stats().snapshot()
            }
            Err(_) => {
                router_task.abort();
                warn!(
                    undelivered = handle.len(),
                    "timed out draining records to the sink"
                );
                handle.stats().snapshot()
            }
        };

        info!(
            routed = stats.routed,
            delivered = stats.delivered,
            dropped_overflow = stats.dropped_overflow,
            dropped_sink = stats.dropped_sink,
            decode_failures = stats.decode_failures,
            "log tailer stopped"
        );
        Ok(stats)
    }
}

struct WatchLoop {
    discovery: Discovery,
    registry: Registry,
    ctx: WorkerContext,
    workers: JoinSet<()>,
    watch: Option<DirectoryWatch>,
    backoff: Backoff,
    rescan_interval: Duration,
    new_file_start: StartAt,
    initial_scan_done: bool,
}

impl WatchLoop {
    async fn run(&mut self, shutdown: &CancellationToken) {
        let mut next_scan = Instant::now();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                _ = tokio::time::sleep_until(next_scan) => {
                    next_scan = Instant::now() + self.rescan().await;
                }

                batch = next_batch(&mut self.watch) => match batch {
                    Some(events) => {
                        if self.handle_events(events).await {
                            next_scan = Instant::now();
                        }
                    }
                    None => {
                        debug!("file watch backend closed, falling back to scanning");
                        self.watch = None;
                        next_scan = Instant::now();
                    }
                },

                Some(joined) = self.workers.join_next(), if !self.workers.is_empty() => {
                    log_worker_exit(joined);
                }
            }
        }
    }

    /// Reconcile the registry with the directory. Returns the delay until
    /// the next scan.
    async fn rescan(&mut self) -> Duration {
        // Subscribe before scanning so a file created in between is seen by
        // at least one of the two.
        if self.watch.is_none() {
            match self.discovery.subscribe() {
                Ok(watch) => {
                    debug!(directory = %self.discovery.directory().display(), "watching log directory");
                    self.watch = Some(watch);
                }
                Err(e) => debug!(error = %e, "file watch unavailable, relying on periodic scan"),
            }
        }

        match self.discovery.scan_async().await {
            Ok(found) => {
                if self.backoff.is_backing_off() {
                    info!(directory = %self.discovery.directory().display(), "log directory available");
                }
                self.backoff.reset();

                // Files already there when tailing begins are read from their end.
                let start_at = if self.initial_scan_done {
                    self.new_file_start
                } else {
                    StartAt::End
                };
                for path in &found {
                    self.admit(path, start_at);
                }
                self.initial_scan_done = true;
                self.rescan_interval
            }
            Err(e) => {
                let delay = self.backoff.next_delay();
                warn!(
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "log discovery failed"
                );
                self.watch = None;
                delay
            }
        }
    }

    /// Apply a batch of push-mode events. Returns whether a full rescan
    /// should run now.
    async fn handle_events(&mut self, events: Vec<DirEvent>) -> bool {
        let mut rescan = false;
        let mut untracked = Vec::new();
        for event in events {
            match event.kind {
                DirEventKind::Appeared | DirEventKind::Changed => {
                    if !self.registry.wake(&event.path) {
                        untracked.push(event.path);
                    }
                }
                DirEventKind::Removed => {
                    // The worker confirms the removal after its grace polls.
                    self.registry.wake(&event.path);
                }
                DirEventKind::DirectoryLost => {
                    warn!(directory = %event.path.display(), "log directory removed");
                    self.watch = None;
                    rescan = true;
                }
            }
        }

        if !untracked.is_empty() {
            for path in regular_files(untracked).await {
                self.admit(&path, self.new_file_start);
            }
        }
        rescan
    }

    fn admit(&mut self, path: &Path, start_at: StartAt) {
        if let Admission::Admitted(lease) = self.registry.admit(path) {
            info!(
                path = %lease.path.display(),
                source = %lease.source_name,
                ?start_at,
                "tailing log file"
            );
            self.workers.spawn(run_worker(lease, start_at, self.ctx.clone()));
        }
    }

    /// Retire every file and wait for the workers to finish their in-flight
    /// reads.
    async fn stop(&mut self) {
        self.watch = None;
        let retired = self.registry.retire_all();
        debug!(retired, "stopping tail workers");
        while let Some(joined) = self.workers.join_next().await {
            log_worker_exit(joined);
        }
    }
}

/// Keep the paths that name regular files. Subdirectories and paths gone
/// again by now are dropped. The stats run on the blocking pool.
async fn regular_files(mut paths: Vec<PathBuf>) -> Vec<PathBuf> {
    paths.dedup();
    tokio::task::spawn_blocking(move || {
        paths.retain(|path| path.is_file());
        paths
    })
    .await
    .unwrap_or_else(|e| {
        error!(error = %e, "checking new log files failed");
        Vec::new()
    })
}

async fn next_batch(watch: &mut Option<DirectoryWatch>) -> Option<Vec<DirEvent>> {
    match watch {
        Some(watch) => watch.next_batch().await,
        None => std::future::pending().await,
    }
}

fn log_worker_exit(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "tail worker panicked");
        }
    }
}
