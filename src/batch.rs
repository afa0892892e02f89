//! Checkpoint-resumable batch orchestration.
//!
//! Items already recorded in the checkpoint are skipped up front. The rest run
//! on a fixed-size worker pool; each worker executes the whole per-item
//! pipeline lock-free and sends its outcome over a channel. The calling thread
//! is the single aggregator: it owns the run counters and performs every
//! checkpoint write, so an item is only marked done once its output is saved
//! and its key is durably logged.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant, SystemTime};

use rayon::prelude::*;
use tracing::{error, info};

use crate::checkpoint::{item_key, CheckpointStore};
use crate::config::BatchOptions;
use crate::engine::{collect_images, ItemReport, WatermarkEngine};
use crate::error::{Error, Result};

/// Aggregate counters for one batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStatistics {
    /// Items submitted.
    pub total: usize,
    /// Items skipped because the checkpoint already had them.
    pub skipped: usize,
    /// Items newly processed and checkpointed in this run.
    pub processed: usize,
    /// Items that failed and remain eligible for retry.
    pub failed: usize,
    /// Wall-clock start of the run.
    pub started_at: SystemTime,
    /// Wall time spent in the run.
    pub elapsed: Duration,
}

impl RunStatistics {
    fn new(total: usize) -> Self {
        Self {
            total,
            skipped: 0,
            processed: 0,
            failed: 0,
            started_at: SystemTime::now(),
            elapsed: Duration::ZERO,
        }
    }

    /// Newly processed items per second.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.processed as f64 / secs
        } else {
            0.0
        }
    }

    /// Newly processed items per minute.
    #[must_use]
    pub fn per_minute(&self) -> f64 {
        self.throughput() * 60.0
    }
}

impl fmt::Display for RunStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total: {}, Skipped: {}, Processed: {}, Failed: {}, Time: {:.2}s, Speed: {:.2} images/minute",
            self.total,
            self.skipped,
            self.processed,
            self.failed,
            self.elapsed.as_secs_f64(),
            self.per_minute()
        )
    }
}

/// Terminal state of one item as reported by a worker.
#[derive(Debug)]
enum ItemOutcome {
    Done(ItemReport),
    Failed { input: PathBuf, error: Error },
}

/// Drives a [`WatermarkEngine`] over many images with resumable progress.
pub struct BatchProcessor {
    engine: WatermarkEngine,
    checkpoint: CheckpointStore,
    workers: usize,
}

impl BatchProcessor {
    /// Combine an engine, a loaded checkpoint, and a worker count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Misconfigured`] if `workers` is zero.
    pub fn new(
        engine: WatermarkEngine,
        checkpoint: CheckpointStore,
        workers: usize,
    ) -> Result<Self> {
        if workers == 0 {
            return Err(Error::Misconfigured("workers must be at least 1".into()));
        }
        Ok(Self {
            engine,
            checkpoint,
            workers,
        })
    }

    /// Build from options: applies engine settings and loads the checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Misconfigured`] for invalid options and
    /// [`Error::Checkpoint`] if the checkpoint cannot be read.
    pub fn from_options(engine: WatermarkEngine, opts: &BatchOptions) -> Result<Self> {
        opts.validate()?;
        let checkpoint = CheckpointStore::load(&opts.checkpoint)?;
        Self::new(engine.with_options(opts), checkpoint, opts.workers)
    }

    /// The checkpoint store.
    #[must_use]
    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    /// Process every supported image directly inside `input_dir`.
    ///
    /// # Errors
    ///
    /// As [`BatchProcessor::process_batch`], plus [`Error::Io`] if
    /// `input_dir` cannot be listed.
    pub fn process_directory(&self, input_dir: &Path, output_dir: &Path) -> Result<RunStatistics> {
        let items = collect_images(input_dir)?;
        self.process_batch(&items, output_dir)
    }

    /// Clean `items` into `output_dir`, skipping checkpointed keys.
    ///
    /// Per-item faults are logged and counted as failed without stopping the
    /// batch; failed items never enter the checkpoint.
    ///
    /// # Errors
    ///
    /// Only batch-wide faults: the output directory cannot be created or the
    /// worker pool cannot start.
    pub fn process_batch(&self, items: &[PathBuf], output_dir: &Path) -> Result<RunStatistics> {
        let clock = Instant::now();
        let mut stats = RunStatistics::new(items.len());
        std::fs::create_dir_all(output_dir)?;

        let mut pending: Vec<(&Path, String)> = Vec::with_capacity(items.len());
        for item in items {
            match item_key(item) {
                Ok(key) if self.checkpoint.is_done(&key) => stats.skipped += 1,
                Ok(key) => pending.push((item.as_path(), key)),
                Err(e) => {
                    error!(item = %item.display(), error = %e, "item failed");
                    stats.failed += 1;
                }
            }
        }
        info!(
            total = stats.total,
            skipped = stats.skipped,
            pending = pending.len(),
            workers = self.workers,
            "starting batch"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("watermark-worker-{i}"))
            .build()?;

        let (tx, rx) = mpsc::channel();
        std::thread::scope(|scope| {
            let pending = &pending;
            scope.spawn(move || {
                pool.install(|| {
                    pending.par_iter().for_each_with(tx, |tx, (input, key)| {
                        let output = output_dir.join(key);
                        let outcome = self.run_item(input, &output);
                        // The aggregator drains until every sender is dropped.
                        let _ = tx.send(outcome);
                    });
                });
            });

            for outcome in rx {
                self.record(&mut stats, outcome);
            }
        });

        stats.elapsed = clock.elapsed();
        info!(
            total = stats.total,
            skipped = stats.skipped,
            processed = stats.processed,
            failed = stats.failed,
            seconds = stats.elapsed.as_secs_f64(),
            per_minute = stats.per_minute(),
            "batch complete"
        );
        Ok(stats)
    }

    fn run_item(&self, input: &Path, output: &Path) -> ItemOutcome {
        let run = AssertUnwindSafe(|| self.engine.process_file(input, output));
        let result = match panic::catch_unwind(run) {
            Ok(result) => result,
            Err(payload) => Err(Error::WorkerPanic(panic_message(payload.as_ref()))),
        };
        match result {
            Ok(report) => ItemOutcome::Done(report),
            Err(error) => ItemOutcome::Failed {
                input: input.to_path_buf(),
                error,
            },
        }
    }

    fn record(&self, stats: &mut RunStatistics, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Done(report) => match self.checkpoint.mark_done(&report.key) {
                Ok(()) => {
                    stats.processed += 1;
                    info!(
                        item = %report.key,
                        pass = report.pass.map_or("none", |p| p.name()),
                        regions = report.regions,
                        coverage = report.mask_coverage,
                        "processed"
                    );
                }
                Err(e) => {
                    stats.failed += 1;
                    error!(
                        item = %report.key,
                        error = %e,
                        "output saved but checkpoint write failed"
                    );
                }
            },
            ItemOutcome::Failed { input, error } => {
                stats.failed += 1;
                error!(item = %input.display(), error = %error, "item failed");
            }
        }
    }
}

impl fmt::Debug for BatchProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("checkpoint", &self.checkpoint)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
