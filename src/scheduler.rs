//! Batch scheduling of one generator over a set of catalog records.
//!
//! Records are shuffled, cut into disjoint batches and handed to a fixed
//! rayon pool. Each batch opens its own [`CacheHandle`], runs the generator
//! over its records in order and closes the handle before reporting back.
//! Results arrive in completion order; the orchestrator must not depend on it.
//!
//! ```text
//! records ──shuffle──▶ [b0][b1][b2]… ──pool──▶ worker: open handle → process* → close
//!                                                   │
//!                     orchestrator ◀── mpsc ────────┘  (results + stats, or a panic)
//! ```
//!
//! Shuffling spreads expensive images (large sources, many variants) across
//! batches. A panic inside a batch loses that batch's results only; it is
//! reported as a [`BatchFailure`] and the remaining batches continue.

use crate::cache::{CacheHandle, CacheStats, CacheStore};
use crate::catalog::ImageRecord;
use crate::process::{EventSink, Generator, ImageResult, ProcessEvent};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::time::Instant;
use tracing::{debug, warn};

/// Disjoint slice of the input handed to one worker.
#[derive(Debug, Clone)]
pub struct Batch {
    pub index: usize,
    pub records: Vec<ImageRecord>,
}

/// Shuffle `records` with `rng` and cut them into batches of at most
/// `batch_size`. The union of the batches is exactly the input.
pub fn make_batches(
    mut records: Vec<ImageRecord>,
    batch_size: usize,
    rng: &mut impl Rng,
) -> Vec<Batch> {
    records.shuffle(rng);
    records
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            records: chunk.to_vec(),
        })
        .collect()
}

/// A batch whose worker panicked. Its images have no results.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub index: usize,
    pub image_count: usize,
    pub message: String,
}

/// Everything collected from one generator run.
#[derive(Debug, Default)]
pub struct SchedulerOutput {
    pub results: Vec<ImageResult>,
    pub stats: CacheStats,
    pub failures: Vec<BatchFailure>,
}

enum BatchOutcome {
    Done {
        results: Vec<ImageResult>,
        stats: CacheStats,
    },
    Panicked(BatchFailure),
}

pub struct BatchScheduler {
    workers: usize,
    batch_size: usize,
    seed: Option<u64>,
    /// `None` runs batches on the calling thread.
    pool: Option<ThreadPool>,
}

impl BatchScheduler {
    /// A scheduler with `workers` parallel workers. With one worker no pool
    /// is created and batches run on the calling thread. A `seed` makes the
    /// shuffle reproducible.
    pub fn new(
        workers: usize,
        batch_size: usize,
        seed: Option<u64>,
    ) -> Result<Self, ThreadPoolBuildError> {
        let workers = workers.max(1);
        let pool = if workers > 1 {
            Some(
                ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|i| format!("picture-press-{i}"))
                    .build()?,
            )
        } else {
            None
        };
        Ok(Self {
            workers,
            batch_size: batch_size.max(1),
            seed,
            pool,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    fn batches(&self, records: Vec<ImageRecord>) -> Vec<Batch> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        make_batches(records, self.batch_size, &mut rng)
    }

    /// Run `generator` over `records`, one cache handle per batch.
    pub fn run(
        &self,
        generator: &dyn Generator,
        store: &CacheStore,
        records: Vec<ImageRecord>,
        events: &EventSink,
    ) -> SchedulerOutput {
        let name = generator.name();
        let image_count = records.len();
        let batches = self.batches(records);
        events.emit(ProcessEvent::GeneratorStarted {
            generator: name.to_string(),
            image_count,
            batch_count: batches.len(),
            workers: self.workers,
        });

        let started = Instant::now();
        let mut output = SchedulerOutput::default();
        let mut collect = |outcome: BatchOutcome| match outcome {
            BatchOutcome::Done { results, stats } => {
                for result in &results {
                    events.emit(ProcessEvent::ImageProcessed {
                        generator: name.to_string(),
                        web_path: result.web_path.clone(),
                        variants: result.variants.clone(),
                        errors: result.errors.iter().map(|e| e.to_string()).collect(),
                    });
                }
                output.stats.absorb(&stats);
                output.results.extend(results);
            }
            BatchOutcome::Panicked(failure) => {
                warn!(
                    generator = name,
                    batch = failure.index,
                    images = failure.image_count,
                    "batch aborted: {}",
                    failure.message
                );
                events.emit(ProcessEvent::BatchFailed {
                    generator: name.to_string(),
                    batch: failure.index,
                    image_count: failure.image_count,
                    message: failure.message.clone(),
                });
                output.failures.push(failure);
            }
        };

        match &self.pool {
            None => {
                for batch in batches {
                    collect(run_batch(generator, store, batch));
                }
            }
            Some(pool) => {
                let (tx, rx) = mpsc::channel();
                pool.in_place_scope(|scope| {
                    for batch in batches {
                        let tx = tx.clone();
                        scope.spawn(move |_| {
                            // Receiver lives until every sender is dropped
                            let _ = tx.send(run_batch(generator, store, batch));
                        });
                    }
                    drop(tx);
                    for outcome in rx {
                        collect(outcome);
                    }
                });
            }
        }

        debug!(
            generator = name,
            images = image_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generator finished"
        );
        output
    }
}

fn run_batch(generator: &dyn Generator, store: &CacheStore, batch: Batch) -> BatchOutcome {
    let Batch { index, records } = batch;
    let image_count = records.len();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut handle = match store.open() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(batch = index, error = %e, "cache unavailable, running uncached");
                let mut handle = CacheHandle::disabled();
                handle.stats_mut().io_errors += 1;
                handle
            }
        };
        let results: Vec<ImageResult> = records
            .iter()
            .map(|record| generator.process(record, &mut handle))
            .collect();
        (results, handle.close())
    }));

    match outcome {
        Ok((results, stats)) => BatchOutcome::Done { results, stats },
        Err(payload) => BatchOutcome::Panicked(BatchFailure {
            index,
            image_count,
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
