use rayon::prelude::*;
use tracing::{debug, warn};

use crate::domain::Source;
use crate::error::KiraError;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_WORKERS: usize = 4;

/// Result of one batch, carrying the keys it was dispatched with.
#[derive(Debug)]
pub struct BatchOutcome<K, R> {
    pub keys: Vec<K>,
    pub result: Result<R, KiraError>,
}

/// Splits keys into fixed-size batches and runs them on a bounded pool.
///
/// A batch that fails is reported as [`KiraError::SourceUnavailable`] for its
/// own keys only; the other batches are unaffected.
#[derive(Debug, Clone, Copy)]
pub struct BatchDispatcher {
    source: Source,
    batch_size: usize,
    workers: usize,
}

impl BatchDispatcher {
    pub fn new(source: Source, batch_size: usize, workers: usize) -> Self {
        Self {
            source,
            batch_size: batch_size.max(1),
            workers: workers.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn run<K, R, F>(&self, keys: &[K], fetch: F) -> Vec<BatchOutcome<K, R>>
    where
        K: Clone + Send + Sync,
        R: Send,
        F: Fn(&[K]) -> Result<R, KiraError> + Sync,
    {
        if keys.is_empty() {
            return Vec::new();
        }
        let chunks: Vec<&[K]> = keys.chunks(self.batch_size).collect();
        debug!(
            source = %self.source,
            keys = keys.len(),
            batches = chunks.len(),
            workers = self.workers,
            "dispatching batches"
        );

        let run_one = |chunk: &&[K]| self.run_batch(chunk, &fetch);
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
        {
            Ok(pool) => pool.install(|| chunks.par_iter().map(run_one).collect()),
            Err(err) => {
                warn!(error = %err, "worker pool unavailable, running batches in sequence");
                chunks.iter().map(run_one).collect()
            }
        }
    }

    fn run_batch<K, R, F>(&self, chunk: &[K], fetch: &F) -> BatchOutcome<K, R>
    where
        K: Clone,
        F: Fn(&[K]) -> Result<R, KiraError>,
    {
        let result = fetch(chunk).map_err(|err| {
            warn!(
                source = %self.source,
                keys = chunk.len(),
                error = %err,
                "batch failed, annotations left empty"
            );
            KiraError::SourceUnavailable {
                service: self.source,
                message: err.to_string(),
            }
        });
        BatchOutcome {
            keys: chunk.to_vec(),
            result,
        }
    }
}
