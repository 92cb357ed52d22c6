use log::debug;

use crate::engine::{RecalibrationEngine, UpdateBuffer};
use crate::error::Result;
use crate::read::RecalObservation;

/// Number of observations a worker handles between two
/// [`ObservationProcessor::on_batch_complete`] calls
pub const BATCH_SIZE: usize = 1024;

/// Resolves a requested thread count (0 = all cores)
#[must_use]
pub fn resolve_threads(num_threads: usize) -> usize {
    if num_threads == 0 {
        num_cpus::get()
    } else {
        num_threads.min(num_cpus::get())
    }
}

/// Trait for types that can process observations in parallel.
///
/// Each worker thread receives its own clone of the processor.
pub trait ObservationProcessor: Send + Clone {
    /// Process a single observation
    fn process_observation<O: RecalObservation + ?Sized>(&mut self, observation: &O) -> Result<()>;

    /// Called when a thread finishes processing a batch
    /// Default implementation does nothing
    fn on_batch_complete(&mut self) -> Result<()> {
        Ok(())
    }

    /// Set the thread ID for this processor
    ///
    /// Each thread calls this method with its own unique ID.
    fn set_tid(&mut self, _tid: usize) {
        // Default implementation does nothing
    }

    /// Get the thread ID for this processor
    fn get_tid(&self) -> Option<usize> {
        None
    }
}

/// Process observations in parallel
///
/// The observations are split into contiguous chunks, one per thread, and
/// every thread works through its chunk in batches of [`BATCH_SIZE`].
///
/// # Arguments
///
/// * `observations` - The observations to process
/// * `processor` - The processor cloned into each thread
/// * `num_threads` - The number of threads to spawn (0 = all cores)
///
/// # Returns
///
/// * `Ok(())` - If all observations were processed successfully
/// * `Err(Error)` - The first error raised by a worker
pub fn process_parallel<O, P>(observations: &[O], processor: P, num_threads: usize) -> Result<()>
where
    O: RecalObservation + Sync,
    P: ObservationProcessor,
{
    if observations.is_empty() {
        return Ok(());
    }
    let num_threads = resolve_threads(num_threads);
    let per_thread = observations.len().div_ceil(num_threads);

    std::thread::scope(|scope| -> Result<()> {
        let mut handles = Vec::with_capacity(num_threads);
        for (tid, chunk) in observations.chunks(per_thread).enumerate() {
            let mut processor = processor.clone();
            processor.set_tid(tid);

            let handle = scope.spawn(move || -> Result<()> {
                for batch in chunk.chunks(BATCH_SIZE) {
                    for observation in batch {
                        processor.process_observation(observation)?;
                    }
                    processor.on_batch_complete()?;
                }
                Ok(())
            });
            handles.push(handle);
        }

        for handle in handles {
            match handle.join() {
                Ok(result) => result?,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        Ok(())
    })
}

/// Feeds observations into a shared [`RecalibrationEngine`]
///
/// Every worker owns its update buffers; the tables are shared.
#[derive(Clone)]
pub struct ParallelRecalibrator<'a> {
    engine: &'a RecalibrationEngine,
    buffer: UpdateBuffer,
    num_processed: usize,
    tid: Option<usize>,
}
impl<'a> ParallelRecalibrator<'a> {
    #[must_use]
    pub fn new(engine: &'a RecalibrationEngine) -> Self {
        Self {
            engine,
            buffer: UpdateBuffer::new(),
            num_processed: 0,
            tid: None,
        }
    }

    /// Accumulates all `observations` with the engine's configured thread count
    pub fn run<O: RecalObservation + Sync>(
        engine: &'a RecalibrationEngine,
        observations: &[O],
    ) -> Result<()> {
        process_parallel(observations, Self::new(engine), engine.args().num_threads)
    }

    /// Number of observations processed by this worker
    #[must_use]
    pub fn num_processed(&self) -> usize {
        self.num_processed
    }
}
impl ObservationProcessor for ParallelRecalibrator<'_> {
    fn process_observation<O: RecalObservation + ?Sized>(&mut self, observation: &O) -> Result<()> {
        self.engine.update_with(observation, &mut self.buffer);
        self.num_processed += 1;
        Ok(())
    }

    fn on_batch_complete(&mut self) -> Result<()> {
        debug!(
            "Worker {:?} processed {} observations",
            self.tid, self.num_processed
        );
        Ok(())
    }

    fn set_tid(&mut self, tid: usize) {
        self.tid = Some(tid);
    }

    fn get_tid(&self) -> Option<usize> {
        self.tid
    }
}
