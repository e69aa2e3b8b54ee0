//! Ticket Processor
//!
//! The batch engine. Drives a wave-based loop over row indices: each wave
//! dispatches up to `wave_size` concurrent classification tasks (bounded by
//! `parallel_requests` semaphore permits), joins them all at a barrier,
//! applies the outcomes in index order, and checkpoints on cadence. A single
//! row's failure is isolated; anything escaping the per-row boundary aborts
//! the run.

use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app_config::cfg;
use crate::error::{AppError, AppResult};
use crate::prompt::{Classification, Classify};
use crate::table::TicketTable;

use super::checkpoint::{Checkpoint, CheckpointStore, DEFAULT_KEEP_LAST};
use super::state::{ProcessingState, ProgressStats};

#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    pub input_file: PathBuf,
    pub output_file: PathBuf,
    pub output_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub keep_last: usize,
    /// Concurrency ceiling for in-flight classification calls.
    pub parallel_requests: usize,
    /// Wave width: rows dispatched and awaited together.
    pub wave_size: usize,
    /// Checkpoint cadence, in completed tickets.
    pub checkpoint_interval: u64,
}

impl ProcessorOptions {
    pub fn from_env() -> Self {
        Self {
            input_file: cfg.input_file.clone(),
            output_file: cfg.output_file.clone(),
            output_dir: cfg.output_dir.clone(),
            checkpoint_dir: cfg.checkpoint_dir.clone(),
            keep_last: DEFAULT_KEEP_LAST,
            parallel_requests: cfg.parallel_requests,
            wave_size: cfg.parallel_batch_size,
            checkpoint_interval: cfg.batch_size,
        }
    }
}

/// Outcome of one row's attempt, produced inside a spawned task and applied
/// at the wave barrier.
enum RowOutcome {
    Classified(Classification),
    Failed,
    Cancelled,
}

pub struct TicketProcessor<C: Classify + 'static> {
    classifier: Arc<C>,
    checkpoints: CheckpointStore,
    options: ProcessorOptions,
}

impl<C: Classify + 'static> TicketProcessor<C> {
    pub fn new(classifier: Arc<C>, options: ProcessorOptions) -> Self {
        let checkpoints =
            CheckpointStore::new(options.checkpoint_dir.clone(), options.keep_last);
        Self {
            classifier,
            checkpoints,
            options,
        }
    }

    /// Run the batch to completion. With `resume` set, the latest checkpoint
    /// (if any) supplies the table and state; otherwise the input file is
    /// loaded fresh. Returns the final statistics on success.
    pub async fn run(&self, resume: bool, shutdown: CancellationToken) -> AppResult<ProgressStats> {
        // A zero wave width would never advance the cursor, and a zero
        // permit count would strand every task on the semaphore.
        if self.options.wave_size == 0 {
            return Err(AppError::Setup(
                "wave size must be at least 1".to_string(),
            ));
        }
        if self.options.parallel_requests == 0 {
            return Err(AppError::Setup(
                "parallel requests must be at least 1".to_string(),
            ));
        }

        let (mut table, mut state) = self.initialize(resume)?;
        table.ensure_output_columns();

        let total_rows = table.len();
        let mut count_at_last_checkpoint = state.processed_count;
        let semaphore = Arc::new(Semaphore::new(self.options.parallel_requests));

        let mut next_index = (state.last_processed_index + 1).max(0) as usize;
        tracing::info!(
            "Processing {} tickets starting at index {} (wave={}, parallel={})",
            total_rows,
            next_index,
            self.options.wave_size,
            self.options.parallel_requests,
        );

        while next_index < total_rows {
            if shutdown.is_cancelled() {
                tracing::warn!("Shutdown requested, stopping before next wave");
                return Err(AppError::Interrupted);
            }

            let wave_end = (next_index + self.options.wave_size).min(total_rows);
            let outcomes = self
                .run_wave(&table, next_index..wave_end, &semaphore, &shutdown)
                .await?;

            // A cancelled task means the wave was cut short; discard the
            // whole wave so the cursor never passes an unattempted row.
            if outcomes
                .iter()
                .any(|(_, outcome)| matches!(outcome, RowOutcome::Cancelled))
            {
                tracing::warn!(
                    "Wave {}-{} cancelled mid-flight, progress since last checkpoint is dropped",
                    next_index,
                    wave_end - 1,
                );
                return Err(AppError::Interrupted);
            }

            for (index, outcome) in outcomes {
                match outcome {
                    RowOutcome::Classified(classification) => {
                        table.set_classification(index, Some(&classification));
                        state.record_success(index);
                    }
                    RowOutcome::Failed => {
                        table.set_classification(index, None);
                        state.record_failure(index);
                    }
                    RowOutcome::Cancelled => unreachable!("cancelled waves are discarded above"),
                }
            }

            if state.processed_count - count_at_last_checkpoint >= self.options.checkpoint_interval
            {
                match self.checkpoints.save(&Checkpoint::capture(&state, &table)) {
                    Ok(_) => {
                        count_at_last_checkpoint = state.processed_count;
                        tracing::info!("{}", state.progress_stats(total_rows));
                    }
                    Err(e) => {
                        // Not fatal: the run continues from memory, the
                        // replay window just grows until the next good save.
                        tracing::error!(
                            "Error saving checkpoint at index {}: {}",
                            state.last_processed_index,
                            e
                        );
                    }
                }
            }

            next_index = wave_end;
        }

        // Final flush is the entire point of the run; failure here is fatal.
        table.write_csv_path(&self.options.output_file)?;
        let stats = state.progress_stats(total_rows);
        tracing::info!("{}", stats.final_summary());

        Ok(stats)
    }

    fn initialize(&self, resume: bool) -> AppResult<(TicketTable, ProcessingState)> {
        if resume {
            if let Some(checkpoint) = self.checkpoints.load_latest()? {
                tracing::info!(
                    "Resuming from checkpoint. Last processed index: {}",
                    checkpoint.last_index
                );
                let state = ProcessingState::from_checkpoint(&checkpoint);
                return Ok((checkpoint.table, state));
            }
        }

        let table = TicketTable::from_csv_path(&self.options.input_file)?;
        Ok((table, ProcessingState::new()))
    }

    /// Dispatch one task per index and join every one of them before
    /// returning. Task panics are converted to row failures; nothing in a
    /// wave can cancel its siblings.
    async fn run_wave(
        &self,
        table: &TicketTable,
        indices: Range<usize>,
        semaphore: &Arc<Semaphore>,
        shutdown: &CancellationToken,
    ) -> AppResult<Vec<(usize, RowOutcome)>> {
        let mut tasks: Vec<(usize, JoinHandle<RowOutcome>)> =
            Vec::with_capacity(indices.len());

        for index in indices {
            let (title, summary) = table.ticket(index)?;
            let classifier = Arc::clone(&self.classifier);
            let semaphore = Arc::clone(semaphore);
            let shutdown = shutdown.clone();

            tasks.push((
                index,
                tokio::spawn(async move {
                    let _permit = tokio::select! {
                        _ = shutdown.cancelled() => return RowOutcome::Cancelled,
                        permit = semaphore.acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => return RowOutcome::Cancelled,
                        },
                    };

                    tokio::select! {
                        _ = shutdown.cancelled() => RowOutcome::Cancelled,
                        result = classifier.classify(&title, &summary) => match result {
                            Ok(classification) => RowOutcome::Classified(classification),
                            Err(e) => {
                                tracing::error!(
                                    "Error processing ticket {} '{}': {}",
                                    index,
                                    title,
                                    e
                                );
                                RowOutcome::Failed
                            }
                        },
                    }
                }),
            ));
        }

        let (row_indices, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        let joined = futures::future::join_all(handles).await;

        let mut outcomes = Vec::with_capacity(row_indices.len());
        for (index, result) in row_indices.into_iter().zip(joined) {
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!("Classification task for row {} panicked: {}", index, e);
                    RowOutcome::Failed
                }
            };
            outcomes.push((index, outcome));
        }

        Ok(outcomes)
    }
}

/// Flush the latest checkpoint's table (or the raw input if no checkpoint
/// exists) to a timestamped file in the output directory, without running any
/// classification.
pub fn save_current_results(options: &ProcessorOptions) -> AppResult<PathBuf> {
    let store = CheckpointStore::new(options.checkpoint_dir.clone(), options.keep_last);

    let (mut table, source) = match store.load_latest()? {
        Some(checkpoint) => (checkpoint.table, "checkpoint"),
        None => {
            if !options.input_file.exists() {
                return Err(AppError::Setup(
                    "no checkpoint found and input file does not exist".to_string(),
                ));
            }
            (TicketTable::from_csv_path(&options.input_file)?, "input")
        }
    };
    table.ensure_output_columns();

    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let output_path = options.output_dir.join(format!("results_{timestamp}.csv"));
    table.write_csv_path(&output_path)?;

    tracing::info!(
        "Results saved to: {} (source: {})",
        output_path.display(),
        source
    );
    Ok(output_path)
}
