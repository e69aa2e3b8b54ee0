//! Processing State
//!
//! Run-scoped counters and cursor for the batch engine, plus derived
//! progress statistics. Mutations happen only at the wave barrier, so the
//! struct itself needs no internal locking.

use chrono::{DateTime, Utc};

use super::checkpoint::Checkpoint;

#[derive(Debug, Clone)]
pub struct ProcessingState {
    pub processed_count: u64,
    pub error_count: u64,
    /// Highest row index whose attempt (success or failure) has completed.
    /// -1 before any work; only ever advances.
    pub last_processed_index: i64,
    pub start_time: DateTime<Utc>,
}

impl ProcessingState {
    pub fn new() -> Self {
        Self {
            processed_count: 0,
            error_count: 0,
            last_processed_index: -1,
            start_time: Utc::now(),
        }
    }

    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        Self {
            processed_count: checkpoint.processed_count,
            error_count: checkpoint.error_count,
            last_processed_index: checkpoint.last_index,
            start_time: checkpoint.start_time,
        }
    }

    pub fn record_success(&mut self, index: usize) {
        self.processed_count += 1;
        self.last_processed_index = self.last_processed_index.max(index as i64);
    }

    /// A failed classification still advances the cursor: the row has been
    /// attempted and is never retried within the same run.
    pub fn record_failure(&mut self, index: usize) {
        self.error_count += 1;
        self.processed_count += 1;
        self.last_processed_index = self.last_processed_index.max(index as i64);
    }

    pub fn progress_stats(&self, total_rows: usize) -> ProgressStats {
        let elapsed_secs =
            (Utc::now() - self.start_time).num_milliseconds().max(0) as f64 / 1000.0;
        let rate = if elapsed_secs > 0.0 {
            self.processed_count as f64 / elapsed_secs
        } else {
            0.0
        };
        let remaining_rows = total_rows as i64 - self.last_processed_index - 1;
        let eta_secs = if rate > 0.0 {
            remaining_rows.max(0) as f64 / rate
        } else {
            0.0
        };
        let success_rate_pct = if self.processed_count > 0 {
            (self.processed_count - self.error_count) as f64 / self.processed_count as f64 * 100.0
        } else {
            0.0
        };

        ProgressStats {
            processed_count: self.processed_count,
            error_count: self.error_count,
            elapsed_secs,
            rate,
            eta_secs,
            success_rate_pct,
            current_index: self.last_processed_index + 1,
            total_rows,
        }
    }
}

impl Default for ProcessingState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct ProgressStats {
    pub processed_count: u64,
    pub error_count: u64,
    pub elapsed_secs: f64,
    pub rate: f64,
    pub eta_secs: f64,
    pub success_rate_pct: f64,
    pub current_index: i64,
    pub total_rows: usize,
}

impl std::fmt::Display for ProgressStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Progress: {}/{} tickets | Rate: {:.2} tickets/sec | Est. remaining time: {:.2} minutes | Success rate: {:.2}%",
            self.current_index,
            self.total_rows,
            self.rate,
            self.eta_secs / 60.0,
            self.success_rate_pct,
        )
    }
}

impl ProgressStats {
    pub fn final_summary(&self) -> String {
        format!(
            "Processing completed:\n\
             Total tickets processed: {}\n\
             Successful: {}\n\
             Errors: {}\n\
             Total time: {:.2} minutes\n\
             Average rate: {:.2} tickets/sec\n\
             Success rate: {:.2}%",
            self.processed_count,
            self.processed_count - self.error_count,
            self.error_count,
            self.elapsed_secs / 60.0,
            self.rate,
            self.success_rate_pct,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state() {
        let state = ProcessingState::new();
        assert_eq!(state.processed_count, 0);
        assert_eq!(state.error_count, 0);
        assert_eq!(state.last_processed_index, -1);
    }

    #[test]
    fn test_record_success_advances_cursor() {
        let mut state = ProcessingState::new();
        state.record_success(0);
        state.record_success(3);
        assert_eq!(state.processed_count, 2);
        assert_eq!(state.last_processed_index, 3);
    }

    #[test]
    fn test_cursor_never_regresses() {
        let mut state = ProcessingState::new();
        state.record_success(5);
        // Out-of-order completion within a wave.
        state.record_failure(2);
        assert_eq!(state.last_processed_index, 5);
        assert_eq!(state.processed_count, 2);
        assert_eq!(state.error_count, 1);
    }

    #[test]
    fn test_failure_counts_as_processed() {
        let mut state = ProcessingState::new();
        state.record_failure(0);
        assert_eq!(state.processed_count, 1);
        assert_eq!(state.error_count, 1);
        assert!(state.processed_count >= state.error_count);
    }

    #[test]
    fn test_stats_with_no_work_has_no_division_by_zero() {
        let state = ProcessingState::new();
        let stats = state.progress_stats(100);
        assert_eq!(stats.success_rate_pct, 0.0);
        assert_eq!(stats.eta_secs, 0.0);
        assert_eq!(stats.current_index, 0);
        assert_eq!(stats.total_rows, 100);
    }

    #[test]
    fn test_success_rate_bounds() {
        let mut state = ProcessingState::new();
        for i in 0..8 {
            state.record_success(i);
        }
        state.record_failure(8);
        state.record_failure(9);
        let stats = state.progress_stats(10);
        assert!(stats.success_rate_pct > 0.0 && stats.success_rate_pct <= 100.0);
        assert_eq!(stats.success_rate_pct, 80.0);
        assert_eq!(
            stats.processed_count,
            stats.error_count + (stats.processed_count - stats.error_count)
        );
    }

    #[test]
    fn test_progress_message_format() {
        let mut state = ProcessingState::new();
        state.record_success(0);
        let message = state.progress_stats(2).to_string();
        assert!(message.starts_with("Progress: 1/2 tickets"));
        assert!(message.contains("Success rate: 100.00%"));
    }
}
