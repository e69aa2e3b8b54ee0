pub mod checkpoint;
pub mod processor;
pub mod state;

pub use checkpoint::{Checkpoint, CheckpointStore, DEFAULT_KEEP_LAST};
pub use processor::{save_current_results, ProcessorOptions, TicketProcessor};
pub use state::{ProcessingState, ProgressStats};
