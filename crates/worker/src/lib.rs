pub mod progression_worker;

// Re-export main types
pub use progression_worker::{run_timer_ticker, Collaborators, ProgressionWorker, WorkerConfig};
