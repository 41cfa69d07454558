//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `EntryState`: the Pending / Claimed / Done lifecycle of a frontier entry
//! - `TaskState`: the strategy-selection state machine of a whole task

mod entry_state;
mod task_state;

// Re-export main types
pub use entry_state::EntryState;
pub use task_state::TaskState;
