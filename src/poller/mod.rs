//! Poller module - periodic sampling of coils and discrete inputs.
//!
//! - Per-task lifecycle record (user intent, running, visibility suspension)
//! - Change and failure notifications
//! - Supervisor owning one polling loop per resource kind

mod event;
mod state;
mod supervisor;

pub use event::{PollEvent, ResourceKind};
pub use state::{diff, TaskState, TaskStatus};
pub use supervisor::{
    Supervisor, SupervisorBuilder, SupervisorConfig, DEFAULT_EVENT_CAPACITY,
    DEFAULT_POLL_INTERVAL, DEFAULT_SAMPLE_COUNT,
};
