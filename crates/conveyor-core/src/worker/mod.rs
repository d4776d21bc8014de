//! Worker runtime and job handlers.

pub mod handlers;
pub mod runtime;

pub use handlers::{HandlerRegistry, JobHandler};
pub use runtime::{WorkerRuntime, WorkerStats};
