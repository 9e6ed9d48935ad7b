//! Runs an external command-line tool on behalf of a control plane, one background job
//! at a time, and lets any number of viewers tail each job's output live.

mod actors;
pub mod console;
pub mod context;
pub mod errors;
mod events;
pub mod intercept;
mod job;
pub mod sink;
mod streamer;
pub mod tool;
pub mod types;

pub use actors::pool::{spawn_shutdown_watchdog, ExecutionPool, Finished};
pub use context::{Context, PoolConfig};
pub use events::JobState;
pub use job::{CancelFlag, Job, CANCELLED_FOOTER, SUCCESS_FOOTER};
pub use streamer::{LogStreamer, StreamStart};
pub use tool::{Program, Registry, Tool};
