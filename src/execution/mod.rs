//! Pipeline execution engine

pub mod cancel;
pub mod engine;

pub use cancel::Cancellation;
pub use engine::{
    EngineSettings, EventHandler, ExecutionEngine, ExecutionEvent, ImageInfo, RunOutcome,
};
