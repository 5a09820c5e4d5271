pub mod error;
pub mod progress;
pub mod runner;

pub use error::{Stage, StageError};
pub use runner::Pipeline;
