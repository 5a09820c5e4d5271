pub mod channels;
pub mod status_store;

pub use channels::{ChannelHandle, ChannelKind, ChannelSet, ChannelState};
pub use status_store::{Observed, StatusCounts, StatusStore, WriteOutcome};
