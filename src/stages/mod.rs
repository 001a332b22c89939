//! Record transform stages. Each stage is a [`RecordSink`](crate::core::RecordSink)
//! that re-derives the header and forwards to its own downstream sinks.

pub mod filter;
pub mod join;
pub mod removal;
pub mod subsample;

pub use filter::{SampleFilter, SignalFilterStage};
pub use join::RecordJoinStage;
pub use removal::ChannelRemovalStage;
pub use subsample::FrequencySubsamplingStage;
