pub mod header;
pub mod sink;
pub mod state;

pub use header::{ChannelSpec, FileFormat, RecordHeader, UNKNOWN_RECORD_COUNT};
pub use sink::{Downstream, MemorySink, NullSink, RecordSink};
pub use state::StageState;
