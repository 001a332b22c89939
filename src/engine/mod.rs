pub mod adapter;
pub mod builder;
pub mod clock;
pub mod kernel;

pub use adapter::{BatteryObserver, FrameAdapter, FrameLayout, LeadOffObserver};
pub use builder::{FilterRegistry, Pipeline, PipelineBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use kernel::{RecorderRuntime, RecorderStatus};
