//! Acquisition device seam: the frame source the recorder drains.

pub mod mock;
pub mod traits;
pub mod types;

pub use mock::SimulatedDevice;
pub use traits::AcquisitionDevice;
pub use types::{DeviceChannel, DeviceConfig, DeviceFrame};
