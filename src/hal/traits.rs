use anyhow::Result;
use async_trait::async_trait;
use crossbeam_channel::Receiver;
use super::types::{DeviceConfig, DeviceFrame};

/// Acquisition device feeding numbered frames to the recorder.
///
/// Transport and protocol details stay behind this trait.
#[async_trait]
pub trait AcquisitionDevice: Send {
    /// Start streaming with `config`
    async fn start(&mut self, config: &DeviceConfig) -> Result<()>;

    /// Stop streaming; frames already queued stay readable
    async fn stop(&mut self) -> Result<()>;

    /// Receiver for streamed frames; disconnects when the stream ends
    fn frames(&self) -> Receiver<DeviceFrame>;

    /// True once the device is gone for good
    fn is_disconnected(&self) -> bool;
}
