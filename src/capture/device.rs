use crate::error::CaptureErrorKind;
use crate::messages::DeviceEvent;
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc;

/// Binding to an external video encoder / camera recorder
///
/// Implementations report their lifecycle asynchronously on the event sender
/// handed to `start`: `Started` once frames are being encoded, then exactly one
/// `Finalized` after `stop`, or `Error` whenever the device fails on its own.
#[async_trait]
pub trait CaptureDevice: Send {
    /// Begin recording into `output`. An `Err` means nothing was started.
    async fn start(
        &mut self,
        output: &Path,
        events: mpsc::UnboundedSender<DeviceEvent>,
    ) -> Result<(), CaptureErrorKind>;

    /// Ask the device to finish the file; completion arrives as `Finalized`
    async fn stop(&mut self);

    async fn pause(&mut self) -> Result<()>;

    async fn resume(&mut self) -> Result<()>;
}
