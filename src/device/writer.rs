use std::fmt::Debug;
use std::future::Future;
use log::{debug, warn};
use tokio::spawn;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{channel, Sender};
use tokio::time::{timeout, Duration};

use crate::error::LinkError;

/// Writes of one connection, in the order they were started, one at a time.
///
/// The writer task stops once every handle is dropped, which happens when the link leaves
/// `Connected` and forgets its channel.
#[derive(Debug, Clone)]
pub struct SerialWriter {
    queue: Sender<Vec<u8>>,
}

impl SerialWriter {
    /// `write` performs a single characteristic write; a write that outlives `deadline` is
    /// abandoned and the next one starts.
    pub fn spawn<F, Fut, E>(capacity: usize, deadline: Duration, mut write: F) -> Self
    where
        F: FnMut(Vec<u8>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Debug + Send + 'static,
    {
        let (queue, mut pending) = channel::<Vec<u8>>(capacity.max(1));

        spawn(async move {
            while let Some(payload) = pending.recv().await {
                match timeout(deadline, write(payload)).await {
                    Err(_) => warn!("Writing to the peripheral took too long"),
                    Ok(Err(err)) => warn!("Failed to write to the peripheral: {:?}", err),
                    Ok(Ok(())) => {},
                }
            }

            debug!("Peripheral writer stopped");
        });

        SerialWriter { queue }
    }

    /// Queues `payload` without waiting.
    pub fn try_write(&self, payload: Vec<u8>) -> Result<(), LinkError> {
        match self.queue.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(LinkError::WriteQueueFull),
            Err(TrySendError::Closed(_)) => Err(LinkError::WriterClosed),
        }
    }
}
