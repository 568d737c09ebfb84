use indexmap::IndexSet;
use tokio::spawn;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::device::types::PeripheralAddress;

/// One bounded discovery attempt.
///
/// The timeout task is owned by the cycle: dropping the cycle (explicit stop) cancels it, and a
/// fired timeout only reports the cycle id, so the link ends each cycle exactly once.
#[derive(Debug)]
pub struct ScanCycle {
    id: u64,
    seen: IndexSet<PeripheralAddress>,
    target_name: String,
    timeout: CancellationToken,
}

impl ScanCycle {
    pub fn start<M: Send + 'static>(
        id: u64,
        target_name: &str,
        parent: &CancellationToken,
        duration: Duration,
        notify: UnboundedSender<M>,
        on_timeout: fn(u64) -> M,
    ) -> Self {
        let timeout = parent.child_token();
        let timeout_clone = timeout.clone();

        spawn(async move {
            tokio::select! {
                _ = timeout_clone.cancelled() => {},
                _ = sleep(duration) => {
                    let _ = notify.send(on_timeout(id));
                },
            }
        });

        ScanCycle {
            id,
            seen: IndexSet::new(),
            target_name: target_name.to_string(),
            timeout,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Records a discovery event, returning true only the first time a peripheral advertising the
    /// target name is seen in this cycle. Nameless advertisements are not recorded, the name often
    /// arrives with a later scan response.
    pub fn observe(&mut self, address: &PeripheralAddress, name: Option<&str>) -> bool {
        let Some(name) = name else {
            return false;
        };

        if !self.seen.insert(address.clone()) {
            return false;
        }

        name == self.target_name
    }

    pub fn seen(&self) -> usize {
        self.seen.len()
    }
}

impl Drop for ScanCycle {
    fn drop(&mut self) {
        self.timeout.cancel();
    }
}
