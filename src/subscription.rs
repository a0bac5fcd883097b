use crate::error::{HubError, Result};
use crate::types::{DeviceKey, LoadId, MovementState, Percent};
use tokio::sync::broadcast;

/// Device state change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceChange {
    /// A light's brightness was updated by the hub
    Light { id: LoadId, brightness: Percent },

    /// A shade moved or settled
    Shade {
        id: LoadId,
        position: Percent,
        movement: MovementState,
    },

    /// A device was added to the registry by a topology reconcile
    Added(DeviceKey),

    /// A device was dropped from the registry
    Removed(DeviceKey),
}

impl DeviceChange {
    pub fn key(&self) -> DeviceKey {
        match self {
            DeviceChange::Light { id, .. } => DeviceKey::light(*id),
            DeviceChange::Shade { id, .. } => DeviceKey::shade(*id),
            DeviceChange::Added(key) | DeviceChange::Removed(key) => *key,
        }
    }
}

/// Device changes published by a [`crate::HubClient`]
///
/// Changes arrive in the order the router applied them. A subscriber that
/// falls more than the channel capacity behind skips ahead and is told how
/// many changes it missed.
pub struct StateReceiver {
    rx: broadcast::Receiver<DeviceChange>,
}

fn link_closed() -> HubError {
    HubError::ConnectionLost("hub link shut down".to_string())
}

impl StateReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<DeviceChange>) -> Self {
        Self { rx }
    }

    /// Wait for the next change
    ///
    /// Fails with [`HubError::MissedChanges`] after falling behind (the next
    /// call resumes with the oldest change still buffered) and with
    /// [`HubError::ConnectionLost`] once the client has shut down.
    pub async fn recv(&mut self) -> Result<DeviceChange> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => link_closed(),
            broadcast::error::RecvError::Lagged(missed) => HubError::MissedChanges(missed),
        })
    }

    /// Take a buffered change without waiting; `None` when there is none
    pub fn try_recv(&mut self) -> Result<Option<DeviceChange>> {
        match self.rx.try_recv() {
            Ok(change) => Ok(Some(change)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(link_closed()),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                Err(HubError::MissedChanges(missed))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_key_changes_by_device() {
        let change = DeviceChange::Shade {
            id: 1032,
            position: 40,
            movement: MovementState::Closing,
        };
        assert_eq!(change.key(), DeviceKey::shade(1032));
        assert_eq!(DeviceChange::Added(DeviceKey::light(4)).key(), DeviceKey::light(4));
    }

    #[tokio::test]
    async fn should_report_missed_changes_then_resume() {
        let (tx, rx) = broadcast::channel(2);
        let mut receiver = StateReceiver::new(rx);
        for brightness in [10, 20, 30] {
            tx.send(DeviceChange::Light { id: 1, brightness }).unwrap();
        }

        assert!(matches!(receiver.recv().await, Err(HubError::MissedChanges(1))));
        assert_eq!(
            receiver.recv().await.unwrap(),
            DeviceChange::Light { id: 1, brightness: 20 }
        );
    }

    #[tokio::test]
    async fn should_report_closed_link() {
        let (tx, rx) = broadcast::channel(4);
        let mut receiver = StateReceiver::new(rx);
        tx.send(DeviceChange::Removed(DeviceKey::light(2))).unwrap();
        drop(tx);

        assert_eq!(
            receiver.try_recv().unwrap(),
            Some(DeviceChange::Removed(DeviceKey::light(2)))
        );
        assert!(matches!(receiver.try_recv(), Err(HubError::ConnectionLost(_))));
        assert!(matches!(receiver.recv().await, Err(HubError::ConnectionLost(_))));
    }
}
