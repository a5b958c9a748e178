//! In-process broker: the same command/event contract as the gossip loop,
//! carried over a process-local broadcast hub.
//!
//! Backs single-process deployments and the multi-instance integration
//! tests, where several `AppState`s attach to one hub and behave like
//! instances sharing a broker. Unlike the gossip mesh, the hub loops a
//! publish back to its own publisher — the bridge consumer's origin filter
//! drops that copy.

use std::collections::HashSet;
use tokio::sync::{broadcast, mpsc};

use super::broker::{BrokerCommand, BrokerEvent};

/// Hub capacity. Receivers that lag this far behind skip frames, which the
/// attached loop logs — matching the "missing messages, not errors"
/// degradation the broker contract allows.
const HUB_CAPACITY: usize = 1024;

/// A shared in-process broker. Clone it into every attached instance.
#[derive(Clone)]
pub struct InMemoryBroker {
    hub: broadcast::Sender<(String, Vec<u8>)>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (hub, _) = broadcast::channel(HUB_CAPACITY);
        Self { hub }
    }

    /// Attach one instance: returns the command sender and event receiver
    /// that wire into `PubSubBridge` / `spawn_inbound_consumer`, with a task
    /// shuttling between them and the hub.
    pub fn attach(&self) -> (
        mpsc::UnboundedSender<BrokerCommand>,
        mpsc::UnboundedReceiver<BrokerEvent>,
    ) {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<BrokerCommand>();
        let (evt_tx, evt_rx) = mpsc::unbounded_channel::<BrokerEvent>();

        let hub_tx = self.hub.clone();
        let mut hub_rx = self.hub.subscribe();

        tokio::spawn(async move {
            let mut subscriptions: HashSet<String> = HashSet::new();
            loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        match cmd {
                            Some(BrokerCommand::Subscribe(channel)) => {
                                subscriptions.insert(channel);
                            }
                            Some(BrokerCommand::Publish { channel, data }) => {
                                // Err means no attached instance is listening;
                                // nothing to reach, nothing to do.
                                let _ = hub_tx.send((channel, data));
                            }
                            None => break,
                        }
                    }
                    msg = hub_rx.recv() => {
                        match msg {
                            Ok((channel, data)) => {
                                if subscriptions.contains(&channel)
                                    && evt_tx.send(BrokerEvent::Message { channel, data }).is_err()
                                {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                tracing::warn!(skipped, "In-process broker receiver lagged; frames dropped");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        });

        (cmd_tx, evt_rx)
    }

    /// Observe raw hub traffic without attaching an instance. Used by tests
    /// to count publishes (e.g. proving a received frame is not re-published).
    pub fn tap(&self) -> broadcast::Receiver<(String, Vec<u8>)> {
        self.hub.subscribe()
    }
}
