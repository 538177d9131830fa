use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

/// The sending half of a promoted replica connection's write channel. The
/// actual socket write happens in that connection's own task; this is just
/// the handle the registry fans writes out through.
#[derive(Clone)]
pub struct ReplicaSink {
    tx: mpsc::Sender<Bytes>,
}

impl ReplicaSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }

    async fn send(&self, bytes: Bytes) -> bool {
        self.tx.send(bytes).await.is_ok()
    }
}

/// Every connection currently promoted to a replica-propagation sink,
/// behind a single mutex. `propagate` holds that mutex for the full
/// encode-once/broadcast-to-all pass, which is what keeps every replica's
/// view of the command stream in the same order the primary applied it.
#[derive(Default)]
pub struct ReplicaRegistry {
    replicas: Mutex<Vec<ReplicaSink>>,
}

impl ReplicaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn attach(&self, sink: ReplicaSink) {
        self.replicas.lock().await.push(sink);
    }

    /// Fans `bytes` out to every attached replica, pruning any whose
    /// channel has gone away (send failure, standing in for an observed
    /// disconnect on that connection).
    pub async fn propagate(&self, bytes: Bytes) {
        let mut replicas = self.replicas.lock().await;
        let mut live = Vec::with_capacity(replicas.len());
        for sink in replicas.drain(..) {
            if sink.send(bytes.clone()).await {
                live.push(sink);
            }
        }
        *replicas = live;
    }

    pub async fn len(&self) -> usize {
        self.replicas.lock().await.len()
    }
}
