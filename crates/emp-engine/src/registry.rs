//! Registrar bus: per-object "registered" notifications.
//!
//! Four independent streams fan accepted objects out to local
//! consumers (typically the RPC façade). Delivery is fire-and-forget:
//! the engine never blocks on a consumer, and a slow or absent consumer
//! loses notifications on its own stream only, so a stuck subscriber
//! can never halt gossip.

use emp_core::{Hash, Txid};
use emp_proto::Message;
use tokio::sync::mpsc;
use tracing::debug;

/// Default per-stream buffer.
pub const DEFAULT_REGISTRY_CAPACITY: usize = 256;

/// Sender half of the registrar bus, owned by the engine.
#[derive(Clone)]
pub struct Registry {
    pubkey_tx: mpsc::Sender<Hash>,
    message_tx: mpsc::Sender<Message>,
    publication_tx: mpsc::Sender<Message>,
    purge_tx: mpsc::Sender<Txid>,
}

/// Receiver half of the registrar bus, handed to the subscriber.
pub struct RegistryReceivers {
    /// Address hashes of registered pubkeys
    pub pubkey: mpsc::Receiver<Hash>,
    /// Registered direct messages
    pub message: mpsc::Receiver<Message>,
    /// Registered publications
    pub publication: mpsc::Receiver<Message>,
    /// Txids of registered purges
    pub purge: mpsc::Receiver<Txid>,
}

/// Creates the four notification streams.
pub fn channel(capacity: usize) -> (Registry, RegistryReceivers) {
    let (pubkey_tx, pubkey) = mpsc::channel(capacity);
    let (message_tx, message) = mpsc::channel(capacity);
    let (publication_tx, publication) = mpsc::channel(capacity);
    let (purge_tx, purge) = mpsc::channel(capacity);
    (
        Registry {
            pubkey_tx,
            message_tx,
            publication_tx,
            purge_tx,
        },
        RegistryReceivers {
            pubkey,
            message,
            publication,
            purge,
        },
    )
}

impl Registry {
    /// Notifies that a pubkey was registered under `addr_hash`.
    pub fn pubkey_registered(&self, addr_hash: Hash) {
        if self.pubkey_tx.try_send(addr_hash).is_err() {
            debug!(hash = %addr_hash, "Dropped pubkey notification");
        }
    }

    /// Notifies that a direct message was registered.
    pub fn message_registered(&self, msg: Message) {
        if self.message_tx.try_send(msg).is_err() {
            debug!("Dropped message notification");
        }
    }

    /// Notifies that a publication was registered.
    pub fn publication_registered(&self, msg: Message) {
        if self.publication_tx.try_send(msg).is_err() {
            debug!("Dropped publication notification");
        }
    }

    /// Notifies that a purge was registered.
    pub fn purge_registered(&self, txid: Txid) {
        if self.purge_tx.try_send(txid).is_err() {
            debug!("Dropped purge notification");
        }
    }
}
