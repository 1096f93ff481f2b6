//! The content-addressed object store.
//!
//! One RocksDB database with a column family per object table, fronted
//! by an in-memory `Hash → ObjectKind` index. A single exclusive lock
//! covers every operation so the index and the backend mutate as one;
//! the index is rebuilt from the column families on open and is the
//! sole source of truth for `contains` afterwards.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use emp_core::{Hash, Timestamp, WireDecode, WireEncode, HASH_LEN, IV_LEN};
use emp_proto::{EncryptedPubkey, Message, Purge};
use parking_lot::Mutex;
use rocksdb::{IteratorMode, Options, DB};
use tracing::{debug, warn};

use crate::StoreError;

/// Column family per object table.
const PUBKEY_CF: &str = "pubkey";
const PURGE_CF: &str = "purge";
const MSG_CF: &str = "msg";
const PUB_CF: &str = "pub";

const ALL_CFS: [&str; 4] = [PUBKEY_CF, PURGE_CF, MSG_CF, PUB_CF];

/// What kind of object a hash resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Encrypted public key
    Pubkey,
    /// Pending public key request (transient, index-only)
    PubkeyRequest,
    /// Direct message
    Msg,
    /// Publication
    Pub,
    /// Purge token
    Purge,
    /// Nothing stored under this hash
    NotFound,
}

struct Inner {
    db: Option<DB>,
    index: HashMap<Hash, ObjectKind>,
}

/// Durable object store plus hash-type index, behind one exclusive lock.
pub struct ObjectStore {
    inner: Mutex<Inner>,
}

impl ObjectStore {
    /// Opens or creates the store at `path` and rebuilds the index from
    /// the column families.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path, ALL_CFS)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut index = HashMap::new();
        for (cf_name, kind) in [
            (PUBKEY_CF, ObjectKind::Pubkey),
            (PURGE_CF, ObjectKind::Purge),
            (MSG_CF, ObjectKind::Msg),
            (PUB_CF, ObjectKind::Pub),
        ] {
            let cf = db
                .cf_handle(cf_name)
                .ok_or_else(|| StoreError::Database(format!("missing {cf_name} column family")))?;
            for item in db.iterator_cf(&cf, IteratorMode::Start) {
                let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
                if key.len() == HASH_LEN {
                    let mut arr = [0u8; HASH_LEN];
                    arr.copy_from_slice(&key);
                    index.insert(Hash::new(arr), kind);
                } else {
                    warn!(cf = cf_name, len = key.len(), "Skipping malformed row key");
                }
            }
        }

        debug!(objects = index.len(), "Opened object store");
        Ok(Self {
            inner: Mutex::new(Inner {
                db: Some(db),
                index,
            }),
        })
    }

    /// Closes the backing database. Subsequent mutations fail with
    /// `Uninitialized`.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.db = None;
        inner.index.clear();
    }

    /// Resolves the kind stored under `h`. O(1) index lookup.
    pub fn contains(&self, h: &Hash) -> ObjectKind {
        let inner = self.inner.lock();
        inner.index.get(h).copied().unwrap_or(ObjectKind::NotFound)
    }

    /// Stores an encrypted pubkey under its address hash.
    ///
    /// Idempotent: a pubkey already present under the same hash is a
    /// success and writes nothing.
    pub fn add_pubkey(&self, pubkey: &EncryptedPubkey) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.index.get(&pubkey.addr_hash) == Some(&ObjectKind::Pubkey) {
            return Ok(());
        }
        let db = inner.db.as_ref().ok_or(StoreError::Uninitialized)?;

        let mut row = Vec::with_capacity(IV_LEN + pubkey.payload.len());
        row.extend_from_slice(&pubkey.iv);
        row.extend_from_slice(&pubkey.payload);
        put(db, PUBKEY_CF, &pubkey.addr_hash, &row)?;

        inner.index.insert(pubkey.addr_hash, ObjectKind::Pubkey);
        Ok(())
    }

    /// Retrieves an encrypted pubkey, or `None` when `h` is not a pubkey.
    pub fn get_pubkey(&self, h: &Hash) -> Option<EncryptedPubkey> {
        let inner = self.inner.lock();
        if inner.index.get(h) != Some(&ObjectKind::Pubkey) {
            return None;
        }
        let row = get(inner.db.as_ref()?, PUBKEY_CF, h)?;
        if row.len() < IV_LEN {
            warn!(hash = %h, "Corrupt pubkey row");
            return None;
        }
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&row[..IV_LEN]);
        Some(EncryptedPubkey {
            addr_hash: *h,
            iv,
            payload: row[IV_LEN..].to_vec(),
        })
    }

    /// Stores a purge token, deleting any message or publication it
    /// supersedes.
    ///
    /// The row key is the token's own content hash, which by
    /// construction equals the `TxidHash` of the message it purges.
    pub fn add_purge(&self, purge: &Purge) -> Result<(), StoreError> {
        let h = purge.txid_hash();
        let mut inner = self.inner.lock();
        match inner.index.get(&h) {
            Some(ObjectKind::Purge) => return Ok(()),
            Some(ObjectKind::Msg) => {
                let db = inner.db.as_ref().ok_or(StoreError::Uninitialized)?;
                delete(db, MSG_CF, &h)?;
            }
            Some(ObjectKind::Pub) => {
                let db = inner.db.as_ref().ok_or(StoreError::Uninitialized)?;
                delete(db, PUB_CF, &h)?;
            }
            _ => {}
        }
        let db = inner.db.as_ref().ok_or(StoreError::Uninitialized)?;
        put(db, PURGE_CF, &h, &purge.to_vec())?;
        inner.index.insert(h, ObjectKind::Purge);
        Ok(())
    }

    /// Retrieves a purge token, or `None` when `h` is not a purge.
    pub fn get_purge(&self, h: &Hash) -> Option<Purge> {
        let inner = self.inner.lock();
        if inner.index.get(h) != Some(&ObjectKind::Purge) {
            return None;
        }
        let row = get(inner.db.as_ref()?, PURGE_CF, h)?;
        Purge::from_bytes(&row)
            .map_err(|e| warn!(hash = %h, error = %e, "Corrupt purge row"))
            .ok()
    }

    /// Stores a direct message under its `TxidHash`.
    pub fn add_message(&self, msg: &Message) -> Result<(), StoreError> {
        self.add_msg_row(msg, MSG_CF, ObjectKind::Msg)
    }

    /// Stores a publication under its `TxidHash`.
    pub fn add_pub(&self, msg: &Message) -> Result<(), StoreError> {
        self.add_msg_row(msg, PUB_CF, ObjectKind::Pub)
    }

    fn add_msg_row(&self, msg: &Message, cf: &str, kind: ObjectKind) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.index.get(&msg.txid_hash) == Some(&kind) {
            return Ok(());
        }
        let db = inner.db.as_ref().ok_or(StoreError::Uninitialized)?;
        put(db, cf, &msg.txid_hash, &encode_msg_row(msg))?;
        inner.index.insert(msg.txid_hash, kind);
        Ok(())
    }

    /// Retrieves a direct message, or `None` when `h` is not a message.
    pub fn get_message(&self, h: &Hash) -> Option<Message> {
        self.get_msg_row(h, MSG_CF, ObjectKind::Msg)
    }

    /// Retrieves a publication, or `None` when `h` is not a publication.
    pub fn get_pub(&self, h: &Hash) -> Option<Message> {
        self.get_msg_row(h, PUB_CF, ObjectKind::Pub)
    }

    fn get_msg_row(&self, h: &Hash, cf: &str, kind: ObjectKind) -> Option<Message> {
        let inner = self.inner.lock();
        if inner.index.get(h) != Some(&kind) {
            return None;
        }
        let row = get(inner.db.as_ref()?, cf, h)?;
        decode_msg_row(h, &row)
            .map_err(|e| warn!(hash = %h, error = %e, "Corrupt message row"))
            .ok()
    }

    /// Records a transient pubkey-request placeholder.
    ///
    /// Requests live only in the index; the arrival of the matching
    /// pubkey removes them.
    pub fn add_request(&self, h: &Hash) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.db.is_none() {
            return Err(StoreError::Uninitialized);
        }
        inner.index.entry(*h).or_insert(ObjectKind::PubkeyRequest);
        Ok(())
    }

    /// Removes whatever is stored under `h`. Removing an absent hash is
    /// a no-op.
    pub fn remove(&self, h: &Hash) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let kind = match inner.index.get(h) {
            Some(kind) => *kind,
            None => return Ok(()),
        };
        let cf = match kind {
            ObjectKind::Pubkey => Some(PUBKEY_CF),
            ObjectKind::Purge => Some(PURGE_CF),
            ObjectKind::Msg => Some(MSG_CF),
            ObjectKind::Pub => Some(PUB_CF),
            ObjectKind::PubkeyRequest | ObjectKind::NotFound => None,
        };
        if let Some(cf) = cf {
            let db = inner.db.as_ref().ok_or(StoreError::Uninitialized)?;
            delete(db, cf, h)?;
        }
        inner.index.remove(h);
        Ok(())
    }

    /// Deletes every direct message older than `now − retention`.
    ///
    /// Publications, pubkeys, and purge tokens are exempt. Returns the
    /// number of rows swept.
    pub fn sweep_messages(&self, retention: Duration) -> Result<usize, StoreError> {
        let deadline = Timestamp::now().sub(retention);
        let mut inner = self.inner.lock();
        let db = inner.db.as_ref().ok_or(StoreError::Uninitialized)?;
        let cf = db
            .cf_handle(MSG_CF)
            .ok_or_else(|| StoreError::Database(format!("missing {MSG_CF} column family")))?;

        let mut stale = Vec::new();
        for item in db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if key.len() != HASH_LEN || value.len() < HASH_LEN + 8 {
                continue;
            }
            let mut ts_bytes = [0u8; 8];
            ts_bytes.copy_from_slice(&value[HASH_LEN..HASH_LEN + 8]);
            if i64::from_be_bytes(ts_bytes) <= deadline.as_secs() {
                let mut arr = [0u8; HASH_LEN];
                arr.copy_from_slice(&key);
                stale.push(Hash::new(arr));
            }
        }

        for h in &stale {
            db.delete_cf(&cf, h.as_bytes())
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }
        for h in &stale {
            inner.index.remove(h);
        }

        if !stale.is_empty() {
            debug!(swept = stale.len(), "Swept stale messages");
        }
        Ok(stale.len())
    }

    /// Lists every held object hash, excluding transient pubkey
    /// requests.
    pub fn obj_list(&self) -> Vec<Hash> {
        let inner = self.inner.lock();
        inner
            .index
            .iter()
            .filter(|(_, kind)| **kind != ObjectKind::PubkeyRequest)
            .map(|(h, _)| *h)
            .collect()
    }
}

fn put(db: &DB, cf: &str, key: &Hash, value: &[u8]) -> Result<(), StoreError> {
    let handle = db
        .cf_handle(cf)
        .ok_or_else(|| StoreError::Database(format!("missing {cf} column family")))?;
    db.put_cf(&handle, key.as_bytes(), value)
        .map_err(|e| StoreError::Database(e.to_string()))
}

fn get(db: &DB, cf: &str, key: &Hash) -> Option<Vec<u8>> {
    let handle = db.cf_handle(cf)?;
    db.get_cf(&handle, key.as_bytes()).ok().flatten()
}

fn delete(db: &DB, cf: &str, key: &Hash) -> Result<(), StoreError> {
    let handle = db
        .cf_handle(cf)
        .ok_or_else(|| StoreError::Database(format!("missing {cf} column family")))?;
    db.delete_cf(&handle, key.as_bytes())
        .map_err(|e| StoreError::Database(e.to_string()))
}

/// Row layout for msg/pub tables: addr_hash ∥ timestamp ∥ content.
/// The txid hash is the row key and is not repeated in the value.
fn encode_msg_row(msg: &Message) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(HASH_LEN + 8 + msg.content.len());
    msg.addr_hash.encode(&mut buf);
    msg.timestamp.encode(&mut buf);
    buf.extend_from_slice(&msg.content);
    buf.to_vec()
}

fn decode_msg_row(txid_hash: &Hash, row: &[u8]) -> Result<Message, StoreError> {
    let mut buf = Bytes::copy_from_slice(row);
    let addr_hash = Hash::decode(&mut buf)?;
    let timestamp = Timestamp::decode(&mut buf)?;
    Ok(Message {
        addr_hash,
        txid_hash: *txid_hash,
        timestamp,
        content: buf.copy_to_bytes(buf.remaining()).to_vec(),
    })
}
