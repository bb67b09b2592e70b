//! Connection registry: binds a logical device id to exactly one open
//! duplex channel, and exposes `SendChunk`/`RequestChunk`/`DeleteChunk`
//! as typed request/response calls over it.

use crate::protocol::OutboundMessage;
use bytes::Bytes;
use fabric_core::error::{CoordinatorError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

const DEFAULT_T_WRITE: Duration = Duration::from_secs(30);
const DEFAULT_T_READ: Duration = Duration::from_secs(60);
const DEFAULT_T_DELETE: Duration = Duration::from_secs(60);

/// What a pending request is waiting for.
enum Waiter {
    Write(oneshot::Sender<std::result::Result<(), String>>),
    Read(oneshot::Sender<std::result::Result<Bytes, String>>),
    Delete(oneshot::Sender<std::result::Result<(), String>>),
}

#[derive(Hash, Eq, PartialEq, Clone, Copy)]
enum WaiterKind {
    Write,
    Read,
    Delete,
}

#[derive(Hash, Eq, PartialEq, Clone)]
struct WaiterKey {
    logical_device_id: String,
    chunk_id: Uuid,
    kind: WaiterKind,
}

/// Timeouts for the three request/response operations.
#[derive(Debug, Clone, Copy)]
pub struct RegistryTimeouts {
    pub t_write: Duration,
    pub t_read: Duration,
    pub t_delete: Duration,
}

impl Default for RegistryTimeouts {
    fn default() -> Self {
        Self {
            t_write: DEFAULT_T_WRITE,
            t_read: DEFAULT_T_READ,
            t_delete: DEFAULT_T_DELETE,
        }
    }
}

/// Metadata describing a chunk to assign, handed to `SendChunk`.
pub struct ChunkAssignment {
    pub chunk_id: Uuid,
    pub file_id: Uuid,
    pub sequence_num: i32,
    pub size_bytes: i64,
    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
    pub aad: Vec<u8>,
    pub checksum: Vec<u8>,
    pub ciphertext: Bytes,
}

/// Maintains one outbound sender per connected device and a table of
/// oneshot channels awaiting a correlated reply. The only component
/// permitted to mutate live channels, per the design's concurrency model.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, mpsc::Sender<OutboundMessage>>>,
    waiters: RwLock<HashMap<WaiterKey, Waiter>>,
    timeouts: RegistryTimeouts,
}

impl ConnectionRegistry {
    pub fn new(timeouts: RegistryTimeouts) -> Arc<Self> {
        Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
            waiters: RwLock::new(HashMap::new()),
            timeouts,
        })
    }

    /// Attach a logical device id to a channel sender, replacing any
    /// previous channel for the same id: a device binds to exactly one
    /// open connection at a time.
    pub fn bind(&self, logical_device_id: &str, sender: mpsc::Sender<OutboundMessage>) {
        self.connections
            .write()
            .insert(logical_device_id.to_string(), sender);
        debug!(logical_device_id, "device channel bound");
    }

    pub fn unbind(&self, logical_device_id: &str) {
        self.connections.write().remove(logical_device_id);
        debug!(logical_device_id, "device channel unbound");
    }

    pub fn is_connected(&self, logical_device_id: &str) -> bool {
        self.connections.read().contains_key(logical_device_id)
    }

    fn sender_for(&self, logical_device_id: &str) -> Result<mpsc::Sender<OutboundMessage>> {
        self.connections
            .read()
            .get(logical_device_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::NotConnected(logical_device_id.to_string()))
    }

    /// Send `chunk:assign` and wait up to `t_write` for `chunk:confirm`.
    pub async fn send_chunk(&self, logical_device_id: &str, assignment: ChunkAssignment) -> Result<()> {
        use base64::Engine;
        let sender = self.sender_for(logical_device_id)?;

        let (tx, rx) = oneshot::channel();
        let key = WaiterKey {
            logical_device_id: logical_device_id.to_string(),
            chunk_id: assignment.chunk_id,
            kind: WaiterKind::Write,
        };
        self.waiters.write().insert(key.clone(), Waiter::Write(tx));

        let msg = OutboundMessage::ChunkAssign {
            chunk_id: assignment.chunk_id,
            file_id: assignment.file_id,
            sequence_num: assignment.sequence_num,
            size_bytes: assignment.size_bytes,
            iv: base64::engine::general_purpose::STANDARD.encode(&assignment.iv),
            auth_tag: base64::engine::general_purpose::STANDARD.encode(&assignment.auth_tag),
            aad: base64::engine::general_purpose::STANDARD.encode(&assignment.aad),
            checksum: base64::engine::general_purpose::STANDARD.encode(&assignment.checksum),
            ciphertext_base64: base64::engine::general_purpose::STANDARD.encode(&assignment.ciphertext),
        };

        if sender.send(msg).await.is_err() {
            self.waiters.write().remove(&key);
            return Err(CoordinatorError::NotConnected(logical_device_id.to_string()));
        }

        match tokio::time::timeout(self.timeouts.t_write, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(CoordinatorError::DeviceRejected(reason)),
            Ok(Err(_canceled)) => Err(CoordinatorError::NotConnected(logical_device_id.to_string())),
            Err(_elapsed) => {
                self.waiters.write().remove(&key);
                Err(CoordinatorError::Timeout(self.timeouts.t_write))
            }
        }
    }

    /// Send `chunk:request` and wait up to `t_read` for `chunk:data:{chunk_id}`.
    pub async fn request_chunk(&self, logical_device_id: &str, chunk_id: Uuid) -> Result<Bytes> {
        let sender = self.sender_for(logical_device_id)?;

        let (tx, rx) = oneshot::channel();
        let key = WaiterKey {
            logical_device_id: logical_device_id.to_string(),
            chunk_id,
            kind: WaiterKind::Read,
        };
        self.waiters.write().insert(key.clone(), Waiter::Read(tx));

        if sender.send(OutboundMessage::ChunkRequest { chunk_id }).await.is_err() {
            self.waiters.write().remove(&key);
            return Err(CoordinatorError::NotConnected(logical_device_id.to_string()));
        }

        match tokio::time::timeout(self.timeouts.t_read, rx).await {
            Ok(Ok(Ok(bytes))) => Ok(bytes),
            Ok(Ok(Err(reason))) => Err(CoordinatorError::DeviceRejected(reason)),
            Ok(Err(_canceled)) => Err(CoordinatorError::NotConnected(logical_device_id.to_string())),
            Err(_elapsed) => {
                self.waiters.write().remove(&key);
                Err(CoordinatorError::Timeout(self.timeouts.t_read))
            }
        }
    }

    /// Send `chunk:delete` and wait up to `t_delete` for
    /// `chunk:deleted:{chunk_id}`. A timeout resolves non-fatally: the
    /// caller is expected to mark the placement unhealthy and move on.
    pub async fn delete_chunk(&self, logical_device_id: &str, chunk_id: Uuid, reason: &str) -> Result<()> {
        let sender = self.sender_for(logical_device_id)?;

        let (tx, rx) = oneshot::channel();
        let key = WaiterKey {
            logical_device_id: logical_device_id.to_string(),
            chunk_id,
            kind: WaiterKind::Delete,
        };
        self.waiters.write().insert(key.clone(), Waiter::Delete(tx));

        let msg = OutboundMessage::ChunkDelete {
            chunk_id,
            reason: reason.to_string(),
        };
        if sender.send(msg).await.is_err() {
            self.waiters.write().remove(&key);
            return Err(CoordinatorError::NotConnected(logical_device_id.to_string()));
        }

        match tokio::time::timeout(self.timeouts.t_delete, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(CoordinatorError::DeviceRejected(reason)),
            Ok(Err(_canceled)) => Err(CoordinatorError::NotConnected(logical_device_id.to_string())),
            Err(_elapsed) => {
                self.waiters.write().remove(&key);
                warn!(logical_device_id, %chunk_id, "delete_chunk timed out, resolving non-fatally");
                Err(CoordinatorError::Timeout(self.timeouts.t_delete))
            }
        }
    }

    /// Route `chunk:confirm` from the device channel handler to the
    /// waiting `send_chunk` call, if any.
    pub fn complete_write(&self, logical_device_id: &str, chunk_id: Uuid, success: bool, error: Option<String>) {
        let key = WaiterKey {
            logical_device_id: logical_device_id.to_string(),
            chunk_id,
            kind: WaiterKind::Write,
        };
        if let Some(Waiter::Write(tx)) = self.waiters.write().remove(&key) {
            let _ = tx.send(if success { Ok(()) } else { Err(error.unwrap_or_default()) });
        }
    }

    /// Route `chunk:data:{chunk_id}` to the waiting `request_chunk` call.
    pub fn complete_read(
        &self,
        logical_device_id: &str,
        chunk_id: Uuid,
        success: bool,
        data_base64: Option<String>,
        error: Option<String>,
    ) {
        use base64::Engine;
        let key = WaiterKey {
            logical_device_id: logical_device_id.to_string(),
            chunk_id,
            kind: WaiterKind::Read,
        };
        if let Some(Waiter::Read(tx)) = self.waiters.write().remove(&key) {
            let result = if success {
                match data_base64
                    .as_deref()
                    .map(|s| base64::engine::general_purpose::STANDARD.decode(s))
                {
                    Some(Ok(bytes)) => Ok(Bytes::from(bytes)),
                    Some(Err(_)) => Err("invalid base64 payload".to_string()),
                    None => Err("missing data_base64".to_string()),
                }
            } else {
                Err(error.unwrap_or_default())
            };
            let _ = tx.send(result);
        }
    }

    /// Route `chunk:deleted:{chunk_id}` to the waiting `delete_chunk` call.
    pub fn complete_delete(&self, logical_device_id: &str, chunk_id: Uuid, success: bool, error: Option<String>) {
        let key = WaiterKey {
            logical_device_id: logical_device_id.to_string(),
            chunk_id,
            kind: WaiterKind::Delete,
        };
        if let Some(Waiter::Delete(tx)) = self.waiters.write().remove(&key) {
            let _ = tx.send(if success { Ok(()) } else { Err(error.unwrap_or_default()) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_chunk_not_connected() {
        let registry = ConnectionRegistry::new(RegistryTimeouts::default());
        let result = registry
            .send_chunk(
                "unknown-device",
                ChunkAssignment {
                    chunk_id: Uuid::new_v4(),
                    file_id: Uuid::new_v4(),
                    sequence_num: 0,
                    size_bytes: 10,
                    iv: vec![0; 12],
                    auth_tag: vec![0; 16],
                    aad: vec![],
                    checksum: vec![0; 32],
                    ciphertext: Bytes::from_static(b"abc"),
                },
            )
            .await;
        assert!(matches!(result, Err(CoordinatorError::NotConnected(_))));
    }

    #[tokio::test]
    async fn test_send_chunk_completes_on_confirm() {
        let registry = ConnectionRegistry::new(RegistryTimeouts::default());
        let (tx, mut rx) = mpsc::channel(8);
        registry.bind("d1", tx);

        let chunk_id = Uuid::new_v4();
        let registry2 = registry.clone();
        let handle = tokio::spawn(async move {
            registry2
                .send_chunk(
                    "d1",
                    ChunkAssignment {
                        chunk_id,
                        file_id: Uuid::new_v4(),
                        sequence_num: 0,
                        size_bytes: 10,
                        iv: vec![0; 12],
                        auth_tag: vec![0; 16],
                        aad: vec![],
                        checksum: vec![0; 32],
                        ciphertext: Bytes::from_static(b"abc"),
                    },
                )
                .await
        });

        let _assign = rx.recv().await.unwrap();
        registry.complete_write("d1", chunk_id, true, None);

        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_request_chunk_completes_with_data() {
        let registry = ConnectionRegistry::new(RegistryTimeouts::default());
        let (tx, mut rx) = mpsc::channel(8);
        registry.bind("d1", tx);

        let chunk_id = Uuid::new_v4();
        let registry2 = registry.clone();
        let handle = tokio::spawn(async move { registry2.request_chunk("d1", chunk_id).await });

        let _req = rx.recv().await.unwrap();
        registry.complete_read("d1", chunk_id, true, Some("aGVsbG8=".to_string()), None);

        let bytes = handle.await.unwrap().unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn test_is_connected() {
        let registry = ConnectionRegistry::new(RegistryTimeouts::default());
        assert!(!registry.is_connected("d1"));
        let (tx, _rx) = mpsc::channel(8);
        registry.bind("d1", tx);
        assert!(registry.is_connected("d1"));
        registry.unbind("d1");
        assert!(!registry.is_connected("d1"));
    }
}
