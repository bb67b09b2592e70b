//! Cryptographic primitives for the storage fabric coordinator.
//!
//! Provides the KEK/DEK/HKDF chunk-encryption pipeline (see [`Kek`]) that
//! every chunk's ciphertext is produced and consumed through.

use crate::error::{CoordinatorError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// AES-256-GCM key size (32 bytes)
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce size (12 bytes / 96 bits)
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// AES-256-GCM encryption key
#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Generate a new random encryption key
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice (validates length)
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != KEY_SIZE {
            return Err(CoordinatorError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: slice.len(),
            });
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(slice);
        Ok(Self(key))
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey([REDACTED])")
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        // Zeroize key on drop for security
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

/// Wrap `plaintext` (a DEK) under `key` (the KEK) with a random nonce,
/// producing `nonce ∥ tag ∥ ct`. Internal to [`Kek::issue_wrapped_dek`];
/// the wire format a `WrappedDek` carries is this function's output.
fn wrap(plaintext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    use rand::RngCore;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CoordinatorError::Encryption(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CoordinatorError::Encryption(e.to_string()))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Inverse of [`wrap`]: splits `nonce ∥ tag ∥ ct` and AEAD-decrypts under
/// `key`. Internal to [`Kek::unwrap_dek`].
fn unwrap(data: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CoordinatorError::Decryption(
            "wrapped DEK too short".to_string(),
        ));
    }
    let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CoordinatorError::Decryption(e.to_string()))?;

    cipher
        .decrypt(nonce, &data[NONCE_SIZE..])
        .map_err(|_| CoordinatorError::Decryption("DEK unwrap authentication failed".to_string()))
}

/// Size of a wrapped DEK identifier, in bytes.
pub const DEK_ID_SIZE: usize = 16;

/// A derived per-chunk AEAD key, zeroed on drop.
struct ChunkKey([u8; KEY_SIZE]);

impl Drop for ChunkKey {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

/// Associated data cryptographically binding a chunk's ciphertext to its
/// logical identity. Changing any field invalidates the AEAD tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkAad {
    file_id: String,
    chunk_index: u32,
    version: u8,
}

impl ChunkAad {
    fn encode(file_id: &str, chunk_index: u32) -> Vec<u8> {
        let aad = ChunkAad {
            file_id: file_id.to_string(),
            chunk_index,
            version: 1,
        };
        // Canonical form: bincode is deterministic for this fixed-shape struct.
        bincode::serialize(&aad).expect("ChunkAad serialization cannot fail")
    }
}

/// Output of [`encrypt_chunk`]: everything needed to store and later
/// decrypt a single chunk.
#[derive(Debug, Clone)]
pub struct EncryptedChunk {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; NONCE_SIZE],
    pub aad: Vec<u8>,
    /// SHA-256 of `ciphertext`, validates transport integrity only.
    pub ciphertext_hash: [u8; 32],
}

/// Process-wide key-encryption key. Wraps data-encryption keys (DEKs) and
/// ultimately every per-chunk key traces back to one of these.
///
/// `Initialize` in the design notes corresponds to [`Kek::from_hex`]: it is
/// the only way to construct one, so a coordinator either has a valid KEK
/// or fails to start.
#[derive(Clone)]
pub struct Kek(EncryptionKey);

impl Kek {
    /// Parse a 32-byte KEK from a hex string. Fails with `ConfigError`
    /// rather than a crypto error: an invalid KEK is a startup
    /// misconfiguration, not a runtime cryptographic failure.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let bytes = hex_decode(hex)
            .map_err(|e| CoordinatorError::ConfigError(format!("invalid KEK hex: {e}")))?;
        let key = EncryptionKey::from_slice(&bytes)
            .map_err(|_| CoordinatorError::ConfigError("KEK must be exactly 32 bytes".to_string()))?;
        Ok(Self(key))
    }

    /// Generate a fresh random KEK. Used in tests and by operator tooling
    /// that provisions a new KEK for a deployment.
    pub fn generate() -> Self {
        Self(EncryptionKey::generate())
    }

    /// Generate a new DEK, wrap it under this KEK, and return
    /// `(wrapped_dek, dek_id)`. The plaintext DEK is zeroed before return.
    pub fn issue_wrapped_dek(&self) -> Result<(WrappedDek, DekId)> {
        let mut dek = EncryptionKey::generate();
        let wrapped = wrap(dek.as_bytes(), &self.0)?;
        zero_key(&mut dek);
        Ok((WrappedDek(wrapped), DekId::generate()))
    }

    /// Unwrap a DEK previously produced by [`Kek::issue_wrapped_dek`].
    pub fn unwrap_dek(&self, wrapped: &WrappedDek) -> Result<EncryptionKey> {
        let plaintext = unwrap(&wrapped.0, &self.0)?;
        EncryptionKey::from_slice(&plaintext)
    }
}

fn zero_key(key: &mut EncryptionKey) {
    key.0.iter_mut().for_each(|b| *b = 0);
}

/// A DEK wrapped under the process KEK: `nonce ∥ tag ∥ ct`, opaque to
/// everything except [`Kek::unwrap_dek`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrappedDek(Vec<u8>);

impl WrappedDek {
    pub fn to_hex(&self) -> String {
        hex_encode(&self.0)
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        Ok(Self(
            hex_decode(hex).map_err(|e| CoordinatorError::Decryption(e.to_string()))?,
        ))
    }
}

/// Opaque identifier for a wrapped DEK: 16 random bytes, assigned once per
/// `IssueWrappedDEK` call and carried alongside the wrapped key in file
/// metadata so the coordinator never has to guess which KEK epoch wrapped it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DekId([u8; DEK_ID_SIZE]);

impl DekId {
    fn generate() -> Self {
        use rand::RngCore;
        let mut id = [0u8; DEK_ID_SIZE];
        OsRng.fill_bytes(&mut id);
        Self(id)
    }

    pub fn to_hex(&self) -> String {
        hex_encode(&self.0)
    }
}

/// Derive the per-chunk AEAD key: HKDF-SHA256 with `salt = file_id`,
/// `info = "chunk-" ∥ chunk_index`.
fn derive_chunk_key(dek: &EncryptionKey, file_id: &str, chunk_index: u32) -> ChunkKey {
    let hk = Hkdf::<Sha256>::new(Some(file_id.as_bytes()), dek.as_bytes());
    let mut okm = [0u8; KEY_SIZE];
    let info = format!("chunk-{chunk_index}");
    hk.expand(info.as_bytes(), &mut okm)
        .expect("32-byte OKM is always a valid HKDF-SHA256 length");
    ChunkKey(okm)
}

/// Derive the deterministic per-chunk IV: first 12 bytes of
/// `HMAC-SHA256(K, file_id ∥ chunk_index_byte)`. Uniqueness of `K` per
/// chunk (via HKDF over `file_id`/`chunk_index`) means this never repeats
/// a `(key, nonce)` pair despite being deterministic.
fn derive_chunk_iv(key: &ChunkKey, file_id: &str, chunk_index: u32) -> [u8; NONCE_SIZE] {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(&key.0).expect("HMAC-SHA256 accepts any key length");
    mac.update(file_id.as_bytes());
    mac.update(&chunk_index.to_be_bytes());
    let full = mac.finalize().into_bytes();
    let mut iv = [0u8; NONCE_SIZE];
    iv.copy_from_slice(&full[..NONCE_SIZE]);
    iv
}

/// Encrypt one chunk of plaintext under a wrapped DEK.
///
/// Unwraps the DEK, derives the per-chunk key and IV, builds the AAD
/// binding ciphertext to `(file_id, chunk_index)`, AEAD-encrypts, and
/// hashes the ciphertext. The DEK and derived chunk key are zeroed before
/// returning on every path, including errors.
pub fn encrypt_chunk(
    kek: &Kek,
    plaintext: &[u8],
    wrapped_dek: &WrappedDek,
    file_id: &str,
    chunk_index: u32,
) -> Result<EncryptedChunk> {
    let dek = kek.unwrap_dek(wrapped_dek)?;
    let result = (|| {
        let chunk_key = derive_chunk_key(&dek, file_id, chunk_index);
        let iv = derive_chunk_iv(&chunk_key, file_id, chunk_index);
        let aad = ChunkAad::encode(file_id, chunk_index);

        let cipher = Aes256Gcm::new_from_slice(&chunk_key.0)
            .map_err(|e| CoordinatorError::Encryption(e.to_string()))?;
        let nonce = Nonce::from_slice(&iv);
        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| CoordinatorError::Encryption(e.to_string()))?;

        let ciphertext_hash = Sha256::digest(&ciphertext).into();
        Ok(EncryptedChunk {
            ciphertext,
            iv,
            aad,
            ciphertext_hash,
        })
    })();
    let mut dek = dek;
    zero_key(&mut dek);
    result
}

/// Decrypt one chunk encrypted by [`encrypt_chunk`].
///
/// Validates the ciphertext hash before attempting AEAD decryption so a
/// corrupted transport payload is reported as [`CoordinatorError::IntegrityError`]
/// rather than the less specific AEAD failure, and validates the AAD's
/// `(file_id, chunk_index)` against the caller's expectations so a chunk
/// misrouted in transit is reported rather than silently accepted.
pub fn decrypt_chunk(
    kek: &Kek,
    encrypted: &EncryptedChunk,
    wrapped_dek: &WrappedDek,
    file_id: &str,
    chunk_index: u32,
) -> Result<Vec<u8>> {
    if encrypted.iv.len() != NONCE_SIZE {
        return Err(CoordinatorError::InvalidInput(format!(
            "expected {}-byte IV, got {}",
            NONCE_SIZE,
            encrypted.iv.len()
        )));
    }

    let computed_hash: [u8; 32] = Sha256::digest(&encrypted.ciphertext).into();
    if computed_hash != encrypted.ciphertext_hash {
        return Err(CoordinatorError::IntegrityError(
            "ciphertext hash mismatch".to_string(),
        ));
    }

    let expected_aad = ChunkAad::encode(file_id, chunk_index);
    if expected_aad != encrypted.aad {
        return Err(CoordinatorError::AuthError(
            "chunk AAD does not match requested (file_id, chunk_index)".to_string(),
        ));
    }

    let dek = kek.unwrap_dek(wrapped_dek)?;
    let result = (|| {
        let chunk_key = derive_chunk_key(&dek, file_id, chunk_index);

        let cipher = Aes256Gcm::new_from_slice(&chunk_key.0)
            .map_err(|e| CoordinatorError::Decryption(e.to_string()))?;
        // The IV travels with the chunk rather than being re-derived here:
        // the derivation is a deterministic function of trusted inputs
        // (file_id, chunk_index), so recomputing it would make decryption
        // blind to a corrupted or tampered `iv` on the wire.
        let nonce = Nonce::from_slice(&encrypted.iv);
        cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &encrypted.ciphertext,
                    aad: &encrypted.aad,
                },
            )
            .map_err(|_| CoordinatorError::AuthError("chunk authentication failed".to_string()))
    })();
    let mut dek = dek;
    zero_key(&mut dek);
    result
}

/// Compute `SHA256(data)`, used for `File.plaintext_hash`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex_encode(&Sha256::digest(data))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(hex: &str) -> std::result::Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 {
        return Err("odd-length hex string".to_string());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| e.to_string()))
        .collect()
}
