//! Encrypted environment variables
//!
//! Each analysis carries runtime variables in `env/.env`, one `KEY=value`
//! line per entry, with every value encrypted at rest. The engine sequences
//! reads and writes; the cipher itself sits behind the [`Cipher`] trait so
//! deployments can bring their own.
//!
//! Writes are full-file rewrites with freshly encrypted values, never
//! incremental edits. Entry order is preserved.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, KeyInit, Nonce};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::layout::StorageLayout;

/// Symmetric cipher used for environment values.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String>;
    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// ChaCha20-Poly1305 with a fixed 32-byte key and a random 12-byte nonce per
/// value. Envelope format: `<nonce_b64>:<ciphertext_b64>` (URL-safe base64,
/// no padding).
pub struct ChaChaCipher {
    key: [u8; 32],
}

impl ChaChaCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Decode a base64 key; must decode to exactly 32 bytes.
    pub fn from_key_b64(encoded: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim().as_bytes())
            .map_err(|e| Error::Config(format!("invalid env key: {e}")))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Config("env key must be 32 bytes".to_string()))?;
        Ok(Self::new(key))
    }

    /// Load the key from `path`, generating and persisting one on first use.
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(encoded) => Self::from_key_b64(&encoded),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut key = [0u8; 32];
                key[..16].copy_from_slice(Uuid::new_v4().as_bytes());
                key[16..].copy_from_slice(Uuid::new_v4().as_bytes());
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| Error::io("failed to create key directory", e))?;
                }
                std::fs::write(path, URL_SAFE_NO_PAD.encode(key))
                    .map_err(|e| Error::io(format!("failed to write {}", path.display()), e))?;
                Ok(Self::new(key))
            }
            Err(e) => Err(Error::io(
                format!("failed to read key file {}", path.display()),
                e,
            )),
        }
    }

    fn aead(&self) -> Result<ChaCha20Poly1305> {
        ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| Error::Encryption(format!("failed to initialize cipher: {e}")))
    }
}

impl Cipher for ChaChaCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce_source = Uuid::new_v4().into_bytes();
        let nonce = Nonce::from_slice(&nonce_source[..12]);
        let ciphertext = self
            .aead()?
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| Error::Encryption(format!("failed to encrypt value: {e}")))?;
        Ok(format!(
            "{}:{}",
            URL_SAFE_NO_PAD.encode(&nonce_source[..12]),
            URL_SAFE_NO_PAD.encode(ciphertext)
        ))
    }

    fn decrypt(&self, stored: &str) -> Result<String> {
        let (nonce_b64, ciphertext_b64) = stored
            .split_once(':')
            .ok_or_else(|| Error::Encryption("value envelope is invalid".to_string()))?;

        let nonce_raw = URL_SAFE_NO_PAD
            .decode(nonce_b64.as_bytes())
            .map_err(|e| Error::Encryption(format!("failed to decode nonce: {e}")))?;
        if nonce_raw.len() != 12 {
            return Err(Error::Encryption("nonce length is invalid".to_string()));
        }
        let ciphertext = URL_SAFE_NO_PAD
            .decode(ciphertext_b64.as_bytes())
            .map_err(|e| Error::Encryption(format!("failed to decode payload: {e}")))?;

        let plaintext = self
            .aead()?
            .decrypt(Nonce::from_slice(&nonce_raw), ciphertext.as_ref())
            .map_err(|e| Error::Encryption(format!("failed to decrypt value: {e}")))?;
        String::from_utf8(plaintext)
            .map_err(|e| Error::Encryption(format!("plaintext is invalid utf8: {e}")))
    }
}

/// Reads and writes one analysis's `env/.env` around a [`Cipher`].
pub struct EnvStore {
    layout: StorageLayout,
    cipher: std::sync::Arc<dyn Cipher>,
}

impl EnvStore {
    pub fn new(layout: StorageLayout, cipher: std::sync::Arc<dyn Cipher>) -> Self {
        Self { layout, cipher }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.layout.env_path(name)
    }

    /// Decrypted variables in file order. A missing file is an empty map.
    pub async fn read(&self, name: &str) -> Result<Vec<(String, String)>> {
        let path = self.path(name);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::io(
                    format!("failed to read env file {}", path.display()),
                    e,
                ))
            }
        };

        let mut vars = Vec::new();
        for line in content.lines() {
            let Some((key, encrypted)) = line.split_once('=') else {
                continue;
            };
            if key.is_empty() || encrypted.is_empty() {
                continue;
            }
            vars.push((key.to_string(), self.cipher.decrypt(encrypted)?));
        }
        Ok(vars)
    }

    /// Rewrite the whole file with freshly encrypted values.
    pub async fn write(&self, name: &str, vars: &[(String, String)]) -> Result<()> {
        let mut lines = Vec::with_capacity(vars.len());
        for (key, value) in vars {
            lines.push(format!("{}={}", key, self.cipher.encrypt(value)?));
        }

        let path = self.path(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(format!("failed to create {}", parent.display()), e))?;
        }
        tokio::fs::write(&path, lines.join("\n"))
            .await
            .map_err(|e| Error::io(format!("failed to write env file {}", path.display()), e))
    }
}
