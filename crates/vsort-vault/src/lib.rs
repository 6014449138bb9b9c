//! # vsort-vault
//!
//! Client-side encrypted storage on top of a content-addressed blob store.
//!
//! - `store`: encrypt one file under a fresh (or given) key, upload the
//!   ciphertext, return a [`VaultManifest`] holding key and nonce in the clear
//! - `store_folder`: one key for every file, a root hash chained over the
//!   plaintext digests, and a redacted manifest copy uploaded for audit
//! - `retrieve`: download and authenticate-decrypt; tampering fails closed
//!
//! The remote store only ever sees ciphertext. Secrecy lives with whoever
//! holds the manifest or a share token.

pub mod crypto;
pub mod manifest;
pub mod token;

pub use crypto::{VaultKey, VaultNonce};
pub use manifest::{compute_root_hash, FolderEntry, FolderManifest, VaultManifest, REDACTED};
pub use token::{create_share_token, parse_share_token, share_link, ShareCapability};

use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::instrument;
use vsort_cas::{BlobStore, CasError};
use vsort_config::{log_vault_info, log_vault_warn};

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Blob store error: {0}")]
    Store(#[from] CasError),

    #[error("Encryption failed")]
    Encrypt,

    #[error("Decryption failed: wrong key or nonce, or the blob was tampered with")]
    Decrypt,

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Invalid share token: {0}")]
    InvalidToken(String),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Manifest serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VaultError>;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> VaultError + '_ {
    move |source| VaultError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Best-effort MIME type from the file name.
pub fn mime_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

pub struct Vault<S: BlobStore> {
    store: S,
}

impl<S: BlobStore> Vault<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn blob_store(&self) -> &S {
        &self.store
    }

    /// Encrypt and upload one file. A fresh key is generated when `key` is `None`.
    #[instrument(skip(self, key), fields(path = %path.display()), level = "debug")]
    pub fn store(&self, path: &Path, key: Option<VaultKey>) -> Result<VaultManifest> {
        let data = std::fs::read(path).map_err(io_err(path))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let manifest = self.store_bytes(&data, &filename, &mime_for(path), key)?;
        log_vault_info!(
            "File stored",
            file = %manifest.filename,
            blob_id = %manifest.blob_id,
            size = manifest.size
        );
        Ok(manifest)
    }

    /// Encrypt and upload raw bytes under the given name.
    pub fn store_bytes(
        &self,
        data: &[u8],
        filename: &str,
        mime: &str,
        key: Option<VaultKey>,
    ) -> Result<VaultManifest> {
        let key = key.unwrap_or_else(crypto::generate_key);
        let (nonce, ciphertext) = crypto::encrypt(&key, data)?;
        let blob_id = self.store.put(&ciphertext)?;

        Ok(VaultManifest {
            blob_id,
            filename: filename.to_string(),
            key_hex: hex::encode(key),
            nonce_hex: hex::encode(nonce),
            sha256: crypto::sha256_hex(data),
            size: data.len() as u64,
            encrypted_size: ciphertext.len() as u64,
            mime: mime.to_string(),
            created_at: Utc::now(),
        })
    }

    /// Encrypt every regular file under `folder` with one shared key.
    ///
    /// A file that fails to store is recorded in its entry and left out of
    /// the root hash; the rest of the folder still goes up.
    #[instrument(skip(self, key), fields(folder = %folder.display()), level = "debug")]
    pub fn store_folder(&self, folder: &Path, key: Option<VaultKey>) -> Result<FolderManifest> {
        if !folder.is_dir() {
            return Err(VaultError::NotADirectory(folder.to_path_buf()));
        }
        let key = key.unwrap_or_else(crypto::generate_key);

        let mut files: Vec<(String, PathBuf)> = Vec::new();
        for entry in walkdir::WalkDir::new(folder).follow_links(false) {
            let entry = entry.map_err(|e| VaultError::Io {
                path: folder.to_path_buf(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(folder)
                .unwrap_or(entry.path())
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push((relative, entry.path().to_path_buf()));
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let mut entries = Vec::with_capacity(files.len());
        for (relative_path, path) in files {
            match self.store(&path, Some(key)) {
                Ok(manifest) => entries.push(FolderEntry {
                    relative_path,
                    manifest: Some(manifest),
                    error: None,
                }),
                Err(e) => {
                    log_vault_warn!("Folder entry failed", file = %relative_path, error = %e);
                    entries.push(FolderEntry {
                        relative_path,
                        manifest: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let root_hash = compute_root_hash(
            entries
                .iter()
                .filter_map(|e| e.manifest.as_ref().map(|m| (e.relative_path.as_str(), m.sha256.as_str()))),
        );

        let mut manifest = FolderManifest {
            folder_name: folder
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            key_hex: hex::encode(key),
            root_hash,
            file_count: entries.iter().filter(|e| e.manifest.is_some()).count(),
            entries,
            manifest_blob_id: None,
            created_at: Utc::now(),
        };

        let audit = serde_json::to_vec_pretty(&manifest.redacted())?;
        match self.store.put(&audit) {
            Ok(id) => manifest.manifest_blob_id = Some(id),
            Err(e) => log_vault_warn!("Redacted manifest upload failed", error = %e),
        }

        log_vault_info!(
            "Folder stored",
            folder = %manifest.folder_name,
            files = manifest.file_count,
            root_hash = %manifest.root_hash
        );
        Ok(manifest)
    }

    /// Download and decrypt. Never returns unauthenticated plaintext.
    #[instrument(skip(self, key_hex, nonce_hex), level = "debug")]
    pub fn retrieve(&self, blob_id: &str, key_hex: &str, nonce_hex: &str) -> Result<Vec<u8>> {
        let key = crypto::parse_key(key_hex)?;
        let nonce = crypto::parse_nonce(nonce_hex)?;
        let ciphertext = self.store.get(blob_id)?;
        crypto::decrypt(&key, &nonce, &ciphertext)
    }

    /// Decrypt straight to `out`. Nothing is written if decryption fails.
    pub fn retrieve_to_file(
        &self,
        blob_id: &str,
        key_hex: &str,
        nonce_hex: &str,
        out: &Path,
    ) -> Result<u64> {
        let plaintext = self.retrieve(blob_id, key_hex, nonce_hex)?;
        if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        std::fs::write(out, &plaintext).map_err(io_err(out))?;
        Ok(plaintext.len() as u64)
    }

    pub fn retrieve_token(&self, token: &str) -> Result<(ShareCapability, Vec<u8>)> {
        let capability = parse_share_token(token)?;
        let data = self.retrieve(
            &capability.blob_id,
            &capability.key_hex,
            &capability.nonce_hex,
        )?;
        Ok((capability, data))
    }

    /// Share token for a stored file.
    pub fn share_token(&self, manifest: &VaultManifest) -> String {
        create_share_token(
            &manifest.blob_id,
            &manifest.key_hex,
            &manifest.nonce_hex,
            &manifest.filename,
        )
    }

    pub fn generate_share_link(&self, manifest: &VaultManifest, base_url: &str) -> String {
        share_link(base_url, &self.share_token(manifest))
    }
}
