//! Vault uploads that also land in the ledger's vault projections.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use vsort_cas::{BlobStore, CasStore, HttpBlobStore};
use vsort_config::{log_vault_info, BlobBackend, Config};
use vsort_ledger::{Ledger, VaultFileRecord, VaultFolderRecord};
use vsort_vault::{FolderManifest, Vault, VaultManifest};

use crate::workflow::BackupHook;

/// Blob store for vault uploads. Same backend as batches, with the vault's
/// own storage epochs.
pub fn vault_store(config: &Config) -> anyhow::Result<Arc<dyn BlobStore>> {
    let store: Arc<dyn BlobStore> = match config.blob_store.backend {
        BlobBackend::Http => Arc::new(
            HttpBlobStore::from_config(&config.blob_store).with_epochs(config.vault.epochs),
        ),
        BlobBackend::Local => Arc::new(
            CasStore::new(&config.blob_store.local_root).with_context(|| {
                format!("opening blob store at {}", config.blob_store.local_root.display())
            })?,
        ),
    };
    Ok(store)
}

/// A stored file plus its bearer capability.
#[derive(Debug, Clone)]
pub struct ArchivedFile {
    pub manifest: VaultManifest,
    pub token: String,
    pub link: String,
}

pub struct VaultArchiver {
    vault: Vault<Arc<dyn BlobStore>>,
    ledger: Ledger,
    share_base_url: String,
}

impl VaultArchiver {
    pub fn new(store: Arc<dyn BlobStore>, ledger: Ledger, share_base_url: impl Into<String>) -> Self {
        Self {
            vault: Vault::new(store),
            ledger,
            share_base_url: share_base_url.into(),
        }
    }

    pub fn from_config(config: &Config, ledger: Ledger) -> anyhow::Result<Self> {
        Ok(Self::new(
            vault_store(config)?,
            ledger,
            config.vault.share_base_url.clone(),
        ))
    }

    pub fn vault(&self) -> &Vault<Arc<dyn BlobStore>> {
        &self.vault
    }

    /// Encrypt, upload and record one file.
    pub fn archive(&self, path: &Path) -> anyhow::Result<ArchivedFile> {
        let manifest = self
            .vault
            .store(path, None)
            .with_context(|| format!("storing {} in the vault", path.display()))?;
        let token = self.vault.share_token(&manifest);
        self.ledger
            .save_vault_file(&file_record(&manifest, &token))
            .context("recording vault file")?;

        let link = self.vault.generate_share_link(&manifest, &self.share_base_url);
        log_vault_info!("Vault backup complete", file = %manifest.filename, blob_id = %manifest.blob_id);
        Ok(ArchivedFile {
            manifest,
            token,
            link,
        })
    }

    /// Encrypt a whole folder under one key and record the folder and each
    /// stored file.
    pub fn archive_folder(&self, folder: &Path) -> anyhow::Result<FolderManifest> {
        let manifest = self
            .vault
            .store_folder(folder, None)
            .with_context(|| format!("storing folder {} in the vault", folder.display()))?;

        for (_, file) in manifest.stored() {
            let token = self.vault.share_token(file);
            self.ledger
                .save_vault_file(&file_record(file, &token))
                .context("recording vault file")?;
        }
        self.ledger
            .save_vault_folder(&VaultFolderRecord {
                folder_name: manifest.folder_name.clone(),
                file_count: manifest.file_count as u64,
                root_hash: manifest.root_hash.clone(),
                key_hex: manifest.key_hex.clone(),
                manifest_blob_id: manifest.manifest_blob_id.clone(),
                created_at: manifest.created_at,
            })
            .context("recording vault folder")?;
        Ok(manifest)
    }
}

impl BackupHook for VaultArchiver {
    fn backup(&self, path: &Path) -> anyhow::Result<String> {
        self.archive(path).map(|a| a.manifest.blob_id)
    }
}

fn file_record(manifest: &VaultManifest, token: &str) -> VaultFileRecord {
    VaultFileRecord {
        blob_id: manifest.blob_id.clone(),
        filename: manifest.filename.clone(),
        key_hex: manifest.key_hex.clone(),
        nonce_hex: manifest.nonce_hex.clone(),
        size: manifest.size,
        encrypted_size: manifest.encrypted_size,
        mime: manifest.mime.clone(),
        sha256: manifest.sha256.clone(),
        share_token: token.to_string(),
        created_at: manifest.created_at,
    }
}
