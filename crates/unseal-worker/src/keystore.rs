//! Keystore for decryptor identity persistence
//!
//! Handles loading and saving the worker's signing key to disk, so the
//! decryptor keeps the same identity across restarts. The ledger's
//! authority registry points at that identity; losing it would mean the
//! owner has to rotate.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use unseal_core::Keypair;

use crate::error::{WorkerError, WorkerResult};

/// Filename for the decryptor signing key
const KEY_FILENAME: &str = "decryptor.key";

/// Keystore for managing decryptor identity persistence
///
/// The keystore saves and loads the worker's secret key from disk,
/// allowing the worker to maintain the same identity across restarts.
pub struct Keystore {
    /// Path to the keystore directory
    path: PathBuf,
}

impl Keystore {
    /// Create a new keystore with the given data directory
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.to_path_buf(),
        }
    }

    /// Get the path to the key file
    pub fn key_path(&self) -> PathBuf {
        self.path.join(KEY_FILENAME)
    }

    /// Load existing key or generate a new one
    pub fn load_or_generate(&self) -> WorkerResult<Keypair> {
        let key_path = self.key_path();

        if key_path.exists() {
            self.load()
        } else {
            info!("No existing decryptor identity found, generating new key");
            let keypair = Keypair::generate();
            self.save(&keypair)?;
            Ok(keypair)
        }
    }

    /// Load an existing key from disk
    pub fn load(&self) -> WorkerResult<Keypair> {
        let key_path = self.key_path();

        let bytes = std::fs::read(&key_path)
            .map_err(|e| WorkerError::Keystore(format!("Failed to read key file: {}", e)))?;

        if bytes.len() != 32 {
            return Err(WorkerError::Keystore(format!(
                "Invalid key file: expected 32 bytes, got {}",
                bytes.len()
            )));
        }

        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&bytes);

        let keypair = Keypair::from_bytes(&key_bytes);
        debug!(
            identity = %keypair.identity().short(),
            "Loaded decryptor identity from keystore"
        );

        Ok(keypair)
    }

    /// Save a key to disk
    pub fn save(&self, keypair: &Keypair) -> WorkerResult<()> {
        std::fs::create_dir_all(&self.path)
            .map_err(|e| WorkerError::Keystore(format!("Failed to create keystore dir: {}", e)))?;

        let key_path = self.key_path();
        std::fs::write(&key_path, keypair.to_bytes())
            .map_err(|e| WorkerError::Keystore(format!("Failed to write key file: {}", e)))?;

        Self::set_restrictive_permissions(&key_path)?;

        info!(
            identity = %keypair.identity().short(),
            path = %key_path.display(),
            "Saved decryptor identity to keystore"
        );

        Ok(())
    }

    /// Check if a key file exists
    pub fn exists(&self) -> bool {
        self.key_path().exists()
    }

    /// Delete the key file (use with caution!)
    pub fn delete(&self) -> WorkerResult<()> {
        let key_path = self.key_path();
        if key_path.exists() {
            std::fs::remove_file(&key_path)
                .map_err(|e| WorkerError::Keystore(format!("Failed to delete key file: {}", e)))?;
        }
        Ok(())
    }

    /// Set restrictive permissions on a key file (Unix only)
    fn set_restrictive_permissions(path: &PathBuf) -> WorkerResult<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(path, perms)
                .map_err(|e| WorkerError::Keystore(format!("Failed to set key permissions: {}", e)))?;
        }
        let _ = path; // Silence unused warning on non-Unix
        Ok(())
    }
}
