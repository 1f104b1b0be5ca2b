//! On-disk certificate storage

use crate::error::LoginError;
use crate::transfer::CertificateTransfer;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

pub const DEFAULT_CREDENTIAL_FILE: &str = "cert.pem";

/// Directory holding the agent credentials
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    /// Store rooted at `~/.tunnelrpc`
    pub fn new() -> Result<Self, LoginError> {
        let home = dirs::home_dir().ok_or(LoginError::NoHomeDir)?;
        Ok(Self::with_dir(home.join(".tunnelrpc")))
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn certificate_path(&self) -> PathBuf {
        self.dir.join(DEFAULT_CREDENTIAL_FILE)
    }

    /// Path of a non-empty certificate, if one is stored. Creates the store
    /// directory (mode 0700) when missing.
    pub async fn existing_certificate(&self) -> Result<Option<PathBuf>, LoginError> {
        self.ensure_dir().await?;

        let path = self.certificate_path();
        match fs::metadata(&path).await {
            Ok(meta) if meta.len() > 0 => Ok(Some(path)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LoginError::io(path, e)),
        }
    }

    /// Obtain the certificate through `transfer` unless one is already stored
    ///
    /// An existing certificate is never overwritten; its path is returned
    /// as is.
    pub async fn acquire_certificate(
        &self,
        transfer: &dyn CertificateTransfer,
    ) -> Result<PathBuf, LoginError> {
        if let Some(path) = self.existing_certificate().await? {
            warn!(
                "You have an existing certificate at {} which login would overwrite. \
                 If this is intentional, move or delete that file and log in again.",
                path.display()
            );
            return Ok(path);
        }

        let certificate = transfer.fetch().await?;
        let path = self.certificate_path();
        write_private(&path, &certificate).await?;

        info!("Saved certificate to {}", path.display());
        Ok(path)
    }

    /// Contents of the stored certificate
    pub async fn read_certificate(&self) -> Result<Vec<u8>, LoginError> {
        let path = self.certificate_path();
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(LoginError::MissingCertificate(path)),
            Err(e) => Err(LoginError::io(path, e)),
        }
    }

    async fn ensure_dir(&self) -> Result<(), LoginError> {
        if fs::metadata(&self.dir).await.is_ok_and(|meta| meta.is_dir()) {
            return Ok(());
        }

        let mut builder = fs::DirBuilder::new();
        #[cfg(unix)]
        builder.mode(0o700);
        builder
            .create(&self.dir)
            .await
            .map_err(|e| LoginError::io(&self.dir, e))
    }
}

async fn write_private(path: &Path, data: &[u8]) -> Result<(), LoginError> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await.map_err(|e| LoginError::io(path, e))?;
    file.write_all(data)
        .await
        .map_err(|e| LoginError::io(path, e))?;
    file.flush().await.map_err(|e| LoginError::io(path, e))
}
