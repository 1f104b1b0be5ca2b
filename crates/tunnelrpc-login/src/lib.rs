//! Credential acquisition for the agent
//!
//! The agent authenticates to the edge with a client certificate stored in
//! `~/.tunnelrpc/cert.pem`. [`CredentialStore::acquire_certificate`] obtains
//! it once through a [`CertificateTransfer`]; the default one,
//! [`BrowserTransfer`], sends the user to a login page and long-polls a store
//! until the certificate is published.

pub mod error;
pub mod paths;
pub mod store;
pub mod transfer;

pub use error::LoginError;
pub use paths::{find_default_config_path, DEFAULT_CONFIG_DIRS, DEFAULT_CONFIG_FILES};
pub use store::{CredentialStore, DEFAULT_CREDENTIAL_FILE};
pub use transfer::{BrowserTransfer, CertificateTransfer};
