//! Browser-driven certificate transfer
//!
//! The user logs in through a web page that receives a callback URL. Once
//! the login completes, the certificate is published at that callback URL
//! on the transfer store, which the agent long-polls. After a successful
//! download the agent confirms with `PUT <url>/ok`.

use crate::error::LoginError;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_LOGIN_URL: &str = "https://dash.cloudflare.com/argotunnel";
pub const DEFAULT_STORE_URL: &str = "https://login.argotunnel.com/";

const POLL_ATTEMPTS: u32 = 10;
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Source of a freshly issued client certificate
#[async_trait]
pub trait CertificateTransfer: Send + Sync {
    async fn fetch(&self) -> Result<Vec<u8>, LoginError>;
}

pub struct BrowserTransfer {
    login_url: Url,
    store_url: Url,
    session: String,
    poll_attempts: u32,
    client_timeout: Duration,
    open_browser: bool,
}

impl BrowserTransfer {
    pub fn new() -> Result<Self, LoginError> {
        Self::with_endpoints(DEFAULT_LOGIN_URL, DEFAULT_STORE_URL)
    }

    pub fn with_endpoints(login_url: &str, store_url: &str) -> Result<Self, LoginError> {
        Ok(Self {
            login_url: Url::parse(login_url)?,
            store_url: Url::parse(store_url)?,
            session: uuid::Uuid::new_v4().simple().to_string(),
            poll_attempts: POLL_ATTEMPTS,
            client_timeout: CLIENT_TIMEOUT,
            open_browser: true,
        })
    }

    pub fn with_poll_attempts(mut self, attempts: u32) -> Self {
        self.poll_attempts = attempts;
        self
    }

    pub fn with_client_timeout(mut self, timeout: Duration) -> Self {
        self.client_timeout = timeout;
        self
    }

    /// Print the login URL instead of launching a browser
    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }

    /// Where the certificate for this session will be published
    pub fn resource_url(&self) -> Result<Url, LoginError> {
        Ok(self.store_url.join(&self.session)?)
    }

    /// Login page URL carrying the callback for this session
    pub fn request_url(&self) -> Result<Url, LoginError> {
        let mut url = self.login_url.clone();
        url.query_pairs_mut()
            .append_pair("callback", self.resource_url()?.as_str());
        Ok(url)
    }

    async fn poll(
        &self,
        client: &reqwest::Client,
        resource: &Url,
    ) -> Result<Option<Vec<u8>>, LoginError> {
        let response = client.get(resource.clone()).send().await?;
        let status = response.status();

        // The resource may not exist until the user logs in
        if status.is_server_error() {
            return Err(LoginError::ServerError(status.as_u16()));
        }
        if status != StatusCode::OK {
            info!("Waiting for login...");
            return Ok(None);
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(None);
        }
        Ok(Some(body.to_vec()))
    }

    async fn confirm(&self, client: &reqwest::Client, resource: &Url) -> Result<(), LoginError> {
        let ok_url = format!("{}/ok", resource.as_str().trim_end_matches('/'));
        let response = client.put(ok_url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(LoginError::ServerError(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl CertificateTransfer for BrowserTransfer {
    async fn fetch(&self) -> Result<Vec<u8>, LoginError> {
        let request_url = self.request_url()?;
        let resource = self.resource_url()?;

        if self.open_browser && open_browser(request_url.as_str()).is_ok() {
            eprintln!(
                "A browser window should have opened at the following URL:\n\n{}\n\n\
                 If the browser failed to open, open it yourself and visit the URL above.",
                request_url
            );
        } else {
            eprintln!(
                "Please open the following URL and log in:\n\n{}\n\n\
                 Leave this command running to download the certificate automatically.",
                request_url
            );
        }

        let client = reqwest::Client::builder()
            .timeout(self.client_timeout)
            .build()?;

        for attempt in 1..=self.poll_attempts {
            debug!(attempt, url = %resource, "Polling for certificate");
            if let Some(certificate) = self.poll(&client, &resource).await? {
                if let Err(e) = self.confirm(&client, &resource).await {
                    warn!("Failed to update resource success: {}", e);
                }
                return Ok(certificate);
            }
        }

        Err(LoginError::Exhausted(self.poll_attempts))
    }
}

fn open_browser(url: &str) -> std::io::Result<()> {
    let mut command = if cfg!(target_os = "windows") {
        let mut c = std::process::Command::new("cmd");
        c.args(["/c", "start"]);
        c
    } else if cfg!(target_os = "macos") {
        std::process::Command::new("open")
    } else {
        std::process::Command::new("xdg-open")
    };
    command.arg(url).spawn().map(|_| ())
}
