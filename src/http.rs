use std::time::Duration;

use reqwest::Client;
use reqwest::header::ACCEPT;
use tracing::debug;

use crate::error::Result;

const ACCEPT_TEXT_PLAIN: &str = "text/plain";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl BasicAuth {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Status and body of a bundle list request. Non-2xx statuses are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleListResponse {
    pub status: u16,
    pub body: String,
}

impl BundleListResponse {
    /// A 200 response with a non-empty body.
    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.status == 200 && !self.body.trim().is_empty()
    }
}

/// Requests the bundle list at `uri` as plain text.
///
/// # Errors
/// Returns error if the client cannot be built or the request never completes.
pub async fn fetch_bundle_list(
    uri: &str,
    auth: Option<&BasicAuth>,
    timeout: Duration,
) -> Result<BundleListResponse> {
    let client = Client::builder().timeout(timeout).build()?;

    let mut request = client.get(uri).header(ACCEPT, ACCEPT_TEXT_PLAIN);
    if let Some(auth) = auth {
        request = request.basic_auth(&auth.username, Some(&auth.password));
    }

    let response = request.send().await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    debug!("GET {uri} returned {status} ({} bytes)", body.len());

    Ok(BundleListResponse { status, body })
}
