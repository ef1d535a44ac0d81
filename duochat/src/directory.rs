//! User directory client.
//!
//! Fetches the list of known users from the directory endpoint and filters
//! out the local identity — a user never converses with themselves.

use duochat_proto::identity::UserId;
use duochat_proto::wire::UserRecord;

/// Errors that can occur while listing users.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The HTTP request itself failed.
    #[error("directory request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("directory endpoint returned status {0}")]
    Status(reqwest::StatusCode),

    /// The response body could not be parsed.
    #[error("malformed directory response: {0}")]
    Malformed(String),
}

/// Client for the user directory endpoint: `GET {base}/auth/users`.
#[derive(Debug, Clone)]
pub struct UserDirectory {
    http: reqwest::Client,
    base: url::Url,
}

impl UserDirectory {
    /// Creates a directory client rooted at `base`.
    #[must_use]
    pub fn new(http: reqwest::Client, base: url::Url) -> Self {
        Self { http, base }
    }

    fn endpoint(&self) -> String {
        format!("{}/auth/users", self.base.as_str().trim_end_matches('/'))
    }

    /// Lists every user except `local`.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] if the request fails or the body is not
    /// a list of `{username}` records.
    pub async fn peers(&self, local: &UserId) -> Result<Vec<UserId>, DirectoryError> {
        let response = self.http.get(self.endpoint()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Status(status));
        }

        let records: Vec<UserRecord> = response
            .json()
            .await
            .map_err(|e| DirectoryError::Malformed(e.to_string()))?;

        Ok(records
            .into_iter()
            .map(|record| record.username)
            .filter(|username| username != local)
            .collect())
    }
}
