use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://cloud.example.invalid";

/// Error code reported for failures that never produced an HTTP status.
pub const TRANSPORT_ERROR_CODE: i32 = -1;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// A remote reply stamped with the account the request was issued for.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountReply<T> {
    pub account: String,
    pub value: T,
}

#[derive(Clone)]
pub struct NimbusClient {
    http: Client,
    base_url: Url,
    token: String,
    account: String,
}

impl NimbusClient {
    pub fn new(account: impl Into<String>, token: impl Into<String>) -> Result<Self, RemoteError> {
        Self::with_base_url(DEFAULT_BASE_URL, account, token)
    }

    pub fn with_base_url(
        base_url: &str,
        account: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, RemoteError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
            account: account.into(),
        })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Reads the metadata of a single entry, including a directory's own ETag.
    pub async fn read_entry(&self, path: &str) -> Result<AccountReply<Entry>, RemoteError> {
        let mut url = self.endpoint("/v1/entries")?;
        url.query_pairs_mut().append_pair("path", path);
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        let entry = Self::handle_response(response).await?;
        Ok(self.reply(entry))
    }

    pub async fn read_directory(
        &self,
        path: &str,
        depth: u32,
    ) -> Result<AccountReply<DirectoryListing>, RemoteError> {
        let mut url = self.endpoint("/v1/entries/children")?;
        url.query_pairs_mut()
            .append_pair("path", path)
            .append_pair("depth", &depth.to_string());
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        let listing = Self::handle_response(response).await?;
        Ok(self.reply(listing))
    }

    fn reply<T>(&self, value: T) -> AccountReply<T> {
        AccountReply {
            account: self.account.clone(),
            value,
        }
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RemoteError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(RemoteError::Api { status, body })
        }
    }
}

impl RemoteError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            RemoteError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }

    /// Numeric error code; never zero, which is reserved for success.
    pub fn code(&self) -> i32 {
        match self {
            RemoteError::Api { status, .. } => i32::from(status.as_u16()),
            RemoteError::Request(err) => err
                .status()
                .map(|status| i32::from(status.as_u16()))
                .unwrap_or(TRANSPORT_ERROR_CODE),
            RemoteError::Url(_) => TRANSPORT_ERROR_CODE,
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Entry {
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default)]
    pub e2e_encrypted: bool,
    #[serde(default)]
    pub favorite: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Dir,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DirectoryListing {
    pub directory: Entry,
    #[serde(default)]
    pub items: Vec<Entry>,
}
