//! HTTP client for the Device42 API

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use d42inv_core::{FlatRecord, InventoryError, RecordKind, RecordSource, SourceQuery};
use reqwest::{Client, Response};
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use crate::decode::{self, DoqlFormat};
use crate::error::{ClientError, Result};

/// DOQL endpoint path
pub const DOQL_PATH: &str = "/services/data/v1.0/query/";
/// Password lookup endpoint path
pub const PASSWORDS_PATH: &str = "/api/1.0/passwords/";

/// Account used for basic authentication
#[derive(Clone)]
pub struct Credentials {
    /// User name
    pub username: String,
    /// Password
    pub password: String,
}

impl Credentials {
    /// Create credentials
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Transport options
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Verify TLS certificates
    pub ssl_check: bool,
    /// Per-request timeout
    pub timeout: Duration,
    /// Format requested from the DOQL endpoint
    pub doql_format: DoqlFormat,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            ssl_check: true,
            timeout: Duration::from_secs(30),
            doql_format: DoqlFormat::Csv,
        }
    }
}

/// HTTP client for a Device42 instance
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: Url,
    credentials: Credentials,
    doql_format: DoqlFormat,
}

impl HttpClient {
    /// Create a new HTTP client
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid or the TLS backend cannot
    /// be initialized.
    pub fn new(
        base_url: impl AsRef<str>,
        credentials: Credentials,
        options: &ClientOptions,
    ) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!options.ssl_check)
            .timeout(options.timeout)
            .build()?;
        let mut http = Self::with_client(base_url, credentials, client)?;
        http.doql_format = options.doql_format;
        Ok(http)
    }

    /// Create a new HTTP client with custom `reqwest::Client`
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid.
    pub fn with_client(
        base_url: impl AsRef<str>,
        credentials: Credentials,
        client: Client,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url.as_ref())?;
        Ok(Self {
            client,
            base_url,
            credentials,
            doql_format: DoqlFormat::Csv,
        })
    }

    /// Build a full URL from a path
    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(ClientError::Url)
    }

    /// Fail on non-success status, keeping URL and body
    async fn check(response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let url = response.url().to_string();
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Err(ClientError::Api {
            url,
            status,
            message,
        })
    }

    /// Run a DOQL query and return the raw body
    ///
    /// # Errors
    /// Returns an error if the request fails or the API returns an error status.
    #[instrument(skip(self, query))]
    pub async fn doql_text(&self, query: &str, header: bool, format: DoqlFormat) -> Result<String> {
        let url = self.url(DOQL_PATH)?;
        let mut form = vec![
            ("query", query),
            ("header", if header { "yes" } else { "no" }),
        ];
        if format == DoqlFormat::Json {
            form.push(("output_type", "json"));
        }

        let response = self
            .client
            .post(url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .form(&form)
            .send()
            .await?;
        Ok(Self::check(response).await?.text().await?)
    }

    /// Run a DOQL query and decode the rows
    ///
    /// # Errors
    /// Returns an error if the request fails or the body cannot be decoded.
    pub async fn doql(&self, query: &str, format: DoqlFormat) -> Result<Vec<FlatRecord>> {
        let body = self.doql_text(query, true, format).await?;
        let rows = match format {
            DoqlFormat::Csv => decode::parse_csv(&body)?,
            DoqlFormat::Json => decode::parse_json(&body, None)?,
        };
        debug!(rows = rows.len(), "doql query decoded");
        Ok(rows)
    }

    /// Fetch one page of a bulk listing
    async fn page(&self, path: &str, offset: usize, limit: usize) -> Result<Value> {
        let url = self.url(path)?;
        let response = self
            .client
            .get(url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .query(&[("offset", offset), ("limit", limit)])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Fetch every item of a paginated listing
    ///
    /// Pages are requested until `offset + limit` reaches the reported
    /// `total_count`, and concatenated in server order. Any failing page
    /// fails the whole listing.
    ///
    /// # Errors
    /// Returns an error if any page request fails or a page is malformed.
    #[instrument(skip(self))]
    pub async fn fetch_all(
        &self,
        path: &str,
        items_key: &str,
        page_size: usize,
    ) -> Result<Vec<FlatRecord>> {
        let page_size = page_size.max(1);
        let mut offset = 0;
        let mut records = Vec::new();

        loop {
            let page = self.page(path, offset, page_size).await?;
            let items = page
                .get(items_key)
                .and_then(Value::as_array)
                .ok_or_else(|| ClientError::InvalidResponse(format!("missing array {items_key:?}")))?;
            records.extend(decode::items_to_records(items)?);

            let limit = page_usize(&page, "limit").unwrap_or(page_size);
            let total = page_usize(&page, "total_count");
            debug!(offset, limit, received = items.len(), ?total, "page fetched");

            match next_offset(offset, limit, total, items.len()) {
                Some(next) => offset = next,
                None => break,
            }
        }

        Ok(records)
    }

    /// Look up the stored password of `username` on `device`
    ///
    /// # Errors
    /// Returns `CredentialNotFound` when nothing matches and
    /// `AmbiguousCredential` when more than one entry matches.
    #[instrument(skip(self))]
    pub async fn get_password(&self, device: &str, username: &str) -> Result<String> {
        let url = self.url(PASSWORDS_PATH)?;
        let response = self
            .client
            .get(url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .query(&[
                ("plain_text", "yes"),
                ("device", device),
                ("username", username),
            ])
            .send()
            .await?;
        let body: Value = Self::check(response).await?.json().await?;
        select_password(&body, device, username)
    }
}

fn page_usize(page: &Value, key: &str) -> Option<usize> {
    page.get(key)
        .and_then(Value::as_u64)
        .and_then(|v| usize::try_from(v).ok())
}

/// Offset of the next page, or `None` when the listing is complete
pub(crate) fn next_offset(
    offset: usize,
    limit: usize,
    total: Option<usize>,
    received: usize,
) -> Option<usize> {
    let total = total?;
    if received == 0 || limit == 0 {
        return None;
    }
    let next = offset + limit;
    (next < total).then_some(next)
}

fn select_password(body: &Value, device: &str, username: &str) -> Result<String> {
    let entries = body
        .get("Passwords")
        .and_then(Value::as_array)
        .ok_or_else(|| ClientError::InvalidResponse("missing array \"Passwords\"".to_string()))?;

    match entries.as_slice() {
        [] => Err(ClientError::CredentialNotFound {
            device: device.to_string(),
            username: username.to_string(),
        }),
        [entry] => entry
            .get("password")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ClientError::InvalidResponse("password entry without password".to_string())),
        many => Err(ClientError::AmbiguousCredential {
            device: device.to_string(),
            username: username.to_string(),
            count: many.len(),
        }),
    }
}

#[async_trait]
impl RecordSource for HttpClient {
    async fn fetch(
        &self,
        kind: RecordKind,
        query: &SourceQuery,
    ) -> std::result::Result<Vec<FlatRecord>, InventoryError> {
        let result = match query {
            SourceQuery::Doql(doql) => self.doql(doql, self.doql_format).await,
            SourceQuery::Bulk {
                path,
                items_key,
                page_size,
            } => self.fetch_all(path, items_key, *page_size).await,
        };
        result.map_err(|e| e.into_inventory_error(kind))
    }
}
