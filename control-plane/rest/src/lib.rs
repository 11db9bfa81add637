//! Client for the ARCA REST API. Wraps `reqwest` with typed errors derived
//! from the wire error kind, and retries transient failures with exponential
//! backoff. Deletes are offered in an idempotent flavour which treats
//! not-found as success, which is what the CSI controller relies on.

use reqwest::{Client, Method, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use stor_port::{
    types::v0::{
        error_kind, CapacityInfo, CreateDirectoryBody, CreateSnapshotBody, CreateSvmBody,
        ExpandQuotaBody, QuotaInfo, RestJson, RestoreSnapshotBody, SetQuotaBody, Svm,
    },
    ReplyErrorKind,
};
use tracing::{debug, instrument, warn};

/// Typed client-side view of an API failure. The variant, never the message,
/// drives retry decisions.
#[derive(Debug, PartialEq, Eq)]
pub enum ApiClientError {
    /// Error while communicating with the server.
    ServerCommunication(String),
    /// No resource instance exists.
    ResourceNotExists(String),
    /// Requested resource already exists with different parameters.
    ResourceAlreadyExists(String),
    /// VIP/VLAN collision; retry with a different allocation.
    NetworkConflict(String),
    /// Pool exhausted.
    ResourceExhausted(String),
    /// Request rejected at the edge.
    InvalidArgument(String),
    /// Operation not valid in the resource's current state.
    PreconditionFailed(String),
    /// The server could not persist state.
    Unavailable(String),
    /// The request timed out.
    RequestTimeout(String),
    /// Problems with parsing the response body.
    InvalidResponse(String),
    /// URL is malformed.
    MalformedUrl(String),
    /// Generic operation errors.
    GenericOperation(StatusCode, String),
}

impl ApiClientError {
    fn from_wire(status: StatusCode, kind: ReplyErrorKind, message: String) -> Self {
        match kind {
            ReplyErrorKind::NotFound => Self::ResourceNotExists(message),
            ReplyErrorKind::AlreadyExists => Self::ResourceAlreadyExists(message),
            ReplyErrorKind::NetworkConflict => Self::NetworkConflict(message),
            ReplyErrorKind::ResourceExhausted => Self::ResourceExhausted(message),
            ReplyErrorKind::InvalidArgument => Self::InvalidArgument(message),
            ReplyErrorKind::FailedPrecondition => Self::PreconditionFailed(message),
            ReplyErrorKind::Unavailable | ReplyErrorKind::FailedPersist => {
                Self::Unavailable(message)
            }
            ReplyErrorKind::Timeout => Self::RequestTimeout(message),
            _ => Self::GenericOperation(status, message),
        }
    }

    /// Transient failures worth retrying: 5xx, 408, 429 and transport errors.
    fn is_transient(&self) -> bool {
        match self {
            Self::ServerCommunication(_) | Self::Unavailable(_) | Self::RequestTimeout(_) => true,
            Self::GenericOperation(status, _) => {
                status.is_server_error()
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

/// Configuration of the API client.
#[derive(Debug, Clone)]
pub struct ArcaClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub retries: u32,
    pub auth_token: Option<String>,
    pub ca_cert_pem: Option<Vec<u8>>,
    pub insecure_skip_verify: bool,
}

impl ArcaClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            retries: utils::DEFAULT_REST_RETRIES,
            auth_token: None,
            ca_cert_pem: None,
            insecure_skip_verify: false,
        }
    }
}

/// The ARCA REST API client.
#[derive(Debug, Clone)]
pub struct ArcaApiClient {
    client: Client,
    base_url: Url,
    retries: u32,
    auth_token: Option<String>,
}

impl ArcaApiClient {
    pub fn new(config: &ArcaClientConfig) -> Result<Self, ApiClientError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|error| ApiClientError::MalformedUrl(error.to_string()))?;

        let mut builder = Client::builder().timeout(config.timeout);
        if let Some(pem) = &config.ca_cert_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|error| ApiClientError::InvalidArgument(error.to_string()))?;
            builder = builder.add_root_certificate(cert);
        }
        if config.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|error| ApiClientError::ServerCommunication(error.to_string()))?;

        Ok(Self {
            client,
            base_url,
            retries: config.retries,
            auth_token: config.auth_token.clone(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, ApiClientError> {
        self.base_url
            .join(path)
            .map_err(|error| ApiClientError::MalformedUrl(error.to_string()))
    }

    async fn do_request<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        query: &[(&str, &str)],
    ) -> Result<T, ApiClientError> {
        let url = self.url(path)?;
        let mut attempt = 0;
        loop {
            match self.do_request_once(method.clone(), url.clone(), body, query).await {
                Ok(response) => return Ok(response),
                Err(error) if error.is_transient() && attempt < self.retries => {
                    let backoff = utils::REST_BACKOFF_BASE * 2u32.pow(attempt);
                    warn!(%url, attempt, ?backoff, ?error, "transient API failure, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn do_request_once<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
        query: &[(&str, &str)],
    ) -> Result<T, ApiClientError> {
        let mut request = self.client.request(method, url).query(query);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                ApiClientError::RequestTimeout(error.to_string())
            } else {
                ApiClientError::ServerCommunication(error.to_string())
            }
        })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|error| ApiClientError::InvalidResponse(error.to_string()))?;

        if !status.is_success() {
            let envelope: RestJson<()> = serde_json::from_slice(&bytes).unwrap_or(RestJson {
                data: None,
                error: None,
                message: None,
            });
            let kind = envelope
                .error
                .as_deref()
                .map(error_kind)
                .unwrap_or(ReplyErrorKind::Internal);
            let message = envelope
                .message
                .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());
            return Err(ApiClientError::from_wire(status, kind, message));
        }

        let envelope: RestJson<T> = serde_json::from_slice(&bytes)
            .map_err(|error| ApiClientError::InvalidResponse(error.to_string()))?;
        envelope
            .data
            .ok_or_else(|| ApiClientError::InvalidResponse("missing data field".to_string()))
    }

    /// Check a delete result, treating not-found as success.
    fn delete_idempotent<T>(result: Result<T, ApiClientError>) -> Result<(), ApiClientError> {
        match result {
            Ok(_) | Err(ApiClientError::ResourceNotExists(_)) => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// Read one SVM.
    #[instrument(skip(self))]
    pub async fn get_svm(&self, name: &str) -> Result<Svm, ApiClientError> {
        self.do_request::<(), Svm>(Method::GET, &format!("v1/svms/{name}"), None, &[])
            .await
    }

    /// List all SVMs.
    pub async fn list_svms(&self) -> Result<Vec<Svm>, ApiClientError> {
        self.do_request::<(), Vec<Svm>>(Method::GET, "v1/svms", None, &[])
            .await
    }

    /// Create an SVM. An existing SVM with identical parameters is returned
    /// as-is; the server distinguishes that from a parameter mismatch.
    #[instrument(skip(self, body), fields(svm = %body.name))]
    pub async fn create_svm(&self, body: &CreateSvmBody) -> Result<Svm, ApiClientError> {
        self.do_request(Method::POST, "v1/svms", Some(body), &[])
            .await
    }

    /// Delete an SVM, tolerating absence.
    #[instrument(skip(self))]
    pub async fn delete_svm(&self, name: &str) -> Result<(), ApiClientError> {
        Self::delete_idempotent(
            self.do_request::<(), serde_json::Value>(
                Method::DELETE,
                &format!("v1/svms/{name}"),
                None,
                &[],
            )
            .await,
        )
    }

    /// Capacity of an SVM's backing pool.
    pub async fn svm_capacity(&self, name: &str) -> Result<CapacityInfo, ApiClientError> {
        self.do_request::<(), CapacityInfo>(
            Method::GET,
            &format!("v1/svms/{name}/capacity"),
            None,
            &[],
        )
        .await
    }

    /// Create a directory, tolerating "already exists".
    #[instrument(skip(self, body), fields(svm = %body.svm_name, path = %body.path))]
    pub async fn create_directory(&self, body: &CreateDirectoryBody) -> Result<(), ApiClientError> {
        match self
            .do_request::<_, serde_json::Value>(Method::POST, "v1/directories", Some(body), &[])
            .await
        {
            Ok(_) | Err(ApiClientError::ResourceAlreadyExists(_)) => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// Delete a directory, tolerating absence.
    #[instrument(skip(self))]
    pub async fn delete_directory(&self, svm: &str, path: &str) -> Result<(), ApiClientError> {
        Self::delete_idempotent(
            self.do_request::<(), serde_json::Value>(
                Method::DELETE,
                &format!("v1/directories/{svm}"),
                None,
                &[("path", path)],
            )
            .await,
        )
    }

    /// Create a server-side reflink snapshot, tolerating "already exists".
    #[instrument(skip(self, body), fields(svm = %body.svm_name, path = %body.snapshot_path))]
    pub async fn create_snapshot(&self, body: &CreateSnapshotBody) -> Result<(), ApiClientError> {
        match self
            .do_request::<_, serde_json::Value>(Method::POST, "v1/snapshots", Some(body), &[])
            .await
        {
            Ok(_) | Err(ApiClientError::ResourceAlreadyExists(_)) => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// Delete a snapshot, tolerating absence.
    #[instrument(skip(self))]
    pub async fn delete_snapshot(&self, svm: &str, path: &str) -> Result<(), ApiClientError> {
        Self::delete_idempotent(
            self.do_request::<(), serde_json::Value>(
                Method::DELETE,
                &format!("v1/snapshots/{svm}"),
                None,
                &[("path", path)],
            )
            .await,
        )
    }

    /// Restore a snapshot to a fresh target path.
    #[instrument(skip(self, body), fields(svm = %body.svm_name))]
    pub async fn restore_snapshot(&self, body: &RestoreSnapshotBody) -> Result<(), ApiClientError> {
        self.do_request::<_, serde_json::Value>(Method::POST, "v1/snapshots/restore", Some(body), &[])
            .await
            .map(|_| ())
    }

    /// Set the project quota of a path.
    #[instrument(skip(self, body), fields(svm = %body.svm_name, path = %body.path))]
    pub async fn set_quota(&self, body: &SetQuotaBody) -> Result<(), ApiClientError> {
        self.do_request::<_, serde_json::Value>(Method::POST, "v1/quotas", Some(body), &[])
            .await
            .map(|_| ())
    }

    /// Read the quota and observed usage of a path.
    pub async fn get_quota(&self, svm: &str, path: &str) -> Result<QuotaInfo, ApiClientError> {
        self.do_request::<(), QuotaInfo>(
            Method::GET,
            &format!("v1/quotas/{svm}"),
            None,
            &[("path", path)],
        )
        .await
    }

    /// Grow the quota of a path; the server never shrinks below usage.
    pub async fn expand_quota(&self, body: &ExpandQuotaBody) -> Result<(), ApiClientError> {
        self.do_request::<_, serde_json::Value>(Method::PATCH, "v1/quotas", Some(body), &[])
            .await
            .map(|_| ())
    }

    /// Log the API endpoint reachability at startup.
    pub async fn ping(&self) {
        match self.list_svms().await {
            Ok(svms) => debug!(count = svms.len(), "REST API endpoint reachable"),
            Err(error) => warn!(?error, "REST API endpoint is not accessible"),
        }
    }
}
