//! The controller's view of the ARCA REST API. A trait seam over the
//! concrete client so the RPC flows are testable against a double.

use async_trait::async_trait;
use rest_client::{ApiClientError, ArcaApiClient};
use stor_port::types::v0::{
    CreateDirectoryBody, CreateSnapshotBody, CreateSvmBody, QuotaInfo, SetQuotaBody, Svm,
};

/// REST operations the controller performs.
#[async_trait]
pub(crate) trait ArcaApi: Send + Sync {
    async fn get_svm(&self, name: &str) -> Result<Svm, ApiClientError>;
    async fn list_svms(&self) -> Result<Vec<Svm>, ApiClientError>;
    async fn create_svm(&self, body: &CreateSvmBody) -> Result<Svm, ApiClientError>;
    async fn create_directory(&self, body: &CreateDirectoryBody) -> Result<(), ApiClientError>;
    async fn delete_directory(&self, svm: &str, path: &str) -> Result<(), ApiClientError>;
    async fn create_snapshot(&self, body: &CreateSnapshotBody) -> Result<(), ApiClientError>;
    async fn delete_snapshot(&self, svm: &str, path: &str) -> Result<(), ApiClientError>;
    async fn set_quota(&self, body: &SetQuotaBody) -> Result<(), ApiClientError>;
    async fn get_quota(&self, svm: &str, path: &str) -> Result<QuotaInfo, ApiClientError>;
}

#[async_trait]
impl ArcaApi for ArcaApiClient {
    async fn get_svm(&self, name: &str) -> Result<Svm, ApiClientError> {
        ArcaApiClient::get_svm(self, name).await
    }
    async fn list_svms(&self) -> Result<Vec<Svm>, ApiClientError> {
        ArcaApiClient::list_svms(self).await
    }
    async fn create_svm(&self, body: &CreateSvmBody) -> Result<Svm, ApiClientError> {
        ArcaApiClient::create_svm(self, body).await
    }
    async fn create_directory(&self, body: &CreateDirectoryBody) -> Result<(), ApiClientError> {
        ArcaApiClient::create_directory(self, body).await
    }
    async fn delete_directory(&self, svm: &str, path: &str) -> Result<(), ApiClientError> {
        ArcaApiClient::delete_directory(self, svm, path).await
    }
    async fn create_snapshot(&self, body: &CreateSnapshotBody) -> Result<(), ApiClientError> {
        ArcaApiClient::create_snapshot(self, body).await
    }
    async fn delete_snapshot(&self, svm: &str, path: &str) -> Result<(), ApiClientError> {
        ArcaApiClient::delete_snapshot(self, svm, path).await
    }
    async fn set_quota(&self, body: &SetQuotaBody) -> Result<(), ApiClientError> {
        ArcaApiClient::set_quota(self, body).await
    }
    async fn get_quota(&self, svm: &str, path: &str) -> Result<QuotaInfo, ApiClientError> {
        ArcaApiClient::get_quota(self, svm, path).await
    }
}
