//! Compute Engine REST client
//!
//! Talks to the Compute Engine v1 API directly with a bearer token. Every
//! mutating call returns an operation which is waited on before the call
//! returns, so callers see the object in its final state.

use crate::compute::{ComputeClient, Firewall, Network, Route, Router, Subnetwork};
use crate::error::{GcpError, Result};
use async_trait::async_trait;
use infraflow_cloud::CloudError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub const COMPUTE_API_BASE: &str = "https://compute.googleapis.com/compute/v1";

const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

type CloudResult<T> = std::result::Result<T, CloudError>;

/// Configuration for the REST client
#[derive(Debug, Clone)]
pub struct GcpApiConfig {
    pub project: String,
    pub access_token: String,

    /// API base URL; overridable for tests and private endpoints
    pub endpoint: String,

    pub request_timeout: Duration,

    /// How long to wait for a single operation to finish
    pub operation_timeout: Duration,
}

impl GcpApiConfig {
    /// Create a config from `GOOGLE_OAUTH_ACCESS_TOKEN`.
    pub fn from_env(project: impl Into<String>) -> Result<Self> {
        let access_token = std::env::var(ACCESS_TOKEN_ENV)
            .map_err(|_| GcpError::MissingEnvVar(ACCESS_TOKEN_ENV.to_string()))?;

        Ok(Self {
            project: project.into(),
            access_token,
            endpoint: COMPUTE_API_BASE.to_string(),
            request_timeout: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(300),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }
}

/// `ComputeClient` over the Compute Engine REST API
pub struct GcpComputeApi {
    client: reqwest::Client,
    config: GcpApiConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Operation {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    self_link: Option<String>,
    #[serde(default)]
    error: Option<OperationErrors>,
    #[serde(default)]
    http_error_status_code: Option<u16>,
    #[serde(default)]
    http_error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OperationErrors {
    #[serde(default)]
    errors: Vec<OperationErrorItem>,
}

#[derive(Debug, Deserialize)]
struct OperationErrorItem {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Map an HTTP status from the API to a cloud error.
pub fn map_status(status: u16, message: String) -> CloudError {
    match status {
        404 => CloudError::NotFound(message),
        409 => CloudError::AlreadyExists(message),
        403 => CloudError::PermissionDenied(message),
        400 => CloudError::InvalidSpec(message),
        429 => CloudError::RateLimited(message),
        500..=599 => CloudError::Unavailable(message),
        _ => CloudError::Api { status, message },
    }
}

/// URL of one page of a list call. Page tokens are opaque and may contain
/// `+`, `/` or `=`, so they go through query encoding.
fn page_url(url: &str, page_token: Option<&str>) -> CloudResult<reqwest::Url> {
    let mut page_url = reqwest::Url::parse(url).map_err(|e| CloudError::Api {
        status: 0,
        message: format!("invalid list URL {}: {}", url, e),
    })?;
    if let Some(token) = page_token {
        page_url.query_pairs_mut().append_pair("pageToken", token);
    }
    Ok(page_url)
}

fn transport_error(error: reqwest::Error) -> CloudError {
    if error.is_timeout() {
        CloudError::Timeout(error.to_string())
    } else if let Some(status) = error.status() {
        map_status(status.as_u16(), error.to_string())
    } else {
        CloudError::Unavailable(error.to_string())
    }
}

impl GcpComputeApi {
    pub fn new(config: GcpApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn global_url(&self, collection: &str, name: Option<&str>) -> String {
        let base = format!(
            "{}/projects/{}/global/{}",
            self.config.endpoint, self.config.project, collection
        );
        match name {
            Some(name) => format!("{}/{}", base, name),
            None => base,
        }
    }

    fn regional_url(&self, region: &str, collection: &str, name: Option<&str>) -> String {
        let base = format!(
            "{}/projects/{}/regions/{}/{}",
            self.config.endpoint, self.config.project, region, collection
        );
        match name {
            Some(name) => format!("{}/{}", base, name),
            None => base,
        }
    }

    /// Send a request and turn non-success responses into cloud errors.
    async fn send(&self, request: reqwest::RequestBuilder) -> CloudResult<reqwest::Response> {
        let response = request
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        Err(map_status(status.as_u16(), message))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> CloudResult<Option<T>> {
        tracing::debug!("GET {}", url);
        match self.send(self.client.get(url)).await {
            Ok(response) => Ok(Some(response.json().await.map_err(transport_error)?)),
            Err(CloudError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetch every page of a list call.
    async fn list<T: DeserializeOwned>(&self, url: &str) -> CloudResult<Vec<T>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page_url = page_url(url, page_token.as_deref())?;
            tracing::debug!("GET {}", page_url);
            let page: ListResponse<T> = self
                .send(self.client.get(page_url))
                .await?
                .json()
                .await
                .map_err(transport_error)?;

            items.extend(page.items);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(items),
            }
        }
    }

    /// Issue a mutating call and wait for its operation.
    async fn mutate<B: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&B>,
    ) -> CloudResult<()> {
        tracing::debug!("{} {}", method, url);
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let operation: Operation = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(transport_error)?;
        self.wait(operation).await
    }

    async fn wait(&self, mut operation: Operation) -> CloudResult<()> {
        let deadline = Instant::now() + self.config.operation_timeout;

        while operation.status != "DONE" {
            if Instant::now() >= deadline {
                return Err(CloudError::Timeout(format!(
                    "operation {} did not finish within {:?}",
                    operation.name, self.config.operation_timeout
                )));
            }
            let Some(self_link) = operation.self_link.clone() else {
                return Err(CloudError::Api {
                    status: 0,
                    message: format!("operation {} has no selfLink", operation.name),
                });
            };
            // The wait endpoint returns after at most two minutes, done or not
            operation = self
                .send(self.client.post(format!("{}/wait", self_link)))
                .await?
                .json()
                .await
                .map_err(transport_error)?;
        }

        match operation.error {
            Some(errors) if !errors.errors.is_empty() => {
                let message = errors
                    .errors
                    .iter()
                    .map(|e| format!("{}: {}", e.code, e.message))
                    .collect::<Vec<_>>()
                    .join("; ");
                let status = operation.http_error_status_code.unwrap_or(400);
                let message = match operation.http_error_message {
                    Some(http) => format!("{} ({})", message, http),
                    None => message,
                };
                Err(map_status(status, message))
            }
            _ => Ok(()),
        }
    }

    async fn fetch_after_insert<T: DeserializeOwned>(&self, url: &str, what: &str) -> CloudResult<T> {
        self.get_json(url)
            .await?
            .ok_or_else(|| CloudError::NotFound(format!("{} vanished after insert", what)))
    }
}

#[async_trait]
impl ComputeClient for GcpComputeApi {
    fn project(&self) -> &str {
        &self.config.project
    }

    async fn get_network(&self, name: &str) -> CloudResult<Option<Network>> {
        self.get_json(&self.global_url("networks", Some(name))).await
    }

    async fn insert_network(&self, network: &Network) -> CloudResult<Network> {
        self.mutate(
            reqwest::Method::POST,
            &self.global_url("networks", None),
            Some(network),
        )
        .await?;
        self.fetch_after_insert(&self.global_url("networks", Some(&network.name)), "network")
            .await
    }

    async fn delete_network(&self, name: &str) -> CloudResult<()> {
        self.mutate::<()>(
            reqwest::Method::DELETE,
            &self.global_url("networks", Some(name)),
            None,
        )
        .await
    }

    async fn get_subnetwork(&self, region: &str, name: &str) -> CloudResult<Option<Subnetwork>> {
        self.get_json(&self.regional_url(region, "subnetworks", Some(name)))
            .await
    }

    async fn insert_subnetwork(&self, region: &str, subnet: &Subnetwork) -> CloudResult<Subnetwork> {
        self.mutate(
            reqwest::Method::POST,
            &self.regional_url(region, "subnetworks", None),
            Some(subnet),
        )
        .await?;
        self.fetch_after_insert(
            &self.regional_url(region, "subnetworks", Some(&subnet.name)),
            "subnetwork",
        )
        .await
    }

    async fn patch_subnetwork(&self, region: &str, subnet: &Subnetwork) -> CloudResult<Subnetwork> {
        let url = self.regional_url(region, "subnetworks", Some(&subnet.name));
        self.mutate(reqwest::Method::PATCH, &url, Some(subnet)).await?;
        self.fetch_after_insert(&url, "subnetwork").await
    }

    async fn delete_subnetwork(&self, region: &str, name: &str) -> CloudResult<()> {
        self.mutate::<()>(
            reqwest::Method::DELETE,
            &self.regional_url(region, "subnetworks", Some(name)),
            None,
        )
        .await
    }

    async fn get_router(&self, region: &str, name: &str) -> CloudResult<Option<Router>> {
        self.get_json(&self.regional_url(region, "routers", Some(name)))
            .await
    }

    async fn insert_router(&self, region: &str, router: &Router) -> CloudResult<Router> {
        self.mutate(
            reqwest::Method::POST,
            &self.regional_url(region, "routers", None),
            Some(router),
        )
        .await?;
        self.fetch_after_insert(
            &self.regional_url(region, "routers", Some(&router.name)),
            "router",
        )
        .await
    }

    async fn patch_router(&self, region: &str, router: &Router) -> CloudResult<Router> {
        let url = self.regional_url(region, "routers", Some(&router.name));
        self.mutate(reqwest::Method::PATCH, &url, Some(router)).await?;
        self.fetch_after_insert(&url, "router").await
    }

    async fn delete_router(&self, region: &str, name: &str) -> CloudResult<()> {
        self.mutate::<()>(
            reqwest::Method::DELETE,
            &self.regional_url(region, "routers", Some(name)),
            None,
        )
        .await
    }

    async fn list_firewalls(&self) -> CloudResult<Vec<Firewall>> {
        self.list(&self.global_url("firewalls", None)).await
    }

    async fn get_firewall(&self, name: &str) -> CloudResult<Option<Firewall>> {
        self.get_json(&self.global_url("firewalls", Some(name))).await
    }

    async fn insert_firewall(&self, firewall: &Firewall) -> CloudResult<Firewall> {
        self.mutate(
            reqwest::Method::POST,
            &self.global_url("firewalls", None),
            Some(firewall),
        )
        .await?;
        self.fetch_after_insert(
            &self.global_url("firewalls", Some(&firewall.name)),
            "firewall",
        )
        .await
    }

    async fn patch_firewall(&self, firewall: &Firewall) -> CloudResult<Firewall> {
        let url = self.global_url("firewalls", Some(&firewall.name));
        self.mutate(reqwest::Method::PATCH, &url, Some(firewall))
            .await?;
        self.fetch_after_insert(&url, "firewall").await
    }

    async fn delete_firewall(&self, name: &str) -> CloudResult<()> {
        self.mutate::<()>(
            reqwest::Method::DELETE,
            &self.global_url("firewalls", Some(name)),
            None,
        )
        .await
    }

    async fn list_routes(&self) -> CloudResult<Vec<Route>> {
        self.list(&self.global_url("routes", None)).await
    }

    async fn delete_route(&self, name: &str) -> CloudResult<()> {
        self.mutate::<()>(
            reqwest::Method::DELETE,
            &self.global_url("routes", Some(name)),
            None,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api() -> GcpComputeApi {
        GcpComputeApi::new(GcpApiConfig {
            project: "my-project".into(),
            access_token: "token".into(),
            endpoint: COMPUTE_API_BASE.into(),
            request_timeout: Duration::from_secs(1),
            operation_timeout: Duration::from_secs(1),
        })
        .unwrap()
    }

    #[test]
    fn test_status_mapping() {
        assert!(map_status(404, "x".into()).is_not_found());
        assert!(map_status(409, "x".into()).is_already_exists());
        assert!(matches!(
            map_status(403, "x".into()),
            CloudError::PermissionDenied(_)
        ));
        assert!(matches!(map_status(400, "x".into()), CloudError::InvalidSpec(_)));
        assert!(map_status(429, "x".into()).is_transient());
        assert!(map_status(503, "x".into()).is_transient());
        assert!(!map_status(412, "x".into()).is_transient());
    }

    #[test]
    fn test_urls() {
        let api = api();
        assert_eq!(
            api.global_url("firewalls", Some("fw")),
            "https://compute.googleapis.com/compute/v1/projects/my-project/global/firewalls/fw"
        );
        assert_eq!(
            api.regional_url("europe-west1", "subnetworks", None),
            "https://compute.googleapis.com/compute/v1/projects/my-project/regions/europe-west1/subnetworks"
        );
    }

    #[test]
    fn test_endpoint_override_trims_slash() {
        let config = GcpApiConfig {
            project: "p".into(),
            access_token: "t".into(),
            endpoint: COMPUTE_API_BASE.into(),
            request_timeout: Duration::from_secs(1),
            operation_timeout: Duration::from_secs(1),
        }
        .with_endpoint("http://localhost:8080/compute/v1/");
        assert_eq!(config.endpoint, "http://localhost:8080/compute/v1");
    }

    #[test]
    fn test_list_page_decoding() {
        let raw = r#"{"items": [{"name": "fw", "network": "vpc"}], "nextPageToken": "abc"}"#;
        let page: ListResponse<Firewall> = serde_json::from_str(raw).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.next_page_token.as_deref(), Some("abc"));

        let empty: ListResponse<Firewall> = serde_json::from_str("{}").unwrap();
        assert!(empty.items.is_empty());
    }

    #[test]
    fn test_page_token_is_encoded() {
        let base = "https://compute.googleapis.com/compute/v1/projects/p/global/firewalls";

        let first = page_url(base, None).unwrap();
        assert_eq!(first.as_str(), base);

        let next = page_url(base, Some("Cg+aB/c==")).unwrap();
        assert_eq!(next.query(), Some("pageToken=Cg%2BaB%2Fc%3D%3D"));
        let token: Vec<String> = next
            .query_pairs()
            .filter(|(k, _)| k == "pageToken")
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(token, vec!["Cg+aB/c=="]);
    }

    #[tokio::test]
    async fn test_finished_operation_with_error_is_mapped() {
        let operation: Operation = serde_json::from_value(serde_json::json!({
            "name": "op-1",
            "status": "DONE",
            "httpErrorStatusCode": 409,
            "error": {"errors": [{"code": "RESOURCE_ALREADY_EXISTS", "message": "exists"}]}
        }))
        .unwrap();
        let err = api().wait(operation).await.unwrap_err();
        assert!(err.is_already_exists());
    }
}
