//! Typed get/list/patch/post against the cluster API.
//!
//! Reads fail with [`SetupError::Remote`] on a non-2xx status. Writes hand
//! the status back in an [`ApiResult`] so the caller decides what counts as
//! success.

pub mod resources;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use setup_common::JsonPatchOp;
use tracing::debug;

use crate::error::{Result, SetupError};
use crate::transport::{ApiRequest, ApiResponse, RetryingTransport};
use resources::{status_message, List};

const LIST_LIMIT: u32 = 50000;

/// Kinds of resources the setup backend reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    IngressConfig,
    ApiServerConfig,
    OAuthClient,
    Route,
    Secret,
    Deployment,
    NodeNetworkConfigurationPolicy,
}

impl ResourceKind {
    fn group_version_path(&self) -> &'static str {
        match self {
            ResourceKind::IngressConfig | ResourceKind::ApiServerConfig => "/apis/config.openshift.io/v1",
            ResourceKind::OAuthClient => "/apis/oauth.openshift.io/v1",
            ResourceKind::Route => "/apis/route.openshift.io/v1",
            ResourceKind::Secret => "/api/v1",
            ResourceKind::Deployment => "/apis/apps/v1",
            ResourceKind::NodeNetworkConfigurationPolicy => "/apis/nmstate.io/v1",
        }
    }

    fn plural(&self) -> &'static str {
        match self {
            ResourceKind::IngressConfig => "ingresses",
            ResourceKind::ApiServerConfig => "apiservers",
            ResourceKind::OAuthClient => "oauthclients",
            ResourceKind::Route => "routes",
            ResourceKind::Secret => "secrets",
            ResourceKind::Deployment => "deployments",
            ResourceKind::NodeNetworkConfigurationPolicy => "nodenetworkconfigurationpolicies",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ResourceKind::IngressConfig => "Ingress",
            ResourceKind::ApiServerConfig => "ApiServer",
            ResourceKind::OAuthClient => "OAuthClient",
            ResourceKind::Route => "Route",
            ResourceKind::Secret => "Secret",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::NodeNetworkConfigurationPolicy => "NodeNetworkConfigurationPolicy",
        }
    }
}

/// Address of a single resource, or of a collection when `name` is unset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: Option<String>,
}

impl ResourceRef {
    pub fn cluster(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: None,
            name: Some(name.into()),
        }
    }

    pub fn namespaced(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: Some(namespace.into()),
            name: Some(name.into()),
        }
    }

    pub fn collection(kind: ResourceKind, namespace: Option<&str>) -> Self {
        Self {
            kind,
            namespace: namespace.map(str::to_string),
            name: None,
        }
    }

    pub fn path(&self) -> String {
        let mut path = self.kind.group_version_path().to_string();
        if let Some(namespace) = &self.namespace {
            path.push_str("/namespaces/");
            path.push_str(namespace);
        }
        path.push('/');
        path.push_str(self.kind.plural());
        if let Some(name) = &self.name {
            path.push('/');
            path.push_str(name);
        }
        path
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.namespace, &self.name) {
            (Some(ns), Some(name)) => write!(f, "{} {}/{}", self.kind.name(), ns, name),
            (None, Some(name)) => write!(f, "{} {}", self.kind.name(), name),
            (Some(ns), None) => write!(f, "{} in {}", self.kind.name(), ns),
            (None, None) => write!(f, "{}", self.kind.name()),
        }
    }
}

/// Body of a PATCH request
#[derive(Debug, Clone)]
pub enum PatchBody {
    /// RFC 6902 operation list
    Json(Vec<JsonPatchOp>),
    /// RFC 7386 merge document
    Merge(Value),
}

impl PatchBody {
    fn content_type(&self) -> &'static str {
        match self {
            PatchBody::Json(_) => "application/json-patch+json",
            PatchBody::Merge(_) => "application/merge-patch+json",
        }
    }
}

/// Status and decoded body of a write
#[derive(Debug, Clone)]
pub struct ApiResult {
    pub status_code: u16,
    pub body: Option<Value>,
}

impl ApiResult {
    fn from_response(response: &ApiResponse) -> Self {
        Self {
            status_code: response.status,
            body: response.json().ok(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Remote `Status.message`, empty when the body carries none
    pub fn message(&self) -> String {
        status_message(self.body.as_ref())
    }

    /// `metadata.name` of the object returned by the API server
    pub fn object_name(&self) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|b| b.pointer("/metadata/name"))
            .and_then(Value::as_str)
    }
}

/// Client for the cluster API, routed through [`RetryingTransport`]
#[derive(Debug, Clone)]
pub struct ResourceClient {
    transport: RetryingTransport,
    api_url: String,
}

impl ResourceClient {
    pub fn new(transport: RetryingTransport, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { transport, api_url }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    /// GET an arbitrary API path and decode the body
    pub async fn get_path<T: DeserializeOwned>(&self, token: &str, path: &str) -> Result<T> {
        let request = ApiRequest::get(self.url(path)).bearer(token);
        let response = self.transport.execute(&request, None).await?;

        if !response.is_success() {
            let body: Option<Value> = response.json().ok();
            return Err(SetupError::Remote {
                status: response.status,
                message: status_message(body.as_ref()),
            });
        }

        Ok(response.json()?)
    }

    pub async fn get<T: DeserializeOwned>(&self, token: &str, resource: &ResourceRef) -> Result<T> {
        debug!(resource = %resource, "GET");
        self.get_path(token, &resource.path()).await
    }

    /// List a kind across all namespaces
    pub async fn list<T: DeserializeOwned>(&self, token: &str, kind: ResourceKind) -> Result<Vec<T>> {
        let path = format!(
            "{}?limit={}",
            ResourceRef::collection(kind, None).path(),
            LIST_LIMIT
        );
        debug!(kind = kind.name(), "LIST");
        let list: List<T> = self.get_path(token, &path).await?;
        Ok(list.items)
    }

    pub async fn patch(&self, token: &str, resource: &ResourceRef, patch: &PatchBody) -> Result<ApiResult> {
        debug!(resource = %resource, "PATCH");
        let request = ApiRequest::new(Method::PATCH, self.url(&resource.path())).bearer(token);
        let request = match patch {
            PatchBody::Json(ops) => request.json_body(ops, patch.content_type())?,
            PatchBody::Merge(doc) => request.json_body(doc, patch.content_type())?,
        };

        let response = self.transport.execute(&request, None).await?;
        Ok(ApiResult::from_response(&response))
    }

    /// POST `object` into the collection addressed by `collection`
    pub async fn post<T: Serialize>(&self, token: &str, collection: &ResourceRef, object: &T) -> Result<ApiResult> {
        debug!(resource = %collection, "POST");
        let request = ApiRequest::new(Method::POST, self.url(&collection.path()))
            .bearer(token)
            .json_body(object, "application/json")?;

        let response = self.transport.execute(&request, None).await?;
        Ok(ApiResult::from_response(&response))
    }

    /// Raw status of `GET /apis`, used as an API server ping
    pub async fn ping(&self, token: &str) -> Result<u16> {
        let request = ApiRequest::get(self.url("/apis")).bearer(token);
        let response = self.transport.execute(&request, None).await?;
        Ok(response.status)
    }
}
