//! Orchestrator API clients
//!
//! Two thin clients over the Kubernetes API server: one lists the
//! `AutoscalingDefinition` custom resources, the other reads and writes the
//! scale subresource of the targeted workload. Cluster access comes from the
//! in-cluster service account when present, otherwise from a kubeconfig in
//! the user's profile.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    AutoscalingDefinition, AutoscalingDefinitionList, ScaleTarget, TargetKind, API_GROUP,
    API_VERSION, DEFINITIONS_RESOURCE,
};

/// Path of the in-cluster service-account token
const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Request deadline for API-server calls
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Errors that can occur while talking to the orchestrator
#[derive(Error, Debug)]
pub enum KubeError {
    #[error("no cluster configuration: not in-cluster and no kubeconfig at {0}")]
    NoClusterConfig(PathBuf),

    #[error("failed to parse kubeconfig: {0}")]
    Kubeconfig(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed API response: {0}")]
    Parse(String),

    #[error("not recognized target type: {0}")]
    UnknownTargetKind(String),

    #[error("no {kind} matching {label}={value} in namespace {namespace}")]
    NoMatchingTarget {
        kind: String,
        label: String,
        value: String,
        namespace: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Current and desired replica count of a workload
#[derive(Debug, Clone, PartialEq)]
pub struct Scale {
    /// Name of the matched workload object
    pub name: String,
    pub namespace: String,
    pub replicas: i32,
}

/// Trait seam over the definition store, allows mocking in tests
#[async_trait]
pub trait DefinitionsClient: Send + Sync {
    /// List all autoscaling definitions in a namespace
    async fn list(&self, namespace: &str) -> Result<Vec<AutoscalingDefinition>, KubeError>;
}

/// Trait seam over the scale subresource, allows mocking in tests
#[async_trait]
pub trait ScaleClient: Send + Sync {
    /// Read the current scale of the first workload matching the target
    async fn get_scale(&self, target: &ScaleTarget) -> Result<Scale, KubeError>;

    /// Write the desired replica count of the first workload matching the target
    async fn update_scale(
        &self,
        target: &ScaleTarget,
        replicas: i32,
    ) -> Result<Scale, KubeError>;
}

// ============================================================================
// Cluster configuration
// ============================================================================

/// Resolved access parameters for the API server
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Base URL of the API server
    pub server: String,
    /// Bearer token, when authentication is configured
    pub token: Option<String>,
    /// Skip TLS verification (from the kubeconfig cluster entry)
    pub insecure_skip_tls_verify: bool,
}

impl ClusterConfig {
    /// In-cluster config if available, else the kubeconfig at `path`
    /// (defaulting to `~/.kube/config`)
    pub fn load(path: Option<&Path>) -> Result<Self, KubeError> {
        if let Some(config) = Self::in_cluster() {
            return Ok(config);
        }
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_kubeconfig_path(),
        };
        if !path.exists() {
            return Err(KubeError::NoClusterConfig(path));
        }
        Self::from_kubeconfig(&path)
    }

    /// Service-account environment of a pod, when present
    fn in_cluster() -> Option<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").ok()?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").ok()?;
        let token = std::fs::read_to_string(SERVICE_ACCOUNT_TOKEN).ok()?;
        Some(Self {
            server: format!("https://{}:{}", host, port),
            token: Some(token.trim().to_string()),
            insecure_skip_tls_verify: true,
        })
    }

    /// Parse the current-context cluster and user out of a kubeconfig file
    pub fn from_kubeconfig(path: &Path) -> Result<Self, KubeError> {
        let content = std::fs::read_to_string(path)?;
        let kubeconfig: Kubeconfig =
            serde_yaml::from_str(&content).map_err(|e| KubeError::Kubeconfig(e.to_string()))?;

        let context_name = kubeconfig
            .current_context
            .ok_or_else(|| KubeError::Kubeconfig("no current-context set".to_string()))?;
        let context = kubeconfig
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .map(|c| c.context.clone())
            .ok_or_else(|| {
                KubeError::Kubeconfig(format!("context '{}' not found", context_name))
            })?;

        let cluster = kubeconfig
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| c.cluster.clone())
            .ok_or_else(|| {
                KubeError::Kubeconfig(format!("cluster '{}' not found", context.cluster))
            })?;

        let token = kubeconfig
            .users
            .iter()
            .find(|u| u.name == context.user)
            .and_then(|u| u.user.token.clone());

        Ok(Self {
            server: cluster.server,
            token,
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
        })
    }
}

/// Default kubeconfig location: ~/.kube/config
pub fn default_kubeconfig_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kube")
        .join("config")
}

#[derive(Debug, Clone, Deserialize)]
struct Kubeconfig {
    #[serde(rename = "current-context")]
    #[serde(default)]
    current_context: Option<String>,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    users: Vec<NamedUser>,
}

#[derive(Debug, Clone, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: Cluster,
}

#[derive(Debug, Clone, Deserialize)]
struct Cluster {
    server: String,
    #[serde(rename = "insecure-skip-tls-verify")]
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct NamedContext {
    name: String,
    context: Context,
}

#[derive(Debug, Clone, Deserialize)]
struct Context {
    cluster: String,
    user: String,
}

#[derive(Debug, Clone, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: User,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct User {
    #[serde(default)]
    token: Option<String>,
}

// ============================================================================
// HTTP client
// ============================================================================

/// Real HTTP implementation of both orchestrator traits
#[derive(Clone)]
pub struct KubeClient {
    client: reqwest::Client,
    config: ClusterConfig,
}

impl KubeClient {
    pub fn new(config: ClusterConfig) -> Result<Self, KubeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
            .build()
            .map_err(|e| KubeError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.server.trim_end_matches('/'), path);
        let mut request = self.client.request(method, url);
        if let Some(ref token) = self.config.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        request
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, KubeError> {
        let response = self
            .request(reqwest::Method::GET, path)
            .send()
            .await
            .map_err(|e| KubeError::Http(e.to_string()))?;
        Self::decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, KubeError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| KubeError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(KubeError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        serde_json::from_str(&body).map_err(|e| KubeError::Parse(e.to_string()))
    }

    /// API path segment for a workload kind
    fn resource_segment(target: &ScaleTarget) -> Result<&'static str, KubeError> {
        match target.target_kind() {
            Some(TargetKind::Deployment) => Ok("deployments"),
            Some(TargetKind::ReplicaSet) => Ok("replicasets"),
            None => Err(KubeError::UnknownTargetKind(target.target_type.clone())),
        }
    }

    /// Name of the first workload matching the target's label selector
    async fn resolve_target_name(&self, target: &ScaleTarget) -> Result<String, KubeError> {
        let segment = Self::resource_segment(target)?;
        let selector = format!("{}={}", target.label_name, target.match_label);
        let path = format!(
            "/apis/apps/v1/namespaces/{}/{}?labelSelector={}",
            target.match_namespace, segment, selector
        );
        let list: WorkloadList = self.get_json(&path).await?;
        list.items
            .into_iter()
            .next()
            .map(|w| w.metadata.name)
            .ok_or_else(|| KubeError::NoMatchingTarget {
                kind: segment.to_string(),
                label: target.label_name.clone(),
                value: target.match_label.clone(),
                namespace: target.match_namespace.clone(),
            })
    }

    fn scale_path(target: &ScaleTarget, name: &str) -> Result<String, KubeError> {
        let segment = Self::resource_segment(target)?;
        Ok(format!(
            "/apis/apps/v1/namespaces/{}/{}/{}/scale",
            target.match_namespace, segment, name
        ))
    }
}

#[async_trait]
impl DefinitionsClient for KubeClient {
    async fn list(&self, namespace: &str) -> Result<Vec<AutoscalingDefinition>, KubeError> {
        let path = format!(
            "/apis/{}/{}/namespaces/{}/{}",
            API_GROUP, API_VERSION, namespace, DEFINITIONS_RESOURCE
        );
        let list: AutoscalingDefinitionList = self.get_json(&path).await?;
        Ok(list.items)
    }
}

#[async_trait]
impl ScaleClient for KubeClient {
    async fn get_scale(&self, target: &ScaleTarget) -> Result<Scale, KubeError> {
        let name = self.resolve_target_name(target).await?;
        let path = Self::scale_path(target, &name)?;
        let wire: WireScale = self.get_json(&path).await?;
        Ok(Scale {
            name,
            namespace: target.match_namespace.clone(),
            replicas: wire.spec.replicas,
        })
    }

    async fn update_scale(
        &self,
        target: &ScaleTarget,
        replicas: i32,
    ) -> Result<Scale, KubeError> {
        let name = self.resolve_target_name(target).await?;
        let path = Self::scale_path(target, &name)?;
        let body = WireScale {
            api_version: "autoscaling/v1".to_string(),
            kind: "Scale".to_string(),
            metadata: WireMeta {
                name: name.clone(),
                namespace: target.match_namespace.clone(),
            },
            spec: WireScaleSpec { replicas },
        };
        let response = self
            .request(reqwest::Method::PUT, &path)
            .json(&body)
            .send()
            .await
            .map_err(|e| KubeError::Http(e.to_string()))?;
        let wire: WireScale = Self::decode(response).await?;
        Ok(Scale {
            name,
            namespace: target.match_namespace.clone(),
            replicas: wire.spec.replicas,
        })
    }
}

// Wire shapes of the API objects we touch

#[derive(Debug, Deserialize)]
struct WorkloadList {
    #[serde(default)]
    items: Vec<Workload>,
}

#[derive(Debug, Deserialize)]
struct Workload {
    metadata: WorkloadMeta,
}

#[derive(Debug, Deserialize)]
struct WorkloadMeta {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireScale {
    #[serde(rename = "apiVersion")]
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    kind: String,
    metadata: WireMeta,
    spec: WireScaleSpec,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct WireMeta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireScaleSpec {
    replicas: i32,
}
