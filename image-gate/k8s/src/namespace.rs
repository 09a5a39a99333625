use anyhow::Result;
use image_gate_core::{Metadata, NamespaceLookup};
use k8s_openapi::api::core::v1::Namespace;

/// Resolves namespace labels and annotations through the Kubernetes API.
#[derive(Clone)]
pub struct NamespaceClient {
    api: kube::Api<Namespace>,
}

impl NamespaceClient {
    pub fn new(client: kube::Client) -> Self {
        Self {
            api: kube::Api::all(client),
        }
    }
}

#[async_trait::async_trait]
impl NamespaceLookup for NamespaceClient {
    async fn namespace_metadata(&self, name: &str) -> Result<Metadata> {
        let namespace = self.api.get(name).await?;
        Ok(Metadata {
            labels: namespace.metadata.labels.unwrap_or_default(),
            annotations: namespace.metadata.annotations.unwrap_or_default(),
        })
    }
}
