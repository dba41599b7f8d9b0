//! Backing-store listing
//!
//! Modules only need object names, so listing goes through the metadata API.

use async_trait::async_trait;
use kube::api::{DynamicObject, ListParams};
use kube::{Api, Client, ResourceExt};
#[cfg(test)]
use mockall::automock;

use crate::error::UpstreamError;
use crate::kind::ProxyKind;

/// Read-only view of the objects of a governed kind
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectLister: Send + Sync {
    /// Names of the objects of `kind`, restricted to `name` when given
    ///
    /// `name` goes into a field selector and must already be a valid object name.
    async fn list_names(
        &self,
        kind: ProxyKind,
        name: Option<String>,
    ) -> Result<Vec<String>, UpstreamError>;
}

/// Lists objects from the Kubernetes API server
pub struct KubeLister {
    client: Client,
}

impl KubeLister {
    /// Create a lister using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectLister for KubeLister {
    async fn list_names(
        &self,
        kind: ProxyKind,
        name: Option<String>,
    ) -> Result<Vec<String>, UpstreamError> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &kind.api_resource());

        let mut params = ListParams::default();
        if let Some(name) = name {
            params = params.fields(&format!("metadata.name={}", name));
        }

        let list = api.list_metadata(&params).await?;
        Ok(list.items.iter().map(|o| o.name_any()).collect())
    }
}
