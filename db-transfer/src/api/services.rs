//! Service directory: resolves a human-readable label to a service.

use tracing::debug;

use super::models::Service;
use super::ApiClient;
use crate::utils::errors::Result;

#[derive(Clone)]
pub struct ServiceDirectory {
    api: ApiClient,
}

impl ServiceDirectory {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn list(&self) -> Result<Vec<Service>> {
        self.api.get(&self.api.environment_path("/services")).await
    }

    /// `Ok(None)` when no service carries `label`.
    pub async fn retrieve_by_label(&self, label: &str) -> Result<Option<Service>> {
        let services = self.list().await?;
        let found = services.into_iter().find(|s| s.label == label);
        debug!("Service lookup for label {}: {:?}", label, found.as_ref().map(|s| &s.id));
        Ok(found)
    }
}
