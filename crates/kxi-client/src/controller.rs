//! Assembly controller REST API
//!
//! Remote assembly mode talks to the platform's controller service instead
//! of the Kubernetes API. The controller reports readiness as plain booleans.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

use kxi_core::AssemblySummary;

use crate::error::Result;
use crate::http::ApiClient;

/// Path of the controller service below the deployment host
pub const CONTROLLER_PATH: &str = "kxicontroller/";

/// Status as reported by the controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStatus {
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub ready: bool,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    name: String,
    #[serde(default)]
    running: bool,
    #[serde(default)]
    ready: bool,
}

/// Client for `/kxicontroller/assembly/cli/*`
#[derive(Clone)]
pub struct ControllerClient {
    api: ApiClient,
}

impl ControllerClient {
    /// `base` is the deployment root, e.g. `https://insights.example.com/`
    pub fn new(base: &Url, token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(base.join(CONTROLLER_PATH)?, token)?,
        })
    }

    pub async fn list(&self) -> Result<Vec<AssemblySummary>> {
        let entries: Vec<ListEntry> = self.api.get_json("assembly/cli/list", &[]).await?;
        Ok(entries
            .into_iter()
            .map(|e| AssemblySummary {
                name: e.name,
                namespace: None,
                running: Some(e.running),
                ready: Some(e.ready),
            })
            .collect())
    }

    /// Status of one assembly, `None` when the controller does not know it
    pub async fn status(&self, name: &str) -> Result<Option<RemoteStatus>> {
        match self
            .api
            .get_json::<Option<RemoteStatus>>("assembly/cli/status", &[("name", name)])
            .await
        {
            Ok(status) => Ok(Some(status.unwrap_or_default())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Submit an annotated assembly document
    pub async fn deploy(&self, body: &Value) -> Result<Value> {
        self.api.post_json("assembly/cli/deploy", body).await
    }

    /// Request teardown; `false` when the assembly was already absent
    pub async fn teardown(&self, name: &str) -> Result<bool> {
        match self
            .api
            .post_json::<_, Value>("assembly/cli/teardown", &json!({ "name": name }))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
