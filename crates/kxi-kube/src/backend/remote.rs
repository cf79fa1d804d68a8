//! Remote mode: the platform's assembly controller REST API

use async_trait::async_trait;
use serde_json::json;

use kxi_client::ControllerClient;
use kxi_core::{Assembly, AssemblySummary};

use super::{AssemblyBackend, AssemblyQuery, AssemblyState, BackendMode, DeleteOutcome};
use crate::error::{KubeError, Result};

/// Assembly backend over `/kxicontroller/assembly/cli/*`
#[derive(Clone)]
pub struct RemoteBackend {
    controller: ControllerClient,
}

impl RemoteBackend {
    pub fn new(controller: ControllerClient) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl AssemblyBackend for RemoteBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::Remote
    }

    async fn create(&self, _namespace: &str, assembly: &Assembly) -> Result<()> {
        tracing::debug!(name = assembly.name(), "deploying assembly via controller");
        self.controller.deploy(&assembly.to_value()?).await?;
        Ok(())
    }

    async fn status(&self, _namespace: &str, name: &str) -> Result<Option<AssemblyState>> {
        Ok(self.controller.status(name).await?.map(|s| AssemblyState {
            ready: s.ready,
            report: json!({ "running": s.running, "ready": s.ready }),
        }))
    }

    async fn list(&self, _namespace: &str) -> Result<Vec<AssemblySummary>> {
        Ok(self.controller.list().await?)
    }

    async fn list_resources(&self, _query: &AssemblyQuery) -> Result<Vec<Assembly>> {
        Err(KubeError::Unsupported(
            "Reading assembly definitions requires direct cluster access, use --use-kubeconfig"
                .to_string(),
        ))
    }

    async fn delete(&self, _namespace: &str, name: &str) -> Result<DeleteOutcome> {
        if self.controller.teardown(name).await? {
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::AlreadyAbsent)
        }
    }
}
