//! Entitlements service client
//!
//! Entitlements grant groups of users access to an entity. The only entity
//! type the service accepts today is `assembly`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;
use uuid::Uuid;

use crate::error::{ClientError, Result};
use crate::http::ApiClient;

/// Path of the entitlements service below the deployment host
pub const ENTITLEMENTS_PATH: &str = "entitlements/v1/";

/// Kind of entitled entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Assembly,
}

impl std::str::FromStr for EntityType {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "assembly" => Ok(Self::Assembly),
            other => Err(ClientError::InvalidInput(format!(
                "'{}' is not a valid entity type, expected 'assembly'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Assembly => write!(f, "assembly"),
        }
    }
}

/// An entitlement as stored by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    pub id: Uuid,
    pub entity: String,
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Uuid>,
    #[serde(default)]
    pub groups: Vec<Uuid>,
    /// Service fields not modelled here, kept for printing
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A group that can be entitled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of `POST /entities`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntitlement {
    pub id: Uuid,
    pub entity: String,
    pub entity_type: EntityType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<Uuid>,
    pub groups: Vec<Uuid>,
}

/// Body of `PATCH /entities/{id}`, only set fields are sent
#[derive(Debug, Clone, Default, Serialize)]
pub struct EntitlementUpdate {
    #[serde(rename = "entity", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<Uuid>>,
}

impl EntitlementUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.owner.is_none() && self.groups.is_none()
    }
}

/// Client for `/entitlements/v1`
#[derive(Clone)]
pub struct EntitlementClient {
    api: ApiClient,
}

impl EntitlementClient {
    pub fn new(base: &Url, token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(base.join(ENTITLEMENTS_PATH)?, token)?,
        })
    }

    pub async fn list(&self) -> Result<Vec<Entitlement>> {
        self.api.get_json("entities", &[]).await
    }

    pub async fn actors(&self) -> Result<Vec<Actor>> {
        self.api.get_json("actors", &[]).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Entitlement> {
        self.api.get_json(&format!("entities/{}", id), &[]).await
    }

    pub async fn create(&self, entitlement: &NewEntitlement) -> Result<Entitlement> {
        self.api.post_json("entities", entitlement).await
    }

    pub async fn update(&self, id: Uuid, update: &EntitlementUpdate) -> Result<Entitlement> {
        self.api
            .patch_json(&format!("entities/{}", id), update)
            .await
    }

    pub async fn delete(&self, id: Uuid) -> Result<Option<Value>> {
        self.api.delete(&format!("entities/{}", id)).await
    }

    /// Append groups to an entitlement, skipping ones it already has
    pub async fn add_groups(&self, id: Uuid, groups: &[Uuid]) -> Result<Entitlement> {
        let current = self.get(id).await?;
        let update = EntitlementUpdate {
            groups: Some(merge_groups(&current.groups, groups)),
            ..Default::default()
        };
        self.update(id, &update).await
    }

    /// Remove groups from an entitlement
    pub async fn rm_groups(&self, id: Uuid, groups: &[Uuid]) -> Result<Entitlement> {
        let current = self.get(id).await?;
        let remaining = current
            .groups
            .into_iter()
            .filter(|g| !groups.contains(g))
            .collect();
        let update = EntitlementUpdate {
            groups: Some(remaining),
            ..Default::default()
        };
        self.update(id, &update).await
    }
}

fn merge_groups(existing: &[Uuid], additions: &[Uuid]) -> Vec<Uuid> {
    let mut merged = existing.to_vec();
    for group in additions {
        if !merged.contains(group) {
            merged.push(*group);
        }
    }
    merged
}

/// Parse a comma separated list of group ids
pub fn parse_groups(raw: &str) -> Result<Vec<Uuid>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Uuid::parse_str(s)
                .map_err(|_| ClientError::InvalidInput(format!("{} is not a valid UUID", s)))
        })
        .collect()
}
