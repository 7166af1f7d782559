use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IdParseError {
    #[error("invalid uuid: {0}")]
    InvalidUuid(String),
}

/// Triton account identifier (the tenant every template and group belongs to).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct AccountId(pub Uuid);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for AccountId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for AccountId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = Uuid::parse_str(s).map_err(|_| IdParseError::InvalidUuid(s.to_string()))?;
        Ok(Self(id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub account_name: String,
    /// UUID of the account inside Triton itself; part of every Nomad job name.
    pub triton_uuid: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// SSH key material the tsg-cli uses to talk to CloudAPI on behalf of an account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TritonCredential {
    pub account_id: AccountId,
    pub account_name: String,
    pub key_id: String,
    pub key_material: String,
}

impl fmt::Debug for TritonCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TritonCredential")
            .field("account_id", &self.account_id)
            .field("account_name", &self.account_name)
            .field("key_id", &self.key_id)
            .field("key_material", &"<redacted>")
            .finish()
    }
}

/// Machine shape shared by every instance of a service group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceTemplate {
    pub template_id: Uuid,
    pub account_id: AccountId,
    pub name: String,
    pub package: String,
    pub image_id: String,
    #[serde(default)]
    pub firewall_enabled: bool,
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default)]
    pub user_data: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceGroup {
    pub group_id: Uuid,
    pub account_id: AccountId,
    pub group_name: String,
    pub template_id: Uuid,
    /// Desired number of running instances.
    pub capacity: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceGroup {
    /// Largest capacity the store can hold (`INTEGER` column).
    pub const MAX_CAPACITY: u32 = i32::MAX as u32;
}

/// Request-scoped identity handed to orchestrator calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub account_id: AccountId,
    pub datacenter: String,
    pub triton_url: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    pub limit: usize,
    pub offset: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}
