//! Event catalog: the closed set of event kinds and their payloads.
//!
//! Snapshot payloads carry the complete entity, audit columns included, so a
//! consumer can upsert its replica from a single message without reading any
//! other service's storage.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use khata_core::{BusinessId, UserId};

/// Every event kind known to the system. The string form is the topic name.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "manage-user")]
    ManageUser,
    #[serde(rename = "manage-business")]
    ManageBusiness,
    #[serde(rename = "manage-business-user")]
    ManageBusinessUser,
    #[serde(rename = "manage-notification")]
    ManageNotification,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::ManageUser,
        EventKind::ManageBusiness,
        EventKind::ManageBusinessUser,
        EventKind::ManageNotification,
    ];

    pub const fn topic(self) -> &'static str {
        match self {
            EventKind::ManageUser => "manage-user",
            EventKind::ManageBusiness => "manage-business",
            EventKind::ManageBusinessUser => "manage-business-user",
            EventKind::ManageNotification => "manage-notification",
        }
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.topic())
    }
}

impl core::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|k| k.topic() == s)
            .ok_or_else(|| format!("unknown event kind: {s}"))
    }
}

/// Binds a payload type to its catalog entry.
pub trait CatalogEvent:
    Serialize + DeserializeOwned + Clone + core::fmt::Debug + Send + Sync + 'static
{
    const KIND: EventKind;

    /// Messages with equal keys land on the same partition and keep their order.
    fn partition_key(&self) -> String;
}

/// Industry a business operates in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Industry {
    IT,
    Healthcare,
    Education,
    Finance,
    Manufacturing,
    Retail,
    Travel,
    Entertainment,
    Other,
}

impl Industry {
    pub const ALL: [Industry; 9] = [
        Industry::IT,
        Industry::Healthcare,
        Industry::Education,
        Industry::Finance,
        Industry::Manufacturing,
        Industry::Retail,
        Industry::Travel,
        Industry::Entertainment,
        Industry::Other,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Industry::IT => "IT",
            Industry::Healthcare => "Healthcare",
            Industry::Education => "Education",
            Industry::Finance => "Finance",
            Industry::Manufacturing => "Manufacturing",
            Industry::Retail => "Retail",
            Industry::Travel => "Travel",
            Industry::Entertainment => "Entertainment",
            Industry::Other => "Other",
        }
    }
}

impl core::str::FromStr for Industry {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Industry::ALL
            .into_iter()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| format!("unknown industry: {s}"))
    }
}

/// Full user snapshot (`manage-user`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: UserId,
    pub human_id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub avatar: Option<String>,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<UserId>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub deactivated_by: Option<UserId>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserId>,
}

impl CatalogEvent for UserSnapshot {
    const KIND: EventKind = EventKind::ManageUser;

    fn partition_key(&self) -> String {
        self.id.to_string()
    }
}

/// Full business snapshot (`manage-business`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessSnapshot {
    pub id: BusinessId,
    pub name: String,
    pub description: Option<String>,
    pub logo: Option<String>,
    pub industry: Industry,
    pub primary_currency: String,
    pub currencies: Vec<String>,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<UserId>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserId>,
}

impl CatalogEvent for BusinessSnapshot {
    const KIND: EventKind = EventKind::ManageBusiness;

    fn partition_key(&self) -> String {
        self.id.to_string()
    }
}

/// Full membership snapshot (`manage-business-user`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessUserSnapshot {
    pub user_id: UserId,
    pub business_id: BusinessId,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<UserId>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserId>,
}

impl CatalogEvent for BusinessUserSnapshot {
    const KIND: EventKind = EventKind::ManageBusinessUser;

    fn partition_key(&self) -> String {
        format!("{}:{}", self.business_id, self.user_id)
    }
}
