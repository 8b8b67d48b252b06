use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// EntityType identifies the kind of on-chain entity an update refers to.
/// Wire names match the upstream feed's `accountType` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
    Mint,
    Metadata,
    MasterEdition,
    Auction,
    AuctionData,
    Account,
    Escrow,
}

impl EntityType {
    /// Returns the canonical storage/log label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mint => "mint",
            Self::Metadata => "metadata",
            Self::MasterEdition => "masterEdition",
            Self::Auction => "auction",
            Self::AuctionData => "auctionData",
            Self::Account => "account",
            Self::Escrow => "escrow",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One versioned update for an entity.
///
/// Field names follow the upstream JSON feed (`id`, `accountType`, `tokens`,
/// `callbackTimeMS`); the descriptive names are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEvent {
    #[serde(rename = "id", alias = "entityId")]
    pub entity_id: String,

    #[serde(rename = "accountType", alias = "entityType")]
    pub entity_type: EntityType,

    #[serde(rename = "tokens", alias = "metric")]
    pub metric: i64,

    #[serde(rename = "callbackTimeMS", alias = "callbackDelayMs")]
    pub callback_delay_ms: i64,

    pub version: i64,

    /// Opaque payload, persisted as serialized JSON.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl EntityEvent {
    /// Build an event with an empty payload.
    pub fn new(
        entity_id: impl Into<String>,
        entity_type: EntityType,
        metric: i64,
        callback_delay_ms: i64,
        version: i64,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type,
            metric,
            callback_delay_ms,
            version,
            data: serde_json::Value::Null,
        }
    }

    /// Callback delay as a Duration. Negative delays fire immediately.
    pub fn callback_delay(&self) -> Duration {
        Duration::from_millis(self.callback_delay_ms.max(0) as u64)
    }
}
