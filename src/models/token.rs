use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Launch platform the token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    CreatorCoin,
    Clanker,
}

impl TokenSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenSource::CreatorCoin => "creator_coin",
            TokenSource::Clanker => "clanker",
        }
    }
}

impl std::str::FromStr for TokenSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creator_coin" => Ok(TokenSource::CreatorCoin),
            "clanker" => Ok(TokenSource::Clanker),
            other => Err(format!("unknown token source '{other}'")),
        }
    }
}

/// Token processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Active,
    Processing,
    Error,
    Audited,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Active => "active",
            TokenStatus::Processing => "processing",
            TokenStatus::Error => "error",
            TokenStatus::Audited => "audited",
        }
    }
}

impl std::str::FromStr for TokenStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TokenStatus::Active),
            "processing" => Ok(TokenStatus::Processing),
            "error" => Ok(TokenStatus::Error),
            "audited" => Ok(TokenStatus::Audited),
            other => Err(format!("unknown token status '{other}'")),
        }
    }
}

/// A newly launched coin observed from an on-chain creation event.
///
/// `(chain_id, token_address)` is the upsert key. Fields that only one source
/// populates (admin for Clanker, payout recipient for creator coins) stay
/// optional rather than being split into per-source models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub chain_id: i64,
    pub token_address: String,
    pub source: TokenSource,

    pub name: String,
    pub symbol: String,

    pub creator: String,
    pub admin: Option<String>,
    pub payout_recipient: Option<String>,
    pub platform_referrer: Option<String>,

    pub base_currency: Option<String>,
    pub paired_token: Option<String>,
    pub pool_id: Option<String>,
    pub pool_key_hash: Option<String>,

    pub fee_tier: Option<i64>,
    pub tick_spacing: Option<i64>,
    pub starting_tick: Option<i64>,
    pub hooks_address: Option<String>,

    pub image_url: Option<String>,
    pub metadata_uri: Option<String>,
    pub metadata_json: Option<serde_json::Value>,
    pub context_json: Option<serde_json::Value>,

    pub locker_address: Option<String>,
    pub mev_module: Option<String>,
    pub contract_version: Option<String>,

    pub creation_block: i64,
    pub creation_tx_hash: String,
    pub creation_timestamp: DateTime<Utc>,
    pub creation_contract: String,

    pub status: TokenStatus,
    pub error_message: Option<String>,

    pub raw_event: serde_json::Value,
}
