use alloy::sol_types::SolEvent;
use chrono::{DateTime, Utc};

use crate::decode::abi::{self, DecodeError, LogParts};
use crate::models::{Token, TokenSource, TokenStatus};

// Full ABI declarations for the launchpad events; both carry dynamic strings
// (and a tuple / array tail), so they go through the generated decoders
// rather than manual slot reads.
mod events {
    use alloy::sol;

    sol! {
        struct PoolKey {
            address currency0;
            address currency1;
            uint24 fee;
            int24 tickSpacing;
            address hooks;
        }

        event CreatorCoinCreated(
            address indexed caller,
            address indexed payoutRecipient,
            address indexed platformReferrer,
            address currency,
            string uri,
            string name,
            string symbol,
            address coin,
            PoolKey poolKey,
            bytes32 poolKeyHash,
            string version
        );

        event TokenCreated(
            address msgSender,
            address indexed tokenAddress,
            address indexed tokenAdmin,
            string tokenImage,
            string tokenName,
            string tokenSymbol,
            string tokenMetadata,
            string tokenContext,
            int24 startingTick,
            address poolHook,
            bytes32 poolId,
            address pairedToken,
            address locker,
            address mevModule,
            uint256 extensionsSupply,
            address[] extensions
        );
    }
}

/// Decoded `CreatorCoinCreated` payload plus its log coordinates.
#[derive(Debug, Clone)]
pub struct CreatorCoinCreated {
    pub tx_hash: String,
    pub log_index: i64,
    pub block_number: u64,
    pub block_timestamp: DateTime<Utc>,
    pub contract_address: String,

    pub caller: String,
    pub payout_recipient: String,
    pub platform_referrer: String,
    pub currency: String,
    pub uri: String,
    pub name: String,
    pub symbol: String,
    pub coin: String,
    pub pool_key: PoolKey,
    pub pool_key_hash: String,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct PoolKey {
    pub currency0: String,
    pub currency1: String,
    pub fee: i64,
    pub tick_spacing: i64,
    pub hooks: String,
}

/// Decoded Clanker `TokenCreated` payload plus its log coordinates.
#[derive(Debug, Clone)]
pub struct ClankerTokenCreated {
    pub tx_hash: String,
    pub log_index: i64,
    pub block_number: u64,
    pub block_timestamp: DateTime<Utc>,
    pub contract_address: String,

    pub msg_sender: String,
    pub token_address: String,
    pub token_admin: String,
    pub token_image: String,
    pub token_name: String,
    pub token_symbol: String,
    pub token_metadata: String,
    pub token_context: String,
    pub starting_tick: i64,
    pub pool_hook: String,
    pub pool_id: String,
    pub paired_token: String,
    pub locker: String,
    pub mev_module: String,
    pub extensions_supply: String,
    pub extensions: Vec<String>,
}

/// Tagged union over the coin-launch event shapes; the coin pipeline pattern
/// matches on this rather than passing loose maps around.
#[derive(Debug, Clone)]
pub enum CoinCreationEvent {
    Creator(CreatorCoinCreated),
    Clanker(ClankerTokenCreated),
}

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

pub fn parse_creator_coin(
    parts: &LogParts,
    block_timestamp: DateTime<Utc>,
) -> Result<CoinCreationEvent, DecodeError> {
    parts.require_topics(4)?;
    let decoded =
        events::CreatorCoinCreated::decode_raw_log(parts.topics.iter().copied(), &parts.data)
            .map_err(|e| DecodeError::Other(format!("CreatorCoinCreated: {e}")))?;

    Ok(CoinCreationEvent::Creator(CreatorCoinCreated {
        tx_hash: parts.tx_hash.clone(),
        log_index: parts.log_index,
        block_number: parts.block_number,
        block_timestamp,
        contract_address: abi::addr_hex(parts.address),
        caller: abi::addr_hex(decoded.caller),
        payout_recipient: abi::addr_hex(decoded.payoutRecipient),
        platform_referrer: abi::addr_hex(decoded.platformReferrer),
        currency: abi::addr_hex(decoded.currency),
        uri: decoded.uri,
        name: decoded.name,
        symbol: decoded.symbol,
        coin: abi::addr_hex(decoded.coin),
        pool_key: PoolKey {
            currency0: abi::addr_hex(decoded.poolKey.currency0),
            currency1: abi::addr_hex(decoded.poolKey.currency1),
            fee: num_i64(decoded.poolKey.fee),
            tick_spacing: num_i64(decoded.poolKey.tickSpacing),
            hooks: abi::addr_hex(decoded.poolKey.hooks),
        },
        pool_key_hash: abi::b256_hex(decoded.poolKeyHash),
        version: decoded.version,
    }))
}

pub fn parse_clanker_token(
    parts: &LogParts,
    block_timestamp: DateTime<Utc>,
) -> Result<CoinCreationEvent, DecodeError> {
    parts.require_topics(3)?;
    let decoded = events::TokenCreated::decode_raw_log(parts.topics.iter().copied(), &parts.data)
        .map_err(|e| DecodeError::Other(format!("TokenCreated: {e}")))?;

    Ok(CoinCreationEvent::Clanker(ClankerTokenCreated {
        tx_hash: parts.tx_hash.clone(),
        log_index: parts.log_index,
        block_number: parts.block_number,
        block_timestamp,
        contract_address: abi::addr_hex(parts.address),
        msg_sender: abi::addr_hex(decoded.msgSender),
        token_address: abi::addr_hex(decoded.tokenAddress),
        token_admin: abi::addr_hex(decoded.tokenAdmin),
        token_image: decoded.tokenImage,
        token_name: decoded.tokenName,
        token_symbol: decoded.tokenSymbol,
        token_metadata: decoded.tokenMetadata,
        token_context: decoded.tokenContext,
        starting_tick: num_i64(decoded.startingTick),
        pool_hook: abi::addr_hex(decoded.poolHook),
        pool_id: abi::b256_hex(decoded.poolId),
        paired_token: abi::addr_hex(decoded.pairedToken),
        locker: abi::addr_hex(decoded.locker),
        mev_module: abi::addr_hex(decoded.mevModule),
        extensions_supply: decoded.extensionsSupply.to_string(),
        extensions: decoded.extensions.iter().map(|a| abi::addr_hex(*a)).collect(),
    }))
}

impl CoinCreationEvent {
    pub fn token_address(&self) -> &str {
        match self {
            CoinCreationEvent::Creator(e) => &e.coin,
            CoinCreationEvent::Clanker(e) => &e.token_address,
        }
    }

    /// Build the storable token record. Sentinels are normalized here: a zero
    /// platform referrer and an empty Clanker image both become absent.
    pub fn into_token(self, chain_id: i64) -> Token {
        match self {
            CoinCreationEvent::Creator(e) => {
                // The pool pairs the new coin against the other currency.
                let paired = if e.pool_key.currency1.eq_ignore_ascii_case(&e.coin) {
                    e.pool_key.currency0.clone()
                } else {
                    e.pool_key.currency1.clone()
                };
                let platform_referrer = if e.platform_referrer == ZERO_ADDRESS {
                    None
                } else {
                    Some(e.platform_referrer.clone())
                };

                Token {
                    chain_id,
                    token_address: e.coin.clone(),
                    source: TokenSource::CreatorCoin,
                    name: e.name.clone(),
                    symbol: e.symbol.clone(),
                    creator: e.caller.clone(),
                    admin: None,
                    payout_recipient: Some(e.payout_recipient.clone()),
                    platform_referrer,
                    base_currency: Some(e.currency.clone()),
                    paired_token: Some(paired),
                    pool_id: None,
                    pool_key_hash: Some(e.pool_key_hash.clone()),
                    fee_tier: Some(e.pool_key.fee),
                    tick_spacing: Some(e.pool_key.tick_spacing),
                    starting_tick: None,
                    hooks_address: Some(e.pool_key.hooks.clone()),
                    image_url: None,
                    metadata_uri: Some(e.uri.clone()),
                    metadata_json: None,
                    context_json: None,
                    locker_address: None,
                    mev_module: None,
                    contract_version: Some(e.version.clone()),
                    creation_block: e.block_number as i64,
                    creation_tx_hash: e.tx_hash.clone(),
                    creation_timestamp: e.block_timestamp,
                    creation_contract: e.contract_address.clone(),
                    status: TokenStatus::Active,
                    error_message: None,
                    raw_event: serde_json::json!({
                        "caller": e.caller,
                        "payout_recipient": e.payout_recipient,
                        "platform_referrer": e.platform_referrer,
                        "currency": e.currency,
                        "uri": e.uri,
                        "pool_key": {
                            "currency0": e.pool_key.currency0,
                            "currency1": e.pool_key.currency1,
                            "fee": e.pool_key.fee,
                            "tick_spacing": e.pool_key.tick_spacing,
                            "hooks": e.pool_key.hooks,
                        },
                        "pool_key_hash": e.pool_key_hash,
                        "version": e.version,
                    }),
                }
            }
            CoinCreationEvent::Clanker(e) => {
                let metadata_json = parse_json_field(&e.token_metadata);
                let context_json = parse_json_field(&e.token_context);
                let image_url = if e.token_image.is_empty() {
                    None
                } else {
                    Some(e.token_image.clone())
                };

                Token {
                    chain_id,
                    token_address: e.token_address.clone(),
                    source: TokenSource::Clanker,
                    name: e.token_name.clone(),
                    symbol: e.token_symbol.clone(),
                    creator: e.msg_sender.clone(),
                    admin: Some(e.token_admin.clone()),
                    payout_recipient: None,
                    platform_referrer: None,
                    base_currency: None,
                    paired_token: Some(e.paired_token.clone()),
                    pool_id: Some(e.pool_id.clone()),
                    pool_key_hash: None,
                    fee_tier: None,
                    tick_spacing: None,
                    starting_tick: Some(e.starting_tick),
                    hooks_address: Some(e.pool_hook.clone()),
                    image_url,
                    metadata_uri: None,
                    metadata_json,
                    context_json,
                    locker_address: Some(e.locker.clone()),
                    mev_module: Some(e.mev_module.clone()),
                    contract_version: None,
                    creation_block: e.block_number as i64,
                    creation_tx_hash: e.tx_hash.clone(),
                    creation_timestamp: e.block_timestamp,
                    creation_contract: e.contract_address.clone(),
                    status: TokenStatus::Active,
                    error_message: None,
                    raw_event: serde_json::json!({
                        "msg_sender": e.msg_sender,
                        "token_admin": e.token_admin,
                        "token_image": e.token_image,
                        "token_metadata": e.token_metadata,
                        "token_context": e.token_context,
                        "starting_tick": e.starting_tick,
                        "pool_hook": e.pool_hook,
                        "pool_id": e.pool_id,
                        "paired_token": e.paired_token,
                        "locker": e.locker,
                        "mev_module": e.mev_module,
                        "extensions_supply": e.extensions_supply,
                        "extensions": e.extensions,
                    }),
                }
            }
        }
    }
}

fn parse_json_field(raw: &str) -> Option<serde_json::Value> {
    if raw.is_empty() {
        return None;
    }
    serde_json::from_str(raw).ok()
}

fn num_i64(v: impl ToString) -> i64 {
    v.to_string().parse().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::testutil::parts;
    use alloy::primitives::{Address, B256, U256};
    use alloy::sol_types::SolEvent;
    use std::str::FromStr;

    fn addr(byte: u8) -> Address {
        Address::from_slice(&[byte; 20])
    }

    fn encoded_creator_event(platform_referrer: Address, currency1: Address) -> (Vec<B256>, Vec<u8>) {
        let event = events::CreatorCoinCreated {
            caller: addr(0x01),
            payoutRecipient: addr(0x02),
            platformReferrer: platform_referrer,
            currency: addr(0x04),
            uri: "ipfs://QmTest".to_string(),
            name: "Test Coin".to_string(),
            symbol: "TEST".to_string(),
            coin: addr(0x05),
            poolKey: events::PoolKey {
                currency0: addr(0x04),
                currency1,
                fee: alloy::primitives::aliases::U24::try_from(3000u32).unwrap(),
                tickSpacing: alloy::primitives::aliases::I24::try_from(60).unwrap(),
                hooks: addr(0x06),
            },
            poolKeyHash: B256::from([0xaa; 32]),
            version: "1.1.0".to_string(),
        };
        let log_data = event.encode_log_data();
        (log_data.topics().to_vec(), log_data.data.to_vec())
    }

    fn creator_parts(platform_referrer: Address, currency1: Address) -> LogParts {
        let (topics, data) = encoded_creator_event(platform_referrer, currency1);
        let mut parts = parts(
            "0x777777751622c0d3258f214f9df38e35bf45baf3",
            &["0x0000000000000000000000000000000000000000000000000000000000000000"],
            data,
            4_200,
        );
        parts.topics = topics;
        parts
    }

    #[test]
    fn creator_coin_event_decodes_and_maps_to_token() {
        let parts = creator_parts(addr(0x03), addr(0x05));
        let event = parse_creator_coin(&parts, Utc::now()).unwrap();

        let CoinCreationEvent::Creator(ref creator) = event else {
            panic!("expected creator variant");
        };
        assert_eq!(creator.name, "Test Coin");
        assert_eq!(creator.symbol, "TEST");
        assert_eq!(creator.pool_key.fee, 3000);
        assert_eq!(creator.pool_key.tick_spacing, 60);

        let token = event.into_token(8453);
        assert_eq!(token.source, TokenSource::CreatorCoin);
        assert_eq!(token.token_address, abi::addr_hex(addr(0x05)));
        assert_eq!(token.creator, abi::addr_hex(addr(0x01)));
        // currency1 is the coin itself, so the pair partner is currency0.
        assert_eq!(token.paired_token.as_deref(), Some(abi::addr_hex(addr(0x04)).as_str()));
        assert_eq!(token.platform_referrer.as_deref(), Some(abi::addr_hex(addr(0x03)).as_str()));
        assert_eq!(token.fee_tier, Some(3000));
        assert_eq!(token.metadata_uri.as_deref(), Some("ipfs://QmTest"));
    }

    #[test]
    fn zero_platform_referrer_is_treated_as_absent() {
        let parts = creator_parts(Address::ZERO, addr(0x05));
        let token = parse_creator_coin(&parts, Utc::now())
            .unwrap()
            .into_token(8453);
        assert!(token.platform_referrer.is_none());
    }

    fn clanker_parts(image: &str, metadata: &str) -> LogParts {
        let event = events::TokenCreated {
            msgSender: addr(0x11),
            tokenAddress: addr(0x12),
            tokenAdmin: addr(0x13),
            tokenImage: image.to_string(),
            tokenName: "Clank".to_string(),
            tokenSymbol: "CLK".to_string(),
            tokenMetadata: metadata.to_string(),
            tokenContext: "".to_string(),
            startingTick: alloy::primitives::aliases::I24::try_from(-230_400).unwrap(),
            poolHook: addr(0x14),
            poolId: B256::from([0xbb; 32]),
            pairedToken: addr(0x15),
            locker: addr(0x16),
            mevModule: addr(0x17),
            extensionsSupply: U256::from_str("340282366920938463463374607431768211456").unwrap(),
            extensions: vec![addr(0x18)],
        };
        let log_data = event.encode_log_data();
        let mut built = parts(
            "0xe85a59c628f7d27878aceb4bf3b35733630083a9",
            &["0x0000000000000000000000000000000000000000000000000000000000000000"],
            log_data.data.to_vec(),
            5_100,
        );
        built.topics = log_data.topics().to_vec();
        built
    }

    #[test]
    fn clanker_event_decodes_and_maps_to_token() {
        let parts = clanker_parts("https://img.example/x.png", r#"{"description":"hi"}"#);
        let token = parse_clanker_token(&parts, Utc::now())
            .unwrap()
            .into_token(8453);

        assert_eq!(token.source, TokenSource::Clanker);
        assert_eq!(token.name, "Clank");
        assert_eq!(token.admin.as_deref(), Some(abi::addr_hex(addr(0x13)).as_str()));
        assert_eq!(token.starting_tick, Some(-230_400));
        assert_eq!(token.image_url.as_deref(), Some("https://img.example/x.png"));
        assert_eq!(
            token.metadata_json.as_ref().unwrap()["description"],
            serde_json::json!("hi")
        );
        // 2^128 survives as a decimal string in the raw event payload.
        assert_eq!(
            token.raw_event["extensions_supply"],
            serde_json::json!("340282366920938463463374607431768211456")
        );
    }

    #[test]
    fn empty_clanker_image_and_bad_metadata_are_absent() {
        let parts = clanker_parts("", "not-json");
        let token = parse_clanker_token(&parts, Utc::now())
            .unwrap()
            .into_token(8453);
        assert!(token.image_url.is_none());
        assert!(token.metadata_json.is_none());
        assert!(token.context_json.is_none());
    }
}
