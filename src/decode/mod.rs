pub mod abi;
pub mod balancer;
pub mod coins;
pub mod curve;
#[cfg(test)]
pub mod testutil;
pub mod v2;
pub mod v3;
pub mod v4;

use alloy::primitives::{Address, B256};
use std::collections::HashMap;
use std::str::FromStr;

use crate::config::ContractEntry;

/// Compile-time decoder ids. Config names one of these per event; unknown
/// names are rejected during config validation, before any worker starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParserId {
    UniswapV2,
    UniswapV3,
    UniswapV4,
    Sushiswap,
    SushiswapV3,
    PancakeswapV2,
    PancakeswapV3,
    BalancerV2,
    Curve,
    Aerodrome,
    CreatorCoin,
    Clanker,
}

impl ParserId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParserId::UniswapV2 => "uniswap_v2",
            ParserId::UniswapV3 => "uniswap_v3",
            ParserId::UniswapV4 => "uniswap_v4",
            ParserId::Sushiswap => "sushiswap",
            ParserId::SushiswapV3 => "sushiswap_v3",
            ParserId::PancakeswapV2 => "pancakeswap_v2",
            ParserId::PancakeswapV3 => "pancakeswap_v3",
            ParserId::BalancerV2 => "balancer_v2",
            ParserId::Curve => "curve",
            ParserId::Aerodrome => "aerodrome",
            ParserId::CreatorCoin => "creator_coin",
            ParserId::Clanker => "clanker",
        }
    }
}

impl FromStr for ParserId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uniswap_v2" => Ok(ParserId::UniswapV2),
            "uniswap_v3" => Ok(ParserId::UniswapV3),
            "uniswap_v4" => Ok(ParserId::UniswapV4),
            "sushiswap" => Ok(ParserId::Sushiswap),
            "sushiswap_v3" => Ok(ParserId::SushiswapV3),
            "pancakeswap_v2" => Ok(ParserId::PancakeswapV2),
            "pancakeswap_v3" => Ok(ParserId::PancakeswapV3),
            "balancer_v2" => Ok(ParserId::BalancerV2),
            "curve" => Ok(ParserId::Curve),
            "aerodrome" => Ok(ParserId::Aerodrome),
            // creator_coin_v4 emits the same payload from the v4 factory
            "creator_coin" | "creator_coin_v4" => Ok(ParserId::CreatorCoin),
            "clanker" => Ok(ParserId::Clanker),
            other => Err(format!("unknown parser id '{other}'")),
        }
    }
}

/// Dispatch table for watched contracts: `log.address -> topic0 -> parser`.
/// Built once per chain at supervisor startup; immutable afterwards.
#[derive(Debug, Default)]
pub struct EventRegistry {
    routes: HashMap<Address, HashMap<B256, ParserId>>,
}

impl EventRegistry {
    pub fn from_catalog<'a>(
        contracts: impl Iterator<Item = (&'a String, &'a ContractEntry)>,
    ) -> eyre::Result<Self> {
        let mut routes: HashMap<Address, HashMap<B256, ParserId>> = HashMap::new();

        for (name, contract) in contracts {
            let address = Address::from_str(&contract.address)
                .map_err(|e| eyre::eyre!("contract '{name}': bad address: {e}"))?;
            let topics = routes.entry(address).or_default();
            for (event_name, spec) in &contract.events {
                let topic0 = B256::from_str(&spec.signature).map_err(|e| {
                    eyre::eyre!("contract '{name}' event '{event_name}': bad signature: {e}")
                })?;
                let parser = spec
                    .parser
                    .parse::<ParserId>()
                    .map_err(|e| eyre::eyre!("contract '{name}' event '{event_name}': {e}"))?;
                topics.insert(topic0, parser);
            }
        }

        Ok(Self { routes })
    }

    pub fn route(&self, address: &Address, topic0: &B256) -> Option<ParserId> {
        self.routes.get(address)?.get(topic0).copied()
    }

    pub fn contract_addresses(&self) -> Vec<Address> {
        self.routes.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventSpec;

    #[test]
    fn registry_routes_by_address_and_topic() {
        let sig = "0x0d3648bd0f6ba80134a33ba9275ac585d9d315f0ad8355cddefde31afa28d0e9";
        let mut events = HashMap::new();
        events.insert(
            "TokenCreated".to_string(),
            EventSpec {
                signature: sig.to_string(),
                parser: "clanker".to_string(),
            },
        );
        let entry = ContractEntry {
            address: "0xe85a59c628f7d27878aceb4bf3b35733630083a9".to_string(),
            enabled: true,
            creation_block: None,
            events,
        };
        let name = "clanker_v4".to_string();

        let registry = EventRegistry::from_catalog([(&name, &entry)].into_iter()).unwrap();
        let addr = Address::from_str(&entry.address).unwrap();
        let topic = B256::from_str(sig).unwrap();

        assert_eq!(registry.route(&addr, &topic), Some(ParserId::Clanker));
        assert_eq!(registry.route(&addr, &B256::ZERO), None);
        assert_eq!(registry.route(&Address::ZERO, &topic), None);
        assert_eq!(registry.contract_addresses(), vec![addr]);
    }

    #[test]
    fn parser_id_aliases() {
        assert_eq!(
            "creator_coin_v4".parse::<ParserId>().unwrap(),
            ParserId::CreatorCoin
        );
        assert!("made_up".parse::<ParserId>().is_err());
    }
}
