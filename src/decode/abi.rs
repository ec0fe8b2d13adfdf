use alloy::primitives::{Address, B256, I256, U256};
use bigdecimal::BigDecimal;
use std::str::FromStr;
use thiserror::Error;

use crate::rpc::Log;

/// Non-fatal decode failure. The pipeline counts the log as skipped and moves
/// on; it never aborts a window.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("expected at least {expected} topics, got {got}")]
    MissingTopics { expected: usize, got: usize },
    #[error("log data too short: need {need} bytes, got {got}")]
    ShortData { need: usize, got: usize },
    #[error("invalid hex in {field}")]
    InvalidHex { field: &'static str },
    #[error("{0}")]
    Other(String),
}

/// A raw log with hex fields parsed into byte form, ready for slot reads.
#[derive(Debug, Clone)]
pub struct LogParts {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: i64,
}

impl LogParts {
    pub fn parse(log: &Log) -> Result<Self, DecodeError> {
        let address = Address::from_str(&log.address)
            .map_err(|_| DecodeError::InvalidHex { field: "address" })?;

        let mut topics = Vec::with_capacity(log.topics.len());
        for t in &log.topics {
            topics.push(
                B256::from_str(t).map_err(|_| DecodeError::InvalidHex { field: "topics" })?,
            );
        }

        let data = hex_bytes(&log.data).ok_or(DecodeError::InvalidHex { field: "data" })?;
        let block_number =
            hex_u64(&log.block_number).ok_or(DecodeError::InvalidHex { field: "blockNumber" })?;
        let log_index =
            hex_u64(&log.log_index).ok_or(DecodeError::InvalidHex { field: "logIndex" })? as i64;

        Ok(Self {
            address,
            topics,
            data,
            block_number,
            tx_hash: log.transaction_hash.clone(),
            log_index,
        })
    }

    pub fn require_topics(&self, n: usize) -> Result<(), DecodeError> {
        if self.topics.len() < n {
            return Err(DecodeError::MissingTopics {
                expected: n,
                got: self.topics.len(),
            });
        }
        Ok(())
    }

    pub fn topic(&self, i: usize) -> Result<B256, DecodeError> {
        self.require_topics(i + 1)?;
        Ok(self.topics[i])
    }

    /// Indexed address parameter: low 20 bytes of the 32-byte topic.
    pub fn topic_address(&self, i: usize) -> Result<Address, DecodeError> {
        Ok(Address::from_word(self.topic(i)?))
    }

    /// 32-byte data slot by index.
    pub fn word(&self, slot: usize) -> Result<&[u8], DecodeError> {
        let start = slot * 32;
        let end = start + 32;
        if self.data.len() < end {
            return Err(DecodeError::ShortData {
                need: end,
                got: self.data.len(),
            });
        }
        Ok(&self.data[start..end])
    }

    pub fn address_at(&self, slot: usize) -> Result<Address, DecodeError> {
        Ok(word_address(self.word(slot)?))
    }

    pub fn u256_at(&self, slot: usize) -> Result<U256, DecodeError> {
        Ok(U256::from_be_slice(self.word(slot)?))
    }

    pub fn i256_at(&self, slot: usize) -> Result<I256, DecodeError> {
        Ok(word_i256(self.word(slot)?))
    }

    pub fn i128_at(&self, slot: usize) -> Result<i128, DecodeError> {
        Ok(word_i128(self.word(slot)?))
    }

    pub fn i24_at(&self, slot: usize) -> Result<i32, DecodeError> {
        Ok(word_i24(self.word(slot)?))
    }

    pub fn b256_at(&self, slot: usize) -> Result<B256, DecodeError> {
        Ok(B256::from_slice(self.word(slot)?))
    }
}

/// Address from a 32-byte slot: low 20 bytes.
pub fn word_address(word: &[u8]) -> Address {
    Address::from_slice(&word[12..32])
}

/// Full-width signed 256-bit read (two's complement reinterpretation).
pub fn word_i256(word: &[u8]) -> I256 {
    I256::from_raw(U256::from_be_slice(word))
}

/// Signed 128-bit read: only the low 16 bytes of the slot carry the value.
pub fn word_i128(word: &[u8]) -> i128 {
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&word[16..32]);
    u128::from_be_bytes(buf) as i128
}

/// Signed 24-bit read. Only the low 3 bytes are consulted so a sloppily
/// sign-extended slot still decodes; the value is then re-sign-extended.
pub fn word_i24(word: &[u8]) -> i32 {
    let raw = ((word[29] as u32) << 16) | ((word[30] as u32) << 8) | (word[31] as u32);
    if raw >= 1 << 23 {
        raw as i32 - (1 << 24)
    } else {
        raw as i32
    }
}

/// Split a signed amount into the (in, out) pair used by swap records:
/// negative values land in `in` as their magnitude, positive values in `out`.
pub fn signed_in_out(v: I256) -> (BigDecimal, BigDecimal) {
    if v.is_negative() {
        (decimal(&v.unsigned_abs().to_string()), BigDecimal::from(0))
    } else {
        (BigDecimal::from(0), decimal(&v.to_string()))
    }
}

/// Decimal string -> BigDecimal. Input is always a canonical integer string
/// rendered from an on-chain word, so the parse cannot fail in practice.
pub fn decimal(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap_or_default()
}

/// Lowercase `0x`-prefixed rendering for addresses.
pub fn addr_hex(a: Address) -> String {
    format!("{a:#x}")
}

/// Lowercase `0x`-prefixed rendering for 32-byte values.
pub fn b256_hex(b: B256) -> String {
    format!("{b:#x}")
}

pub fn hex_bytes(s: &str) -> Option<Vec<u8>> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    if stripped.is_empty() {
        return Some(Vec::new());
    }
    hex::decode(stripped).ok()
}

pub fn hex_u64(s: &str) -> Option<u64> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(stripped, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word_from_i256(v: I256) -> [u8; 32] {
        v.to_be_bytes::<32>()
    }

    #[test]
    fn i256_boundary_values_round_trip() {
        let max = I256::MAX.to_string();
        let min = I256::MIN.to_string();
        for s in ["0", "1", "-1", max.as_str(), min.as_str()] {
            let v = I256::from_str(s).unwrap();
            let decoded = word_i256(&word_from_i256(v));
            assert_eq!(decoded.to_string(), s);
        }
    }

    #[test]
    fn i128_boundary_values_round_trip() {
        for v in [0i128, 1, -1, i128::MAX, i128::MIN] {
            let mut word = if v < 0 { [0xffu8; 32] } else { [0u8; 32] };
            word[16..32].copy_from_slice(&v.to_be_bytes());
            assert_eq!(word_i128(&word), v);
        }
    }

    #[test]
    fn i24_boundary_values_round_trip() {
        let cases: [(i32, [u8; 3]); 5] = [
            (0, [0x00, 0x00, 0x00]),
            (1, [0x00, 0x00, 0x01]),
            (-1, [0xff, 0xff, 0xff]),
            (8_388_607, [0x7f, 0xff, 0xff]),
            (-8_388_608, [0x80, 0x00, 0x00]),
        ];
        for (expected, low) in cases {
            let mut word = [0u8; 32];
            word[29..32].copy_from_slice(&low);
            assert_eq!(word_i24(&word), expected);
        }
    }

    #[test]
    fn i24_ignores_garbage_in_high_bytes() {
        // A node that sign-extended incorrectly must not flip the value.
        let mut word = [0xabu8; 32];
        word[29..32].copy_from_slice(&[0x00, 0x00, 0x05]);
        assert_eq!(word_i24(&word), 5);
    }

    #[test]
    fn address_reads_low_twenty_bytes() {
        let mut word = [0u8; 32];
        word[12..32].copy_from_slice(&[0x11u8; 20]);
        assert_eq!(
            addr_hex(word_address(&word)),
            "0x1111111111111111111111111111111111111111"
        );
    }

    #[test]
    fn signed_split_matches_swap_convention() {
        let (a_in, a_out) = signed_in_out(I256::from_str("-1000").unwrap());
        assert_eq!(a_in.to_string(), "1000");
        assert_eq!(a_out.to_string(), "0");

        let (b_in, b_out) = signed_in_out(I256::from_str("2500").unwrap());
        assert_eq!(b_in.to_string(), "0");
        assert_eq!(b_out.to_string(), "2500");
    }

    #[test]
    fn hex_helpers_accept_prefixed_and_bare() {
        assert_eq!(hex_u64("0x10"), Some(16));
        assert_eq!(hex_u64("10"), Some(16));
        assert_eq!(hex_bytes("0x0102").unwrap(), vec![1, 2]);
        assert_eq!(hex_bytes("0x").unwrap(), Vec::<u8>::new());
        assert!(hex_bytes("0xzz").is_none());
    }
}
