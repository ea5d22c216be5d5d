//! Pre-flight guards on user input: mnemonics, endpoint URLs, balances.

use bip39::{Language, Mnemonic};
use regex::Regex;

use crate::error::{CoreError, CoreResult};

/// Minimum free balance (in chain units, 10^7 per TFT) needed to pay
/// extrinsic fees: 2 TFT.
pub const MIN_BALANCE_FOR_EXTRINSICS: u128 = 20_000_000;

/// Chain units per TFT.
pub const UNITS_PER_TFT: f64 = 10_000_000.0;

const URL_TAIL: &str = r#"(:[0-9]{1,5})?(/[^\s<>#%",{}\\|^\[\]]*)?$"#;

const WS_HEAD: &str = r"^wss?://[a-z0-9-]+(\.[a-z0-9-]+)*";
const HTTP_HEAD: &str = r"^https?://[a-z0-9-]+(\.[a-z0-9-]+)*";

/// Accept a BIP-39 English mnemonic or a hex-encoded 32-byte seed
/// (with or without `0x`).
pub fn validate_mnemonic(mnemonic_or_seed: &str) -> CoreResult<()> {
    if Mnemonic::parse_in_normalized(Language::English, mnemonic_or_seed).is_ok() {
        return Ok(());
    }
    match decode_hex_seed(mnemonic_or_seed) {
        Some(_) => Ok(()),
        None => Err(CoreError::InvalidMnemonic(
            "not a valid bip39 mnemonic nor a 32-byte hex seed".to_string(),
        )),
    }
}

/// Decode a hex seed into exactly 32 bytes.
pub(crate) fn decode_hex_seed(seed: &str) -> Option<[u8; 32]> {
    let trimmed = seed.trim().trim_start_matches("0x");
    let bytes = hex::decode(trimmed).ok()?;
    bytes.try_into().ok()
}

fn check(kind: &'static str, url: &str, head: &str) -> CoreResult<()> {
    let re = Regex::new(&format!("{head}{URL_TAIL}"))?;
    if url.is_empty() || !re.is_match(url) {
        return Err(CoreError::InvalidUrl {
            kind,
            url: url.to_string(),
        });
    }
    Ok(())
}

pub fn validate_substrate_url(url: &str) -> CoreResult<()> {
    check("substrate", url, WS_HEAD)
}

pub fn validate_relay_url(url: &str) -> CoreResult<()> {
    check("relay", url, WS_HEAD)
}

pub fn validate_proxy_url(url: &str) -> CoreResult<()> {
    check("proxy", url, HTTP_HEAD)
}

pub fn validate_graphql_url(url: &str) -> CoreResult<()> {
    check("graphql", url, HTTP_HEAD)
}

/// Reject accounts that cannot pay for contract extrinsics.
pub fn validate_account_balance_for_extrinsics(free: u128) -> CoreResult<()> {
    if free < MIN_BALANCE_FOR_EXTRINSICS {
        return Err(CoreError::InsufficientBalance {
            balance: free as f64 / UNITS_PER_TFT,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mnemonic_and_seed() {
        validate_mnemonic(
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about",
        )
        .unwrap();
        validate_mnemonic(&format!("0x{}", "ab".repeat(32))).unwrap();
        assert!(validate_mnemonic("route visual hundred rabbit").is_err());
        assert!(validate_mnemonic("abcd").is_err());
    }

    #[test]
    fn test_urls() {
        validate_substrate_url("wss://tfchain.dev.grid.tf/ws").unwrap();
        validate_relay_url("ws://127.0.0.1:8080").unwrap();
        validate_proxy_url("https://gridproxy.grid.tf/").unwrap();
        validate_graphql_url("https://graphql.qa.grid.tf/graphql").unwrap();

        assert!(validate_substrate_url("https://tfchain.grid.tf/ws").is_err());
        assert!(validate_proxy_url("wss://gridproxy.grid.tf").is_err());
        assert!(validate_graphql_url("").is_err());
        assert!(validate_proxy_url("https://grid proxy.tf").is_err());
    }

    #[test]
    fn test_balance_guard() {
        validate_account_balance_for_extrinsics(20_000_000).unwrap();
        let err = validate_account_balance_for_extrinsics(15_000_000).unwrap_err();
        assert_eq!(err.to_string(), "account contains 1.5 tft, min fee is 2 tft");
    }
}
