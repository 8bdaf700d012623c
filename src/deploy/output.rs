//! Parser for the toolchain's textual output.
//!
//! The deploy script must print a line containing
//! `deployed to: 0x<40 hex>` and the transfer script `TxHash: 0x<64 hex>`.
//! These markers are the whole contract with the subprocess; change them here
//! and in the scripts together.

use regex::Regex;

/// Reported when the deploy run succeeded but printed no address.
pub const ADDRESS_NOT_FOUND: &str = "address not found";
/// Reported when the transfer run succeeded but printed no hash.
pub const HASH_NOT_FOUND: &str = "hash not found";

/// First `deployed to: 0x…` address in the output.
pub fn extract_deployed_address(output: &str) -> Option<String> {
    capture_first(output, r"deployed to:\s*(0x[0-9a-fA-F]{40})\b")
}

/// First `TxHash: 0x…` transaction hash in the output.
pub fn extract_tx_hash(output: &str) -> Option<String> {
    capture_first(output, r"TxHash:\s*(0x[0-9a-fA-F]{64})\b")
}

fn capture_first(output: &str, pattern: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    re.captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
