//! EIP-191 `personal_sign` verification over secp256k1.

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
use sha3::{Digest, Keccak256};

pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(bytes));
    out
}

/// Recover the signer address of a 65-byte `r || s || v` signature.
pub fn recover_personal_signer(message: &str, signature_hex: &str) -> Result<String, String> {
    if !is_signature_like(signature_hex) {
        return Err("signature must be 0x followed by 130 hex characters".to_string());
    }
    let bytes = decode_hex_prefixed(signature_hex)?;
    let (rs, v) = bytes.split_at(64);

    let signature =
        EcdsaSignature::try_from(rs).map_err(|e| format!("invalid ECDSA signature bytes: {e}"))?;
    let recovery_id = normalize_recovery_id(v[0])?;
    let prehash = eip191_personal_sign_hash(message);
    let key = VerifyingKey::recover_from_prehash(&prehash, &signature, recovery_id)
        .map_err(|e| format!("failed recovering signer: {e}"))?;
    ethereum_address(&key)
}

/// Check that `signature_hex` over `message` was produced by `expected`.
pub fn verify_personal_signature(
    message: &str,
    signature_hex: &str,
    expected: &str,
) -> Result<(), String> {
    let expected = normalize_wallet_address(expected)
        .ok_or_else(|| "expected signer is not a valid address".to_string())?;
    let recovered = recover_personal_signer(message, signature_hex)?;
    if recovered != expected {
        return Err(format!("signature was produced by {recovered}"));
    }
    Ok(())
}

pub fn eip191_personal_sign_hash(message: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// `0x` + 40 hex characters, lowercased. `None` for anything else.
pub fn normalize_wallet_address(value: &str) -> Option<String> {
    let hex = value.trim().strip_prefix("0x")?;
    (hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()))
        .then(|| format!("0x{}", hex.to_ascii_lowercase()))
}

pub fn encode_hex_lower(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn normalize_recovery_id(raw: u8) -> Result<RecoveryId, String> {
    let id = match raw {
        27 | 28 => raw - 27,
        0 | 1 => raw,
        _ => return Err("signature recovery id must be 0/1 or 27/28".to_string()),
    };
    RecoveryId::try_from(id).map_err(|_| "signature recovery id is invalid".to_string())
}

fn ethereum_address(key: &VerifyingKey) -> Result<String, String> {
    let point = key.to_encoded_point(false);
    let Some((&0x04, coordinates)) = point.as_bytes().split_first() else {
        return Err("unexpected recovered public key format".to_string());
    };
    let digest = keccak256(coordinates);
    Ok(format!("0x{}", encode_hex_lower(&digest[12..])))
}

fn is_signature_like(signature: &str) -> bool {
    signature
        .trim()
        .strip_prefix("0x")
        .is_some_and(|hex| hex.len() == 130 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

fn decode_hex_prefixed(value: &str) -> Result<Vec<u8>, String> {
    let hex = value
        .trim()
        .strip_prefix("0x")
        .ok_or_else(|| "hex string must be 0x-prefixed".to_string())?;
    if hex.len() % 2 != 0 {
        return Err("hex string must have an even number of characters".to_string());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| "invalid hex character".to_string())
        })
        .collect()
}
