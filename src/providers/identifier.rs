//! Content identifier grammars.
//!
//! Pure predicates, no I/O. Each provider picks the grammars it accepts:
//! the pinning service hands out IPFS CIDs, the permanent store hands out
//! 43-character base64 transaction ids and also reads CIDs for interop.

/// Base58btc alphabet (no `0`, `O`, `I`, `l`).
const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Length of a CIDv0 (`Qm` + 44 base58 characters).
pub const CID_V0_LEN: usize = 46;

/// Shortest CIDv1 accepted (base32, multibase prefix `b`).
pub const CID_V1_MIN_LEN: usize = 50;

/// Length of a permanent-storage transaction id.
pub const LEDGER_ID_LEN: usize = 43;

/// Known CIDv1 prefixes: dag-pb, raw and dag-cbor with sha2-256, base32.
const CID_V1_PREFIXES: &[&str] = &["bafy", "bafk", "bafz", "bafr"];

/// `Qm` followed by 44 base58 characters.
pub fn is_cid_v0(s: &str) -> bool {
    s.len() == CID_V0_LEN
        && s.starts_with("Qm")
        && s.chars().all(|c| BASE58_ALPHABET.contains(c))
}

/// Lowercase base32 CIDv1 with a known prefix.
pub fn is_cid_v1(s: &str) -> bool {
    s.len() >= CID_V1_MIN_LEN
        && CID_V1_PREFIXES.iter().any(|p| s.starts_with(p))
        && s.chars().all(|c| c.is_ascii_lowercase() || ('2'..='7').contains(&c))
}

/// Any IPFS content identifier.
pub fn is_ipfs_cid(s: &str) -> bool {
    is_cid_v0(s) || is_cid_v1(s)
}

/// 43 characters from the base64 alphabet (standard or url-safe), no padding.
pub fn is_ledger_id(s: &str) -> bool {
    s.len() == LEDGER_ID_LEN
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '/'))
}
