//! Configuration fingerprints
//!
//! A fingerprint is a SHA-256 digest over `key:value` pairs sorted by key and
//! joined with `|`. Sorting makes it independent of the order inputs were
//! collected in; control keys are left out so that stepping the loop never
//! looks like a configuration change.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use tracing::debug;

/// Keys that steer the loop rather than describe the combination space
pub const CONTROL_KEYS: &[&str] = &["start_index", "auto_queue", "max_combinations", "extra_pnginfo"];

/// Fingerprint `inputs`, skipping every key listed in `excluded`
pub fn fingerprint<I, K, V>(inputs: I, excluded: &[&str]) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let sorted: BTreeMap<String, String> = inputs
        .into_iter()
        .filter(|(k, _)| !excluded.contains(&k.as_ref()))
        .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
        .collect();

    let data = sorted
        .iter()
        .map(|(k, v)| format!("{}:{}", k, v))
        .collect::<Vec<_>>()
        .join("|");

    let hash = hex_digest(data.as_bytes());
    debug!(keys = sorted.len(), %hash, "fingerprint: computed");
    hash
}

/// Lowercase hex SHA-256 of `bytes`
pub fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_control_keys_are_ignored() {
        let a = fingerprint([("template_text", "a [1]"), ("start_index", "0")], CONTROL_KEYS);
        let b = fingerprint([("template_text", "a [1]"), ("start_index", "17")], CONTROL_KEYS);
        let c = fingerprint([("template_text", "a [1]")], CONTROL_KEYS);
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_content_change_changes_hash() {
        let a = fingerprint([("pool_1_text", "cat\ndog")], &[]);
        let b = fingerprint([("pool_1_text", "cat\nbird")], &[]);
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            hex_digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    proptest! {
        #[test]
        fn prop_order_independent(mut pairs in proptest::collection::btree_map("[a-z_]{1,8}", ".{0,12}", 0..8)
            .prop_map(|m| m.into_iter().collect::<Vec<_>>())) {
            let forward = fingerprint(pairs.clone(), CONTROL_KEYS);
            pairs.reverse();
            let backward = fingerprint(pairs, CONTROL_KEYS);
            prop_assert_eq!(forward, backward);
        }
    }
}
