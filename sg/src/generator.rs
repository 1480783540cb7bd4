//! CombinationGenerator - materializes a whole combination space at once
//!
//! Stateless. The output list is in global-index order and feeds a
//! [`LoopController`](crate::controller::LoopController).

use loopstore::hex_digest;
use thiserror::Error;
use tracing::{debug, info};

use crate::radix::RadixError;
use crate::template::{ConfigError, PoolInputs, PreparedTemplate, ReplaceMode};

/// Default cap on materialized combinations
pub const DEFAULT_MAX_MATERIALIZE: u64 = 100_000;

/// Generator errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeneratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Radix(#[from] RadixError),

    #[error("Combination space of {total} exceeds the materialize limit of {limit}")]
    TooLarge { total: u64, limit: u64 },
}

/// Every combination plus what the controller needs to track it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub combos: Vec<String>,
    pub total: u64,
    /// Hash of the template and the pools it uses
    pub config_hash: String,
}

/// Hash of `template` plus each referenced pool's parsed items
fn config_hash(prepared: &PreparedTemplate, pools: &PoolInputs) -> String {
    let mut content = prepared.template().to_string();
    for anchor in prepared.anchors() {
        let items = crate::template::parse_pool(pools.get(anchor).unwrap_or_default());
        content.push_str(&format!("|POOL_{}:{}", anchor, items.join(",")));
    }
    hex_digest(content.as_bytes())
}

/// Generate every combination of `template` over `pools`, all anchor occurrences replaced
pub fn generate(template: &str, pools: &PoolInputs, max_materialize: u64) -> Result<Generated, GeneratorError> {
    debug!(%template, pools = pools.len(), max_materialize, "generate: called");
    let prepared = PreparedTemplate::prepare(template, pools)?;
    let total = prepared.total();
    if max_materialize > 0 && total > max_materialize {
        return Err(GeneratorError::TooLarge {
            total,
            limit: max_materialize,
        });
    }

    let combos = (0..total)
        .map(|index| prepared.resolve(index, ReplaceMode::All).map(|(text, _)| text))
        .collect::<Result<Vec<_>, _>>()?;
    let config_hash = config_hash(&prepared, pools);

    info!(total, hash = %&config_hash[..8], "Generated combinations");
    Ok(Generated {
        combos,
        total,
        config_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pools() -> PoolInputs {
        PoolInputs::new().with(1, "cat\ndog").with(2, "red\nblue\ngreen")
    }

    #[test]
    fn test_generate_in_index_order() {
        let generated = generate("[1] is [2], really [1]", &pools(), 0).unwrap();
        assert_eq!(generated.total, 6);
        assert_eq!(generated.combos[0], "cat is red, really cat");
        assert_eq!(generated.combos[5], "dog is green, really dog");
        assert_eq!(generated.config_hash.len(), 64);
    }

    #[test]
    fn test_hash_ignores_unreferenced_pools() {
        let a = generate("[1]", &pools(), 0).unwrap();
        let b = generate("[1]", &pools().with(2, "other"), 0).unwrap();
        assert_eq!(a.config_hash, b.config_hash);

        let c = generate("[1]", &pools().with(1, "cat\nfox"), 0).unwrap();
        assert_ne!(a.config_hash, c.config_hash);
    }

    #[test]
    fn test_too_large() {
        let err = generate("[1] [2]", &pools(), 5).unwrap_err();
        assert_eq!(err, GeneratorError::TooLarge { total: 6, limit: 5 });
    }

    #[test]
    fn test_missing_pool() {
        let err = generate("[3]", &pools(), 0).unwrap_err();
        assert_eq!(err, GeneratorError::Config(ConfigError::MissingPool { anchor: 3 }));
    }
}
