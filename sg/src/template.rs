//! Template anchors and prompt pools
//!
//! A template refers to pools through anchors written `[n]` (n ≥ 1, no
//! leading zeros). Every anchor must name a pool with at least one line;
//! that check runs before any index math because pool sizes are the radices.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::radix::{self, RadixError};

static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([1-9][0-9]*)\]").expect("anchor pattern is valid"));

/// Template/pool configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Template uses anchor [{anchor}] but no pool_{anchor} was supplied")]
    MissingPool { anchor: u32 },

    #[error("Template uses anchor [{anchor}] but pool_{anchor} is empty; add at least one line")]
    EmptyPool { anchor: u32 },

    #[error("Combination space is too large: {0}")]
    Space(#[from] RadixError),
}

/// How many occurrences of an anchor a substitution replaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplaceMode {
    /// Only the first remaining occurrence
    #[default]
    First,
    /// Every occurrence
    All,
}

/// Raw pool texts keyed by pool number
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolInputs {
    pools: BTreeMap<u32, String>,
}

impl PoolInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the text of pool `number`
    pub fn insert(&mut self, number: u32, text: impl Into<String>) {
        self.pools.insert(number, text.into());
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, number: u32, text: impl Into<String>) -> Self {
        self.insert(number, text);
        self
    }

    pub fn get(&self, number: u32) -> Option<&str> {
        self.pools.get(&number).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Pools in ascending number order
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.pools.iter().map(|(n, t)| (*n, t.as_str()))
    }

    /// `pool_N_text` → text pairs, for fingerprinting
    pub fn named_pairs(&self) -> Vec<(String, String)> {
        self.pools
            .iter()
            .map(|(n, t)| (format!("pool_{}_text", n), t.clone()))
            .collect()
    }
}

/// Split a pool text into trimmed, non-blank lines
pub fn parse_pool(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Distinct anchor numbers used by `template`, ascending
pub fn extract_anchors(template: &str) -> BTreeSet<u32> {
    ANCHOR_RE
        .captures_iter(template)
        .filter_map(|c| c.get(1))
        .filter_map(|m| m.as_str().parse::<u32>().ok())
        .collect()
}

/// One anchor with the parsed lines of its pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorPool {
    pub anchor: u32,
    pub items: Vec<String>,
}

impl AnchorPool {
    pub fn size(&self) -> u64 {
        self.items.len() as u64
    }
}

/// Pair every anchor with its parsed pool, in ascending anchor order
pub fn validate_pools(anchors: &BTreeSet<u32>, pools: &PoolInputs) -> Result<Vec<AnchorPool>, ConfigError> {
    let mut resolved = Vec::with_capacity(anchors.len());
    for &anchor in anchors {
        let text = pools.get(anchor).ok_or(ConfigError::MissingPool { anchor })?;
        let items = parse_pool(text);
        if items.is_empty() {
            return Err(ConfigError::EmptyPool { anchor });
        }
        resolved.push(AnchorPool { anchor, items });
    }
    debug!(anchors = ?anchors, sizes = ?resolved.iter().map(AnchorPool::size).collect::<Vec<_>>(), "validate_pools: ok");
    Ok(resolved)
}

/// What one anchor was replaced with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorTrace {
    pub anchor: u32,
    pub local_index: u64,
    pub pool_size: u64,
    pub text: String,
}

impl std::fmt::Display for AnchorTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "  - anchor [{}]: index {}/{} -> \"{}\"",
            self.anchor, self.local_index, self.pool_size, self.text
        )
    }
}

/// Replace anchors with the pool items selected by `local_indices`
///
/// `pools` and `local_indices` are aligned positionally. Anchors are replaced
/// in order on the progressively rewritten text.
pub fn substitute(
    template: &str,
    pools: &[AnchorPool],
    local_indices: &[u64],
    mode: ReplaceMode,
) -> (String, Vec<AnchorTrace>) {
    let mut text = template.to_string();
    let mut trace = Vec::with_capacity(pools.len());

    for (pool, &local) in pools.iter().zip(local_indices) {
        let Some(item) = usize::try_from(local).ok().and_then(|i| pool.items.get(i)) else {
            debug!(anchor = pool.anchor, local, "substitute: local index outside pool, skipping");
            continue;
        };

        let placeholder = format!("[{}]", pool.anchor);
        text = match mode {
            ReplaceMode::First => text.replacen(&placeholder, item, 1),
            ReplaceMode::All => text.replace(&placeholder, item),
        };

        trace.push(AnchorTrace {
            anchor: pool.anchor,
            local_index: local,
            pool_size: pool.size(),
            text: item.clone(),
        });
    }

    (text, trace)
}

/// A template checked against its pools, ready to be addressed by global index
#[derive(Debug, Clone)]
pub struct PreparedTemplate {
    template: String,
    pools: Vec<AnchorPool>,
    total: u64,
}

impl PreparedTemplate {
    /// Extract anchors, validate pools and size the combination space
    pub fn prepare(template: &str, pools: &PoolInputs) -> Result<Self, ConfigError> {
        let anchors = extract_anchors(template);
        let pools = validate_pools(&anchors, pools)?;
        let sizes: Vec<u64> = pools.iter().map(AnchorPool::size).collect();
        let total = radix::total_combinations(&sizes)?;
        debug!(anchors = anchors.len(), total, "PreparedTemplate::prepare: ready");
        Ok(Self {
            template: template.to_string(),
            pools,
            total,
        })
    }

    /// Size of the combination space (1 when the template has no anchors)
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn pool_sizes(&self) -> Vec<u64> {
        self.pools.iter().map(AnchorPool::size).collect()
    }

    pub fn anchors(&self) -> Vec<u32> {
        self.pools.iter().map(|p| p.anchor).collect()
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Text for `global_index`, with a trace of each substitution
    pub fn resolve(&self, global_index: u64, mode: ReplaceMode) -> Result<(String, Vec<AnchorTrace>), RadixError> {
        let local = radix::decompose(global_index, &self.pool_sizes())?;
        Ok(substitute(&self.template, &self.pools, &local, mode))
    }
}
