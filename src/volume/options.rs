//! The global Option Map (spec.md §3 "Option Map entry"; §4.2 "Option
//! handling"/"Option value validation").
//!
//! Has no analogue in the teacher (a PaaS app model has no string-keyed
//! translator option surface), so this follows spec.md §9's design note
//! directly: "compile [the Option Map] to a closed enumeration at build
//! time where possible, and keep the string table only for the CLI
//! surface." `OPTION_MAP` is the closed table; `OptionMap::suggest` is the
//! only part of it that still deals in raw strings, because the spell
//! correction it backs is inherently string-shaped (unknown keys from the
//! wire, by definition not in the enumeration).

use std::collections::HashMap;

use lazy_static::lazy_static;

use super::VolumeError;

/// One row of the Option Map: a public key as it appears on the wire, the
/// translator type it targets, its internal option name (a leading `!`
/// marks it as special-cased rather than copied verbatim — spec.md §4.2),
/// and an optional default applied at volfile-generation time only (never
/// written into the dict).
#[derive(Debug, Clone, Copy)]
pub struct OptionEntry {
    pub public_key: &'static str,
    pub xlator_type: &'static str,
    pub internal_name: &'static str,
    pub default: Option<&'static str>,
}

impl OptionEntry {
    pub fn is_special(&self) -> bool {
        self.internal_name.starts_with('!')
    }
}

const ENTRIES: &[OptionEntry] = &[
    OptionEntry { public_key: "performance.write-behind", xlator_type: "performance/write-behind", internal_name: "!perf", default: Some("on") },
    OptionEntry { public_key: "performance.read-ahead", xlator_type: "performance/read-ahead", internal_name: "!perf", default: Some("on") },
    OptionEntry { public_key: "performance.io-cache", xlator_type: "performance/io-cache", internal_name: "!perf", default: Some("on") },
    OptionEntry { public_key: "performance.quick-read", xlator_type: "performance/quick-read", internal_name: "!perf", default: Some("on") },
    OptionEntry { public_key: "performance.stat-prefetch", xlator_type: "performance/stat-prefetch", internal_name: "!perf", default: Some("on") },
    OptionEntry { public_key: "performance.client-io-threads", xlator_type: "performance/io-threads", internal_name: "!perf", default: Some("off") },
    OptionEntry { public_key: "performance.cache-size", xlator_type: "performance/io-cache", internal_name: "cache-size", default: Some("32MB") },
    OptionEntry { public_key: "performance.cache-min-file-size", xlator_type: "performance/io-cache", internal_name: "min-file-size", default: Some("0") },
    OptionEntry { public_key: "performance.cache-max-file-size", xlator_type: "performance/io-cache", internal_name: "max-file-size", default: Some("0") },
    OptionEntry { public_key: "auth.allow", xlator_type: "protocol/server", internal_name: "!auth-allow", default: Some("*") },
    OptionEntry { public_key: "auth.reject", xlator_type: "protocol/server", internal_name: "!auth-reject", default: None },
    OptionEntry { public_key: "nfs.rpc-auth-allow", xlator_type: "nfs/server", internal_name: "!nfs-auth-allow", default: None },
    OptionEntry { public_key: "nfs.disable", xlator_type: "nfs/server", internal_name: "!nfs-disable", default: Some("off") },
    OptionEntry { public_key: "nfs.dynamic-volumes", xlator_type: "nfs/server", internal_name: "dynamic-volumes", default: Some("on") },
    OptionEntry { public_key: "features.marker.xtime", xlator_type: "features/marker", internal_name: "xtime", default: Some("off") },
    OptionEntry { public_key: "features.quota", xlator_type: "features/quota", internal_name: "!quota", default: Some("off") },
    OptionEntry { public_key: "network.ping-timeout", xlator_type: "protocol/client", internal_name: "ping-timeout", default: Some("42") },
    OptionEntry { public_key: "network.frame-timeout", xlator_type: "protocol/client", internal_name: "frame-timeout", default: Some("1800") },
    OptionEntry { public_key: "client.transport-mtu", xlator_type: "protocol/client", internal_name: "!mtu", default: Some("2048") },
    OptionEntry { public_key: "cluster.background-self-heal-count", xlator_type: "cluster/replicate", internal_name: "background-self-heal-count", default: Some("16") },
    OptionEntry { public_key: "cluster.data-self-heal", xlator_type: "cluster/replicate", internal_name: "data-self-heal", default: Some("on") },
    OptionEntry { public_key: "cluster.stripe-coalesce", xlator_type: "cluster/stripe", internal_name: "coalesce", default: Some("true") },
];

/// Values `{256,512,1024,2048,4096}` are the only legal path MTUs (spec.md
/// §4.2); anything else is rejected. Default is 2048.
pub const VALID_MTUS: &[u32] = &[256, 512, 1024, 2048, 4096];
pub const DEFAULT_MTU: u32 = 2048;

pub struct OptionMap {
    by_key: HashMap<&'static str, OptionEntry>,
    keys_by_component: Vec<(&'static str, Vec<&'static str>)>,
}

impl OptionMap {
    fn build() -> Self {
        let by_key = ENTRIES.iter().map(|e| (e.public_key, *e)).collect();
        let keys_by_component = ENTRIES
            .iter()
            .map(|e| (e.public_key, e.public_key.split('.').collect()))
            .collect();
        Self { by_key, keys_by_component }
    }

    pub fn lookup(&self, key: &str) -> Option<&OptionEntry> {
        self.by_key.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OptionEntry> {
        self.by_key.values()
    }

    /// Small-edit-distance suggestion for an unknown key (spec.md §4.4
    /// "Spell-correction"): compare the dotted components of `key` against
    /// every known public key and return the one or two nearest. Used only
    /// to populate an error message, never to auto-correct.
    pub fn suggest(&self, key: &str) -> Vec<String> {
        let mut scored: Vec<(usize, &str)> = self
            .keys_by_component
            .iter()
            .map(|(full, _)| (levenshtein(key, full), *full))
            .collect();
        scored.sort_by_key(|(d, name)| (*d, name.to_string()));
        scored
            .into_iter()
            .filter(|(d, _)| *d <= key.len().max(3))
            .take(2)
            .map(|(_, name)| name.to_string())
            .collect()
    }
}

lazy_static! {
    pub static ref OPTION_MAP: OptionMap = OptionMap::build();
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for i in 1..=a.len() {
        let mut prev = row[0];
        row[0] = i;
        for j in 1..=b.len() {
            let tmp = row[j];
            row[j] = if a[i - 1] == b[j - 1] {
                prev
            } else {
                1 + prev.min(row[j]).min(row[j - 1])
            };
            prev = tmp;
        }
    }
    row[b.len()]
}

/// Parse a boolean-valued option: `on`/`off`/`yes`/`no`/`true`/`false`
/// (spec.md §4.2).
pub fn parse_bool(value: &str) -> Result<bool, VolumeError> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "yes" | "true" | "1" | "enable" => Ok(true),
        "off" | "no" | "false" | "0" | "disable" => Ok(false),
        _ => Err(VolumeError::InvalidOptionValue {
            key: value.to_string(),
            reason: "expected on/off/yes/no/true/false".to_string(),
        }),
    }
}

/// Validate a numeric option value, with an optional inclusive range.
pub fn parse_numeric(key: &str, value: &str, range: Option<(i64, i64)>) -> Result<i64, VolumeError> {
    let n: i64 = value.parse().map_err(|_| VolumeError::InvalidOptionValue {
        key: key.to_string(),
        reason: format!("{} is not a valid integer", value),
    })?;
    if let Some((lo, hi)) = range {
        if n < lo || n > hi {
            return Err(VolumeError::InvalidOptionValue {
                key: key.to_string(),
                reason: format!("{} out of range [{}, {}]", n, lo, hi),
            });
        }
    }
    Ok(n)
}

/// `cache-min-file-size`/`cache-max-file-size` must satisfy min <= max,
/// validated pairwise using the post-change pair (spec.md §4.2). `pending`
/// is the key/value about to be written; `current` is the volume's
/// existing options map.
pub fn validate_cache_size_pair(
    pending_key: &str,
    pending_value: &str,
    current: &HashMap<String, String>,
) -> Result<(), VolumeError> {
    let (min_key, max_key) = ("performance.cache-min-file-size", "performance.cache-max-file-size");
    if pending_key != min_key && pending_key != max_key {
        return Ok(());
    }
    let mut min = current.get(min_key).and_then(|v| v.parse::<i64>().ok()).unwrap_or(0);
    let mut max = current.get(max_key).and_then(|v| v.parse::<i64>().ok()).unwrap_or(0);
    let pending: i64 = pending_value.parse().map_err(|_| VolumeError::InvalidOptionValue {
        key: pending_key.to_string(),
        reason: format!("{} is not a valid integer", pending_value),
    })?;
    if pending_key == min_key {
        min = pending;
    } else {
        max = pending;
    }
    if max != 0 && min > max {
        return Err(VolumeError::CacheSizeRange);
    }
    Ok(())
}

/// `client.transport-mtu` maps `{256,512,1024,2048,4096}` to an enum value;
/// anything else is rejected (spec.md §4.2).
pub fn validate_mtu(value: &str) -> Result<u32, VolumeError> {
    let n: u32 = value.parse().map_err(|_| VolumeError::InvalidOptionValue {
        key: "client.transport-mtu".to_string(),
        reason: format!("{} is not a valid MTU", value),
    })?;
    if VALID_MTUS.contains(&n) {
        Ok(n)
    } else {
        Err(VolumeError::InvalidOptionValue {
            key: "client.transport-mtu".to_string(),
            reason: format!("{} is not one of {:?}", n, VALID_MTUS),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_key_resolves() {
        assert!(OPTION_MAP.lookup("performance.write-behind").is_some());
    }

    #[test]
    fn unknown_key_suggests_nearest() {
        let suggestions = OPTION_MAP.suggest("performance.write-behinf");
        assert!(suggestions.iter().any(|s| s == "performance.write-behind"));
    }

    #[test]
    fn cache_size_pair_rejects_min_over_max() {
        let mut current = HashMap::new();
        current.insert("performance.cache-max-file-size".to_string(), "100".to_string());
        let err = validate_cache_size_pair("performance.cache-min-file-size", "200", &current);
        assert!(matches!(err, Err(VolumeError::CacheSizeRange)));
    }

    #[test]
    fn mtu_rejects_non_enum_value() {
        assert!(validate_mtu("1337").is_err());
        assert_eq!(validate_mtu("4096").unwrap(), 4096);
    }

    #[test]
    fn bool_parsing_accepts_documented_forms() {
        assert!(parse_bool("on").unwrap());
        assert!(!parse_bool("no").unwrap());
        assert!(parse_bool("maybe").is_err());
    }
}
