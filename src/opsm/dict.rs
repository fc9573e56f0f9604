//! The decoded operation dictionary (spec.md §6 "CLI operation dict keys").
//!
//! The CLI grammar and XDR decoding that produce this are out of scope
//! (spec.md §1 explicit non-goal); `Dict` is just the flat string map the
//! Op-SM receives once that decoding has already happened.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Serializable so the management API can take it straight off the wire as
/// a JSON object (spec.md §6 dict keys map 1:1 onto JSON string fields).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dict(HashMap<String, String>);

impl Dict {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str, super::OpError> {
        self.get(key).ok_or_else(|| super::OpError::MissingKey(key.to_string()))
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key)?.parse().ok()
    }

    /// `brick<N>` (1-indexed) entries as `host:path` pairs, in index order
    /// (spec.md §6).
    pub fn bricks(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(usize, (String, String))> = self
            .0
            .iter()
            .filter_map(|(k, v)| {
                let idx: usize = k.strip_prefix("brick")?.parse().ok()?;
                let (host, path) = v.split_once(':')?;
                Some((idx, (host.to_string(), path.to_string())))
            })
            .collect();
        entries.sort_by_key(|(i, _)| *i);
        entries.into_iter().map(|(_, pair)| pair).collect()
    }
}

impl FromIterator<(String, String)> for Dict {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bricks_are_ordered_by_index() {
        let mut d = Dict::new();
        d.insert("brick2", "h2:/d2").insert("brick1", "h1:/d1");
        assert_eq!(
            d.bricks(),
            vec![
                ("h1".to_string(), "/d1".to_string()),
                ("h2".to_string(), "/d2".to_string())
            ]
        );
    }

    #[test]
    fn missing_key_is_reported() {
        let d = Dict::new();
        assert!(d.require("volname").is_err());
    }
}
