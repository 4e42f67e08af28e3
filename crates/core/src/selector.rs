//! Label/field selector mappings and their query-string rendering.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Key-unique selector mapping that keeps insertion order.
///
/// Inserting an existing key replaces its value in place, so rendering stays
/// deterministic regardless of how often a key is overwritten.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectorMap {
    pairs: SmallVec<[(String, String); 4]>,
}

impl SelectorMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.pairs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.pairs.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse a single `key=value` term as typed on a command line.
    pub fn parse_term(term: &str) -> Result<(String, String), String> {
        match term.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
            _ => Err(format!("invalid selector term: {term:?} (expect key=value)")),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SelectorMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = SelectorMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Render a selector as `k1=v1,k2=v2`; an empty mapping means "no filter".
pub fn render_selector(selector: &SelectorMap) -> Option<String> {
    if selector.is_empty() {
        return None;
    }
    let rendered: Vec<String> = selector.iter().map(|(k, v)| format!("{k}={v}")).collect();
    Some(rendered.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_in_insertion_order() {
        let sel: SelectorMap = [("a", "1"), ("b", "2")].into_iter().collect();
        assert_eq!(render_selector(&sel).as_deref(), Some("a=1,b=2"));
        let rev: SelectorMap = [("b", "2"), ("a", "1")].into_iter().collect();
        assert_eq!(render_selector(&rev).as_deref(), Some("b=2,a=1"));
    }

    #[test]
    fn empty_means_no_filter() {
        assert_eq!(render_selector(&SelectorMap::new()), None);
    }

    #[test]
    fn duplicate_key_replaces_value_in_place() {
        let sel = SelectorMap::new().with("app", "x").with("tier", "batch").with("app", "y");
        assert_eq!(sel.len(), 2);
        assert_eq!(sel.get("app"), Some("y"));
        assert_eq!(render_selector(&sel).as_deref(), Some("app=y,tier=batch"));
    }

    #[test]
    fn parse_term_requires_key_and_equals() {
        assert_eq!(SelectorMap::parse_term("a=1").unwrap(), ("a".to_string(), "1".to_string()));
        assert_eq!(SelectorMap::parse_term("metadata.name=x=y").unwrap().1, "x=y");
        assert!(SelectorMap::parse_term("novalue").is_err());
        assert!(SelectorMap::parse_term("=1").is_err());
    }
}
