//! Candidate deduplication by network identity

use crate::proxy::models::ProxyConfig;
use serde_yaml::Mapping;
use std::collections::HashSet;
use tracing::debug;

/// Validate raw subscription entries and drop duplicates.
///
/// Entries missing a required identity field, or carrying a malformed one,
/// are dropped without being counted as duplicates.
pub fn dedup_raw(entries: Vec<Mapping>) -> Vec<ProxyConfig> {
    let configs = entries
        .into_iter()
        .filter_map(|entry| match ProxyConfig::from_mapping(entry) {
            Ok(config) => Some(config),
            Err(e) => {
                debug!("dropping subscription entry: {}", e);
                None
            }
        })
        .collect();

    dedup(configs)
}

/// Keep the first occurrence of every fingerprint, preserving order
pub fn dedup(configs: Vec<ProxyConfig>) -> Vec<ProxyConfig> {
    let mut seen = HashSet::with_capacity(configs.len());
    configs
        .into_iter()
        .filter(|config| seen.insert(config.fingerprint()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_dedup_keeps_first_seen_order() {
        let input = vec![
            ProxyConfig::new("ss", "a.example", 1).with_name("1"),
            ProxyConfig::new("ss", "b.example", 1).with_name("2"),
            ProxyConfig::new("ss", "a.example", 1).with_name("3"),
            ProxyConfig::new("vmess", "a.example", 1).with_name("4"),
        ];

        let names: Vec<_> = dedup(input).into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["1", "2", "4"]);
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let input = vec![
            ProxyConfig::new("ss", "h", 1).with_password("x"),
            ProxyConfig::new("ss", "h", 1).with_password("y"),
            ProxyConfig::new("ss", "h", 1).with_password("x"),
            ProxyConfig::new("trojan", "h", 2),
            ProxyConfig::new("TROJAN", "H", 2),
        ];

        let once = dedup(input.clone());
        let twice = dedup(once.clone());
        assert_eq!(once, twice);
        assert!(once.len() <= input.len());
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn test_dedup_output_has_unique_fingerprints() {
        let input: Vec<_> = (0..20)
            .map(|i| ProxyConfig::new("ss", "h", 1000 + (i % 7)))
            .collect();

        let output = dedup(input);
        let unique: HashSet<_> = output.iter().map(ProxyConfig::fingerprint).collect();
        assert_eq!(unique.len(), output.len());
        assert_eq!(output.len(), 7);
    }

    #[test]
    fn test_dedup_raw_drops_invalid_entries() {
        let entries = vec![
            mapping("{name: 1, type: ss, server: h1, port: 1}"),
            mapping("{name: 2, type: ss, port: 1}"),
            mapping("{name: 3, type: ss, server: h1, port: 1}"),
            mapping("{name: 4, type: ss, server: h2, port: nope}"),
            mapping("{name: 5, type: ss, server: h2, port: 2}"),
        ];

        let names: Vec<_> = dedup_raw(entries).into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["1", "5"]);
    }

    #[test]
    fn test_dedup_empty() {
        assert!(dedup(Vec::new()).is_empty());
        assert!(dedup_raw(Vec::new()).is_empty());
    }
}
