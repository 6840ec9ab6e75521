//! Subscription document parser
//!
//! A subscription is a YAML document with a top-level `proxies` sequence,
//! each element a mapping describing one proxy.

use crate::Result;
use anyhow::Context;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::Path;

const PROXIES_KEY: &str = "proxies";

/// Parser for subscription documents
pub struct SubscriptionParser;

impl SubscriptionParser {
    /// Decode a subscription document into its raw proxy entries.
    ///
    /// A document without a `proxies` list yields no entries. Elements that
    /// are not mappings are skipped.
    pub fn parse_document(content: &str) -> Result<Vec<Mapping>> {
        let document: Value =
            serde_yaml::from_str(content).context("subscription is not valid YAML")?;

        let Some(proxies) = document.get(PROXIES_KEY) else {
            return Ok(Vec::new());
        };

        let entries = match proxies {
            Value::Sequence(items) => items
                .iter()
                .filter_map(|item| item.as_mapping().cloned())
                .collect(),
            _ => Vec::new(),
        };

        Ok(entries)
    }

    /// Decode a subscription stored on disk
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Vec<Mapping>> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse_document(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_document() {
        let content = r#"
port: 7890
proxies:
  - name: a
    type: ss
    server: 1.1.1.1
    port: 8388
  - "not a mapping"
  - name: b
    type: trojan
    server: example.com
    port: 443
"#;
        let entries = SubscriptionParser::parse_document(content).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[1].get("server").and_then(Value::as_str),
            Some("example.com")
        );
    }

    #[test]
    fn test_parse_document_without_proxies() {
        assert!(SubscriptionParser::parse_document("port: 7890\n")
            .unwrap()
            .is_empty());
        assert!(SubscriptionParser::parse_document("proxies:\n")
            .unwrap()
            .is_empty());
        assert!(SubscriptionParser::parse_document("proxies: 3\n")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_parse_invalid_yaml() {
        assert!(SubscriptionParser::parse_document("proxies: [unclosed").is_err());
    }

    #[test]
    fn test_parse_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "proxies:\n  - {{type: ss, server: h, port: 1}}").unwrap();

        let entries = SubscriptionParser::parse_file(file.path()).unwrap();
        assert_eq!(entries.len(), 1);
    }
}
