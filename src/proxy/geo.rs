//! IP geolocation using MaxMind MMDB databases

use crate::Result;
use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Maps an IP address to a short geographic label, empty when unknown
pub trait GeoLookup: Send + Sync {
    fn resolve(&self, ip: &str) -> String;
}

/// Country of an IP address
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GeoLocation {
    /// ISO 3166-1 alpha-2 country code (e.g., "US", "CN")
    pub country_code: Option<String>,
    /// Country name in English
    pub country_name: Option<String>,
}

impl GeoLocation {
    pub fn with_country(country_code: Option<String>, country_name: Option<String>) -> Self {
        Self {
            country_code,
            country_name,
        }
    }

    /// Country code if known, otherwise the English name, otherwise empty
    pub fn label(&self) -> String {
        self.country_code
            .clone()
            .or_else(|| self.country_name.clone())
            .unwrap_or_default()
    }
}

/// GeoLocator for looking up IP addresses in MMDB databases
#[derive(Clone)]
pub struct GeoLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoLocator {
    /// Open an MMDB file (GeoLite2 Country or City)
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::open_readfile(path)?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// Look up the location for an IP address string
    pub fn lookup(&self, ip_str: &str) -> Result<GeoLocation> {
        let ip: IpAddr = ip_str.trim().parse()?;
        self.lookup_ip(ip)
    }

    pub fn lookup_ip(&self, ip: IpAddr) -> Result<GeoLocation> {
        let lookup_result = self.reader.lookup(ip)?;

        let country: Option<geoip2::Country> = lookup_result.decode()?;
        let Some(country) = country else {
            return Ok(GeoLocation::default());
        };

        Ok(GeoLocation::with_country(
            country.country.iso_code.map(String::from),
            country.country.names.english.map(String::from),
        ))
    }
}

impl GeoLookup for GeoLocator {
    fn resolve(&self, ip: &str) -> String {
        match self.lookup(ip) {
            Ok(location) => location.label(),
            Err(e) => {
                debug!("geo lookup for {} failed: {}", ip, e);
                String::new()
            }
        }
    }
}

impl std::fmt::Debug for GeoLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoLocator").finish_non_exhaustive()
    }
}

/// Lookup used when no database is configured; every address is unknown
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGeoLookup;

impl GeoLookup for NoGeoLookup {
    fn resolve(&self, _ip: &str) -> String {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_location_default() {
        let loc = GeoLocation::default();
        assert_eq!(loc, GeoLocation::with_country(None, None));
        assert_eq!(loc.label(), "");
    }

    #[test]
    fn test_geo_location_label_prefers_code() {
        let loc = GeoLocation::with_country(Some("US".to_string()), Some("United States".to_string()));
        assert_eq!(loc.label(), "US");

        let loc = GeoLocation::with_country(None, Some("Japan".to_string()));
        assert_eq!(loc.label(), "Japan");
    }

    #[test]
    fn test_missing_database() {
        assert!(GeoLocator::from_path("/nonexistent/country.mmdb").is_err());
    }

    #[test]
    fn test_no_geo_lookup() {
        assert_eq!(NoGeoLookup.resolve("8.8.8.8"), "");
    }
}
