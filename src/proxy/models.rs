//! Proxy data models

use serde_yaml::{Mapping, Number, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

const NAME_KEY: &str = "name";
const TYPE_KEY: &str = "type";
const SERVER_KEY: &str = "server";
const PORT_KEY: &str = "port";
const USERNAME_KEY: &str = "username";
const PASSWORD_KEY: &str = "password";
const UUID_KEY: &str = "uuid";

/// Why a raw subscription entry could not become a [`ProxyConfig`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigFieldError {
    #[error("missing required field `{0}`")]
    Missing(&'static str),
    #[error("field `{field}` is malformed: {reason}")]
    Malformed { field: &'static str, reason: String },
}

/// A single proxy candidate.
///
/// The connection-defining fields are typed; everything else the subscription
/// carried (cipher, tls, transport options...) is kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfig {
    /// Display name, empty when the source had none
    pub name: String,
    /// Protocol kind as written by the source (`ss`, `vmess`, `socks5`...)
    pub kind: String,
    pub server: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub uuid: Option<String>,
    /// Unknown fields, in source order
    pub extra: Mapping,
}

impl ProxyConfig {
    /// Create a config with only the identity fields set
    pub fn new(kind: &str, server: &str, port: u16) -> Self {
        Self {
            name: String::new(),
            kind: kind.to_string(),
            server: server.to_string(),
            port,
            username: None,
            password: None,
            uuid: None,
            extra: Mapping::new(),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_auth(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn with_uuid(mut self, uuid: &str) -> Self {
        self.uuid = Some(uuid.to_string());
        self
    }

    /// Validate a decoded subscription entry.
    ///
    /// `type`, `server` and `port` are required. `port` may be an integer or
    /// a numeric string. A missing or non-scalar `name` becomes empty.
    pub fn from_mapping(mapping: Mapping) -> Result<Self, ConfigFieldError> {
        let mut name = String::new();
        let mut kind = None;
        let mut server = None;
        let mut port = None;
        let mut username = None;
        let mut password = None;
        let mut uuid = None;
        let mut extra = Mapping::new();

        for (key, value) in mapping {
            match key.as_str() {
                Some(NAME_KEY) => name = scalar_string(&value).unwrap_or_default(),
                Some(TYPE_KEY) => kind = Some(required_string(TYPE_KEY, &value)?),
                Some(SERVER_KEY) => server = Some(required_string(SERVER_KEY, &value)?),
                Some(PORT_KEY) => port = Some(parse_port(&value)?),
                Some(USERNAME_KEY) => username = credential(USERNAME_KEY, &value)?,
                Some(PASSWORD_KEY) => password = credential(PASSWORD_KEY, &value)?,
                Some(UUID_KEY) => uuid = credential(UUID_KEY, &value)?,
                _ => {
                    extra.insert(key, value);
                }
            }
        }

        Ok(Self {
            name,
            kind: kind.ok_or(ConfigFieldError::Missing(TYPE_KEY))?,
            server: server.ok_or(ConfigFieldError::Missing(SERVER_KEY))?,
            port: port.ok_or(ConfigFieldError::Missing(PORT_KEY))?,
            username,
            password,
            uuid,
            extra,
        })
    }

    /// Rebuild the property bag, known fields first, then `extra` in source order.
    ///
    /// Known fields come back in their validated form: `server` and `type`
    /// trimmed, `port` an integer, credentials as strings, `name` always
    /// present. Null credentials are omitted. Every other field is returned
    /// exactly as decoded.
    pub fn to_mapping(&self) -> Mapping {
        let mut mapping = Mapping::new();
        mapping.insert(NAME_KEY.into(), self.name.clone().into());
        mapping.insert(TYPE_KEY.into(), self.kind.clone().into());
        mapping.insert(SERVER_KEY.into(), self.server.clone().into());
        mapping.insert(PORT_KEY.into(), Value::Number(Number::from(self.port)));

        let credentials = [
            (USERNAME_KEY, &self.username),
            (PASSWORD_KEY, &self.password),
            (UUID_KEY, &self.uuid),
        ];
        for (key, value) in credentials {
            if let Some(value) = value {
                mapping.insert(key.into(), value.clone().into());
            }
        }

        for (key, value) in &self.extra {
            mapping.insert(key.clone(), value.clone());
        }
        mapping
    }

    /// Network identity of this candidate, independent of its display name
    pub fn fingerprint(&self) -> Fingerprint {
        let credentials = [
            (USERNAME_KEY, &self.username),
            (PASSWORD_KEY, &self.password),
            (UUID_KEY, &self.uuid),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_ref().map(|v| (key, v.clone())))
        .collect();

        Fingerprint {
            kind: self.kind.to_ascii_lowercase(),
            server: self.server.to_ascii_lowercase(),
            port: self.port,
            credentials,
        }
    }

    /// Get the proxy address in SERVER:PORT format
    pub fn address(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }
}

impl fmt::Display for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}://{})", self.name, self.kind, self.address())
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn required_string(field: &'static str, value: &Value) -> Result<String, ConfigFieldError> {
    let s = scalar_string(value).ok_or_else(|| ConfigFieldError::Malformed {
        field,
        reason: "expected a scalar".to_string(),
    })?;
    let s = s.trim();
    if s.is_empty() {
        return Err(ConfigFieldError::Missing(field));
    }
    Ok(s.to_string())
}

fn credential(field: &'static str, value: &Value) -> Result<Option<String>, ConfigFieldError> {
    match value {
        Value::Null => Ok(None),
        other => scalar_string(other)
            .map(Some)
            .ok_or_else(|| ConfigFieldError::Malformed {
                field,
                reason: "expected a scalar".to_string(),
            }),
    }
}

fn parse_port(value: &Value) -> Result<u16, ConfigFieldError> {
    let malformed = |reason: String| ConfigFieldError::Malformed {
        field: PORT_KEY,
        reason,
    };

    let port = match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u16::try_from(n).ok())
            .ok_or_else(|| malformed(format!("{} is not a valid port", n)))?,
        Value::String(s) => s
            .trim()
            .parse::<u16>()
            .map_err(|e| malformed(format!("{:?}: {}", s, e)))?,
        _ => return Err(malformed("expected a number".to_string())),
    };

    if port == 0 {
        return Err(malformed("port 0".to_string()));
    }
    Ok(port)
}

/// Canonical, order-independent identity of a candidate.
///
/// Two configs with equal fingerprints dial the same endpoint with the same
/// credentials and are duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint {
    kind: String,
    server: String,
    port: u16,
    credentials: BTreeMap<&'static str, String>,
}

/// External services a candidate is probed against, in probe order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Cloudflare,
    Google,
    Openai,
    Youtube,
    Netflix,
    Disney,
}

impl Service {
    /// Must pass, in this order, for a candidate to be kept
    pub const GATING: [Service; 2] = [Service::Cloudflare, Service::Google];

    /// Recorded as flags once gating has passed
    pub const INFORMATIONAL: [Service; 4] = [
        Service::Openai,
        Service::Youtube,
        Service::Netflix,
        Service::Disney,
    ];

    pub fn is_gating(&self) -> bool {
        Self::GATING.contains(self)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Cloudflare => write!(f, "cloudflare"),
            Service::Google => write!(f, "google"),
            Service::Openai => write!(f, "openai"),
            Service::Youtube => write!(f, "youtube"),
            Service::Netflix => write!(f, "netflix"),
            Service::Disney => write!(f, "disney"),
        }
    }
}

/// Which services a candidate reached. All false until a probe succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilityFlags {
    pub cloudflare: bool,
    pub google: bool,
    pub openai: bool,
    pub youtube: bool,
    pub netflix: bool,
    pub disney: bool,
}

impl CapabilityFlags {
    pub fn get(&self, service: Service) -> bool {
        match service {
            Service::Cloudflare => self.cloudflare,
            Service::Google => self.google,
            Service::Openai => self.openai,
            Service::Youtube => self.youtube,
            Service::Netflix => self.netflix,
            Service::Disney => self.disney,
        }
    }

    pub fn set(&mut self, service: Service, reachable: bool) {
        let flag = match service {
            Service::Cloudflare => &mut self.cloudflare,
            Service::Google => &mut self.google,
            Service::Openai => &mut self.openai,
            Service::Youtube => &mut self.youtube,
            Service::Netflix => &mut self.netflix,
            Service::Disney => &mut self.disney,
        };
        *flag = reachable;
    }

    /// Services whose flag is set, in probe order
    pub fn reachable(&self) -> Vec<Service> {
        Service::GATING
            .into_iter()
            .chain(Service::INFORMATIONAL)
            .filter(|s| self.get(*s))
            .collect()
    }
}

/// A candidate that passed gating, with its final display name
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub proxy: ProxyConfig,
    pub flags: CapabilityFlags,
}

impl CheckResult {
    pub fn new(proxy: ProxyConfig, flags: CapabilityFlags) -> Self {
        Self { proxy, flags }
    }

    pub fn name(&self) -> &str {
        &self.proxy.name
    }
}
