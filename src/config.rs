use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Raw configuration as handed over by the host.
pub type RawConfig = HashMap<String, String>;

pub const KEY_SERVERS: &str = "servers";
pub const KEY_TOPIC: &str = "topic";
pub const KEY_TRUST_CERTS: &str = "trustCertsFilePath";
pub const KEY_CERT: &str = "certPath";
pub const KEY_PRIVATE_KEY: &str = "privateKeyPath";
pub const KEY_ALLOW_INSECURE: &str = "allowInsecure";
pub const KEY_MAX_IN_FLIGHT: &str = "maxInFlight";
pub const KEY_CONNECT_TIMEOUT: &str = "connectTimeoutMs";
pub const KEY_SEND_TIMEOUT: &str = "sendTimeoutMs";
pub const KEY_FLUSH_TIMEOUT: &str = "flushTimeoutMs";
pub const KEY_ACKS: &str = "acks";
pub const KEY_COMPRESSION: &str = "compression";
pub const KEY_GROUP_ID: &str = "groupId";
pub const KEY_READ_FROM_BEGINNING: &str = "readFromBeginning";

// (name, default, required, description)
const PARAMETERS: &[(&str, Option<&str>, bool, &str)] = &[
    (KEY_SERVERS, None, true, "Comma separated list of broker host:port addresses."),
    (KEY_TOPIC, None, true, "Topic records are published to or consumed from."),
    (KEY_TRUST_CERTS, None, false, "Path to the CA certificate file."),
    (KEY_CERT, None, false, "Path to the client certificate file."),
    (KEY_PRIVATE_KEY, None, false, "Path to the client private key file."),
    (KEY_ALLOW_INSECURE, Some("false"), false, "Accept untrusted certificates from the broker."),
    (KEY_MAX_IN_FLIGHT, Some("0"), false, "Maximum concurrent sends per write, 0 means one per record."),
    (KEY_CONNECT_TIMEOUT, Some("10000"), false, "Timeout in milliseconds for reaching the broker on open."),
    (KEY_SEND_TIMEOUT, Some("30000"), false, "Timeout in milliseconds for a single message delivery."),
    (KEY_FLUSH_TIMEOUT, Some("5000"), false, "Timeout in milliseconds for flushing the producer on teardown."),
    (KEY_ACKS, Some("all"), false, "Number of acknowledgements the broker must receive: 0, 1 or all."),
    (KEY_COMPRESSION, Some("none"), false, "Compression codec: none, gzip, snappy, lz4 or zstd."),
    (KEY_GROUP_ID, Some("topic-connector"), false, "Consumer group used by the source."),
    (KEY_READ_FROM_BEGINNING, Some("false"), false, "Start the source at the earliest offset when the group has no commit."),
];

/// Describes one configuration parameter to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    pub description: String,
    pub required: bool,
}

/// Returns the parameter schema shared by the source and the destination.
pub fn parameters() -> BTreeMap<String, Parameter> {
    PARAMETERS
        .iter()
        .map(|(name, default, required, description)| {
            (
                name.to_string(),
                Parameter {
                    default: default.map(str::to_string),
                    description: description.to_string(),
                    required: *required,
                },
            )
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    pub trust_certs_file_path: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
    pub private_key_path: Option<PathBuf>,
    pub allow_insecure: bool,
}

impl TlsConfig {
    /// TLS is used as soon as any certificate path is configured.
    pub fn enabled(&self) -> bool {
        self.trust_certs_file_path.is_some()
            || self.cert_path.is_some()
            || self.private_key_path.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Acks {
    None,
    Leader,
    #[default]
    All,
}

impl Acks {
    pub fn as_str(&self) -> &'static str {
        match self {
            Acks::None => "0",
            Acks::Leader => "1",
            Acks::All => "all",
        }
    }
}

impl FromStr for Acks {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "none" => Ok(Acks::None),
            "1" | "leader" => Ok(Acks::Leader),
            "all" | "-1" => Ok(Acks::All),
            other => Err(format!("unknown acks value '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Snappy => "snappy",
            Compression::Lz4 => "lz4",
            Compression::Zstd => "zstd",
        }
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "gzip" => Ok(Compression::Gzip),
            "snappy" => Ok(Compression::Snappy),
            "lz4" => Ok(Compression::Lz4),
            "zstd" => Ok(Compression::Zstd),
            other => Err(format!("unknown compression codec '{}'", other)),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated connector settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub servers: Vec<String>,
    pub topic: String,
    pub tls: TlsConfig,
    /// `None` means one concurrent send per record.
    pub max_in_flight: Option<usize>,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub flush_timeout: Duration,
    pub acks: Acks,
    pub compression: Compression,
    pub group_id: String,
    pub read_from_beginning: bool,
}

impl Config {
    /// Parses and validates the raw mapping handed over by the host.
    ///
    /// No network activity happens here; reachability is checked on open.
    pub fn parse(raw: &RawConfig) -> Result<Self> {
        if let Some(unknown) = raw
            .keys()
            .find(|key| !PARAMETERS.iter().any(|(name, ..)| *name == key.as_str()))
        {
            return Err(Error::Config(format!("unrecognized parameter '{}'", unknown)));
        }

        let servers = parse_servers(required(raw, KEY_SERVERS)?)?;
        let topic = required(raw, KEY_TOPIC)?.to_string();

        let tls = TlsConfig {
            trust_certs_file_path: optional(raw, KEY_TRUST_CERTS).map(PathBuf::from),
            cert_path: optional(raw, KEY_CERT).map(PathBuf::from),
            private_key_path: optional(raw, KEY_PRIVATE_KEY).map(PathBuf::from),
            allow_insecure: parse_value(raw, KEY_ALLOW_INSECURE)?,
        };
        if tls.cert_path.is_some() != tls.private_key_path.is_some() {
            return Err(Error::Config(format!(
                "'{}' and '{}' must be set together",
                KEY_CERT, KEY_PRIVATE_KEY
            )));
        }

        let max_in_flight: usize = parse_value(raw, KEY_MAX_IN_FLIGHT)?;
        if max_in_flight > Semaphore::MAX_PERMITS {
            return Err(Error::Config(format!(
                "'{}' must be at most {}",
                KEY_MAX_IN_FLIGHT,
                Semaphore::MAX_PERMITS
            )));
        }

        Ok(Self {
            servers,
            topic,
            tls,
            max_in_flight: (max_in_flight > 0).then_some(max_in_flight),
            connect_timeout: Duration::from_millis(parse_value(raw, KEY_CONNECT_TIMEOUT)?),
            send_timeout: Duration::from_millis(parse_value(raw, KEY_SEND_TIMEOUT)?),
            flush_timeout: Duration::from_millis(parse_value(raw, KEY_FLUSH_TIMEOUT)?),
            acks: parse_value(raw, KEY_ACKS)?,
            compression: parse_value(raw, KEY_COMPRESSION)?,
            group_id: parse_value(raw, KEY_GROUP_ID)?,
            read_from_beginning: parse_value(raw, KEY_READ_FROM_BEGINNING)?,
        })
    }

    /// Loads the raw mapping from a file, with `TOPIC_CONNECTOR_*`
    /// environment variables taking precedence.
    pub fn raw_from_file<P: AsRef<Path>>(path: P) -> std::result::Result<RawConfig, ::config::ConfigError> {
        let file = ::config::Config::builder()
            .add_source(::config::File::from(path.as_ref()))
            .build()?;
        let env = ::config::Config::builder()
            .add_source(::config::Environment::with_prefix("TOPIC_CONNECTOR").prefix_separator("_"))
            .build()?;

        // Environment keys arrive lowercased, so the layers are merged here
        // after mapping both back onto parameter names.
        let mut raw = RawConfig::new();
        for layer in [file, env] {
            let table: HashMap<String, ::config::Value> = layer.try_deserialize()?;
            for (key, value) in table {
                let name = PARAMETERS
                    .iter()
                    .map(|(name, ..)| *name)
                    .find(|name| name.eq_ignore_ascii_case(&key))
                    .map(str::to_string)
                    .unwrap_or(key);
                raw.insert(name, flatten_value(value)?);
            }
        }
        Ok(raw)
    }

    pub fn bootstrap_servers(&self) -> String {
        self.servers.join(",")
    }
}

fn flatten_value(value: ::config::Value) -> std::result::Result<String, ::config::ConfigError> {
    match value.kind {
        ::config::ValueKind::Array(items) => Ok(items
            .into_iter()
            .map(|item| item.into_string())
            .collect::<std::result::Result<Vec<_>, _>>()?
            .join(",")),
        _ => value.into_string(),
    }
}

fn optional<'a>(raw: &'a RawConfig, key: &str) -> Option<&'a str> {
    raw.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn required<'a>(raw: &'a RawConfig, key: &str) -> Result<&'a str> {
    optional(raw, key).ok_or_else(|| Error::Config(format!("missing required parameter '{}'", key)))
}

fn default_for(key: &str) -> Option<&'static str> {
    PARAMETERS
        .iter()
        .find(|(name, ..)| *name == key)
        .and_then(|(_, default, ..)| *default)
}

fn parse_value<T>(raw: &RawConfig, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let value = optional(raw, key)
        .or_else(|| default_for(key))
        .ok_or_else(|| Error::Config(format!("missing required parameter '{}'", key)))?;

    value
        .parse()
        .map_err(|e| Error::Config(format!("invalid value '{}' for '{}': {}", value, key, e)))
}

fn parse_servers(value: &str) -> Result<Vec<String>> {
    let servers: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if servers.is_empty() {
        return Err(Error::Config(format!("'{}' must not be empty", KEY_SERVERS)));
    }

    for server in &servers {
        let valid = server
            .rsplit_once(':')
            .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
            .unwrap_or(false);
        if !valid {
            return Err(Error::Config(format!(
                "invalid server '{}' in '{}', expected host:port",
                server, KEY_SERVERS
            )));
        }
    }

    Ok(servers)
}
