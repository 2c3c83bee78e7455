//! System-info payload and its sources
//!
//! The payload is loosely structured: interface fields show up under
//! several key spellings, sometimes nested one level down, and sometimes
//! only as an "IP Address" multi-value slot. [`RawInterfaceRecord`] types the
//! known spellings and keeps everything else in `extra` for a bounded
//! fallback scan.

use crate::net::{looks_like_ipv4, parse_cidr, parse_ipv4, NetworkAddress, PrefixLength};
use crate::platform::CommandChannel;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum SystemInfoError {
    #[error("System info command failed: {0}")]
    CommandError(String),
    #[error("Failed to parse system info: {0}")]
    ParseError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    #[serde(default, alias = "Interfaces", deserialize_with = "lenient_records")]
    pub interfaces: Vec<RawInterfaceRecord>,
}

/// Records that do not fit the record shape at all are dropped one by one
/// instead of failing the whole payload.
fn lenient_records<'de, D>(deserializer: D) -> Result<Vec<RawInterfaceRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<Value>::deserialize(deserializer)?;
    Ok(values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping unreadable interface record: {}", e);
                None
            }
        })
        .collect())
}

impl SystemInfo {
    pub fn find(&self, name: &str) -> Option<&RawInterfaceRecord> {
        self.interfaces.iter().find(|record| record.name == name)
    }
}

/// A field that is either a list or a single delimited string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MultiValue {
    List(Vec<String>),
    Single(String),
    Other(Value),
}

impl MultiValue {
    pub fn slot(&self, index: usize) -> Option<&str> {
        match self {
            MultiValue::List(values) => values.get(index).map(String::as_str),
            MultiValue::Single(value) => value
                .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
                .filter(|part| !part.is_empty())
                .nth(index),
            MultiValue::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawInterfaceRecord {
    #[serde(
        default,
        alias = "Name",
        alias = "interface",
        alias = "device",
        alias = "ifname",
        deserialize_with = "lenient_name"
    )]
    pub name: String,
    /// Usually a string; objects and numbers are tolerated and scanned
    #[serde(default, alias = "IP", alias = "ipaddr", alias = "ip_addr")]
    pub ip: Option<Value>,
    #[serde(default, alias = "Mask", alias = "netmask", alias = "Netmask", alias = "subnet_mask")]
    pub mask: Option<Value>,
    #[serde(default, alias = "Gateway", alias = "gw")]
    pub gateway: Option<Value>,
    #[serde(default, rename = "IP Address", alias = "ip_address")]
    pub ip_address: Option<MultiValue>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn lenient_name<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(name) => name,
        _ => String::new(),
    })
}

fn as_text(value: &Option<Value>) -> Option<&str> {
    match value {
        Some(Value::String(text)) => Some(text.as_str()),
        _ => None,
    }
}

impl RawInterfaceRecord {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn ip_text(&self) -> Option<&str> {
        as_text(&self.ip)
    }

    pub fn mask_text(&self) -> Option<&str> {
        as_text(&self.mask)
    }

    pub fn gateway_text(&self) -> Option<&str> {
        as_text(&self.gateway)
    }

    /// String attributes from `extra` and from non-string typed fields,
    /// with nested objects flattened one level as `outer.inner`.
    fn attributes(&self) -> Vec<(String, &str)> {
        let typed = [("ip", &self.ip), ("mask", &self.mask), ("gateway", &self.gateway)]
            .into_iter()
            .filter_map(|(key, value)| match value {
                Some(value @ Value::Object(_)) => Some((key, value)),
                _ => None,
            });
        let extra = self.extra.iter().map(|(key, value)| (key.as_str(), value));

        let mut attributes = Vec::new();
        for (key, value) in typed.chain(extra) {
            match value {
                Value::String(text) => attributes.push((key.to_string(), text.as_str())),
                Value::Object(nested) => {
                    for (inner, value) in nested {
                        if let Value::String(text) = value {
                            attributes.push((format!("{}.{}", key, inner), text.as_str()));
                        }
                    }
                }
                _ => {}
            }
        }
        attributes
    }

    /// First IPv4-shaped value whose key matches, by case-insensitive name
    fn scan(&self, key_matches: impl Fn(&str) -> bool) -> Option<String> {
        self.attributes()
            .into_iter()
            .find(|(key, value)| {
                key_matches(&key.to_ascii_lowercase()) && looks_like_ipv4(cidr_address(value))
            })
            .map(|(_, value)| value.to_string())
    }

    fn address_text(&self) -> Option<String> {
        let direct = self
            .ip_text()
            .filter(|ip| looks_like_ipv4(cidr_address(ip)))
            .map(str::to_string);
        let slot = || {
            self.ip_address
                .as_ref()
                .and_then(|multi| multi.slot(0))
                .filter(|ip| looks_like_ipv4(cidr_address(ip)))
                .map(str::to_string)
        };
        direct.or_else(slot).or_else(|| {
            self.scan(|key| key.contains("ip") && !key.contains("mask") && !key.contains("gateway"))
        })
    }

    pub fn address(&self) -> Option<NetworkAddress> {
        self.address_text()
            .and_then(|text| parse_cidr(&text).ok())
            .map(|(addr, _)| addr)
    }

    /// Explicit mask, else one implied by a CIDR address, else a scanned one
    pub fn netmask(&self) -> Option<String> {
        if let Some(mask) = self.mask_text().filter(|mask| looks_like_ipv4(mask)) {
            return Some(mask.trim().to_string());
        }
        // A bare number is a prefix length
        if let Some(prefix) = self
            .mask
            .as_ref()
            .and_then(Value::as_u64)
            .and_then(|bits| u8::try_from(bits).ok())
            .and_then(|bits| PrefixLength::new(bits).ok())
        {
            return Some(prefix.to_mask().to_string());
        }
        let from_cidr = self
            .address_text()
            .and_then(|text| parse_cidr(&text).ok())
            .and_then(|(_, prefix)| prefix)
            .map(|prefix| prefix.to_mask().to_string());
        from_cidr.or_else(|| self.scan(|key| key.contains("mask")))
    }

    pub fn gateway_hint(&self) -> Option<NetworkAddress> {
        self.gateway_text()
            .and_then(|gw| parse_ipv4(gw).ok())
            .or_else(|| {
                self.scan(|key| key.contains("gateway"))
                    .and_then(|gw| parse_ipv4(&gw).ok())
            })
    }

    /// Second slot of the "IP Address" field, which some firmware uses for
    /// the peer/gateway of a tunnel
    pub fn secondary_address(&self) -> Option<NetworkAddress> {
        self.ip_address
            .as_ref()
            .and_then(|multi| multi.slot(1))
            .and_then(|text| parse_cidr(text).ok())
            .map(|(addr, _)| addr)
    }
}

fn cidr_address(text: &str) -> &str {
    text.split_once('/').map_or(text, |(addr, _)| addr)
}

/// Produces the system-info payload
pub trait SystemInfoSource: Send + Sync {
    fn system_info(&self) -> impl Future<Output = Result<SystemInfo, SystemInfoError>> + Send;
}

/// A fixed payload
impl SystemInfoSource for SystemInfo {
    async fn system_info(&self) -> Result<SystemInfo, SystemInfoError> {
        Ok(self.clone())
    }
}

pub const IP_ADDR_COMMAND: &str = "ip -o -4 addr show";

/// Reads the payload through the command channel
pub struct CommandSystemInfo<C> {
    channel: C,
    command: Option<String>,
}

impl<C: CommandChannel> CommandSystemInfo<C> {
    pub fn new(channel: C, command: Option<String>) -> Self {
        Self { channel, command }
    }
}

impl<C: CommandChannel> SystemInfoSource for CommandSystemInfo<C> {
    async fn system_info(&self) -> Result<SystemInfo, SystemInfoError> {
        let command = self.command.as_deref().unwrap_or(IP_ADDR_COMMAND);
        let outcome = self.channel.run(command).await;
        if !outcome.success {
            return Err(SystemInfoError::CommandError(outcome.output));
        }

        if self.command.is_some() {
            Ok(serde_json::from_str(&outcome.output)?)
        } else {
            let info = parse_ip_addr_output(&outcome.output);
            debug!("Derived {} interfaces from ip addr", info.interfaces.len());
            Ok(info)
        }
    }
}

/// Parse `ip -o -4 addr show` into a payload.
///
/// ```text
/// 2: eth0    inet 192.168.1.101/24 brd 192.168.1.255 scope global eth0\       valid_lft forever
/// 7: tun0    inet 172.23.0.5 peer 172.23.0.1/32 scope global tun0\       valid_lft forever
/// ```
///
/// A point-to-point `peer` becomes the gateway. Only the first address of
/// each device is kept.
pub fn parse_ip_addr_output(text: &str) -> SystemInfo {
    let mut info = SystemInfo::default();

    for line in text.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(raw_name) = tokens.get(1) else {
            continue;
        };
        let name = raw_name.trim_end_matches(':');
        let name = name.split('@').next().unwrap_or(name);
        if name.is_empty() || info.find(name).is_some() {
            continue;
        }

        let value_after = |key: &str| {
            tokens
                .iter()
                .position(|token| *token == key)
                .and_then(|index| tokens.get(index + 1))
                .copied()
        };

        let Some(inet) = value_after("inet") else {
            continue;
        };
        let Ok((ip, prefix)) = parse_cidr(inet) else {
            continue;
        };

        let mut record = RawInterfaceRecord::named(name);
        record.ip = Some(Value::String(ip.to_string()));

        let peer = value_after("peer").and_then(|peer| parse_cidr(peer).ok());
        // With a peer, the prefix on the peer describes the link, not the local address
        let link_prefix = prefix.or_else(|| peer.and_then(|(_, prefix)| prefix));
        record.mask = link_prefix.map(|prefix| Value::String(prefix.to_mask().to_string()));
        record.gateway = peer.map(|(addr, _)| Value::String(addr.to_string()));

        info.interfaces.push(record);
    }

    info
}
