//! Interface catalog
//!
//! The ordered list of egress interfaces a static route can bind to: LAN
//! port 1, LAN port 2, every VPN tunnel, then the VLAN sub-interface. The
//! catalog is a live snapshot rebuilt on every refresh and never persisted.
//!
//! Discovery never fails. When the system-info query itself fails the
//! catalog degrades to a static list of LAN ports without addresses, which
//! the conflict validator refuses to treat as evidence of "no conflicts".

pub mod sysinfo;
pub mod vlan;

use crate::config::DeviceConfig;
use crate::net::{mask_to_prefix_length, parse_ipv4, NetworkAddress, PrefixLength};
use crate::platform::{is_valid_device_name, CommandChannel};
use std::fmt;
use sysinfo::{parse_ip_addr_output, RawInterfaceRecord, IP_ADDR_COMMAND};
use tracing::{debug, info, warn};

pub use sysinfo::{CommandSystemInfo, SystemInfo, SystemInfoError, SystemInfoSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceClass {
    Lan,
    Vpn,
    Vlan,
}

impl fmt::Display for InterfaceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceClass::Lan => write!(f, "lan"),
            InterfaceClass::Vpn => write!(f, "vpn"),
            InterfaceClass::Vlan => write!(f, "vlan"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    /// What the UI shows and rules bind to, e.g. `Lan 1:192.168.1.101`
    pub label: String,
    pub device_name: String,
    pub ip: Option<NetworkAddress>,
    pub mask: Option<String>,
    pub gateway: Option<NetworkAddress>,
    pub class: InterfaceClass,
}

impl InterfaceDescriptor {
    /// Prefix of the directly-connected network.
    ///
    /// Falls back to /24 when the mask is missing or malformed. This is an
    /// approximation: it can over- or under-reject on non-/24 segments.
    pub fn connected_prefix(&self) -> PrefixLength {
        self.mask
            .as_deref()
            .and_then(|mask| mask_to_prefix_length(mask).ok())
            .unwrap_or(PrefixLength::CLASS_C)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InterfaceCatalog {
    entries: Vec<InterfaceDescriptor>,
    degraded: bool,
}

impl InterfaceCatalog {
    pub fn new(entries: Vec<InterfaceDescriptor>) -> Self {
        Self {
            entries,
            degraded: false,
        }
    }

    /// Static LAN port list used when interface discovery is unavailable
    pub fn fallback(devices: &DeviceConfig) -> Self {
        let entries = devices
            .lan_ports
            .iter()
            .enumerate()
            .map(|(index, device)| InterfaceDescriptor {
                label: format!("Lan {}", index + 1),
                device_name: device.clone(),
                ip: None,
                mask: None,
                gateway: None,
                class: InterfaceClass::Lan,
            })
            .collect();
        Self {
            entries,
            degraded: true,
        }
    }

    pub fn entries(&self) -> &[InterfaceDescriptor] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// True when at least one entry has a known address
    pub fn has_addresses(&self) -> bool {
        self.entries.iter().any(|entry| entry.ip.is_some())
    }

    pub fn find_by_label(&self, label: &str) -> Option<&InterfaceDescriptor> {
        self.entries.iter().find(|entry| entry.label == label)
    }

    /// LAN port 1 when present, else the first entry
    pub fn default_selection(&self) -> Option<&InterfaceDescriptor> {
        self.entries
            .iter()
            .find(|entry| entry.label.starts_with("Lan 1"))
            .or_else(|| self.entries.first())
    }

    pub async fn discover<S, C>(source: &S, channel: &C, devices: &DeviceConfig) -> Self
    where
        S: SystemInfoSource,
        C: CommandChannel,
    {
        let info = match source.system_info().await {
            Ok(info) => info,
            Err(e) => {
                warn!("System info unavailable, using static interface list: {}", e);
                return Self::fallback(devices);
            }
        };

        let mut entries = Vec::new();

        for (index, device) in devices.lan_ports.iter().enumerate() {
            let Some(record) = info.find(device) else {
                debug!("LAN port {} ({}) not reported", index + 1, device);
                continue;
            };
            let Some(ip) = record.address() else {
                debug!("LAN port {} ({}) has no address", index + 1, device);
                continue;
            };
            entries.push(InterfaceDescriptor {
                label: format!("Lan {}:{}", index + 1, ip),
                device_name: device.clone(),
                ip: Some(ip),
                mask: record.netmask(),
                gateway: record.gateway_hint(),
                class: InterfaceClass::Lan,
            });
        }

        for record in tunnel_records(&info, channel, devices).await {
            let Some(ip) = record.address() else {
                debug!("Tunnel {} has no address", record.name);
                continue;
            };
            let gateway = match record.gateway_hint().or_else(|| record.secondary_address()) {
                Some(gateway) => Some(gateway),
                None => discover_route_gateway(channel, &record.name).await,
            };
            entries.push(InterfaceDescriptor {
                label: format!("VPN:{} ({})", ip, record.name),
                device_name: record.name.clone(),
                ip: Some(ip),
                mask: record.netmask(),
                gateway,
                class: InterfaceClass::Vpn,
            });
        }

        if let Some(stanza) = vlan::discover(channel, &devices.vlan_interfaces_file).await {
            if let Some(ip) = stanza.address {
                entries.push(InterfaceDescriptor {
                    label: format!("VLAN:{} ({})", ip, stanza.device),
                    device_name: stanza.device,
                    ip: Some(ip),
                    mask: stanza.netmask,
                    gateway: stanza.gateway,
                    class: InterfaceClass::Vlan,
                });
            }
        }

        info!("Interface catalog: {} entries", entries.len());
        Self::new(entries)
    }
}

/// VPN-class records from the payload, plus tunnels only `ip addr` knows about
async fn tunnel_records<C: CommandChannel>(
    info: &SystemInfo,
    channel: &C,
    devices: &DeviceConfig,
) -> Vec<RawInterfaceRecord> {
    let mut records: Vec<RawInterfaceRecord> = info
        .interfaces
        .iter()
        .filter(|record| is_valid_device_name(&record.name) && devices.is_vpn_device(&record.name))
        .cloned()
        .collect();

    let outcome = channel.run(IP_ADDR_COMMAND).await;
    if outcome.success {
        for record in parse_ip_addr_output(&outcome.output).interfaces {
            let known = records.iter().any(|known| known.name == record.name);
            if !known && is_valid_device_name(&record.name) && devices.is_vpn_device(&record.name) {
                debug!("Discovered tunnel {} from ip addr", record.name);
                records.push(record);
            }
        }
    }

    records
}

/// First `via` next hop among the routes bound to `device`.
pub async fn discover_route_gateway<C: CommandChannel>(
    channel: &C,
    device: &str,
) -> Option<NetworkAddress> {
    if !is_valid_device_name(device) {
        return None;
    }
    let outcome = channel.run(&format!("ip route show dev {}", device)).await;
    if !outcome.success {
        return None;
    }
    let gateway = parse_via(&outcome.output);
    if let Some(gateway) = gateway {
        debug!("Found gateway {} on routes of {}", gateway, device);
    }
    gateway
}

pub(crate) fn parse_via(routes: &str) -> Option<NetworkAddress> {
    routes.lines().find_map(|line| {
        let mut tokens = line.split_whitespace();
        while let Some(token) = tokens.next() {
            if token == "via" {
                return tokens.next().and_then(|gw| parse_ipv4(gw).ok());
            }
        }
        None
    })
}
