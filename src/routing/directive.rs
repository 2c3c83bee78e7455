//! Route directive construction
//!
//! Resolves the device and gateway for a rule and decides the directive
//! shape. VPN tunnels are often point-to-point, so a tunnel route without a
//! gateway is still valid; a LAN route uses a gateway only when one is typed
//! or recorded on the interface.

use super::rule::RouteTarget;
use super::RouteError;
use crate::catalog::{discover_route_gateway, InterfaceCatalog, InterfaceClass, InterfaceDescriptor};
use crate::config::DeviceConfig;
use crate::net::{parse_ipv4, NetworkAddress, PrefixLength};
use crate::platform::{is_valid_device_name, CommandChannel};
use std::fmt;
use tracing::debug;

/// One `ip route` directive: `network/prefix [via gateway] dev device`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteDirective {
    pub network: NetworkAddress,
    pub prefix: PrefixLength,
    pub gateway: Option<NetworkAddress>,
    pub device: String,
}

impl RouteDirective {
    pub fn target(&self) -> String {
        format!("{}/{}", self.network, self.prefix)
    }

    pub fn add_command(&self) -> String {
        format!("ip route add {}", self)
    }

    pub fn delete_command(&self) -> String {
        format!("ip route del {}", self)
    }

    /// Line for the persisted mirror; tolerates "File exists" on replay
    pub fn replay_line(&self) -> String {
        format!("ip route add {} 2>/dev/null || true", self)
    }

    pub fn with_gateway(&self, gateway: NetworkAddress) -> Self {
        Self {
            gateway: Some(gateway),
            ..self.clone()
        }
    }

    pub fn without_gateway(&self) -> Self {
        Self {
            gateway: None,
            ..self.clone()
        }
    }
}

impl fmt::Display for RouteDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)?;
        if let Some(gateway) = self.gateway {
            write!(f, " via {}", gateway)?;
        }
        write!(f, " dev {}", self.device)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteShape {
    ViaGateway,
    DeviceOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltDirective {
    pub directive: RouteDirective,
    /// Device is tunnel/VPN class
    pub vpn: bool,
    pub shape: RouteShape,
}

/// Builds directives against one catalog snapshot
pub struct DirectiveBuilder<'a, C> {
    catalog: &'a InterfaceCatalog,
    channel: &'a C,
    devices: &'a DeviceConfig,
}

impl<'a, C: CommandChannel> DirectiveBuilder<'a, C> {
    pub fn new(catalog: &'a InterfaceCatalog, channel: &'a C, devices: &'a DeviceConfig) -> Self {
        Self {
            catalog,
            channel,
            devices,
        }
    }

    /// Device for a label, falling back to label heuristics when the label
    /// is stale (the interface disappeared since the rule was saved).
    pub fn resolve_device(&self, label: &str) -> Result<String, RouteError> {
        if let Some(entry) = self.catalog.find_by_label(label) {
            return Ok(entry.device_name.clone());
        }
        let device = device_from_label(label, self.devices)
            .ok_or_else(|| RouteError::InvalidInput(format!("unknown interface: {}", label)))?;
        debug!("Label {:?} not in catalog, guessed device {}", label, device);
        Ok(device)
    }

    /// Typed gateway, then the interface's recorded one, then (tunnels
    /// only) a next hop found on the device's live routes.
    pub async fn resolve_gateway(
        &self,
        device: &str,
        descriptor: Option<&InterfaceDescriptor>,
        user_gateway: Option<&str>,
    ) -> Result<Option<NetworkAddress>, RouteError> {
        if let Some(text) = user_gateway.map(str::trim).filter(|text| !text.is_empty()) {
            let gateway = parse_ipv4(text)
                .map_err(|_| RouteError::InvalidInput(format!("invalid gateway: {}", text)))?;
            return Ok(Some(gateway));
        }

        if let Some(gateway) = descriptor.and_then(|entry| entry.gateway) {
            return Ok(Some(gateway));
        }

        if self.is_vpn(device, descriptor) {
            return Ok(discover_route_gateway(self.channel, device).await);
        }

        Ok(None)
    }

    fn is_vpn(&self, device: &str, descriptor: Option<&InterfaceDescriptor>) -> bool {
        self.devices.is_vpn_device(device)
            || descriptor.is_some_and(|entry| entry.class == InterfaceClass::Vpn)
    }

    pub async fn build(
        &self,
        target: &RouteTarget,
        label: &str,
        user_gateway: Option<&str>,
    ) -> Result<BuiltDirective, RouteError> {
        let device = self.resolve_device(label)?;
        let descriptor = self.catalog.find_by_label(label);
        let gateway = self.resolve_gateway(&device, descriptor, user_gateway).await?;
        let vpn = self.is_vpn(&device, descriptor);

        // VPN only steers gateway discovery and the removal variants
        let shape = match gateway {
            Some(_) => RouteShape::ViaGateway,
            None => RouteShape::DeviceOnly,
        };

        let directive = RouteDirective {
            network: target.network(),
            prefix: target.prefix,
            gateway,
            device,
        };

        Ok(BuiltDirective {
            directive,
            vpn,
            shape,
        })
    }
}

/// Guess a device from a label such as `Lan 1:192.168.1.101` or
/// `VPN:172.23.0.5 (vpn_vpn)`.
pub fn device_from_label(label: &str, devices: &DeviceConfig) -> Option<String> {
    let lower = label.trim().to_ascii_lowercase();

    let device = if let Some(name) = parenthesized(label) {
        Some(name.to_string())
    } else if lower.starts_with("lan 1") {
        devices.lan_port(1).map(str::to_string)
    } else if lower.starts_with("lan 2") {
        devices.lan_port(2).map(str::to_string)
    } else if lower.starts_with("vpn") {
        Some(devices.default_tunnel.clone())
    } else {
        None
    };

    device.filter(|name| is_valid_device_name(name))
}

fn parenthesized(label: &str) -> Option<&str> {
    let start = label.rfind('(')?;
    let end = start + label[start..].find(')')?;
    let inner = label[start + 1..end].trim();
    (!inner.is_empty()).then_some(inner)
}
