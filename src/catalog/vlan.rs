//! VLAN sub-interface discovery from the ifupdown configuration file
//!
//! Only the first `auto ethX.N` (or `allow-hotplug ethX.N`) stanza counts;
//! it ends at the next header naming another device. Firmware often writes the
//! gateway commented out so ifup does not install a second default route;
//! it still identifies the next hop for static routes.

use crate::net::{parse_cidr, parse_ipv4, NetworkAddress};
use crate::platform::{is_valid_device_name, shell_quote, CommandChannel};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlanStanza {
    pub device: String,
    pub address: Option<NetworkAddress>,
    pub netmask: Option<String>,
    pub gateway: Option<NetworkAddress>,
}

impl VlanStanza {
    fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            address: None,
            netmask: None,
            gateway: None,
        }
    }
}

/// `ethX.N`
fn is_vlan_device(name: &str) -> bool {
    match name.split_once('.') {
        Some((parent, id)) => {
            parent.starts_with("eth")
                && !id.is_empty()
                && id.bytes().all(|b| b.is_ascii_digit())
                && is_valid_device_name(name)
        }
        None => false,
    }
}

/// Lines that open a new stanza in ifupdown syntax
fn stanza_header(line: &str) -> Option<(&str, &str)> {
    let (keyword, rest) = line.split_once(char::is_whitespace)?;
    match keyword {
        "auto" | "allow-hotplug" | "iface" | "mapping" | "source" => Some((keyword, rest)),
        _ => None,
    }
}

pub fn parse_interfaces_file(text: &str) -> Option<VlanStanza> {
    let mut stanza: Option<VlanStanza> = None;

    for raw in text.lines() {
        let line = raw.trim();

        if let Some((keyword, rest)) = stanza_header(line) {
            let mut names = rest.split_whitespace();
            let open_device = stanza.as_ref().map(|current| current.device.clone());
            match open_device {
                // a header for another device ends the open stanza
                Some(device) => {
                    let same_device = match keyword {
                        "iface" => names.next() == Some(device.as_str()),
                        _ => names.any(|name| name == device),
                    };
                    if !same_device {
                        break;
                    }
                }
                None if keyword != "iface" => {
                    if let Some(device) = names.find(|name| is_vlan_device(name)) {
                        stanza = Some(VlanStanza::new(device));
                    }
                }
                None => {}
            }
            continue;
        }

        let Some(current) = stanza.as_mut() else {
            continue;
        };

        let (commented, body) = match line.strip_prefix('#') {
            Some(rest) => (true, rest.trim()),
            None => (false, line),
        };
        let mut tokens = body.split_whitespace();
        let (Some(key), Some(value)) = (tokens.next(), tokens.next()) else {
            continue;
        };

        match key {
            "address" if !commented => {
                if let Ok((addr, prefix)) = parse_cidr(value) {
                    current.address = Some(addr);
                    if current.netmask.is_none() {
                        current.netmask = prefix.map(|p| p.to_mask().to_string());
                    }
                }
            }
            "netmask" if !commented => {
                if parse_ipv4(value).is_ok() {
                    current.netmask = Some(value.to_string());
                }
            }
            "gateway" if current.gateway.is_none() => {
                current.gateway = parse_ipv4(value).ok();
            }
            _ => {}
        }
    }

    stanza.filter(|s| s.address.is_some())
}

/// Read and parse the interfaces file; any failure means "no VLAN".
pub async fn discover<C: CommandChannel>(channel: &C, path: &Path) -> Option<VlanStanza> {
    let command = format!("cat {}", shell_quote(&path.to_string_lossy()));
    let outcome = channel.run(&command).await;
    if !outcome.success {
        debug!("No VLAN configuration at {}: {}", path.display(), outcome.output);
        return None;
    }
    parse_interfaces_file(&outcome.output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRouter;

    const INTERFACES: &str = "\
auto lo
iface lo inet loopback

auto eth0
iface eth0 inet static
    address 192.168.1.101
    netmask 255.255.255.0
    gateway 192.168.1.1

auto eth0.5
iface eth0.5 inet static
    address 10.0.5.2
    netmask 255.255.255.0
    #gateway 10.0.5.1
    vlan-raw-device eth0

auto eth0.6
iface eth0.6 inet static
    address 10.0.6.2
";

    #[test]
    fn test_parse_first_vlan_stanza() {
        let stanza = parse_interfaces_file(INTERFACES).unwrap();
        assert_eq!(stanza.device, "eth0.5");
        assert_eq!(stanza.address.unwrap().to_string(), "10.0.5.2");
        assert_eq!(stanza.netmask.as_deref(), Some("255.255.255.0"));
        assert_eq!(stanza.gateway.unwrap().to_string(), "10.0.5.1");
    }

    #[test]
    fn test_parse_cidr_address() {
        let text = "auto eth1.100\niface eth1.100 inet static\n  address 10.100.0.2/16\n  # gateway 10.100.0.1\n";
        let stanza = parse_interfaces_file(text).unwrap();
        assert_eq!(stanza.device, "eth1.100");
        assert_eq!(stanza.netmask.as_deref(), Some("255.255.0.0"));
        assert_eq!(stanza.gateway.unwrap().to_string(), "10.100.0.1");
    }

    #[test]
    fn test_stanza_ends_at_other_iface() {
        let text = "\
auto eth0.5
iface eth0.5 inet manual
iface eth0 inet static
    address 192.168.1.101
    # gateway 192.168.1.1
allow-hotplug eth0.7
iface eth0.7 inet static
    address 10.0.7.2
";
        assert!(parse_interfaces_file(text).is_none());
    }

    #[test]
    fn test_allow_hotplug_opens_stanza() {
        let text = "\
allow-hotplug eth0.7
iface eth0.7 inet static
    address 10.0.7.2
    netmask 255.255.255.0
allow-hotplug eth1
iface eth1 inet static
    gateway 10.20.0.1
";
        let stanza = parse_interfaces_file(text).unwrap();
        assert_eq!(stanza.device, "eth0.7");
        assert_eq!(stanza.address.unwrap().to_string(), "10.0.7.2");
        assert!(stanza.gateway.is_none());
    }

    #[test]
    fn test_commented_address_is_ignored() {
        let text = "auto eth0.5\niface eth0.5 inet static\n  #address 10.0.5.2\n";
        assert!(parse_interfaces_file(text).is_none());
    }

    #[test]
    fn test_no_vlan_stanza() {
        let text = "auto lo\niface lo inet loopback\nauto eth0\niface eth0 inet dhcp\n";
        assert!(parse_interfaces_file(text).is_none());
    }

    #[test]
    fn test_vlan_device_names() {
        assert!(is_vlan_device("eth0.5"));
        assert!(is_vlan_device("eth1.100"));
        assert!(!is_vlan_device("eth0"));
        assert!(!is_vlan_device("eth0."));
        assert!(!is_vlan_device("wlan0.5"));
        assert!(!is_vlan_device("eth0.x"));
    }

    #[tokio::test]
    async fn test_discover_reads_file() {
        let router = FakeRouter::new();
        router.respond("cat '/etc/network/interfaces'", INTERFACES);

        let stanza = discover(&router, Path::new("/etc/network/interfaces"))
            .await
            .unwrap();
        assert_eq!(stanza.device, "eth0.5");
    }

    #[tokio::test]
    async fn test_discover_missing_file() {
        let router = FakeRouter::new();
        router.respond_failure("cat '/etc/network/interfaces'", "No such file or directory");

        assert!(discover(&router, Path::new("/etc/network/interfaces")).await.is_none());
    }
}
