//! Configured static routes and the add/edit form contract

use super::RouteError;
use crate::catalog::InterfaceCatalog;
use crate::net::{mask_to_prefix_length, network_address, parse_ipv4, NetworkAddress, PrefixLength};
use serde::{Deserialize, Serialize};

/// One user-configured static route.
///
/// `interface_label` binds by catalog label, not device name; the device is
/// resolved each time the rule is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub sequence_number: u32,
    pub destination: String,
    pub subnet_mask: String,
    pub interface_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

impl RouteRule {
    pub fn from_form(sequence_number: u32, form: &RouteForm) -> Self {
        Self {
            sequence_number,
            destination: form.destination.trim().to_string(),
            subnet_mask: form.subnet_mask.trim().to_string(),
            interface_label: form.interface_label.clone(),
            gateway: form.gateway(),
        }
    }

    pub fn to_form(&self) -> RouteForm {
        RouteForm {
            destination: self.destination.clone(),
            subnet_mask: self.subnet_mask.clone(),
            interface_label: self.interface_label.clone(),
            gateway: self.gateway.clone().unwrap_or_default(),
        }
    }
}

/// Fields of the add/edit modal, as typed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteForm {
    pub destination: String,
    pub subnet_mask: String,
    pub interface_label: String,
    pub gateway: String,
}

/// A form whose destination and mask parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteTarget {
    pub destination: NetworkAddress,
    pub prefix: PrefixLength,
}

impl RouteTarget {
    pub fn network(&self) -> NetworkAddress {
        network_address(self.destination, self.prefix)
    }
}

impl RouteForm {
    /// A blank form with the default interface preselected
    pub fn blank(catalog: &InterfaceCatalog) -> Self {
        Self {
            interface_label: catalog
                .default_selection()
                .map(|entry| entry.label.clone())
                .unwrap_or_default(),
            ..Self::default()
        }
    }

    /// The typed gateway, `None` when left blank
    pub fn gateway(&self) -> Option<String> {
        let gateway = self.gateway.trim();
        (!gateway.is_empty()).then(|| gateway.to_string())
    }

    /// Check required fields and parse destination and mask.
    pub fn target(&self) -> Result<RouteTarget, RouteError> {
        if self.destination.trim().is_empty() {
            return Err(RouteError::InvalidInput("destination is required".to_string()));
        }
        if self.subnet_mask.trim().is_empty() {
            return Err(RouteError::InvalidInput("subnet mask is required".to_string()));
        }
        if self.interface_label.trim().is_empty() {
            return Err(RouteError::InvalidInput("interface is required".to_string()));
        }

        let destination = parse_ipv4(&self.destination)?;
        let prefix = mask_to_prefix_length(&self.subnet_mask)?;
        Ok(RouteTarget {
            destination,
            prefix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_catalog;

    fn form(destination: &str, mask: &str) -> RouteForm {
        RouteForm {
            destination: destination.to_string(),
            subnet_mask: mask.to_string(),
            interface_label: "Lan 1:192.168.1.101".to_string(),
            gateway: String::new(),
        }
    }

    #[test]
    fn test_target_normalizes_host_address() {
        let target = form("10.10.10.77", "255.255.255.0").target().unwrap();
        assert_eq!(target.destination.to_string(), "10.10.10.77");
        assert_eq!(target.network().to_string(), "10.10.10.0");
        assert_eq!(target.prefix.value(), 24);
    }

    #[test]
    fn test_missing_fields() {
        for bad in [
            form("", "255.255.255.0"),
            form("10.0.0.0", " "),
            RouteForm {
                interface_label: String::new(),
                ..form("10.0.0.0", "255.255.255.0")
            },
        ] {
            assert!(matches!(bad.target(), Err(RouteError::InvalidInput(_))));
        }
    }

    #[test]
    fn test_malformed_fields() {
        assert!(matches!(
            form("10.0.0.256", "255.255.255.0").target(),
            Err(RouteError::InvalidInput(_))
        ));
        assert!(matches!(
            form("10.0.0.0", "255.0.255.0").target(),
            Err(RouteError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_blank_form_selects_default_interface() {
        let blank = RouteForm::blank(&sample_catalog());
        assert_eq!(blank.interface_label, "Lan 1:192.168.1.101");
        assert!(blank.destination.is_empty());

        let empty = RouteForm::blank(&InterfaceCatalog::default());
        assert!(empty.interface_label.is_empty());
    }

    #[test]
    fn test_rule_form_conversion() {
        let mut typed = form(" 10.10.10.0 ", "255.255.255.0");
        typed.gateway = "  ".to_string();
        let rule = RouteRule::from_form(3, &typed);
        assert_eq!(rule.destination, "10.10.10.0");
        assert!(rule.gateway.is_none());

        typed.gateway = "192.168.1.1".to_string();
        let rule = RouteRule::from_form(4, &typed);
        assert_eq!(rule.gateway.as_deref(), Some("192.168.1.1"));
        assert_eq!(rule.to_form().gateway, "192.168.1.1");
        assert_eq!(rule.to_form().interface_label, "Lan 1:192.168.1.101");
    }

    #[test]
    fn test_rule_serialization_skips_empty_gateway() {
        let rule = RouteRule::from_form(1, &form("10.10.10.0", "255.255.255.0"));
        let json = serde_json::to_string(&rule).unwrap();
        assert!(!json.contains("gateway"));
        let back: RouteRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rule);
    }
}
