//! Conflict check against directly-connected networks
//!
//! A static route may not claim a segment any local interface already owns,
//! whichever interface the route is meant to leave through. Each interface
//! is compared using its own prefix.

use super::RouteError;
use crate::catalog::{InterfaceCatalog, InterfaceDescriptor};
use crate::net::{network_address, NetworkAddress};

/// First interface whose connected network contains `destination`
pub fn find_conflict(
    catalog: &InterfaceCatalog,
    destination: NetworkAddress,
) -> Option<&InterfaceDescriptor> {
    catalog.entries().iter().find(|entry| {
        let Some(ip) = entry.ip else {
            return false;
        };
        let prefix = entry.connected_prefix();
        network_address(ip, prefix) == network_address(destination, prefix)
    })
}

/// Refuse on an unloaded catalog, reject on any overlap.
pub fn check_conflicts(
    catalog: &InterfaceCatalog,
    destination: NetworkAddress,
) -> Result<(), RouteError> {
    if !catalog.has_addresses() {
        return Err(RouteError::CatalogUnavailable);
    }

    match find_conflict(catalog, destination) {
        Some(entry) => {
            let prefix = entry.connected_prefix();
            let network = entry
                .ip
                .map(|ip| network_address(ip, prefix))
                .unwrap_or(destination);
            Err(RouteError::Conflict {
                destination,
                network,
                prefix,
                label: entry.label.clone(),
            })
        }
        None => Ok(()),
    }
}
