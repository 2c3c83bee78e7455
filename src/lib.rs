//! GW Routes - Static IP route management for VoIP gateway appliances
//!
//! Lets an administrator send traffic for a destination network out of a
//! chosen interface (LAN port, VPN tunnel or VLAN) by adding, editing and
//! deleting static routes. Every change is applied to the live kernel table
//! and mirrored to a replay script so it survives a reboot.
//!
//! # Architecture
//!
//! - `net`: IPv4 address, netmask and prefix arithmetic
//! - `platform`: Command execution channel (`sh -c` on Linux)
//! - `catalog`: Interface discovery (LAN, VPN tunnels, VLAN)
//! - `routing`: Conflict validation, directive building, apply/remove, boot mirror
//! - `table`: The configured rule list and its CRUD operations
//! - `config`: Configuration file handling (TOML)
//! - `state`: Saved rule set between invocations
//!
//! # Usage
//!
//! ```bash
//! sudo gw-routes add --destination 10.10.10.0 --mask 255.255.255.0 \
//!   --interface 'Lan 1:192.168.1.101'
//! ```

pub mod catalog;
pub mod config;
pub mod net;
pub mod platform;
pub mod routing;
pub mod state;
pub mod table;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::InterfaceCatalog;
pub use config::Config;
pub use routing::{RouteEngine, RouteError, RouteForm, RouteRule};
pub use state::RouteState;
pub use table::RoutingTable;
