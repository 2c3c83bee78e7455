//! Static route management
//!
//! - `rule`: configured routes and the add/edit form
//! - `validator`: rejects routes onto directly-connected networks
//! - `directive`: turns a rule into an `ip route` directive
//! - `engine`: applies and removes directives against the live table
//! - `mirror`: the boot-time replay script

pub mod directive;
pub mod engine;
pub mod mirror;
pub mod rule;
pub mod validator;

use crate::net::{NetError, NetworkAddress, PrefixLength};
use thiserror::Error;

pub use directive::{BuiltDirective, DirectiveBuilder, RouteDirective};
pub use engine::{RemovalOutcome, RouteEngine};
pub use mirror::RouteMirror;
pub use rule::{RouteForm, RouteRule};

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error(
        "Destination {destination} overlaps the directly-connected network {network}/{prefix} on {label}"
    )]
    Conflict {
        destination: NetworkAddress,
        network: NetworkAddress,
        prefix: PrefixLength,
        label: String,
    },
    #[error("Interface list is still loading; try again once interfaces are known")]
    CatalogUnavailable,
    #[error("Failed to apply route {directive}: {message}")]
    ApplyFailure { directive: String, message: String },
    #[error("Route applied but not guaranteed to survive reboot: {0}")]
    PersistFailure(String),
    #[error("Route change applied but not saved to the rule store: {0}")]
    StateNotSaved(String),
    #[error("Another route change is still in progress")]
    Busy,
    #[error("No route rule with sequence number {0}")]
    UnknownRule(u32),
}

impl From<NetError> for RouteError {
    fn from(err: NetError) -> Self {
        RouteError::InvalidInput(err.to_string())
    }
}
