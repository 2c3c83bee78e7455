//! Route apply/remove engine
//!
//! Adding is validate → convert → conflict check → build → delete any
//! identical route → add. Removing recomputes the directive the same way
//! and tries a short, fixed list of delete variants, because the gateway
//! policy that applied when a route was added may resolve differently now.
//!
//! Every command goes through the engine's [`CommandChannel`]; every
//! mutation works on one catalog snapshot passed in by the caller.

use super::directive::{BuiltDirective, DirectiveBuilder, RouteDirective, RouteShape};
use super::mirror::RouteMirror;
use super::rule::{RouteForm, RouteRule};
use super::validator::check_conflicts;
use super::RouteError;
use crate::catalog::{parse_via, InterfaceCatalog};
use crate::config::DeviceConfig;
use crate::net::NetworkAddress;
use crate::platform::CommandChannel;
use futures_util::future::join_all;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// What happened when removing one rule's live route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalOutcome {
    pub sequence_number: u32,
    /// Variants dispatched, in order
    pub attempted: Vec<RouteDirective>,
    /// The variant the kernel accepted
    pub removed: Option<RouteDirective>,
    pub error: Option<String>,
}

impl RemovalOutcome {
    pub fn succeeded(&self) -> bool {
        self.removed.is_some()
    }
}

pub struct RouteEngine<C> {
    channel: C,
    devices: DeviceConfig,
    mirror: RouteMirror,
}

impl<C: CommandChannel> RouteEngine<C> {
    pub fn new(channel: C, devices: DeviceConfig, mirror: RouteMirror) -> Self {
        Self {
            channel,
            devices,
            mirror,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn devices(&self) -> &DeviceConfig {
        &self.devices
    }

    pub fn mirror(&self) -> &RouteMirror {
        &self.mirror
    }

    pub fn builder<'a>(&'a self, catalog: &'a InterfaceCatalog) -> DirectiveBuilder<'a, C> {
        DirectiveBuilder::new(catalog, &self.channel, &self.devices)
    }

    /// Validate a form and build its directive without touching live state.
    pub async fn plan(
        &self,
        catalog: &InterfaceCatalog,
        form: &RouteForm,
    ) -> Result<BuiltDirective, RouteError> {
        let target = form.target()?;
        check_conflicts(catalog, target.destination)?;
        let gateway = form.gateway();
        self.builder(catalog)
            .build(&target, &form.interface_label, gateway.as_deref())
            .await
    }

    /// Delete any identical route, then add. Only the add can fail.
    pub async fn install(&self, directive: &RouteDirective) -> Result<(), RouteError> {
        let outcome = self.channel.run(&directive.delete_command()).await;
        if outcome.success {
            debug!("Replaced existing route {}", directive);
        }

        let outcome = self.channel.run(&directive.add_command()).await;
        if !outcome.success {
            return Err(RouteError::ApplyFailure {
                directive: directive.to_string(),
                message: outcome.output,
            });
        }

        info!("Applied route {}", directive);
        Ok(())
    }

    pub async fn apply(
        &self,
        catalog: &InterfaceCatalog,
        form: &RouteForm,
    ) -> Result<RouteDirective, RouteError> {
        let built = self.plan(catalog, form).await?;
        self.install(&built.directive).await?;
        Ok(built.directive)
    }

    /// The directive a stored rule resolves to now. No conflict check: the
    /// rule passed one when it was saved.
    pub async fn directive_for(
        &self,
        catalog: &InterfaceCatalog,
        rule: &RouteRule,
    ) -> Result<BuiltDirective, RouteError> {
        let target = rule.to_form().target()?;
        self.builder(catalog)
            .build(&target, &rule.interface_label, rule.gateway.as_deref())
            .await
    }

    /// Delete candidates, most likely first.
    ///
    /// This is a compatibility shim for routes added under a different
    /// gateway policy, bounded to: the recomputed directive, its opposite
    /// gateway form (for tunnels, the opposite comes from the live route),
    /// and the directive this session actually installed.
    pub async fn removal_variants(
        &self,
        built: &BuiltDirective,
        applied: Option<&RouteDirective>,
    ) -> Vec<RouteDirective> {
        let primary = &built.directive;
        let mut variants = vec![primary.clone()];

        match primary.gateway {
            Some(_) => variants.push(primary.without_gateway()),
            None if built.vpn => {
                if let Some(gateway) = self.live_gateway(primary).await {
                    variants.push(primary.with_gateway(gateway));
                }
            }
            None => {}
        }

        if let Some(applied) = applied {
            if !variants.contains(applied) {
                variants.push(applied.clone());
            }
        }

        variants
    }

    async fn live_gateway(&self, directive: &RouteDirective) -> Option<NetworkAddress> {
        let command = format!(
            "ip route show {} dev {}",
            directive.target(),
            directive.device
        );
        let outcome = self.channel.run(&command).await;
        if !outcome.success {
            return None;
        }
        parse_via(&outcome.output)
    }

    /// Remove one rule's live route, stopping at the first accepted variant.
    pub async fn remove(
        &self,
        catalog: &InterfaceCatalog,
        rule: &RouteRule,
        applied: Option<&RouteDirective>,
    ) -> RemovalOutcome {
        let mut outcome = RemovalOutcome {
            sequence_number: rule.sequence_number,
            attempted: Vec::new(),
            removed: None,
            error: None,
        };

        let built = match self.directive_for(catalog, rule).await {
            Ok(built) => built,
            Err(e) => match applied {
                // Interface metadata is gone, but this session knows what it installed
                Some(applied) => BuiltDirective {
                    directive: applied.clone(),
                    vpn: self.devices.is_vpn_device(&applied.device),
                    shape: if applied.gateway.is_some() {
                        RouteShape::ViaGateway
                    } else {
                        RouteShape::DeviceOnly
                    },
                },
                None => {
                    warn!("Cannot resolve rule {}: {}", rule.sequence_number, e);
                    outcome.error = Some(e.to_string());
                    return outcome;
                }
            },
        };

        for variant in self.removal_variants(&built, applied).await {
            let result = self.channel.run(&variant.delete_command()).await;
            outcome.attempted.push(variant.clone());
            if result.success {
                info!("Removed route {}", variant);
                outcome.removed = Some(variant);
                outcome.error = None;
                return outcome;
            }
            debug!("Delete of {} failed: {}", variant, result.output);
            outcome.error = Some(result.output);
        }

        warn!(
            "No delete variant matched a live route for rule {}",
            rule.sequence_number
        );
        outcome
    }

    /// Remove several rules concurrently; returns once every attempt settled.
    pub async fn remove_all(
        &self,
        catalog: &InterfaceCatalog,
        rules: &[RouteRule],
        applied: &HashMap<u32, RouteDirective>,
    ) -> Vec<RemovalOutcome> {
        join_all(
            rules
                .iter()
                .map(|rule| self.remove(catalog, rule, applied.get(&rule.sequence_number))),
        )
        .await
    }

    /// Regenerate the whole mirror from `rules`.
    ///
    /// Rules installed this session are written as installed; others are
    /// recomputed. A rule that no longer resolves is left out.
    pub async fn persist(
        &self,
        catalog: &InterfaceCatalog,
        rules: &[RouteRule],
        applied: &HashMap<u32, RouteDirective>,
    ) -> Result<(), RouteError> {
        let mut directives = Vec::with_capacity(rules.len());
        for rule in rules {
            if let Some(directive) = applied.get(&rule.sequence_number) {
                directives.push(directive.clone());
                continue;
            }
            match self.directive_for(catalog, rule).await {
                Ok(built) => directives.push(built.directive),
                Err(e) => warn!(
                    "Leaving rule {} out of {}: {}",
                    rule.sequence_number,
                    self.mirror.rules_path().display(),
                    e
                ),
            }
        }

        self.mirror
            .write(&self.channel, &directives)
            .await
            .map_err(|e| RouteError::PersistFailure(e.to_string()))
    }
}
