//! Routing table model
//!
//! The configured rule list plus its CRUD operations. Every mutation runs
//! one chain (validate, apply live, update rules, rewrite mirror) against a
//! single catalog snapshot, and only one chain runs at a time.

use crate::catalog::{InterfaceCatalog, SystemInfoSource};
use crate::platform::CommandChannel;
use crate::routing::{RemovalOutcome, RouteDirective, RouteEngine, RouteError, RouteForm, RouteRule};
use crate::state::RouteState;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Set while a mutation chain is in flight. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct BusyFlag(Arc<AtomicBool>);

impl BusyFlag {
    pub fn acquire(&self) -> Result<BusyGuard, RouteError> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RouteError::Busy)?;
        Ok(BusyGuard(self.0.clone()))
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Clears the busy flag on drop
#[derive(Debug)]
pub struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Result of a successful add or update
#[derive(Debug)]
pub struct MutationOutcome {
    pub rule: RouteRule,
    pub directive: RouteDirective,
    /// The live route changed but the mirror could not be rewritten
    pub persist_warning: Option<RouteError>,
}

/// Result of a delete, bulk delete or clear
#[derive(Debug, Default)]
pub struct RemovalSummary {
    pub outcomes: Vec<RemovalOutcome>,
    pub persist_warning: Option<RouteError>,
}

impl RemovalSummary {
    pub fn removed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.removed()
    }
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub installed: Vec<u32>,
    pub failed: Vec<(u32, RouteError)>,
    pub persist_warning: Option<RouteError>,
}

pub struct RoutingTable<S, C> {
    source: S,
    engine: RouteEngine<C>,
    catalog: Option<Arc<InterfaceCatalog>>,
    rules: Vec<RouteRule>,
    /// Directives installed by this session, by sequence number
    applied: HashMap<u32, RouteDirective>,
    last_sequence: u32,
    busy: BusyFlag,
}

impl<S: SystemInfoSource, C: CommandChannel> RoutingTable<S, C> {
    pub fn new(source: S, engine: RouteEngine<C>) -> Self {
        Self {
            source,
            engine,
            catalog: None,
            rules: Vec::new(),
            applied: HashMap::new(),
            last_sequence: 0,
            busy: BusyFlag::default(),
        }
    }

    /// Start from a previously saved rule set.
    pub fn with_rules(mut self, rules: Vec<RouteRule>) -> Self {
        self.last_sequence = rules.iter().map(|r| r.sequence_number).max().unwrap_or(0);
        self.rules = rules;
        self
    }

    pub fn engine(&self) -> &RouteEngine<C> {
        &self.engine
    }

    /// Rebuild the interface catalog. Mutations already holding the old
    /// snapshot keep using it.
    pub async fn refresh_catalog(&mut self) -> Arc<InterfaceCatalog> {
        let catalog = Arc::new(
            InterfaceCatalog::discover(&self.source, self.engine.channel(), self.engine.devices())
                .await,
        );
        self.catalog = Some(catalog.clone());
        catalog
    }

    pub fn catalog(&self) -> Option<Arc<InterfaceCatalog>> {
        self.catalog.clone()
    }

    /// True until the first catalog refresh completes
    pub fn is_loading(&self) -> bool {
        self.catalog.is_none()
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    pub fn rule(&self, sequence_number: u32) -> Option<&RouteRule> {
        self.rules
            .iter()
            .find(|rule| rule.sequence_number == sequence_number)
    }

    pub fn busy_flag(&self) -> BusyFlag {
        self.busy.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.is_set()
    }

    pub fn next_sequence_number(&self) -> u32 {
        let highest = self.rules.iter().map(|r| r.sequence_number).max().unwrap_or(0);
        highest.max(self.last_sequence) + 1
    }

    /// Refresh the catalog and return a blank form with LAN 1 preselected.
    pub async fn open_add_form(&mut self) -> RouteForm {
        let catalog = self.refresh_catalog().await;
        RouteForm::blank(&catalog)
    }

    /// Refresh the catalog and return the rule's current values.
    pub async fn open_edit_form(&mut self, sequence_number: u32) -> Result<RouteForm, RouteError> {
        let form = self
            .rule(sequence_number)
            .map(RouteRule::to_form)
            .ok_or(RouteError::UnknownRule(sequence_number))?;
        self.refresh_catalog().await;
        Ok(form)
    }

    fn snapshot(&self) -> Result<Arc<InterfaceCatalog>, RouteError> {
        self.catalog.clone().ok_or(RouteError::CatalogUnavailable)
    }

    async fn persist(&self, catalog: &InterfaceCatalog) -> Option<RouteError> {
        match self.engine.persist(catalog, &self.rules, &self.applied).await {
            Ok(()) => None,
            Err(e) => {
                warn!("{}", e);
                Some(e)
            }
        }
    }

    /// Write the rule set to the rule store.
    ///
    /// Runs after a mutation already changed the live table, so a failure
    /// is returned as a warning rather than an error.
    pub fn save_state(&self, path: &Path) -> Option<RouteError> {
        match RouteState::new(self.rules.clone()).save(path) {
            Ok(()) => {
                info!("Saved rule set to {}", path.display());
                None
            }
            Err(e) => Some(RouteError::StateNotSaved(e.to_string())),
        }
    }

    /// The rule, other than `except`, whose route resolves to `directive`
    async fn rule_routing(
        &self,
        catalog: &InterfaceCatalog,
        directive: &RouteDirective,
        except: Option<u32>,
    ) -> Option<RouteRule> {
        for rule in &self.rules {
            if Some(rule.sequence_number) == except {
                continue;
            }
            let matches = match self.applied.get(&rule.sequence_number) {
                Some(applied) => applied == directive,
                None => self
                    .engine
                    .directive_for(catalog, rule)
                    .await
                    .is_ok_and(|built| built.directive == *directive),
            };
            if matches {
                return Some(rule.clone());
            }
        }
        None
    }

    pub async fn add(&mut self, form: &RouteForm) -> Result<MutationOutcome, RouteError> {
        let _guard = self.busy.acquire()?;
        let catalog = self.snapshot()?;

        let directive = self.engine.apply(&catalog, form).await?;

        // The same live route never gets a second rule
        if let Some(existing) = self.rule_routing(&catalog, &directive, None).await {
            info!("Rule {} already routes {}", existing.sequence_number, directive);
            self.applied.insert(existing.sequence_number, directive.clone());
            let persist_warning = self.persist(&catalog).await;
            return Ok(MutationOutcome {
                rule: existing,
                directive,
                persist_warning,
            });
        }

        let rule = RouteRule::from_form(self.next_sequence_number(), form);
        self.last_sequence = rule.sequence_number;
        self.rules.push(rule.clone());
        self.applied.insert(rule.sequence_number, directive.clone());
        info!("Added rule {}: {}", rule.sequence_number, directive);

        let persist_warning = self.persist(&catalog).await;
        Ok(MutationOutcome {
            rule,
            directive,
            persist_warning,
        })
    }

    /// Replace a rule, keeping its sequence number.
    ///
    /// The new route is planned before the old one is touched. If the new
    /// route cannot be installed, the old route is put back and the rule
    /// set is left as it was.
    pub async fn update(
        &mut self,
        sequence_number: u32,
        form: &RouteForm,
    ) -> Result<MutationOutcome, RouteError> {
        let _guard = self.busy.acquire()?;
        let catalog = self.snapshot()?;
        let index = self
            .rules
            .iter()
            .position(|rule| rule.sequence_number == sequence_number)
            .ok_or(RouteError::UnknownRule(sequence_number))?;

        let built = self.engine.plan(&catalog, form).await?;
        if let Some(other) = self
            .rule_routing(&catalog, &built.directive, Some(sequence_number))
            .await
        {
            return Err(RouteError::InvalidInput(format!(
                "{} is already configured as rule {}",
                built.directive, other.sequence_number
            )));
        }

        let previous = &self.rules[index];
        let removal = self
            .engine
            .remove(&catalog, previous, self.applied.get(&sequence_number))
            .await;

        if let Err(e) = self.engine.install(&built.directive).await {
            if let Some(old) = &removal.removed {
                if self.engine.install(old).await.is_err() {
                    warn!("Could not restore previous route {}", old);
                }
            }
            return Err(e);
        }

        let rule = RouteRule::from_form(sequence_number, form);
        self.rules[index] = rule.clone();
        self.applied.insert(sequence_number, built.directive.clone());
        info!("Updated rule {}: {}", sequence_number, built.directive);

        let persist_warning = self.persist(&catalog).await;
        Ok(MutationOutcome {
            rule,
            directive: built.directive,
            persist_warning,
        })
    }

    pub async fn delete(&mut self, sequence_number: u32) -> Result<RemovalSummary, RouteError> {
        self.delete_many(&[sequence_number]).await
    }

    /// Remove several rules. Unknown sequence numbers reject the whole call.
    ///
    /// Removals run concurrently; the rules are dropped and the mirror
    /// rewritten once every attempt has settled, whether or not it found
    /// a live route.
    pub async fn delete_many(
        &mut self,
        sequence_numbers: &[u32],
    ) -> Result<RemovalSummary, RouteError> {
        let _guard = self.busy.acquire()?;
        if let Some(missing) = sequence_numbers.iter().find(|seq| self.rule(**seq).is_none()) {
            return Err(RouteError::UnknownRule(*missing));
        }
        let targets: Vec<RouteRule> = self
            .rules
            .iter()
            .filter(|rule| sequence_numbers.contains(&rule.sequence_number))
            .cloned()
            .collect();
        Ok(self.remove_rules(targets).await)
    }

    /// Remove every rule and leave an empty mirror.
    pub async fn clear_all(&mut self) -> Result<RemovalSummary, RouteError> {
        let _guard = self.busy.acquire()?;
        let targets = self.rules.clone();
        Ok(self.remove_rules(targets).await)
    }

    async fn remove_rules(&mut self, targets: Vec<RouteRule>) -> RemovalSummary {
        // Stale labels still resolve through device heuristics
        let catalog = self.catalog.clone().unwrap_or_default();

        let outcomes = self
            .engine
            .remove_all(&catalog, &targets, &self.applied)
            .await;

        for rule in &targets {
            self.applied.remove(&rule.sequence_number);
        }
        self.rules
            .retain(|rule| !targets.iter().any(|t| t.sequence_number == rule.sequence_number));

        let summary = RemovalSummary {
            outcomes,
            persist_warning: self.persist(&catalog).await,
        };
        info!(
            "Removed {} rules ({} live routes deleted, {} not found)",
            targets.len(),
            summary.removed(),
            summary.failed()
        );
        summary
    }

    /// Re-install every rule and rewrite the mirror.
    pub async fn sync(&mut self) -> Result<SyncReport, RouteError> {
        let _guard = self.busy.acquire()?;
        let catalog = self.snapshot()?;
        let mut report = SyncReport::default();

        for rule in &self.rules {
            let result = match self.engine.directive_for(&catalog, rule).await {
                Ok(built) => self
                    .engine
                    .install(&built.directive)
                    .await
                    .map(|()| built.directive),
                Err(e) => Err(e),
            };
            match result {
                Ok(directive) => {
                    debug!("Synced rule {}", rule.sequence_number);
                    self.applied.insert(rule.sequence_number, directive);
                    report.installed.push(rule.sequence_number);
                }
                Err(e) => {
                    warn!("Rule {} not installed: {}", rule.sequence_number, e);
                    report.failed.push((rule.sequence_number, e));
                }
            }
        }

        report.persist_warning = self.persist(&catalog).await;
        Ok(report)
    }
}
