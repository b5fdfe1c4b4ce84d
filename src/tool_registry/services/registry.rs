//! The unified tool namespace.

use crate::tool_registry::{
    adapters::BuiltinTools,
    domain::{
        Availability, QualifiedToolName, SourceKind, SourceName, ToolDescriptor, ToolError,
        ToolName, ToolReference, ToolRegistryDomainError, ToolSpec,
    },
    ports::{ToolHandler, ToolInvoker},
};
use chrono::TimeDelta;
use mockable::Clock;
use std::collections::{BTreeMap, BTreeSet, HashMap, btree_map};
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;

/// Discoveries closer together than this count as the same tick.
pub const DEFAULT_DISCOVERY_WINDOW: Duration = Duration::from_millis(500);

/// Errors returned by registry write operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolRegistryError {
    /// Domain validation failed.
    #[error(transparent)]
    Domain(#[from] ToolRegistryDomainError),
    /// The source was never connected or has been unregistered.
    #[error("tool source '{0}' is not registered")]
    UnknownSource(SourceName),
    /// The source is registered but currently disconnected.
    #[error("tool source '{0}' is disconnected")]
    SourceDisconnected(SourceName),
    /// The operation is not permitted on the internal source.
    #[error("tool source '{0}' is reserved for compiled-in tools")]
    ReservedSource(SourceName),
    /// A snapshot lists the same tool twice.
    #[error("tool source '{source_name}' lists tool '{tool}' more than once")]
    DuplicateTool {
        /// Offending source.
        source_name: SourceName,
        /// Repeated tool.
        tool: ToolName,
    },
}

/// Effect of one snapshot registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationDiff {
    /// Tools that are new or were rediscovered.
    pub added: Vec<QualifiedToolName>,
    /// Tools still offered, with their spec refreshed.
    pub retained: Vec<QualifiedToolName>,
    /// Tools missing from the snapshot, now unavailable.
    pub withdrawn: Vec<QualifiedToolName>,
    /// Tools missing from two consecutive snapshots, now removed.
    pub removed: Vec<QualifiedToolName>,
}

#[derive(Clone)]
struct SourceEntry {
    invoker: Arc<dyn ToolInvoker>,
    connected: bool,
    slow_marks: Arc<AtomicU64>,
}

#[derive(Clone, Default)]
struct RegistrySnapshot {
    tools: BTreeMap<QualifiedToolName, ToolDescriptor>,
    sources: BTreeMap<SourceName, SourceEntry>,
    by_name: HashMap<ToolName, Vec<QualifiedToolName>>,
}

impl RegistrySnapshot {
    fn reindex(&mut self) {
        let mut by_name: HashMap<ToolName, Vec<QualifiedToolName>> = HashMap::new();
        for qualified in self.tools.keys() {
            by_name
                .entry(qualified.tool().clone())
                .or_default()
                .push(qualified.clone());
        }
        self.by_name = by_name;
    }

    fn slow_marks(&self, source: &SourceName) -> u64 {
        self.sources
            .get(source)
            .map_or(0, |entry| entry.slow_marks.load(Ordering::Relaxed))
    }

    fn source_tools(&self, source: &SourceName) -> Vec<QualifiedToolName> {
        self.tools
            .keys()
            .filter(|qualified| qualified.source() == source)
            .cloned()
            .collect()
    }

    fn resolve_bare(
        &self,
        name: &ToolName,
        window: TimeDelta,
    ) -> Result<ToolDescriptor, ToolError> {
        let candidates: Vec<&ToolDescriptor> = self
            .by_name
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(|qualified| self.tools.get(qualified))
            .collect();
        if candidates.is_empty() {
            return Err(ToolError::NotFound(name.to_string()));
        }

        let available: Vec<&ToolDescriptor> = candidates
            .iter()
            .copied()
            .filter(|descriptor| descriptor.is_available())
            .collect();
        let pool = if available.is_empty() {
            candidates
        } else {
            available
        };
        self.pick(name, pool, window)
    }

    /// Internal beats external; among externals the most recently discovered
    /// wins, then the source with the fewest slow marks. Discoveries less than
    /// `window` apart are equally recent.
    fn pick(
        &self,
        name: &ToolName,
        pool: Vec<&ToolDescriptor>,
        window: TimeDelta,
    ) -> Result<ToolDescriptor, ToolError> {
        if let Some(internal) = pool
            .iter()
            .find(|descriptor| descriptor.source_kind() == SourceKind::Internal)
        {
            return Ok((*internal).clone());
        }

        let Some(latest) = pool.iter().map(|descriptor| descriptor.discovered_at()).max() else {
            return Err(ToolError::NotFound(name.to_string()));
        };
        let recent: Vec<&ToolDescriptor> = pool
            .into_iter()
            .filter(|descriptor| {
                let behind = latest.signed_duration_since(descriptor.discovered_at());
                behind <= TimeDelta::zero() || behind < window
            })
            .collect();
        let fewest_marks = recent
            .iter()
            .map(|descriptor| self.slow_marks(descriptor.source()))
            .min();
        let finalists: Vec<&ToolDescriptor> = recent
            .into_iter()
            .filter(|descriptor| Some(self.slow_marks(descriptor.source())) == fewest_marks)
            .collect();

        match finalists.as_slice() {
            [only] => Ok((*only).clone()),
            _ => Err(ToolError::Ambiguous {
                name: name.to_string(),
                candidates: finalists
                    .iter()
                    .map(|descriptor| descriptor.qualified_name().to_string())
                    .collect(),
            }),
        }
    }
}

/// Restartable listing over one registry snapshot.
///
/// The listing pins the snapshot it was taken from, so iterating it any
/// number of times yields the same descriptors even while the registry
/// changes.
#[derive(Clone)]
pub struct ToolListing {
    snapshot: Arc<RegistrySnapshot>,
}

impl ToolListing {
    /// Iterates descriptors in qualified-name order.
    #[must_use]
    pub fn iter(&self) -> btree_map::Values<'_, QualifiedToolName, ToolDescriptor> {
        self.snapshot.tools.values()
    }

    /// Returns the number of descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot.tools.len()
    }

    /// Returns whether the listing is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot.tools.is_empty()
    }
}

impl<'listing> IntoIterator for &'listing ToolListing {
    type Item = &'listing ToolDescriptor;
    type IntoIter = btree_map::Values<'listing, QualifiedToolName, ToolDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Registry merging compiled-in and discovered tools into one namespace.
///
/// Readers load an immutable snapshot and never wait on writers for longer
/// than a pointer swap. Writers are serialized, build the next snapshot off
/// to the side and publish it whole, so a concurrent `resolve` observes
/// either the old or the new namespace, never a mix.
pub struct ToolRegistry<C>
where
    C: Clock + Send + Sync,
{
    clock: Arc<C>,
    discovery_window: Duration,
    builtin: Arc<BuiltinTools>,
    current: RwLock<Arc<RegistrySnapshot>>,
    writer: Mutex<()>,
}

impl<C> ToolRegistry<C>
where
    C: Clock + Send + Sync,
{
    /// Creates a registry holding only the (empty) internal source.
    #[must_use]
    pub fn new(clock: Arc<C>) -> Self {
        let builtin = Arc::new(BuiltinTools::new());
        let mut snapshot = RegistrySnapshot::default();
        snapshot.sources.insert(
            SourceName::internal(),
            SourceEntry {
                invoker: Arc::clone(&builtin) as Arc<dyn ToolInvoker>,
                connected: true,
                slow_marks: Arc::new(AtomicU64::new(0)),
            },
        );
        Self {
            clock,
            discovery_window: DEFAULT_DISCOVERY_WINDOW,
            builtin,
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        }
    }

    /// Sets how close together two discoveries must be to count as the same
    /// tick when resolving a bare name.
    #[must_use]
    pub const fn with_discovery_window(mut self, window: Duration) -> Self {
        self.discovery_window = window;
        self
    }

    /// Adds or replaces a compiled-in tool.
    #[must_use = "the descriptor carries the qualified name of the registered tool"]
    pub fn register_internal(&self, handler: Arc<dyn ToolHandler>) -> ToolDescriptor {
        let spec = handler.spec().clone();
        self.builtin.insert(handler);
        let descriptor = ToolDescriptor::new(SourceName::internal(), spec, self.clock.utc());
        let published = descriptor.clone();
        let Ok(()) = self.update(move |draft| {
            draft
                .tools
                .insert(descriptor.qualified_name().clone(), descriptor);
            Ok::<_, Infallible>(())
        });
        tracing::debug!(tool = %published.qualified_name(), "internal tool registered");
        published
    }

    /// Connects (or reconnects) an external source.
    ///
    /// Tools that were unavailable only because the source disconnected
    /// become available again; withdrawn tools stay withdrawn until the next
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryError::ReservedSource`] for the internal source.
    pub fn connect_source(
        &self,
        source: SourceName,
        invoker: Arc<dyn ToolInvoker>,
    ) -> Result<(), ToolRegistryError> {
        if source.is_internal() {
            return Err(ToolRegistryError::ReservedSource(source));
        }
        self.update(|draft| {
            let slow_marks = draft.sources.get(&source).map_or_else(
                || Arc::new(AtomicU64::new(0)),
                |entry| Arc::clone(&entry.slow_marks),
            );
            draft.sources.insert(
                source.clone(),
                SourceEntry {
                    invoker,
                    connected: true,
                    slow_marks,
                },
            );
            for qualified in draft.source_tools(&source) {
                if let Some(descriptor) = draft.tools.remove(&qualified) {
                    let restored = if descriptor.availability() == Availability::Disconnected {
                        descriptor.with_availability(Availability::Available)
                    } else {
                        descriptor
                    };
                    draft.tools.insert(qualified, restored);
                }
            }
            Ok::<_, ToolRegistryError>(())
        })?;
        tracing::info!(source = %source, "tool source connected");
        Ok(())
    }

    /// Replaces the tool set of a connected external source with `specs`.
    ///
    /// New tools are added with the current discovery time, tools still
    /// offered keep theirs, tools missing for the first time are withdrawn,
    /// and tools already withdrawn and still missing are removed. An empty
    /// snapshot is valid.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryError`] when the source is internal, unknown or
    /// disconnected, or when the snapshot repeats a tool name.
    pub fn register(
        &self,
        source: &SourceName,
        specs: Vec<ToolSpec>,
    ) -> Result<RegistrationDiff, ToolRegistryError> {
        if source.is_internal() {
            return Err(ToolRegistryError::ReservedSource(source.clone()));
        }
        let mut offered = BTreeSet::new();
        for spec in &specs {
            if !offered.insert(spec.name().clone()) {
                return Err(ToolRegistryError::DuplicateTool {
                    source_name: source.clone(),
                    tool: spec.name().clone(),
                });
            }
        }

        let now = self.clock.utc();
        let diff = self.update(|draft| {
            match draft.sources.get(source) {
                None => return Err(ToolRegistryError::UnknownSource(source.clone())),
                Some(entry) if !entry.connected => {
                    return Err(ToolRegistryError::SourceDisconnected(source.clone()));
                }
                Some(_) => {}
            }

            let mut diff = RegistrationDiff::default();
            for qualified in draft.source_tools(source) {
                if offered.contains(qualified.tool()) {
                    continue;
                }
                let Some(descriptor) = draft.tools.remove(&qualified) else {
                    continue;
                };
                if descriptor.availability() == Availability::Withdrawn {
                    diff.removed.push(qualified);
                } else {
                    draft.tools.insert(
                        qualified.clone(),
                        descriptor.with_availability(Availability::Withdrawn),
                    );
                    diff.withdrawn.push(qualified);
                }
            }

            for spec in specs {
                let qualified = QualifiedToolName::new(source.clone(), spec.name().clone());
                let next = match draft.tools.remove(&qualified) {
                    Some(existing) if existing.is_available() => {
                        diff.retained.push(qualified.clone());
                        existing.with_spec(spec)
                    }
                    _ => {
                        diff.added.push(qualified.clone());
                        ToolDescriptor::new(source.clone(), spec, now)
                    }
                };
                draft.tools.insert(qualified, next);
            }
            Ok(diff)
        })?;

        tracing::debug!(
            source = %source,
            added = diff.added.len(),
            withdrawn = diff.withdrawn.len(),
            removed = diff.removed.len(),
            "tool snapshot registered"
        );
        Ok(diff)
    }

    /// Removes an external source and every tool it offered.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryError`] when the source is internal or unknown.
    pub fn unregister(
        &self,
        source: &SourceName,
    ) -> Result<Vec<QualifiedToolName>, ToolRegistryError> {
        if source.is_internal() {
            return Err(ToolRegistryError::ReservedSource(source.clone()));
        }
        let removed = self.update(|draft| {
            if draft.sources.remove(source).is_none() {
                return Err(ToolRegistryError::UnknownSource(source.clone()));
            }
            let removed = draft.source_tools(source);
            for qualified in &removed {
                draft.tools.remove(qualified);
            }
            Ok(removed)
        })?;
        tracing::info!(source = %source, tools = removed.len(), "tool source unregistered");
        Ok(removed)
    }

    /// Marks an external source disconnected; its tools become unavailable
    /// but stay registered.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryError`] when the source is internal or unknown.
    pub fn disconnect_source(&self, source: &SourceName) -> Result<usize, ToolRegistryError> {
        if source.is_internal() {
            return Err(ToolRegistryError::ReservedSource(source.clone()));
        }
        let affected = self.update(|draft| Self::disconnect_in(draft, source))?;
        tracing::info!(source = %source, tools = affected, "tool source disconnected");
        Ok(affected)
    }

    /// Disconnects every external source.
    pub fn disconnect_all(&self) {
        let sources: Vec<SourceName> = self
            .load()
            .sources
            .iter()
            .filter(|(name, entry)| entry.connected && !name.is_internal())
            .map(|(name, _)| name.clone())
            .collect();
        for source in &sources {
            if let Err(err) = self.disconnect_source(source) {
                tracing::debug!(source = %source, error = %err, "source vanished during disconnect");
            }
        }
    }

    /// Records that a call to `source` timed out.
    pub fn mark_slow(&self, source: &SourceName) {
        let snapshot = self.load();
        if let Some(entry) = snapshot.sources.get(source) {
            let marks = entry.slow_marks.fetch_add(1, Ordering::Relaxed).saturating_add(1);
            tracing::warn!(source = %source, marks, "tool source marked slow");
        }
    }

    /// Returns how many timeouts were recorded against `source`.
    #[must_use]
    pub fn slow_marks(&self, source: &SourceName) -> u64 {
        self.load().slow_marks(source)
    }

    /// Returns whether `source` is registered and connected.
    #[must_use]
    pub fn is_connected(&self, source: &SourceName) -> bool {
        self.load()
            .sources
            .get(source)
            .is_some_and(|entry| entry.connected)
    }

    /// Resolves a bare or qualified tool name.
    ///
    /// Qualified names resolve directly. Bare names prefer available tools,
    /// then the internal source, then the most recently discovered external
    /// source, then the source with the fewest slow marks.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NotFound`] when nothing matches and
    /// [`ToolError::Ambiguous`] when several sources remain tied.
    pub fn resolve(&self, name: &str) -> Result<ToolDescriptor, ToolError> {
        let reference =
            ToolReference::parse(name).map_err(|_| ToolError::NotFound(name.trim().to_owned()))?;
        let snapshot = self.load();
        let resolved = match &reference {
            ToolReference::Qualified(qualified) => snapshot
                .tools
                .get(qualified)
                .cloned()
                .ok_or_else(|| ToolError::NotFound(qualified.to_string())),
            ToolReference::Bare(bare) => snapshot.resolve_bare(
                bare,
                TimeDelta::from_std(self.discovery_window).unwrap_or(TimeDelta::MAX),
            ),
        };
        if let Ok(descriptor) = &resolved {
            tracing::debug!(tool = %reference, resolved = %descriptor.qualified_name(), "tool resolved");
        }
        resolved
    }

    /// Returns a restartable listing of every registered tool.
    #[must_use]
    pub fn list(&self) -> ToolListing {
        ToolListing {
            snapshot: self.load(),
        }
    }

    /// Returns the current descriptor of `tool` together with its source's
    /// invoker.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NotFound`] when the tool is gone and
    /// [`ToolError::SourceUnavailable`] when it cannot be called.
    pub fn binding(
        &self,
        tool: &QualifiedToolName,
    ) -> Result<(ToolDescriptor, Arc<dyn ToolInvoker>), ToolError> {
        let snapshot = self.load();
        let descriptor = snapshot
            .tools
            .get(tool)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(tool.to_string()))?;
        let reason = match descriptor.availability() {
            Availability::Available => None,
            Availability::Withdrawn => Some("withdrawn by its source"),
            Availability::Disconnected => Some("source disconnected"),
        };
        let entry = snapshot
            .sources
            .get(tool.source())
            .filter(|entry| entry.connected);
        match (reason, entry) {
            (None, Some(entry)) => Ok((descriptor, Arc::clone(&entry.invoker))),
            (unavailable, _) => Err(ToolError::SourceUnavailable {
                tool: tool.to_string(),
                reason: unavailable.unwrap_or("source disconnected").to_owned(),
            }),
        }
    }

    fn disconnect_in(
        draft: &mut RegistrySnapshot,
        source: &SourceName,
    ) -> Result<usize, ToolRegistryError> {
        let entry = draft
            .sources
            .get_mut(source)
            .ok_or_else(|| ToolRegistryError::UnknownSource(source.clone()))?;
        entry.connected = false;
        let mut affected = 0;
        for qualified in draft.source_tools(source) {
            if let Some(descriptor) = draft.tools.remove(&qualified) {
                let next = if descriptor.is_available() {
                    affected += 1;
                    descriptor.with_availability(Availability::Disconnected)
                } else {
                    descriptor
                };
                draft.tools.insert(qualified, next);
            }
        }
        Ok(affected)
    }

    fn load(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn update<T, E>(
        &self,
        change: impl FnOnce(&mut RegistrySnapshot) -> Result<T, E>,
    ) -> Result<T, E> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut draft = RegistrySnapshot::clone(&self.load());
        let outcome = change(&mut draft)?;
        draft.reindex();
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(draft);
        Ok(outcome)
    }
}
