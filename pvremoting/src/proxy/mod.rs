// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Client-side proxies and their remote mirrors.
//!
//! A [Proxy] is a handle owned by the master process standing for real objects
//! ("mirrors") living on the ranks of its location. A proxy is a type tag plus a
//! property bag; there is no proxy class hierarchy. All proxies live in the arena of a
//! [ProxyManager] and refer to each other by [ProxyId], so a back reference is
//! invalidated by setting it to [None] rather than by nulling a pointer owned
//! elsewhere.
//!
//! Property writes are batched: [ProxyManager::set_property] only updates the client
//! cache and marks the property dirty. [ProxyManager::update_vtk_objects] pushes every
//! dirty property to every location rank and clears the dirty set only if every rank
//! received it. Mirrors apply updates idempotently, so a failed update can always be
//! retried.
//!
//! ## Example
//!
//! ```rust
//! use pvremoting::{Controller, PropertyValue, ProxyManager, ProcessLayout, ServerFlags};
//!
//! // a single process hosts both the client and the servers
//! let controller = Controller::builtin();
//! let layout = ProcessLayout::classic(1);
//! let mut proxies = ProxyManager::new(layout);
//! let sphere = proxies.create_proxy(&controller, "Sphere", ServerFlags::SERVERS);
//! proxies.set_property(sphere, "Radius", 2.5).expect("Failed to set radius");
//! proxies.update_vtk_objects(&controller, sphere).expect("Failed to synchronize");
//!
//! let mirror = proxies.local_mirrors().get(sphere).expect("Missing mirror");
//! assert_eq!(Some(&PropertyValue::Number(2.5)), mirror.property("Radius"));
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use log::{debug, warn};

use crate::errors::ProxyErr;
use crate::group::{ProcessGroup, ProcessLayout, ProcessRank, ServerFlags};
use crate::protocol::{CreateMirror, DeleteMirror, PropertyEntry, UpdateMirror};
use crate::Controller;

pub mod mirror;
mod property;


pub use mirror::{Mirror, MirrorCommand, MirrorStore};
pub use property::PropertyValue;

/// The stable, globally unique identifier of a proxy
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProxyId(u64);

impl ProxyId {
    /// The raw id
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for ProxyId {
    fn from(value: u64) -> Self {
        ProxyId(value)
    }
}

impl Display for ProxyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A client-side handle on the mirrored objects of one pipeline object
#[derive(Clone, Debug)]
pub struct Proxy {
    id: ProxyId,
    type_tag: String,
    location: ServerFlags,
    ranks: ProcessGroup,
    properties: BTreeMap<String, PropertyValue>,
    dirty: BTreeSet<String>,
    /// Location ranks which never received the mirror registration
    unregistered: BTreeSet<ProcessRank>,
    reference_count: usize,
    source: Option<ProxyId>,
    representation: Option<ProxyId>,
}

impl Proxy {
    /// The proxy's id
    pub fn id(&self) -> ProxyId {
        self.id
    }

    /// The proxy's type tag
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Where the proxy's mirrors live
    pub fn location(&self) -> ServerFlags {
        self.location
    }

    /// The ranks hosting a mirror
    pub fn ranks(&self) -> &ProcessGroup {
        &self.ranks
    }

    /// The cached value of a property
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// The names of the properties set since the last successful synchronization
    pub fn dirty_properties(&self) -> impl Iterator<Item = &str> + '_ {
        self.dirty.iter().map(String::as_str)
    }

    /// Does the proxy have unsynchronized changes
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty() || !self.unregistered.is_empty()
    }

    /// Number of property values of live proxies referencing this proxy
    pub fn reference_count(&self) -> usize {
        self.reference_count
    }

    fn registered_ranks(&self) -> Vec<ProcessRank> {
        self.ranks
            .iter()
            .filter(|rank| !self.unregistered.contains(rank))
            .collect()
    }
}

/// Send `command` to every rank of `targets`, applying it to `local` for the calling
/// process's own rank. Returns the ranks which could not be reached.
fn deliver<I>(
    controller: &Controller,
    local: &mut MirrorStore,
    targets: I,
    command: &MirrorCommand,
) -> Vec<ProcessRank>
where
    I: IntoIterator<Item = ProcessRank>,
{
    let payload = command.encode();
    let mut failed = Vec::new();
    for rank in targets {
        let result = if rank == controller.rank() {
            local.apply(command.clone())
        } else {
            controller.trigger_rmi(rank, command.tag(), payload.clone())
        };
        if let Err(err) = result {
            warn!("Mirror command {} to rank {rank} failed: {err}", command.tag());
            failed.push(rank);
        }
    }
    failed
}

/// The master's arena of proxies
#[derive(Debug)]
pub struct ProxyManager {
    layout: ProcessLayout,
    proxies: BTreeMap<ProxyId, Proxy>,
    next_id: u64,
    local: MirrorStore,
}

impl ProxyManager {
    /// An empty manager placing proxies according to `layout`
    pub fn new(layout: ProcessLayout) -> Self {
        Self {
            layout,
            proxies: BTreeMap::new(),
            next_id: 1,
            local: MirrorStore::new(),
        }
    }

    /// The process layout proxy locations resolve against
    pub fn layout(&self) -> &ProcessLayout {
        &self.layout
    }

    /// The mirrors hosted by the master process itself (e.g. [ServerFlags::CLIENT])
    pub fn local_mirrors(&self) -> &MirrorStore {
        &self.local
    }

    /// A live proxy
    pub fn proxy(&self, id: ProxyId) -> Option<&Proxy> {
        self.proxies.get(&id)
    }

    /// The ids of every live proxy, ascending
    pub fn ids(&self) -> impl Iterator<Item = ProxyId> + '_ {
        self.proxies.keys().copied()
    }

    /// Number of live proxies
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// Are there no live proxies
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    fn get(&self, id: ProxyId) -> Result<&Proxy, ProxyErr> {
        self.proxies.get(&id).ok_or(ProxyErr::UnknownProxy(id))
    }

    fn get_mut(&mut self, id: ProxyId) -> Result<&mut Proxy, ProxyErr> {
        self.proxies.get_mut(&id).ok_or(ProxyErr::UnknownProxy(id))
    }

    /// Create a proxy of type `type_tag` whose mirrors live at `location`, and
    /// register it with every rank of the location.
    ///
    /// Ranks which cannot be reached do not fail the creation: their registration is
    /// retried by the next [ProxyManager::update_vtk_objects].
    pub fn create_proxy(
        &mut self,
        controller: &Controller,
        type_tag: &str,
        location: ServerFlags,
    ) -> ProxyId {
        let id = ProxyId(self.next_id);
        self.next_id += 1;
        let ranks = self.layout.resolve(location);

        let command = MirrorCommand::Create(CreateMirror {
            id: id.get(),
            type_tag: type_tag.to_string(),
        });
        let unregistered = deliver(controller, &mut self.local, ranks.iter(), &command);
        if unregistered.is_empty() {
            debug!("Created proxy {id} '{type_tag}' on ranks {ranks:?}");
        } else {
            warn!("Proxy {id} could not be registered on ranks {unregistered:?}, deferring");
        }

        self.proxies.insert(
            id,
            Proxy {
                id,
                type_tag: type_tag.to_string(),
                location,
                ranks,
                properties: BTreeMap::new(),
                dirty: BTreeSet::new(),
                unregistered: unregistered.into_iter().collect(),
                reference_count: 0,
                source: None,
                representation: None,
            },
        );
        id
    }

    /// Store `value` in the proxy's cache and mark `name` dirty. Nothing is sent until
    /// [ProxyManager::update_vtk_objects].
    ///
    /// A value referencing proxies takes a reference on each of them and releases the
    /// references held by the value it replaces.
    pub fn set_property<V>(&mut self, id: ProxyId, name: &str, value: V) -> Result<(), ProxyErr>
    where
        V: Into<PropertyValue>,
    {
        let value = value.into();
        self.get(id)?;
        for referent in value.referenced_proxies() {
            if *referent == id {
                return Err(ProxyErr::SelfReference(id));
            }
            self.get(*referent)?;
        }

        for referent in value.referenced_proxies() {
            self.get_mut(*referent)?.reference_count += 1;
        }
        let proxy = self.get_mut(id)?;
        proxy.dirty.insert(name.to_string());
        let previous = proxy.properties.insert(name.to_string(), value);
        if let Some(previous) = previous {
            self.release(previous.referenced_proxies());
        }
        Ok(())
    }

    fn release(&mut self, referents: &[ProxyId]) {
        for referent in referents {
            if let Some(proxy) = self.proxies.get_mut(referent) {
                proxy.reference_count = proxy.reference_count.saturating_sub(1);
            }
        }
    }

    /// Read a property from the client cache. This is not a round trip to the servers.
    pub fn get_property(
        &self,
        id: ProxyId,
        name: &str,
    ) -> Result<Option<&PropertyValue>, ProxyErr> {
        Ok(self.get(id)?.property(name))
    }

    /// Push every dirty property of the proxy to every rank of its location.
    ///
    /// Deferred registrations are retried first. The dirty set is cleared only if every
    /// rank received the update; otherwise [ProxyErr::SynchronizationFailed] names the
    /// unreachable ranks and the dirty set is kept so a retry resends the same
    /// properties. A proxy without changes sends nothing.
    pub fn update_vtk_objects(
        &mut self,
        controller: &Controller,
        id: ProxyId,
    ) -> Result<(), ProxyErr> {
        let proxy = self
            .proxies
            .get_mut(&id)
            .ok_or(ProxyErr::UnknownProxy(id))?;

        if !proxy.unregistered.is_empty() {
            let command = MirrorCommand::Create(CreateMirror {
                id: id.get(),
                type_tag: proxy.type_tag.clone(),
            });
            let retry = proxy.unregistered.iter().copied().collect::<Vec<_>>();
            let still_unregistered = deliver(controller, &mut self.local, retry, &command);
            proxy.unregistered = still_unregistered.into_iter().collect();
        }

        let mut unreachable = Vec::new();
        if !proxy.dirty.is_empty() {
            let properties = proxy
                .dirty
                .iter()
                .filter_map(|name| {
                    proxy.properties.get(name).map(|value| PropertyEntry {
                        name: name.clone(),
                        value: Some(value.to_message()),
                    })
                })
                .collect();
            let command = MirrorCommand::Update(UpdateMirror {
                id: id.get(),
                properties,
            });
            unreachable = deliver(
                controller,
                &mut self.local,
                proxy.registered_ranks(),
                &command,
            );
        }
        unreachable.extend(proxy.unregistered.iter().copied());
        unreachable.sort_unstable();
        unreachable.dedup();

        if unreachable.is_empty() {
            if !proxy.dirty.is_empty() {
                debug!(
                    "Proxy {id} synchronized {} properties",
                    proxy.dirty.len()
                );
                proxy.dirty.clear();
            }
            Ok(())
        } else {
            warn!("Proxy {id} failed to synchronize with ranks {unreachable:?}");
            Err(ProxyErr::SynchronizationFailed {
                proxy: id,
                unreachable,
            })
        }
    }

    /// The live proxies holding a property value which references `id`
    pub fn referrers(&self, id: ProxyId) -> Vec<ProxyId> {
        self.proxies
            .values()
            .filter(|proxy| {
                proxy
                    .properties
                    .values()
                    .any(|value| value.referenced_proxies().contains(&id))
            })
            .map(|proxy| proxy.id)
            .collect()
    }

    /// Delete a proxy and tell every rank of its location to drop the mirror.
    ///
    /// Refused with [ProxyErr::StillReferenced] while another live proxy references
    /// it. If a rank cannot be reached, the proxy stays alive and the deletion can be
    /// retried. On success the references held by the proxy's properties are released
    /// and its source/representation partner's back reference is set to [None].
    pub fn delete_proxy(&mut self, controller: &Controller, id: ProxyId) -> Result<(), ProxyErr> {
        let proxy = self.get(id)?;
        if proxy.reference_count > 0 {
            return Err(ProxyErr::StillReferenced {
                proxy: id,
                referrers: self.referrers(id),
            });
        }

        let command = MirrorCommand::Delete(DeleteMirror { id: id.get() });
        let targets = proxy.registered_ranks();
        let unreachable = deliver(controller, &mut self.local, targets, &command);
        if !unreachable.is_empty() {
            warn!("Proxy {id} could not be deleted on ranks {unreachable:?}");
            return Err(ProxyErr::SynchronizationFailed {
                proxy: id,
                unreachable,
            });
        }

        let proxy = self.proxies.remove(&id).ok_or(ProxyErr::UnknownProxy(id))?;
        if let Some(source) = proxy.source.and_then(|s| self.proxies.get_mut(&s)) {
            source.representation = None;
        }
        if let Some(representation) = proxy.representation.and_then(|r| self.proxies.get_mut(&r)) {
            representation.source = None;
        }
        for value in proxy.properties.values() {
            self.release(value.referenced_proxies());
        }
        debug!("Deleted proxy {id}");
        Ok(())
    }

    /// Link a data representation to its source, both ways. Any previous partner of
    /// either side has its back reference set to [None] first.
    pub fn link_representation(
        &mut self,
        source: ProxyId,
        representation: ProxyId,
    ) -> Result<(), ProxyErr> {
        if source == representation {
            return Err(ProxyErr::SelfReference(source));
        }
        let old_representation = self.get(source)?.representation;
        let old_source = self.get(representation)?.source;

        if let Some(old) = old_representation.and_then(|r| self.proxies.get_mut(&r)) {
            old.source = None;
        }
        if let Some(old) = old_source.and_then(|s| self.proxies.get_mut(&s)) {
            old.representation = None;
        }
        self.get_mut(source)?.representation = Some(representation);
        self.get_mut(representation)?.source = Some(source);
        Ok(())
    }

    /// Break the link of a source with its representation, returning the former
    /// representation
    pub fn unlink_representation(&mut self, source: ProxyId) -> Result<Option<ProxyId>, ProxyErr> {
        let representation = self.get_mut(source)?.representation.take();
        if let Some(partner) = representation.and_then(|r| self.proxies.get_mut(&r)) {
            partner.source = None;
        }
        Ok(representation)
    }

    /// The source a representation displays
    pub fn source_of(&self, representation: ProxyId) -> Option<ProxyId> {
        self.proxies.get(&representation).and_then(|p| p.source)
    }

    /// The representation displaying a source
    pub fn representation_of(&self, source: ProxyId) -> Option<ProxyId> {
        self.proxies.get(&source).and_then(|p| p.representation)
    }
}
