// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Information about the plugins loaded on each process, and validation that the
//! plugins required across processes are loaded everywhere they need to be.
//!
//! A [PluginsInformation] collects the [PluginRecord]s of one process. Collections of
//! different processes are merged by name: a plugin is loaded if it is loaded on
//! either side, and its auto-load flag is kept from the receiving side unless the
//! other side force-set it (see [PluginsInformation::set_auto_load_and_force]).
//! Merging is a pure function of its inputs and can be recomputed on any process.
//!
//! ## Example
//!
//! ```rust
//! use pvremoting::{PluginRecord, PluginsInformation};
//!
//! let mut thickness = PluginRecord::new("Thickness", "/plugins/libThickness.so");
//! thickness.loaded = true;
//! thickness.required_on_client = true;
//!
//! let mut server = PluginsInformation::new();
//! server.push(thickness);
//! let mut client = PluginsInformation::new();
//!
//! assert!(!PluginsInformation::validate_requirements(&mut client, &mut server));
//! assert_eq!(
//!     "Must be loaded on Client as well",
//!     server.find("Thickness").unwrap().status_message
//! );
//! ```

use std::collections::BTreeSet;

use bytes::Bytes;
use prost::Message;

use crate::errors::ControllerErr;
use crate::protocol::{PluginRecordMessage, PluginsInformationMessage};

#[cfg(test)]
mod tests;

/// Information about one plugin
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PluginRecord {
    /// Plugin name, unique within a collection
    pub name: String,
    /// Path of the plugin library
    pub file_name: String,
    /// Plugin version
    pub version: String,
    /// Is the plugin loaded
    pub loaded: bool,
    /// Must the plugin also be loaded on the client
    pub required_on_client: bool,
    /// Must the plugin also be loaded on the server
    pub required_on_server: bool,
    /// Plugins which must be loaded alongside this one, on the same side
    pub required_plugins: Vec<String>,
    /// Free-text description
    pub description: String,
    /// Should the plugin be loaded on startup
    pub auto_load: bool,
    /// Unmet requirements, empty when satisfied
    pub status_message: String,
    /// Set locally by [PluginsInformation::set_auto_load_and_force]. Never serialized.
    auto_load_forced: bool,
}

impl PluginRecord {
    /// An unloaded plugin with no requirements
    pub fn new(name: &str, file_name: &str) -> Self {
        Self {
            name: name.to_string(),
            file_name: file_name.to_string(),
            ..Default::default()
        }
    }

    /// Was the auto-load flag explicitly forced on this process
    pub fn is_auto_load_forced(&self) -> bool {
        self.auto_load_forced
    }

    fn to_message(&self) -> PluginRecordMessage {
        PluginRecordMessage {
            name: self.name.clone(),
            file_name: self.file_name.clone(),
            version: self.version.clone(),
            loaded: self.loaded,
            required_on_client: self.required_on_client,
            required_on_server: self.required_on_server,
            required_plugins: self.required_plugins.clone(),
            description: self.description.clone(),
            auto_load: self.auto_load,
            status_message: self.status_message.clone(),
        }
    }

    fn from_message(message: PluginRecordMessage) -> Self {
        Self {
            name: message.name,
            file_name: message.file_name,
            version: message.version,
            loaded: message.loaded,
            required_on_client: message.required_on_client,
            required_on_server: message.required_on_server,
            required_plugins: message.required_plugins,
            description: message.description,
            auto_load: message.auto_load,
            status_message: message.status_message,
            auto_load_forced: false,
        }
    }

    /// Merge `other`, describing the same plugin, into this record
    fn merge_from(&mut self, other: &PluginRecord) {
        if other.loaded && !self.loaded {
            let auto_load = self.auto_load;
            let forced = self.auto_load_forced;
            *self = other.clone();
            self.auto_load = auto_load;
            self.auto_load_forced = forced;
        }
        if other.auto_load_forced && !self.auto_load_forced {
            self.auto_load = other.auto_load;
        }
        self.auto_load_forced |= other.auto_load_forced;
    }
}

/// The plugins of a process (or the merge of several processes)
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PluginsInformation {
    plugins: Vec<PluginRecord>,
    search_paths: String,
}

impl PluginsInformation {
    /// An empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty collection with plugin search paths
    pub fn with_search_paths(search_paths: &str) -> Self {
        Self {
            plugins: vec![],
            search_paths: search_paths.to_string(),
        }
    }

    /// The plugin search paths
    pub fn search_paths(&self) -> &str {
        &self.search_paths
    }

    /// Add a plugin, replacing the record of the same name if there is one
    pub fn push(&mut self, record: PluginRecord) {
        match self.plugins.iter_mut().find(|p| p.name == record.name) {
            Some(existing) => *existing = record,
            None => self.plugins.push(record),
        }
    }

    /// Number of plugins
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Is the collection empty
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Iterate the plugins
    pub fn iter(&self) -> impl Iterator<Item = &PluginRecord> + '_ {
        self.plugins.iter()
    }

    /// The plugin at `index`
    pub fn get(&self, index: usize) -> Option<&PluginRecord> {
        self.plugins.get(index)
    }

    /// The plugin named `name`
    pub fn find(&self, name: &str) -> Option<&PluginRecord> {
        self.plugins.iter().find(|p| p.name == name)
    }

    /// Set the status message of the plugin at `index`. Returns false if there is no
    /// such plugin.
    pub fn set_status_message(&mut self, index: usize, message: &str) -> bool {
        match self.plugins.get_mut(index) {
            Some(plugin) => {
                plugin.status_message = message.to_string();
                true
            }
            None => false,
        }
    }

    /// Set the auto-load flag of the plugin at `index`. A later merge may override it.
    pub fn set_auto_load(&mut self, index: usize, auto_load: bool) -> bool {
        match self.plugins.get_mut(index) {
            Some(plugin) => {
                plugin.auto_load = auto_load;
                true
            }
            None => false,
        }
    }

    /// Set the auto-load flag of the plugin at `index` and pin it: merges with
    /// information from other processes keep this value. The pin is local to this
    /// process and never serialized.
    pub fn set_auto_load_and_force(&mut self, index: usize, auto_load: bool) -> bool {
        match self.plugins.get_mut(index) {
            Some(plugin) => {
                plugin.auto_load = auto_load;
                plugin.auto_load_forced = true;
                true
            }
            None => false,
        }
    }

    /// Merge another collection into this one. Plugins are unioned by name; this
    /// collection's plugins keep their order and new ones are appended.
    pub fn add_information(&mut self, other: &PluginsInformation) {
        for record in other.plugins.iter() {
            match self.plugins.iter_mut().find(|p| p.name == record.name) {
                Some(existing) => existing.merge_from(record),
                None => self.plugins.push(record.clone()),
            }
        }
        if self.search_paths.is_empty() {
            self.search_paths = other.search_paths.clone();
        }
    }

    /// The merge of two collections, see [PluginsInformation::add_information]
    pub fn merge(a: &PluginsInformation, b: &PluginsInformation) -> PluginsInformation {
        let mut merged = a.clone();
        merged.add_information(b);
        merged
    }

    /// Replace this collection's records with `other`'s, keeping the auto-load state
    /// of the plugins already known here
    pub fn update(&mut self, other: &PluginsInformation) {
        for record in other.plugins.iter() {
            match self.plugins.iter_mut().find(|p| p.name == record.name) {
                Some(existing) => {
                    let auto_load = existing.auto_load;
                    let forced = existing.auto_load_forced;
                    *existing = record.clone();
                    existing.auto_load = auto_load;
                    existing.auto_load_forced = forced;
                }
                None => self.plugins.push(record.clone()),
            }
        }
        self.search_paths = other.search_paths.clone();
    }

    /// Serialize the collection
    pub fn copy_to_stream(&self) -> Bytes {
        let message = PluginsInformationMessage {
            search_paths: self.search_paths.clone(),
            plugins: self.plugins.iter().map(PluginRecord::to_message).collect(),
        };
        Bytes::from(message.encode_to_vec())
    }

    /// Deserialize a collection written by [PluginsInformation::copy_to_stream]
    pub fn copy_from_stream(buf: &[u8]) -> Result<Self, ControllerErr> {
        let message = PluginsInformationMessage::decode(buf)?;
        Ok(Self {
            plugins: message
                .plugins
                .into_iter()
                .map(PluginRecord::from_message)
                .collect(),
            search_paths: message.search_paths,
        })
    }

    fn loaded_names(&self) -> BTreeSet<String> {
        self.plugins
            .iter()
            .filter(|p| p.loaded)
            .map(|p| p.name.clone())
            .collect()
    }

    /// Check that the requirements of the loaded plugins are met across the client
    /// and the server, and record the outcome in every loaded plugin's status message
    /// (empty when satisfied).
    ///
    /// A loaded server plugin required on the client must be loaded on the client,
    /// and symmetrically. Every plugin named in a loaded plugin's required plugins must
    /// be loaded on the same side. Returns whether every requirement is met.
    pub fn validate_requirements(
        client: &mut PluginsInformation,
        server: &mut PluginsInformation,
    ) -> bool {
        let client_loaded = client.loaded_names();
        let server_loaded = server.loaded_names();
        let server_ok = Self::validate_side(server, &server_loaded, &client_loaded, Side::Server);
        let client_ok = Self::validate_side(client, &client_loaded, &server_loaded, Side::Client);
        server_ok && client_ok
    }

    fn validate_side(
        plugins: &mut PluginsInformation,
        same_side: &BTreeSet<String>,
        other_side: &BTreeSet<String>,
        side: Side,
    ) -> bool {
        let mut satisfied = true;
        for plugin in plugins.plugins.iter_mut().filter(|p| p.loaded) {
            let mut problems = vec![];
            let required_on_other = match side {
                Side::Server => plugin.required_on_client,
                Side::Client => plugin.required_on_server,
            };
            if required_on_other && !other_side.contains(&plugin.name) {
                problems.push(format!("Must be loaded on {} as well", side.other()));
            }
            for required in plugin.required_plugins.iter() {
                if !same_side.contains(required) {
                    problems.push(format!("Required plugin '{required}' is not loaded on {side}"));
                }
            }
            satisfied &= problems.is_empty();
            plugin.status_message = problems.join("; ");
        }
        satisfied
    }
}

#[derive(Clone, Copy)]
enum Side {
    Client,
    Server,
}

impl Side {
    fn other(self) -> Side {
        match self {
            Side::Client => Side::Server,
            Side::Server => Side::Client,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Client => write!(f, "Client"),
            Side::Server => write!(f, "Server"),
        }
    }
}
