// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Server-side mirrors of client proxies.
//!
//! Every process hosting proxies keeps a [MirrorStore]. Mirror commands are applied
//! idempotently: creating an existing mirror, deleting a missing one or re-applying a
//! property value already held leaves the store unchanged.

use std::collections::BTreeMap;

use bytes::Bytes;
use log::{debug, warn};
use prost::Message;

use super::{PropertyValue, ProxyId};
use crate::controller::rmi::{
    RmiOperation, RmiTag, CREATE_MIRROR_RMI_TAG, DELETE_MIRROR_RMI_TAG, UPDATE_MIRROR_RMI_TAG,
};
use crate::errors::ControllerErr;
use crate::protocol::{CreateMirror, DeleteMirror, UpdateMirror};

/// A command sent from a proxy to its mirrors
#[derive(Clone, Debug, PartialEq)]
pub enum MirrorCommand {
    /// Register a mirror
    Create(CreateMirror),
    /// Apply property values
    Update(UpdateMirror),
    /// Drop a mirror
    Delete(DeleteMirror),
}

impl MirrorCommand {
    /// The RMI tag carrying this command
    pub fn tag(&self) -> RmiTag {
        match self {
            Self::Create(_) => CREATE_MIRROR_RMI_TAG,
            Self::Update(_) => UPDATE_MIRROR_RMI_TAG,
            Self::Delete(_) => DELETE_MIRROR_RMI_TAG,
        }
    }

    /// Encode the command as an RMI payload
    pub fn encode(&self) -> Bytes {
        let encoded = match self {
            Self::Create(create) => create.encode_to_vec(),
            Self::Update(update) => update.encode_to_vec(),
            Self::Delete(delete) => delete.encode_to_vec(),
        };
        Bytes::from(encoded)
    }

    /// Decode the payload of a mirror RMI. [None] if `operation` is not a mirror
    /// operation.
    pub fn decode(operation: RmiOperation, payload: &[u8]) -> Result<Option<Self>, ControllerErr> {
        let command = match operation {
            RmiOperation::CreateMirror => Self::Create(CreateMirror::decode(payload)?),
            RmiOperation::UpdateMirror => Self::Update(UpdateMirror::decode(payload)?),
            RmiOperation::DeleteMirror => Self::Delete(DeleteMirror::decode(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(command))
    }
}

/// The server-side object mirroring a proxy
#[derive(Clone, Debug, PartialEq)]
pub struct Mirror {
    type_tag: String,
    properties: BTreeMap<String, PropertyValue>,
    modifications: u64,
}

impl Mirror {
    /// The mirrored proxy's type tag
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// The value of a property, if it was ever set
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// Every property value held by the mirror
    pub fn properties(&self) -> &BTreeMap<String, PropertyValue> {
        &self.properties
    }

    /// Number of property writes which changed a value
    pub fn modifications(&self) -> u64 {
        self.modifications
    }
}

/// The mirrors living on one process
#[derive(Clone, Debug, Default)]
pub struct MirrorStore {
    mirrors: BTreeMap<ProxyId, Mirror>,
}

impl MirrorStore {
    /// An empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// The mirror of proxy `id`
    pub fn get(&self, id: ProxyId) -> Option<&Mirror> {
        self.mirrors.get(&id)
    }

    /// Is there a mirror of proxy `id`
    pub fn contains(&self, id: ProxyId) -> bool {
        self.mirrors.contains_key(&id)
    }

    /// Number of mirrors
    pub fn len(&self) -> usize {
        self.mirrors.len()
    }

    /// Is the store empty
    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }

    /// Apply a mirror command
    pub fn apply(&mut self, command: MirrorCommand) -> Result<(), ControllerErr> {
        match command {
            MirrorCommand::Create(CreateMirror { id, type_tag }) => {
                let id = ProxyId::from(id);
                if let Some(existing) = self.mirrors.get(&id) {
                    if existing.type_tag != type_tag {
                        warn!(
                            "Mirror {id} already exists as '{}', not recreating it as '{type_tag}'",
                            existing.type_tag
                        );
                    }
                    return Ok(());
                }
                debug!("Creating mirror {id} of type '{type_tag}'");
                self.mirrors.insert(
                    id,
                    Mirror {
                        type_tag,
                        properties: BTreeMap::new(),
                        modifications: 0,
                    },
                );
            }
            MirrorCommand::Update(UpdateMirror { id, properties }) => {
                let id = ProxyId::from(id);
                let mirror = match self.mirrors.get_mut(&id) {
                    Some(mirror) => mirror,
                    None => {
                        warn!("Update for unknown mirror {id} ignored");
                        return Ok(());
                    }
                };
                // decode everything before touching the mirror
                let mut decoded = Vec::with_capacity(properties.len());
                for entry in properties {
                    let value = entry
                        .value
                        .ok_or(ControllerErr::MalformedPayload("property without a value"))?;
                    decoded.push((entry.name, PropertyValue::from_message(value)?));
                }
                for (name, value) in decoded {
                    if mirror.properties.get(&name) != Some(&value) {
                        mirror.properties.insert(name, value);
                        mirror.modifications += 1;
                    }
                }
            }
            MirrorCommand::Delete(DeleteMirror { id }) => {
                let id = ProxyId::from(id);
                if self.mirrors.remove(&id).is_some() {
                    debug!("Deleted mirror {id}");
                }
            }
        }
        Ok(())
    }
}
