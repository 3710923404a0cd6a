// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Remote method invocations (RMIs) are tagged, fire-and-forget messages dispatched to
//! a handler registered on the target process.
//!
//! Every process keeps its own table mapping an [RmiTag] to an [RmiOperation]. The
//! operation is a closed set of variants dispatched by a single `match` in the
//! process's [RmiHandler], rather than a table of callbacks with opaque contexts.
//! A process registers its table with [crate::Controller::add_rmi] and serves it with
//! [crate::Controller::process_rmis], which blocks until the [BREAK_RMI_TAG] arrives.
//!
//! An RMI has no reply channel. Callers needing a result encode a reply tag into the
//! payload and wait for a point-to-point message on it.

use std::collections::hash_map::Entry::{Occupied, Vacant};
use std::collections::HashMap;

use bytes::Bytes;

use crate::errors::{ControllerErr, ProcessingErr};
use crate::group::ProcessRank;
use crate::Controller;

/// A process-wide unique integer identifying a remote-callable operation
pub type RmiTag = u32;

/// Terminates [crate::Controller::process_rmis]. Reserved, cannot be registered.
pub const BREAK_RMI_TAG: RmiTag = 239954;

/// Execute a script on the slave. The payload is a plain command string.
pub const SCRIPT_RMI_TAG: RmiTag = 1150;

/// Create a proxy's mirror ([crate::protocol::CreateMirror])
pub const CREATE_MIRROR_RMI_TAG: RmiTag = 1151;

/// Apply property values to a mirror ([crate::protocol::UpdateMirror])
pub const UPDATE_MIRROR_RMI_TAG: RmiTag = 1152;

/// Drop a proxy's mirror ([crate::protocol::DeleteMirror])
pub const DELETE_MIRROR_RMI_TAG: RmiTag = 1153;

/// Gather information from a process ([crate::protocol::InformationRequest])
pub const GATHER_INFORMATION_RMI_TAG: RmiTag = 1154;

/// Redistribute the workers' local data ([crate::protocol::RedistributeRequest])
pub const REDISTRIBUTE_RMI_TAG: RmiTag = 1155;

/// The operations a process can serve
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RmiOperation {
    /// Run a script in the process's interpreter
    ExecuteScript,
    /// Register a proxy mirror
    CreateMirror,
    /// Apply a batch of property values to a mirror
    UpdateMirror,
    /// Drop a proxy mirror
    DeleteMirror,
    /// Reply with the requested information
    GatherInformation,
    /// Take part in a data redistribution over the workers
    Redistribute,
    /// An application-defined operation, identified by its own code
    Custom(u32),
}

/// The baseline table every slave process registers
pub const BASELINE_RMIS: [(RmiTag, RmiOperation); 6] = [
    (SCRIPT_RMI_TAG, RmiOperation::ExecuteScript),
    (CREATE_MIRROR_RMI_TAG, RmiOperation::CreateMirror),
    (UPDATE_MIRROR_RMI_TAG, RmiOperation::UpdateMirror),
    (DELETE_MIRROR_RMI_TAG, RmiOperation::DeleteMirror),
    (GATHER_INFORMATION_RMI_TAG, RmiOperation::GatherInformation),
    (REDISTRIBUTE_RMI_TAG, RmiOperation::Redistribute),
];

/// An RMI as received by the target process
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RmiMessage {
    /// The RMI tag
    pub tag: RmiTag,
    /// The rank which triggered the RMI
    pub source: ProcessRank,
    /// The handler-owned payload
    pub payload: Bytes,
}

/// Serves the RMIs dispatched by [crate::Controller::process_rmis].
///
/// Returning an error is fatal for the serving process: the RMI loop stops and the
/// error propagates out of the process's entry routine.
#[async_trait::async_trait]
pub trait RmiHandler: Send {
    /// Handle one RMI
    ///
    /// * `controller` - This process's controller, for replies and collectives
    /// * `operation` - The operation registered for the message's tag
    /// * `message` - The tag, source and payload
    async fn handle_rmi(
        &mut self,
        controller: &mut Controller,
        operation: RmiOperation,
        message: RmiMessage,
    ) -> Result<(), ProcessingErr>;
}

/// The per-process table of registered RMIs
#[derive(Debug, Default)]
pub(crate) struct RmiTable {
    operations: HashMap<RmiTag, RmiOperation>,
}

impl RmiTable {
    pub(crate) fn register(
        &mut self,
        tag: RmiTag,
        operation: RmiOperation,
    ) -> Result<(), ControllerErr> {
        if tag == BREAK_RMI_TAG {
            return Err(ControllerErr::ReservedRmiTag(tag));
        }
        match self.operations.entry(tag) {
            Occupied(_) => Err(ControllerErr::DuplicateRmi(tag)),
            Vacant(vacancy) => {
                vacancy.insert(operation);
                Ok(())
            }
        }
    }

    pub(crate) fn unregister(&mut self, tag: RmiTag) -> Option<RmiOperation> {
        self.operations.remove(&tag)
    }

    pub(crate) fn lookup(&self, tag: RmiTag) -> Option<RmiOperation> {
        self.operations.get(&tag).copied()
    }
}
