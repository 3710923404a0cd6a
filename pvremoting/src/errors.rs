// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Remoting error types

use std::fmt::Display;

use crate::controller::rmi::RmiTag;
use crate::controller::MessageTag;
use crate::group::ProcessRank;
use crate::proxy::ProxyId;

/// Represents a process's internal processing error. Returned by entry routines,
/// RMI handlers, script interpreters and front ends.
pub type ProcessingErr = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the process controller
#[derive(Debug)]
pub enum ControllerErr {
    /// A process group needs at least one process
    InvalidProcessCount(usize),
    /// The group's single method was already executed. Controllers are handed to
    /// the processes exactly once.
    AlreadyExecuted,
    /// `single_method_execute` was called without a single method
    NoSingleMethod,
    /// An RMI handler is already registered for this tag on this process
    DuplicateRmi(RmiTag),
    /// The tag is reserved by the controller (e.g. the break tag)
    ReservedRmiTag(RmiTag),
    /// The message tag is reserved for collectives or redistribution
    ReservedMessageTag(MessageTag),
    /// The rank is not part of the process group
    InvalidRank(ProcessRank),
    /// The rank could not be reached over the transport
    Unreachable(ProcessRank),
    /// A broadcast did not reach every target rank
    Undelivered(Vec<ProcessRank>),
    /// The calling process is not a member of the group a collective targets
    NotInGroup(ProcessRank),
    /// This process's inbox was closed while waiting for a message
    ChannelClosed,
    /// A payload did not have the expected framing
    MalformedPayload(&'static str),
    /// A payload failed to decode
    Decode(prost::DecodeError),
    /// An RMI handler failed. Fatal for the process serving it.
    RmiHandlerFailed {
        /// The tag being served
        tag: RmiTag,
        /// The rank serving the RMI
        rank: ProcessRank,
        /// The handler's error
        err: ProcessingErr,
    },
    /// A process of the group aborted, terminating the whole group
    ProcessAborted {
        /// The aborting rank, if it could be identified
        rank: Option<ProcessRank>,
        /// Why the process aborted
        reason: String,
    },
}

impl std::error::Error for ControllerErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            Self::RmiHandlerFailed { err, .. } => Some(err.as_ref()),
            Self::Decode(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for ControllerErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidProcessCount(count) => {
                write!(f, "Cannot create a process group of {count} processes")
            }
            Self::AlreadyExecuted => {
                write!(f, "The single method of this group was already executed")
            }
            Self::NoSingleMethod => write!(f, "No single method was set"),
            Self::DuplicateRmi(tag) => {
                write!(f, "An RMI is already registered for tag {tag}")
            }
            Self::ReservedRmiTag(tag) => write!(f, "RMI tag {tag} is reserved"),
            Self::ReservedMessageTag(tag) => write!(f, "Message tag {tag} is reserved"),
            Self::InvalidRank(rank) => write!(f, "Rank {rank} is not part of the group"),
            Self::Unreachable(rank) => write!(f, "Rank {rank} is unreachable"),
            Self::Undelivered(ranks) => {
                write!(f, "Message could not be delivered to ranks {ranks:?}")
            }
            Self::NotInGroup(rank) => {
                write!(f, "Rank {rank} is not a member of the collective's group")
            }
            Self::ChannelClosed => write!(f, "The process inbox was closed"),
            Self::MalformedPayload(what) => write!(f, "Malformed payload: {what}"),
            Self::Decode(err) => write!(f, "Failed to decode payload '{err}'"),
            Self::RmiHandlerFailed { tag, rank, err } => {
                if f.alternate() {
                    write!(f, "RMI {tag} failed on rank {rank} with '{err:#}'")
                } else {
                    write!(f, "RMI {tag} failed on rank {rank} with '{err}'")
                }
            }
            Self::ProcessAborted { rank, reason } => match rank {
                Some(rank) => write!(f, "Process {rank} aborted '{reason}'"),
                None => write!(f, "A process aborted '{reason}'"),
            },
        }
    }
}

impl From<prost::DecodeError> for ControllerErr {
    fn from(value: prost::DecodeError) -> Self {
        ControllerErr::Decode(value)
    }
}

/// Errors raised by the proxy layer
#[derive(Debug)]
pub enum ProxyErr {
    /// No live proxy has this id
    UnknownProxy(ProxyId),
    /// The proxy is still referenced by other live proxies and cannot be deleted
    StillReferenced {
        /// The proxy being deleted
        proxy: ProxyId,
        /// The live proxies referencing it
        referrers: Vec<ProxyId>,
    },
    /// A proxy cannot reference itself
    SelfReference(ProxyId),
    /// Recoverable: not every location rank confirmed the update. The dirty set is
    /// kept so a retry resends the same properties.
    SynchronizationFailed {
        /// The proxy being synchronized
        proxy: ProxyId,
        /// The ranks which could not be reached
        unreachable: Vec<ProcessRank>,
    },
}

impl std::error::Error for ProxyErr {}

impl Display for ProxyErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownProxy(id) => write!(f, "Proxy {id} does not exist"),
            Self::StillReferenced { proxy, referrers } => {
                write!(f, "Proxy {proxy} is still referenced by {referrers:?}")
            }
            Self::SelfReference(id) => write!(f, "Proxy {id} cannot reference itself"),
            Self::SynchronizationFailed { proxy, unreachable } => {
                write!(
                    f,
                    "Proxy {proxy} could not be synchronized with ranks {unreachable:?}"
                )
            }
        }
    }
}

/// Errors raised by the redistribution scheduler
#[derive(Debug)]
pub enum RedistributeErr {
    /// A weight was negative, zero or not finite
    InvalidWeight {
        /// Index of the offending weight
        rank: ProcessRank,
        /// The offending value
        weight: f64,
    },
    /// A weight range does not fit the weight vector
    InvalidWeightRange {
        /// First index of the range
        start: usize,
        /// Last index (inclusive) of the range
        end: usize,
        /// Number of weights
        len: usize,
    },
    /// The weight vector does not have one weight per participating process
    WeightCountMismatch {
        /// Number of weights
        weights: usize,
        /// Number of participating processes
        processes: usize,
    },
    /// The cells held by the participating processes do not fit a u64
    CellCountOverflow,
    /// Communication failed while scheduling or executing
    Controller(ControllerErr),
}

impl std::error::Error for RedistributeErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            Self::Controller(inner) => Some(inner),
            _ => None,
        }
    }
}

impl Display for RedistributeErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidWeight { rank, weight } => {
                write!(f, "Weight {weight} of process {rank} must be positive")
            }
            Self::InvalidWeightRange { start, end, len } => {
                write!(f, "Weight range {start}..={end} exceeds {len} weights")
            }
            Self::WeightCountMismatch { weights, processes } => {
                write!(f, "{weights} weights given for {processes} processes")
            }
            Self::CellCountOverflow => write!(f, "Total cell count overflows u64"),
            Self::Controller(err) => write!(f, "{err}"),
        }
    }
}

impl From<ControllerErr> for RedistributeErr {
    fn from(value: ControllerErr) -> Self {
        RedistributeErr::Controller(value)
    }
}

impl From<prost::DecodeError> for RedistributeErr {
    fn from(value: prost::DecodeError) -> Self {
        RedistributeErr::Controller(ControllerErr::Decode(value))
    }
}

/// Error types which can result from remoting operations
#[derive(Debug)]
pub enum RemotingErr {
    /// Controller or transport failure
    Controller(ControllerErr),
    /// Proxy synchronization or lifetime failure
    Proxy(ProxyErr),
    /// Redistribution failure
    Redistribute(RedistributeErr),
}

impl From<ControllerErr> for RemotingErr {
    fn from(value: ControllerErr) -> Self {
        RemotingErr::Controller(value)
    }
}

impl From<ProxyErr> for RemotingErr {
    fn from(value: ProxyErr) -> Self {
        RemotingErr::Proxy(value)
    }
}

impl From<RedistributeErr> for RemotingErr {
    fn from(value: RedistributeErr) -> Self {
        RemotingErr::Redistribute(value)
    }
}

impl From<prost::DecodeError> for RemotingErr {
    fn from(value: prost::DecodeError) -> Self {
        RemotingErr::Controller(ControllerErr::Decode(value))
    }
}

impl std::error::Error for RemotingErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            Self::Controller(inner) => Some(inner),
            Self::Proxy(inner) => Some(inner),
            Self::Redistribute(inner) => Some(inner),
        }
    }
}

impl Display for RemotingErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Controller(err) => write!(f, "{err}"),
            Self::Proxy(err) => write!(f, "{err}"),
            Self::Redistribute(err) => write!(f, "{err}"),
        }
    }
}
