// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The process controller: process identity, group launch, remote method invocation
//! and point-to-point messaging.
//!
//! A [MultiProcessController] owns a group of `N` processes. Every process is a tokio
//! task running the group's [SingleMethod] with its own [Controller]. Processes share
//! nothing but the post office routing messages between their inboxes, so messages
//! between a fixed pair of ranks are delivered in send order and there is no ordering
//! across different pairs.
//!
//! A process suspends in exactly three places: [Controller::process_rmis] waiting for
//! the next RMI, a collective waiting for its peers, and [Controller::receive] waiting
//! for a point-to-point message. There is no cooperative cancellation: a blocked wait
//! is released by a message arriving or by the group aborting.
//!
//! ## Example
//!
//! ```rust
//! use bytes::Bytes;
//! use pvremoting::{Controller, MultiProcessController, ProcessingErr, SingleMethod};
//! use std::sync::Arc;
//!
//! struct Ring;
//!
//! #[async_trait::async_trait]
//! impl SingleMethod for Ring {
//!     type Arguments = ();
//!
//!     async fn run(&self, mut controller: Controller, _: Arc<()>) -> Result<(), ProcessingErr> {
//!         let n = controller.number_of_processes();
//!         let next = (controller.rank() + 1) % n;
//!         let previous = (controller.rank() + n - 1) % n;
//!         controller.send(next, 7, Bytes::from(vec![controller.rank() as u8]))?;
//!         let token = controller.receive(previous, 7).await?;
//!         assert_eq!(token[0] as usize, previous);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut group = MultiProcessController::initialize(3).expect("Failed to initialize");
//!     group.set_single_method(Ring, ());
//!     group.single_method_execute().await.expect("A process aborted");
//! }
//! ```

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, error, warn};

use crate::concurrency::{mpsc_unbounded, JoinSet, MpscUnboundedReceiver, MpscUnboundedSender};
use crate::errors::{ControllerErr, ProcessingErr};
use crate::group::{ProcessGroup, ProcessRank};
use rmi::{RmiHandler, RmiMessage, RmiOperation, RmiTable, RmiTag, BREAK_RMI_TAG};

pub mod collective;
pub mod rmi;


/// The tag of a point-to-point message
pub type MessageTag = u32;

/// Tags from here on are reserved for the library's own traffic
pub(crate) const RESERVED_TAG_BASE: MessageTag = 0xFFFF_0000;
/// Collective operations
pub(crate) const COLLECTIVE_TAG: MessageTag = RESERVED_TAG_BASE;
/// Cell batches moved by a redistribution schedule
pub(crate) const REDISTRIBUTION_TAG: MessageTag = RESERVED_TAG_BASE + 1;

/// Which stream of a process's inbox a message belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Channel {
    /// A remote method invocation
    Rmi(RmiTag),
    /// A point-to-point or collective message
    Tagged(MessageTag),
}

/// A message in flight
#[derive(Debug)]
pub(crate) struct Envelope {
    pub(crate) source: ProcessRank,
    pub(crate) channel: Channel,
    pub(crate) payload: Bytes,
}

/// Routes envelopes to the inboxes of the group's processes
#[derive(Clone)]
struct PostOffice {
    boxes: Arc<DashMap<ProcessRank, MpscUnboundedSender<Envelope>>>,
    severed: Arc<DashSet<ProcessRank>>,
    size: usize,
}

impl PostOffice {
    fn deliver(&self, destination: ProcessRank, envelope: Envelope) -> Result<(), ControllerErr> {
        if destination >= self.size {
            return Err(ControllerErr::InvalidRank(destination));
        }
        if self.severed.contains(&destination) {
            return Err(ControllerErr::Unreachable(destination));
        }
        match self.boxes.get(&destination) {
            Some(inbox) => inbox
                .send(envelope)
                .map_err(|_| ControllerErr::Unreachable(destination)),
            // the process already exited
            None => Err(ControllerErr::Unreachable(destination)),
        }
    }
}

/// The entry routine run by every process of a group.
///
/// The routine is shared by all processes; per-process state belongs in the routine's
/// body, which owns the process's [Controller].
#[async_trait::async_trait]
pub trait SingleMethod: Send + Sync + 'static {
    /// The arguments every process receives, shared read-only
    type Arguments: Send + Sync + 'static;

    /// Run the process. Returning an error (or panicking) aborts the whole group.
    ///
    /// * `controller` - The process's [Controller]
    /// * `args` - The group-wide arguments
    async fn run(
        &self,
        controller: Controller,
        args: Arc<Self::Arguments>,
    ) -> Result<(), ProcessingErr>;
}

type EntryRoutine =
    Arc<dyn Fn(Controller) -> BoxFuture<'static, Result<(), ProcessingErr>> + Send + Sync>;

fn get_panic_string(e: Box<dyn std::any::Any + Send>) -> String {
    match e.downcast::<String>() {
        Ok(v) => *v,
        Err(e) => match e.downcast::<&str>() {
            Ok(v) => v.to_string(),
            _ => "Unknown panic occurred which couldn't be coerced to a string".to_string(),
        },
    }
}

/// Launches a group of processes, each running the same [SingleMethod]
pub struct MultiProcessController {
    num_processes: usize,
    controllers: Option<Vec<Controller>>,
    entry: Option<EntryRoutine>,
}

impl MultiProcessController {
    /// Establish a process group of `num_processes` processes
    ///
    /// Returns [ControllerErr::InvalidProcessCount] if `num_processes` is zero
    pub fn initialize(num_processes: usize) -> Result<Self, ControllerErr> {
        if num_processes == 0 {
            return Err(ControllerErr::InvalidProcessCount(num_processes));
        }
        debug!("Initializing a process group of {num_processes} processes");
        Ok(Self {
            num_processes,
            controllers: Some(Controller::group(num_processes)),
            entry: None,
        })
    }

    /// The size of the group
    pub fn number_of_processes(&self) -> usize {
        self.num_processes
    }

    /// Set the routine every process runs on [MultiProcessController::single_method_execute].
    /// Replaces any previously set routine.
    pub fn set_single_method<M>(&mut self, method: M, args: M::Arguments)
    where
        M: SingleMethod,
    {
        let method = Arc::new(method);
        let args = Arc::new(args);
        let entry: EntryRoutine = Arc::new(
            move |controller: Controller| -> BoxFuture<'static, Result<(), ProcessingErr>> {
                let method = method.clone();
                let args = args.clone();
                async move { method.run(controller, args).await }.boxed()
            },
        );
        self.entry = Some(entry);
    }

    /// Run the single method on every process and wait for all of them to return.
    ///
    /// If any process returns an error or panics, every other process is cancelled and
    /// [ControllerErr::ProcessAborted] names the failing rank. A group executes once.
    pub async fn single_method_execute(&mut self) -> Result<(), ControllerErr> {
        let entry = self.entry.clone().ok_or(ControllerErr::NoSingleMethod)?;
        let controllers = self
            .controllers
            .take()
            .ok_or(ControllerErr::AlreadyExecuted)?;

        let mut processes = JoinSet::new();
        for controller in controllers {
            let rank = controller.rank();
            let routine = entry(controller);
            processes.spawn(async move {
                let result = AssertUnwindSafe(routine).catch_unwind().await;
                (rank, result)
            });
        }

        while let Some(joined) = processes.join_next().await {
            let failure = match joined {
                Ok((_, Ok(Ok(())))) => None,
                Ok((rank, Ok(Err(err)))) => Some(ControllerErr::ProcessAborted {
                    rank: Some(rank),
                    reason: err.to_string(),
                }),
                Ok((rank, Err(panic))) => Some(ControllerErr::ProcessAborted {
                    rank: Some(rank),
                    reason: get_panic_string(panic),
                }),
                Err(join_err) => Some(ControllerErr::ProcessAborted {
                    rank: None,
                    reason: join_err.to_string(),
                }),
            };
            if let Some(err) = failure {
                error!("{err}, terminating the process group");
                processes.abort_all();
                while processes.join_next().await.is_some() {}
                return Err(err);
            }
        }
        debug!("All {} processes returned", self.num_processes);
        Ok(())
    }
}

/// A process's handle on its group. Owned by the process's entry routine and passed to
/// every handler it runs.
pub struct Controller {
    rank: ProcessRank,
    post_office: PostOffice,
    inbox: MpscUnboundedReceiver<Envelope>,
    /// Envelopes received while waiting for a different one, in arrival order
    pending: VecDeque<Envelope>,
    rmis: RmiTable,
    messages_sent: AtomicU64,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("rank", &self.rank)
            .field("size", &self.post_office.size)
            .finish()
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        // later sends to this rank fail as unreachable
        self.post_office.boxes.remove(&self.rank);
    }
}

impl Controller {
    /// Build the controllers of a group of `num_processes` processes, ordered by rank
    pub(crate) fn group(num_processes: usize) -> Vec<Controller> {
        let boxes = Arc::new(DashMap::new());
        let mut inboxes = Vec::with_capacity(num_processes);
        for rank in 0..num_processes {
            let (tx, rx) = mpsc_unbounded();
            boxes.insert(rank, tx);
            inboxes.push(rx);
        }
        let post_office = PostOffice {
            boxes,
            severed: Arc::new(DashSet::new()),
            size: num_processes,
        };
        inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| Controller {
                rank,
                post_office: post_office.clone(),
                inbox,
                pending: VecDeque::new(),
                rmis: RmiTable::default(),
                messages_sent: AtomicU64::new(0),
            })
            .collect()
    }

    /// The controller of a group of one process, hosting the client and every server
    /// itself (builtin mode)
    pub fn builtin() -> Controller {
        let mut group = Controller::group(1);
        group.remove(0)
    }

    /// This process's rank
    pub fn rank(&self) -> ProcessRank {
        self.rank
    }

    /// The size of the process group
    pub fn number_of_processes(&self) -> usize {
        self.post_office.size
    }

    /// Every rank of the group
    pub fn world(&self) -> ProcessGroup {
        ProcessGroup::range(0, self.post_office.size)
    }

    /// Number of messages (RMIs, point-to-point and collective) this process sent
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Simulate a link failure: messages addressed to `rank` fail with
    /// [ControllerErr::Unreachable] until [Controller::restore] is called. The failure
    /// is seen by every process of the group.
    pub fn sever(&self, rank: ProcessRank) {
        warn!("Rank {} severed the link to rank {rank}", self.rank);
        self.post_office.severed.insert(rank);
    }

    /// Restore the link to a severed rank
    pub fn restore(&self, rank: ProcessRank) {
        self.post_office.severed.remove(&rank);
    }

    /// Can messages currently be delivered to `rank`
    pub fn is_reachable(&self, rank: ProcessRank) -> bool {
        rank < self.post_office.size
            && !self.post_office.severed.contains(&rank)
            && self.post_office.boxes.contains_key(&rank)
    }

    fn post(
        &self,
        destination: ProcessRank,
        channel: Channel,
        payload: Bytes,
    ) -> Result<(), ControllerErr> {
        self.post_office.deliver(
            destination,
            Envelope {
                source: self.rank,
                channel,
                payload,
            },
        )?;
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Wait for the first envelope satisfying `matches`, stashing everything else
    async fn next_matching<F>(&mut self, matches: F) -> Result<Envelope, ControllerErr>
    where
        F: Fn(&Envelope) -> bool + Send,
    {
        if let Some(idx) = self.pending.iter().position(&matches) {
            if let Some(envelope) = self.pending.remove(idx) {
                return Ok(envelope);
            }
        }
        loop {
            match self.inbox.recv().await {
                Some(envelope) if matches(&envelope) => return Ok(envelope),
                Some(envelope) => self.pending.push_back(envelope),
                None => return Err(ControllerErr::ChannelClosed),
            }
        }
    }

    // ============== Remote method invocation ============== //

    /// Register `operation` for `tag` on this process. At most one operation is
    /// registered per tag; the break tag cannot be registered.
    pub fn add_rmi(&mut self, tag: RmiTag, operation: RmiOperation) -> Result<(), ControllerErr> {
        self.rmis.register(tag, operation)?;
        debug!("Process {} registered RMI {tag} as {operation:?}", self.rank);
        Ok(())
    }

    /// Unregister the operation of `tag`, returning it if there was one
    pub fn remove_rmi(&mut self, tag: RmiTag) -> Option<RmiOperation> {
        self.rmis.unregister(tag)
    }

    /// Fire-and-forget an RMI on `target`
    pub fn trigger_rmi(
        &self,
        target: ProcessRank,
        tag: RmiTag,
        payload: Bytes,
    ) -> Result<(), ControllerErr> {
        self.post(target, Channel::Rmi(tag), payload)
    }

    /// Trigger an RMI on every rank of `group`. Delivery is attempted to every rank;
    /// the ranks which could not be reached are reported in [ControllerErr::Undelivered].
    pub fn trigger_rmi_on_group(
        &self,
        group: &ProcessGroup,
        tag: RmiTag,
        payload: Bytes,
    ) -> Result<(), ControllerErr> {
        let undelivered = group
            .iter()
            .filter(|rank| {
                self.trigger_rmi(*rank, tag, payload.clone())
                    .map_err(|err| warn!("RMI {tag} to rank {rank} failed: {err}"))
                    .is_err()
            })
            .collect::<Vec<_>>();
        if undelivered.is_empty() {
            Ok(())
        } else {
            Err(ControllerErr::Undelivered(undelivered))
        }
    }

    /// Send the break RMI to every other process, terminating their RMI loops
    pub fn trigger_break_rmis(&self) -> Result<(), ControllerErr> {
        debug!("Process {} triggering break RMIs", self.rank);
        self.trigger_rmi_on_group(&self.world().without(self.rank), BREAK_RMI_TAG, Bytes::new())
    }

    /// Serve RMIs until the break tag arrives.
    ///
    /// Every RMI is dispatched to `handler` with the operation registered for its tag.
    /// Tags without a registered operation are logged and skipped. A handler error is
    /// fatal: the loop stops and [ControllerErr::RmiHandlerFailed] is returned. A
    /// closed inbox also ends the loop.
    pub async fn process_rmis<H>(&mut self, handler: &mut H) -> Result<(), ControllerErr>
    where
        H: RmiHandler + ?Sized,
    {
        loop {
            let envelope = match self
                .next_matching(|envelope| matches!(envelope.channel, Channel::Rmi(_)))
                .await
            {
                Ok(envelope) => envelope,
                Err(ControllerErr::ChannelClosed) => {
                    warn!("Process {} inbox closed, leaving the RMI loop", self.rank);
                    return Ok(());
                }
                Err(other) => return Err(other),
            };
            let tag = match envelope.channel {
                Channel::Rmi(tag) => tag,
                Channel::Tagged(_) => continue,
            };
            if tag == BREAK_RMI_TAG {
                debug!(
                    "Process {} received the break RMI from {}",
                    self.rank, envelope.source
                );
                return Ok(());
            }
            let operation = match self.rmis.lookup(tag) {
                Some(operation) => operation,
                None => {
                    error!(
                        "Process {} could not find RMI with tag {tag} (from {})",
                        self.rank, envelope.source
                    );
                    continue;
                }
            };
            debug!(
                "Process {} dispatching RMI {tag} ({operation:?}) from {}",
                self.rank, envelope.source
            );
            let message = RmiMessage {
                tag,
                source: envelope.source,
                payload: envelope.payload,
            };
            if let Err(err) = handler.handle_rmi(self, operation, message).await {
                error!("Process {} failed serving RMI {tag}: {err}", self.rank);
                return Err(ControllerErr::RmiHandlerFailed {
                    tag,
                    rank: self.rank,
                    err,
                });
            }
        }
    }

    // ============== Point-to-point ============== //

    fn check_user_tag(tag: MessageTag) -> Result<(), ControllerErr> {
        if tag >= RESERVED_TAG_BASE {
            Err(ControllerErr::ReservedMessageTag(tag))
        } else {
            Ok(())
        }
    }

    /// Send a tagged message to `destination`. Does not wait for the receiver.
    pub fn send(
        &self,
        destination: ProcessRank,
        tag: MessageTag,
        payload: Bytes,
    ) -> Result<(), ControllerErr> {
        Self::check_user_tag(tag)?;
        self.send_tagged(destination, tag, payload)
    }

    /// Wait for the next message from `source` carrying `tag`. Messages from the same
    /// source are received in send order.
    pub async fn receive(
        &mut self,
        source: ProcessRank,
        tag: MessageTag,
    ) -> Result<Bytes, ControllerErr> {
        Self::check_user_tag(tag)?;
        self.receive_tagged(source, tag).await
    }

    pub(crate) fn send_tagged(
        &self,
        destination: ProcessRank,
        tag: MessageTag,
        payload: Bytes,
    ) -> Result<(), ControllerErr> {
        self.post(destination, Channel::Tagged(tag), payload)
    }

    pub(crate) async fn receive_tagged(
        &mut self,
        source: ProcessRank,
        tag: MessageTag,
    ) -> Result<Bytes, ControllerErr> {
        if source >= self.post_office.size {
            return Err(ControllerErr::InvalidRank(source));
        }
        let channel = Channel::Tagged(tag);
        let envelope = self
            .next_matching(|envelope| envelope.source == source && envelope.channel == channel)
            .await?;
        Ok(envelope.payload)
    }
}
