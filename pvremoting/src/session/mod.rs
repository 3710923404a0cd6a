// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Session bootstrap: every process of the group decides once, from its rank, whether
//! it is the master or a slave.
//!
//! * The **master** (the layout's client rank) runs the front end given by the
//!   [SessionHooks], driving the slaves through a [MasterSession]. When the front end
//!   returns, the master sends the break RMI to every other process.
//! * A **slave** registers the baseline RMIs (script execution, mirror maintenance,
//!   information gathering and redistribution) and serves them until the break RMI
//!   arrives.
//!
//! There is no process-wide session state: every entry point receives an explicit
//! [ProcessContext] built at process start and dropped at process exit.

use std::sync::Arc;

use log::info;

use crate::controller::rmi::{RmiTag, SCRIPT_RMI_TAG};
use crate::errors::{ControllerErr, ProcessingErr};
use crate::group::{ProcessLayout, ProcessRank};
use crate::plugins::PluginsInformation;
use crate::redistribute::PolyData;
use crate::{Controller, MultiProcessController, SingleMethod};

mod master;
mod slave;

#[cfg(test)]
mod tests;

pub use master::MasterSession;

/// The role of a process in a session. Decided once at bootstrap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Hosts the front end and drives the session
    Master,
    /// Serves RMIs until the session is torn down
    Slave,
}

impl Role {
    /// The role of `rank` under `layout`
    pub fn for_rank(rank: ProcessRank, layout: &ProcessLayout) -> Role {
        if rank == layout.client() {
            Role::Master
        } else {
            Role::Slave
        }
    }
}

/// Executes the scripts sent to a process
pub trait ScriptInterpreter: Send {
    /// Execute one script, synchronously. An error aborts the process.
    fn execute(&mut self, script: &str) -> Result<(), ProcessingErr>;
}

/// The application plugged into a session
#[async_trait::async_trait]
pub trait SessionHooks: Send + Sync + 'static {
    /// Run the interactive front end on the master. The session is torn down when
    /// this returns.
    async fn run_front_end(&self, session: &mut MasterSession) -> Result<(), ProcessingErr>;

    /// The script interpreter of the process at `rank`
    fn script_interpreter(&self, rank: ProcessRank) -> Box<dyn ScriptInterpreter>;

    /// The plugins loaded on the process at `rank`
    fn plugins(&self, _rank: ProcessRank) -> PluginsInformation {
        PluginsInformation::new()
    }

    /// The local piece of the distributed mesh held by the process at `rank`
    fn initial_mesh(&self, _rank: ProcessRank) -> PolyData {
        PolyData::default()
    }
}

/// Session configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Number of processes in the group
    pub num_processes: usize,
    /// The roles of the ranks
    pub layout: ProcessLayout,
    /// The RMI tag scripts are executed on
    pub script_tag: RmiTag,
}

impl SessionConfig {
    /// `num_processes` processes in the classic layout: rank 0 is the client, every
    /// other rank is both a data and a render server
    pub fn new(num_processes: usize) -> Self {
        Self {
            num_processes,
            layout: ProcessLayout::classic(num_processes),
            script_tag: SCRIPT_RMI_TAG,
        }
    }

    /// `num_processes` processes with an explicit layout, which must only reference
    /// ranks of the group
    pub fn with_layout(num_processes: usize, layout: ProcessLayout) -> Result<Self, ControllerErr> {
        if layout.max_rank() >= num_processes {
            return Err(ControllerErr::InvalidRank(layout.max_rank()));
        }
        Ok(Self {
            num_processes,
            layout,
            script_tag: SCRIPT_RMI_TAG,
        })
    }

    /// Execute scripts on another RMI tag
    pub fn with_script_tag(mut self, script_tag: RmiTag) -> Self {
        self.script_tag = script_tag;
        self
    }
}

/// The explicit per-process context every session entry point works on
#[derive(Debug)]
pub struct ProcessContext {
    /// The process's controller
    pub controller: Controller,
    /// The roles of the ranks
    pub layout: ProcessLayout,
    /// This process's role
    pub role: Role,
    /// The RMI tag scripts are executed on
    pub script_tag: RmiTag,
}

/// The entry routine of every process of a session
pub struct SessionBootstrap<H> {
    hooks: Arc<H>,
}

impl<H> SessionBootstrap<H> {
    /// The bootstrap of a session driven by `hooks`
    pub fn new(hooks: Arc<H>) -> Self {
        Self { hooks }
    }
}

#[async_trait::async_trait]
impl<H> SingleMethod for SessionBootstrap<H>
where
    H: SessionHooks,
{
    type Arguments = SessionConfig;

    async fn run(
        &self,
        controller: Controller,
        config: Arc<SessionConfig>,
    ) -> Result<(), ProcessingErr> {
        let role = Role::for_rank(controller.rank(), &config.layout);
        info!("Rank {} starting as {role:?}", controller.rank());
        let context = ProcessContext {
            controller,
            layout: config.layout.clone(),
            role,
            script_tag: config.script_tag,
        };
        match role {
            Role::Master => master::run_master(context, self.hooks.as_ref()).await,
            Role::Slave => slave::run_slave(context, self.hooks.as_ref()).await,
        }
    }
}

/// Launch a session of `config.num_processes` processes and wait for it to end
pub async fn launch<H>(config: SessionConfig, hooks: Arc<H>) -> Result<(), ControllerErr>
where
    H: SessionHooks,
{
    let mut group = MultiProcessController::initialize(config.num_processes)?;
    group.set_single_method(SessionBootstrap::new(hooks), config);
    group.single_method_execute().await
}
