// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The master side of a session

use bytes::Bytes;
use log::{debug, info, warn};
use prost::Message;

use super::{ProcessContext, ScriptInterpreter, SessionHooks};
use crate::controller::rmi::{GATHER_INFORMATION_RMI_TAG, REDISTRIBUTE_RMI_TAG};
use crate::controller::RESERVED_TAG_BASE;
use crate::errors::{ControllerErr, ProcessingErr, ProxyErr, RedistributeErr, RemotingErr};
use crate::group::{ProcessGroup, ProcessLayout, ProcessRank, ServerFlags};
use crate::plugins::PluginsInformation;
use crate::protocol::{DataInformation, InformationKind, InformationRequest, RedistributeRequest};
use crate::proxy::{PropertyValue, ProxyId, ProxyManager};
use crate::redistribute::{PolyData, WeightVector};
use crate::{Controller, MessageTag};

/// Summary of the mesh held by one process
pub(crate) fn data_information(mesh: &PolyData) -> DataInformation {
    DataInformation {
        number_of_cells: mesh.len() as u64,
        number_of_points: mesh.number_of_points() as u64,
    }
}

/// The front end's handle on a running session.
///
/// Owns the master process's controller and the client-side [ProxyManager]. Work
/// addressed to the master's own rank (builtin mode) is done locally instead of
/// through an RMI.
pub struct MasterSession {
    context: ProcessContext,
    proxies: ProxyManager,
    interpreter: Box<dyn ScriptInterpreter>,
    mesh: PolyData,
    client_plugins: PluginsInformation,
    server_plugins: Option<PluginsInformation>,
    next_reply_tag: MessageTag,
}

impl std::fmt::Debug for MasterSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterSession")
            .field("context", &self.context)
            .field("proxies", &self.proxies.len())
            .finish()
    }
}

impl MasterSession {
    pub(crate) fn new<H>(context: ProcessContext, hooks: &H) -> Self
    where
        H: SessionHooks + ?Sized,
    {
        let rank = context.controller.rank();
        Self {
            proxies: ProxyManager::new(context.layout.clone()),
            interpreter: hooks.script_interpreter(rank),
            mesh: hooks.initial_mesh(rank),
            client_plugins: hooks.plugins(rank),
            server_plugins: None,
            next_reply_tag: 1,
            context,
        }
    }

    /// The master's controller
    pub fn controller(&self) -> &Controller {
        &self.context.controller
    }

    /// The roles of the ranks
    pub fn layout(&self) -> &ProcessLayout {
        &self.context.layout
    }

    /// The client-side proxies
    pub fn proxies(&self) -> &ProxyManager {
        &self.proxies
    }

    /// The master's own mesh, only populated when it also serves data (builtin mode)
    pub fn local_mesh(&self) -> &PolyData {
        &self.mesh
    }

    /// The plugins loaded on the client
    pub fn client_plugins(&self) -> &PluginsInformation {
        &self.client_plugins
    }

    /// The plugins of the data servers, as of the last [MasterSession::validate_plugins]
    pub fn server_plugins(&self) -> Option<&PluginsInformation> {
        self.server_plugins.as_ref()
    }

    fn reply_tag(&mut self) -> MessageTag {
        let tag = self.next_reply_tag;
        self.next_reply_tag += 1;
        if self.next_reply_tag >= RESERVED_TAG_BASE {
            self.next_reply_tag = 1;
        }
        tag
    }

    // ============== Proxies ============== //

    /// See [ProxyManager::create_proxy]
    pub fn create_proxy(&mut self, type_tag: &str, location: ServerFlags) -> ProxyId {
        self.proxies
            .create_proxy(&self.context.controller, type_tag, location)
    }

    /// See [ProxyManager::set_property]
    pub fn set_property<V>(&mut self, id: ProxyId, name: &str, value: V) -> Result<(), ProxyErr>
    where
        V: Into<PropertyValue>,
    {
        self.proxies.set_property(id, name, value)
    }

    /// See [ProxyManager::get_property]
    pub fn get_property(
        &self,
        id: ProxyId,
        name: &str,
    ) -> Result<Option<&PropertyValue>, ProxyErr> {
        self.proxies.get_property(id, name)
    }

    /// See [ProxyManager::update_vtk_objects]
    pub fn update_vtk_objects(&mut self, id: ProxyId) -> Result<(), ProxyErr> {
        self.proxies.update_vtk_objects(&self.context.controller, id)
    }

    /// See [ProxyManager::delete_proxy]
    pub fn delete_proxy(&mut self, id: ProxyId) -> Result<(), ProxyErr> {
        self.proxies.delete_proxy(&self.context.controller, id)
    }

    /// See [ProxyManager::link_representation]
    pub fn link_representation(
        &mut self,
        source: ProxyId,
        representation: ProxyId,
    ) -> Result<(), ProxyErr> {
        self.proxies.link_representation(source, representation)
    }

    // ============== Remote work ============== //

    /// Execute `script` on every rank of `group`. Remote ranks run it asynchronously;
    /// ranks which could not be reached are reported in [ControllerErr::Undelivered].
    pub fn execute_script(
        &mut self,
        group: &ProcessGroup,
        script: &str,
    ) -> Result<(), RemotingErr> {
        let me = self.context.controller.rank();
        if group.contains(me) {
            self.interpreter
                .execute(script)
                .map_err(|err| ControllerErr::RmiHandlerFailed {
                    tag: self.context.script_tag,
                    rank: me,
                    err,
                })?;
        }
        self.context.controller.trigger_rmi_on_group(
            &group.without(me),
            self.context.script_tag,
            Bytes::copy_from_slice(script.as_bytes()),
        )?;
        Ok(())
    }

    async fn request_information(
        &mut self,
        rank: ProcessRank,
        kind: InformationKind,
    ) -> Result<Bytes, ControllerErr> {
        let reply_tag = self.reply_tag();
        let request = InformationRequest {
            kind: kind as i32,
            reply_tag,
        };
        self.context.controller.trigger_rmi(
            rank,
            GATHER_INFORMATION_RMI_TAG,
            Bytes::from(request.encode_to_vec()),
        )?;
        self.context.controller.receive(rank, reply_tag).await
    }

    /// The plugins loaded on `rank`
    pub async fn gather_plugins_information(
        &mut self,
        rank: ProcessRank,
    ) -> Result<PluginsInformation, RemotingErr> {
        if rank == self.context.controller.rank() {
            return Ok(self.client_plugins.clone());
        }
        let reply = self
            .request_information(rank, InformationKind::Plugins)
            .await?;
        Ok(PluginsInformation::copy_from_stream(&reply)?)
    }

    /// A summary of the mesh held by each rank of `group`, in rank order
    pub async fn gather_data_information(
        &mut self,
        group: &ProcessGroup,
    ) -> Result<Vec<(ProcessRank, DataInformation)>, RemotingErr> {
        let mut information = Vec::with_capacity(group.len());
        for rank in group.iter() {
            if rank == self.context.controller.rank() {
                information.push((rank, data_information(&self.mesh)));
                continue;
            }
            let reply = self.request_information(rank, InformationKind::Data).await?;
            information.push((rank, DataInformation::decode(&reply[..])?));
        }
        Ok(information)
    }

    /// Redistribute the mesh over the workers, balanced or by `weights`. The workers
    /// run the redistribution among themselves; a later information request observes
    /// the result.
    pub fn redistribute(&mut self, weights: Option<&WeightVector>) -> Result<(), RemotingErr> {
        let workers = self.context.layout.workers();
        if let Some(weights) = weights {
            if weights.len() != workers.len() {
                return Err(RedistributeErr::WeightCountMismatch {
                    weights: weights.len(),
                    processes: workers.len(),
                }
                .into());
            }
        }
        if workers.is_empty() {
            debug!("No workers to redistribute over");
            return Ok(());
        }
        let request = RedistributeRequest {
            weights: weights.map(|w| w.as_slice().to_vec()).unwrap_or_default(),
        };
        self.context.controller.trigger_rmi_on_group(
            &workers,
            REDISTRIBUTE_RMI_TAG,
            Bytes::from(request.encode_to_vec()),
        )?;
        Ok(())
    }

    /// Gather the plugins of every data server and check the cross-process requirements
    /// against the client's. Status messages of offending plugins are updated on both
    /// sides.
    pub async fn validate_plugins(&mut self) -> Result<bool, RemotingErr> {
        let mut servers = PluginsInformation::new();
        let data_servers = self.context.layout.data_servers().clone();
        for rank in data_servers.iter() {
            let information = self.gather_plugins_information(rank).await?;
            servers.add_information(&information);
        }
        let valid =
            PluginsInformation::validate_requirements(&mut self.client_plugins, &mut servers);
        if !valid {
            warn!("Plugin requirements of the session are not met");
        }
        self.server_plugins = Some(servers);
        Ok(valid)
    }

    fn teardown(&self) {
        if let Err(err) = self.context.controller.trigger_break_rmis() {
            warn!("Session teardown did not reach every process: {err}");
        }
    }
}

pub(crate) async fn run_master<H>(context: ProcessContext, hooks: &H) -> Result<(), ProcessingErr>
where
    H: SessionHooks + ?Sized,
{
    let mut session = MasterSession::new(context, hooks);
    info!(
        "Rank {} running the front end over {} processes",
        session.controller().rank(),
        session.controller().number_of_processes()
    );
    let result = hooks.run_front_end(&mut session).await;
    session.teardown();
    if let Err(err) = &result {
        warn!("Front end failed: {err}");
    }
    result
}
