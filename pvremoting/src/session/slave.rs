// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The slave side of a session: the baseline RMI handlers

use bytes::Bytes;
use log::{debug, info, warn};
use prost::Message;

use super::master::data_information;
use super::{ProcessContext, ScriptInterpreter, SessionHooks};
use crate::controller::rmi::{RmiHandler, RmiMessage, RmiOperation, BASELINE_RMIS};
use crate::errors::ProcessingErr;
use crate::group::ProcessGroup;
use crate::plugins::PluginsInformation;
use crate::protocol::{InformationKind, InformationRequest, RedistributeRequest};
use crate::proxy::{MirrorCommand, MirrorStore};
use crate::redistribute::{PolyData, RedistributePolyData, WeightVector};
use crate::Controller;

/// The state a slave serves RMIs with
struct SlaveDispatcher {
    interpreter: Box<dyn ScriptInterpreter>,
    mirrors: MirrorStore,
    plugins: PluginsInformation,
    mesh: PolyData,
    workers: ProcessGroup,
}

impl SlaveDispatcher {
    fn gather_information(
        &self,
        controller: &Controller,
        message: RmiMessage,
    ) -> Result<(), ProcessingErr> {
        let request = InformationRequest::decode(&message.payload[..])?;
        let reply = match request.kind() {
            InformationKind::Plugins => self.plugins.copy_to_stream(),
            InformationKind::Data => Bytes::from(data_information(&self.mesh).encode_to_vec()),
        };
        controller.send(message.source, request.reply_tag, reply)?;
        Ok(())
    }

    async fn redistribute(
        &mut self,
        controller: &mut Controller,
        message: RmiMessage,
    ) -> Result<(), ProcessingErr> {
        let request = RedistributeRequest::decode(&message.payload[..])?;
        let redistribution = if request.weights.is_empty() {
            RedistributePolyData::balanced()
        } else {
            RedistributePolyData::weighted(WeightVector::new(request.weights)?)
        };
        let input = std::mem::take(&mut self.mesh);
        self.mesh = redistribution
            .request_data(controller, &self.workers, input)
            .await?;
        debug!(
            "Rank {} holds {} cells after redistribution",
            controller.rank(),
            self.mesh.len()
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl RmiHandler for SlaveDispatcher {
    async fn handle_rmi(
        &mut self,
        controller: &mut Controller,
        operation: RmiOperation,
        message: RmiMessage,
    ) -> Result<(), ProcessingErr> {
        match operation {
            RmiOperation::ExecuteScript => {
                let script = std::str::from_utf8(&message.payload)?;
                self.interpreter.execute(script)
            }
            RmiOperation::CreateMirror
            | RmiOperation::UpdateMirror
            | RmiOperation::DeleteMirror => {
                if let Some(command) = MirrorCommand::decode(operation, &message.payload)? {
                    self.mirrors.apply(command)?;
                }
                Ok(())
            }
            RmiOperation::GatherInformation => self.gather_information(controller, message),
            RmiOperation::Redistribute => self.redistribute(controller, message).await,
            RmiOperation::Custom(code) => {
                warn!(
                    "Rank {} has no handler for custom operation {code} (RMI {})",
                    controller.rank(),
                    message.tag
                );
                Ok(())
            }
        }
    }
}

pub(crate) async fn run_slave<H>(
    mut context: ProcessContext,
    hooks: &H,
) -> Result<(), ProcessingErr>
where
    H: SessionHooks + ?Sized,
{
    let rank = context.controller.rank();
    for (tag, operation) in BASELINE_RMIS {
        let tag = match operation {
            RmiOperation::ExecuteScript => context.script_tag,
            _ => tag,
        };
        context.controller.add_rmi(tag, operation)?;
    }
    let mut dispatcher = SlaveDispatcher {
        interpreter: hooks.script_interpreter(rank),
        mirrors: MirrorStore::new(),
        plugins: hooks.plugins(rank),
        mesh: hooks.initial_mesh(rank),
        workers: context.layout.workers(),
    };
    context.controller.process_rmis(&mut dispatcher).await?;
    info!(
        "Rank {rank} leaving the session with {} mirrors and {} cells",
        dispatcher.mirrors.len(),
        dispatcher.mesh.len()
    );
    Ok(())
}
