// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! A demo front end driving an in-process session

use std::sync::Arc;

use pvremoting::session::launch;
use pvremoting::{
    ControllerErr, MasterSession, PluginRecord, PluginsInformation, PolyData, ProcessRank,
    ProcessingErr, ScriptInterpreter, ServerFlags, SessionConfig, SessionHooks,
};

struct LoggingInterpreter {
    rank: ProcessRank,
}

impl ScriptInterpreter for LoggingInterpreter {
    fn execute(&mut self, script: &str) -> Result<(), ProcessingErr> {
        log::info!("[rank {}] executing '{script}'", self.rank);
        Ok(())
    }
}

struct DemoFrontEnd {
    first_data_server: ProcessRank,
    cells: u64,
}

#[async_trait::async_trait]
impl SessionHooks for DemoFrontEnd {
    async fn run_front_end(&self, session: &mut MasterSession) -> Result<(), ProcessingErr> {
        let servers = session.layout().resolve(ServerFlags::SERVERS);
        let data_servers = session.layout().data_servers().clone();

        let source = session.create_proxy("SphereSource", ServerFlags::DATA_SERVER);
        session.set_property(source, "Radius", 0.5)?;
        session.set_property(source, "Center", vec![0.0, 0.0, 0.0])?;
        session.update_vtk_objects(source)?;

        let representation =
            session.create_proxy("GeometryRepresentation", ServerFlags::CLIENT_AND_SERVERS);
        session.set_property(representation, "Input", source)?;
        session.update_vtk_objects(representation)?;
        session.link_representation(source, representation)?;

        session.execute_script(&servers, "Show(); Render()")?;

        if session.validate_plugins().await? {
            log::info!("Plugin requirements are met");
        }

        for (rank, info) in session.gather_data_information(&data_servers).await? {
            log::info!("Before: rank {rank} holds {} cells", info.number_of_cells);
        }
        session.redistribute(None)?;
        for (rank, info) in session.gather_data_information(&data_servers).await? {
            log::info!("After: rank {rank} holds {} cells", info.number_of_cells);
        }

        session.delete_proxy(representation)?;
        session.delete_proxy(source)?;
        Ok(())
    }

    fn script_interpreter(&self, rank: ProcessRank) -> Box<dyn ScriptInterpreter> {
        Box::new(LoggingInterpreter { rank })
    }

    fn plugins(&self, _rank: ProcessRank) -> PluginsInformation {
        let mut plugins = PluginsInformation::with_search_paths("/opt/plugins");
        let mut thickness = PluginRecord::new("SurfaceThickness", "libSurfaceThickness.so");
        thickness.loaded = true;
        thickness.required_on_server = true;
        thickness.required_on_client = true;
        plugins.push(thickness);
        plugins
    }

    fn initial_mesh(&self, rank: ProcessRank) -> PolyData {
        if rank == self.first_data_server {
            PolyData::triangles(0, self.cells)
        } else {
            PolyData::default()
        }
    }
}

pub async fn run_session(processes: usize, cells: u64) -> Result<(), ControllerErr> {
    let config = SessionConfig::new(processes);
    let hooks = DemoFrontEnd {
        first_data_server: config.layout.data_servers().root().unwrap_or_default(),
        cells,
    };
    launch(config, Arc::new(hooks)).await
}
