// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Drives complete sessions through the public API on a multi-threaded runtime

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use pvremoting::session::launch;
use pvremoting::{
    MasterSession, PluginRecord, PluginsInformation, PolyData, ProcessGroup, ProcessRank,
    ProcessingErr, ScriptInterpreter, ServerFlags, SessionConfig, SessionHooks, WeightVector,
};

type Scripts = Arc<Mutex<BTreeMap<ProcessRank, Vec<String>>>>;

struct Recorder {
    rank: ProcessRank,
    scripts: Scripts,
}

impl ScriptInterpreter for Recorder {
    fn execute(&mut self, script: &str) -> Result<(), ProcessingErr> {
        self.scripts
            .lock()
            .map_err(|_| "scripts poisoned")?
            .entry(self.rank)
            .or_default()
            .push(script.to_string());
        Ok(())
    }
}

struct Pipeline {
    scripts: Scripts,
    cells_per_server: u64,
}

fn plugins() -> PluginsInformation {
    let mut plugins = PluginsInformation::with_search_paths("/opt/plugins");
    let mut shared = PluginRecord::new("Shared", "libShared.so");
    shared.loaded = true;
    shared.required_on_client = true;
    shared.required_on_server = true;
    plugins.push(shared);
    plugins
}

#[async_trait::async_trait]
impl SessionHooks for Pipeline {
    async fn run_front_end(&self, session: &mut MasterSession) -> Result<(), ProcessingErr> {
        let workers = session.layout().workers();
        let servers = session.layout().resolve(ServerFlags::SERVERS);
        assert!(session.validate_plugins().await?);

        let reader = session.create_proxy("Reader", ServerFlags::DATA_SERVER);
        let filter = session.create_proxy("Clip", ServerFlags::DATA_SERVER);
        session.set_property(reader, "FileName", "can.ex2")?;
        session.set_property(filter, "Input", reader)?;
        session.set_property(filter, "Normal", vec![1.0, 0.0, 0.0])?;
        session.update_vtk_objects(reader)?;
        session.update_vtk_objects(filter)?;
        assert!(session.delete_proxy(reader).is_err());

        for step in 0..5 {
            session.execute_script(&servers, &format!("step {step}"))?;
        }

        let total = self.cells_per_server * workers.len() as u64;
        let mut weights = WeightVector::uniform(workers.len());
        weights.set_weights(0, 0, 3.0)?;
        session.redistribute(Some(&weights))?;
        let information = session.gather_data_information(&workers).await?;
        let counts = information
            .iter()
            .map(|(_, info)| info.number_of_cells)
            .collect::<Vec<_>>();
        assert_eq!(total, counts.iter().sum::<u64>());
        assert_eq!(weights.targets(total), counts);

        session.redistribute(None)?;
        let information = session.gather_data_information(&workers).await?;
        for (_, info) in information {
            assert_eq!(self.cells_per_server, info.number_of_cells);
        }

        session.delete_proxy(filter)?;
        session.delete_proxy(reader)?;
        assert!(session.proxies().is_empty());
        Ok(())
    }

    fn script_interpreter(&self, rank: ProcessRank) -> Box<dyn ScriptInterpreter> {
        Box::new(Recorder {
            rank,
            scripts: self.scripts.clone(),
        })
    }

    fn plugins(&self, _rank: ProcessRank) -> PluginsInformation {
        plugins()
    }

    fn initial_mesh(&self, rank: ProcessRank) -> PolyData {
        PolyData::triangles(rank as u64 * self.cells_per_server, self.cells_per_server)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pipeline_session() {
    let hooks = Arc::new(Pipeline {
        scripts: Scripts::default(),
        cells_per_server: 60,
    });
    launch(SessionConfig::new(5), hooks.clone())
        .await
        .expect("Session failed");

    let scripts = hooks.scripts.lock().expect("Scripts poisoned");
    let expected = (0..5).map(|step| format!("step {step}")).collect::<Vec<_>>();
    assert_eq!(vec![1, 2, 3, 4], scripts.keys().copied().collect::<Vec<_>>());
    for executed in scripts.values() {
        // scripts reach every server in the order they were sent
        assert_eq!(&expected, executed);
    }
}

struct Unreachable;

#[async_trait::async_trait]
impl SessionHooks for Unreachable {
    async fn run_front_end(&self, session: &mut MasterSession) -> Result<(), ProcessingErr> {
        let servers = session.layout().resolve(ServerFlags::SERVERS);
        session.controller().sever(2);
        assert!(session.execute_script(&servers, "ping").is_err());

        let proxy = session.create_proxy("Sphere", ServerFlags::SERVERS);
        session.set_property(proxy, "Radius", 1.0)?;
        assert!(session.update_vtk_objects(proxy).is_err());
        assert!(session.proxies().proxy(proxy).map(|p| p.is_dirty()).unwrap_or(false));

        session.controller().restore(2);
        session.update_vtk_objects(proxy)?;
        session.execute_script(&ProcessGroup::single(2), "ping")?;
        Ok(())
    }

    fn script_interpreter(&self, _rank: ProcessRank) -> Box<dyn ScriptInterpreter> {
        struct Quiet;
        impl ScriptInterpreter for Quiet {
            fn execute(&mut self, _script: &str) -> Result<(), ProcessingErr> {
                Ok(())
            }
        }
        Box::new(Quiet)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_session_recovers_from_a_severed_server() {
    launch(SessionConfig::new(3), Arc::new(Unreachable))
        .await
        .expect("Session failed");
}
