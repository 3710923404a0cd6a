// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use super::*;
use crate::errors::{RedistributeErr, RemotingErr};
use crate::group::{ProcessGroup, ServerFlags};
use crate::plugins::PluginRecord;
use crate::redistribute::WeightVector;

type Scripts = Arc<Mutex<Vec<(ProcessRank, String)>>>;

type FrontEnd = for<'a> fn(&'a mut MasterSession) -> BoxFuture<'a, Result<(), ProcessingErr>>;

struct RecordingInterpreter {
    rank: ProcessRank,
    scripts: Scripts,
}

impl ScriptInterpreter for RecordingInterpreter {
    fn execute(&mut self, script: &str) -> Result<(), ProcessingErr> {
        if script == "fail" {
            return Err(format!("script failed on rank {}", self.rank).into());
        }
        self.scripts
            .lock()
            .map_err(|_| "scripts poisoned")?
            .push((self.rank, script.to_string()));
        Ok(())
    }
}

struct TestHooks {
    front_end: FrontEnd,
    scripts: Scripts,
    cells: BTreeMap<ProcessRank, u64>,
    plugins: BTreeMap<ProcessRank, PluginsInformation>,
}

impl TestHooks {
    fn new(front_end: FrontEnd) -> Self {
        Self {
            front_end,
            scripts: Scripts::default(),
            cells: BTreeMap::new(),
            plugins: BTreeMap::new(),
        }
    }

    fn with_cells(mut self, rank: ProcessRank, count: u64) -> Self {
        self.cells.insert(rank, count);
        self
    }

    fn with_plugins(mut self, rank: ProcessRank, plugins: PluginsInformation) -> Self {
        self.plugins.insert(rank, plugins);
        self
    }

    fn scripts(&self) -> Vec<(ProcessRank, String)> {
        let mut scripts = self.scripts.lock().expect("Scripts poisoned").clone();
        scripts.sort();
        scripts
    }
}

#[async_trait::async_trait]
impl SessionHooks for TestHooks {
    async fn run_front_end(&self, session: &mut MasterSession) -> Result<(), ProcessingErr> {
        (self.front_end)(session).await
    }

    fn script_interpreter(&self, rank: ProcessRank) -> Box<dyn ScriptInterpreter> {
        Box::new(RecordingInterpreter {
            rank,
            scripts: self.scripts.clone(),
        })
    }

    fn plugins(&self, rank: ProcessRank) -> PluginsInformation {
        self.plugins.get(&rank).cloned().unwrap_or_default()
    }

    fn initial_mesh(&self, rank: ProcessRank) -> PolyData {
        let count = self.cells.get(&rank).copied().unwrap_or_default();
        PolyData::triangles(rank as u64 * 1000, count)
    }
}

fn cell_counts(information: &[(ProcessRank, crate::protocol::DataInformation)]) -> Vec<u64> {
    information.iter().map(|(_, info)| info.number_of_cells).collect()
}

#[test]
fn test_roles_and_config() {
    let layout = ProcessLayout::classic(3);
    assert_eq!(Role::Master, Role::for_rank(0, &layout));
    assert_eq!(Role::Slave, Role::for_rank(2, &layout));

    let config = SessionConfig::new(3);
    assert_eq!(layout, config.layout);
    assert_eq!(SCRIPT_RMI_TAG, config.script_tag);
    assert!(matches!(
        SessionConfig::with_layout(3, ProcessLayout::classic(4)),
        Err(ControllerErr::InvalidRank(3))
    ));
}

fn full_session(session: &mut MasterSession) -> BoxFuture<'_, Result<(), ProcessingErr>> {
    Box::pin(async move {
        let servers = session.layout().resolve(ServerFlags::SERVERS);
        let sphere = session.create_proxy("Sphere", ServerFlags::SERVERS);
        session.set_property(sphere, "Radius", 2.5)?;
        session.update_vtk_objects(sphere)?;
        assert!(!session.proxies().proxy(sphere).map(|p| p.is_dirty()).unwrap_or(true));

        session.execute_script(&servers, "print('hello')")?;
        session.redistribute(None)?;
        let information = session.gather_data_information(&servers).await?;
        assert_eq!(vec![34, 33, 33], cell_counts(&information));
        assert_eq!(vec![1, 2, 3], information.iter().map(|(rank, _)| *rank).collect::<Vec<_>>());

        session.delete_proxy(sphere)?;
        Ok(())
    })
}

#[tokio::test]
async fn test_full_session() {
    let hooks = Arc::new(TestHooks::new(full_session).with_cells(1, 100));
    launch(SessionConfig::new(4), hooks.clone())
        .await
        .expect("Session failed");
    assert_eq!(
        vec![
            (1, "print('hello')".to_string()),
            (2, "print('hello')".to_string()),
            (3, "print('hello')".to_string()),
        ],
        hooks.scripts()
    );
}

fn weighted_session(session: &mut MasterSession) -> BoxFuture<'_, Result<(), ProcessingErr>> {
    Box::pin(async move {
        let workers = session.layout().workers();
        let mismatched = WeightVector::uniform(2);
        assert!(matches!(
            session.redistribute(Some(&mismatched)),
            Err(RemotingErr::Redistribute(RedistributeErr::WeightCountMismatch {
                weights: 2,
                processes: 3
            }))
        ));

        let weights = WeightVector::new(vec![1.0, 1.0, 2.0])?;
        session.redistribute(Some(&weights))?;
        let information = session.gather_data_information(&workers).await?;
        assert_eq!(vec![10, 10, 20], cell_counts(&information));

        // a second, balanced pass over the already weighted data
        session.redistribute(None)?;
        let information = session.gather_data_information(&workers).await?;
        assert_eq!(vec![14, 13, 13], cell_counts(&information));
        Ok(())
    })
}

#[tokio::test]
async fn test_weighted_redistribution_through_the_session() {
    let hooks = Arc::new(
        TestHooks::new(weighted_session)
            .with_cells(1, 30)
            .with_cells(3, 10),
    );
    launch(SessionConfig::new(4), hooks)
        .await
        .expect("Session failed");
}

fn builtin_session(session: &mut MasterSession) -> BoxFuture<'_, Result<(), ProcessingErr>> {
    Box::pin(async move {
        let world = session.controller().world();
        session.execute_script(&world, "local")?;
        session.redistribute(None)?;
        let information = session.gather_data_information(&world).await?;
        assert_eq!(vec![5], cell_counts(&information));
        assert_eq!(15, information[0].1.number_of_points);

        let cone = session.create_proxy("Cone", ServerFlags::CLIENT_AND_SERVERS);
        session.set_property(cone, "Height", 3)?;
        session.update_vtk_objects(cone)?;
        let mirror = session
            .proxies()
            .local_mirrors()
            .get(cone)
            .ok_or("missing local mirror")?;
        assert_eq!("Cone", mirror.type_tag());

        assert_eq!(0, session.controller().messages_sent());
        Ok(())
    })
}

#[tokio::test]
async fn test_builtin_session_runs_everything_locally() {
    let hooks = Arc::new(TestHooks::new(builtin_session).with_cells(0, 5));
    launch(SessionConfig::new(1), hooks.clone())
        .await
        .expect("Session failed");
    assert_eq!(vec![(0, "local".to_string())], hooks.scripts());
}

fn failing_script(session: &mut MasterSession) -> BoxFuture<'_, Result<(), ProcessingErr>> {
    Box::pin(async move {
        session.execute_script(&ProcessGroup::single(2), "fail")?;
        Ok(())
    })
}

#[tokio::test]
async fn test_script_failure_aborts_the_session() {
    let hooks = Arc::new(TestHooks::new(failing_script));
    let result = launch(SessionConfig::new(3), hooks).await;
    assert!(matches!(
        result,
        Err(ControllerErr::ProcessAborted { rank: Some(2), .. })
    ));
}

fn failing_front_end(_session: &mut MasterSession) -> BoxFuture<'_, Result<(), ProcessingErr>> {
    Box::pin(async move { Err("front end gave up".into()) })
}

#[tokio::test]
async fn test_front_end_failure_aborts_the_session() {
    let hooks = Arc::new(TestHooks::new(failing_front_end));
    match launch(SessionConfig::new(3), hooks).await {
        Err(ControllerErr::ProcessAborted { rank, reason }) => {
            assert_eq!(Some(0), rank);
            assert!(reason.contains("front end gave up"));
        }
        other => panic!("Expected an aborted session, got {other:?}"),
    }
}

fn plugin_session(session: &mut MasterSession) -> BoxFuture<'_, Result<(), ProcessingErr>> {
    Box::pin(async move {
        let remote = session.gather_plugins_information(2).await?;
        assert!(remote.find("Base").map(|p| p.loaded).unwrap_or(false));

        assert!(!session.validate_plugins().await?);
        assert_eq!(
            Some("Must be loaded on Server as well"),
            session
                .client_plugins()
                .find("ClientThing")
                .map(|p| p.status_message.as_str())
        );
        let servers = session.server_plugins().ok_or("server plugins not gathered")?;
        assert_eq!(1, servers.len());
        Ok(())
    })
}

#[tokio::test]
async fn test_plugin_validation_across_processes() {
    let mut client = PluginsInformation::new();
    let mut client_thing = PluginRecord::new("ClientThing", "libClientThing.so");
    client_thing.loaded = true;
    client_thing.required_on_server = true;
    client.push(client_thing);

    let mut server = PluginsInformation::new();
    let mut base = PluginRecord::new("Base", "libBase.so");
    base.loaded = true;
    server.push(base);

    let hooks = TestHooks::new(plugin_session)
        .with_plugins(0, client)
        .with_plugins(1, server.clone())
        .with_plugins(2, server);
    launch(SessionConfig::new(3), Arc::new(hooks))
        .await
        .expect("Session failed");
}

fn render_only_session(session: &mut MasterSession) -> BoxFuture<'_, Result<(), ProcessingErr>> {
    Box::pin(async move {
        let render_servers = session.layout().render_servers().clone();
        session.execute_script(&render_servers, "render")?;
        session.redistribute(None)?;
        let data_servers = session.layout().data_servers().clone();
        let information = session.gather_data_information(&data_servers).await?;
        assert_eq!(vec![5, 5], cell_counts(&information));
        Ok(())
    })
}

#[tokio::test]
async fn test_split_layout_with_custom_script_tag() {
    let layout = ProcessLayout::new(0, ProcessGroup::range(1, 3), ProcessGroup::single(3));
    let config = SessionConfig::with_layout(4, layout)
        .expect("Valid layout")
        .with_script_tag(4242);
    let hooks = Arc::new(TestHooks::new(render_only_session).with_cells(2, 10));
    launch(config, hooks.clone()).await.expect("Session failed");
    assert_eq!(vec![(3, "render".to_string())], hooks.scripts());
}
