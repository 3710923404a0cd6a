// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! `pvremoting`: the multi-process proxy/session layer of a parallel visualization
//! application.
//!
//! A group of processes is launched by a [MultiProcessController]. Every process runs
//! the same entry routine and receives its own [Controller], which knows the process's
//! rank and offers
//!
//! 1. A remote-method-invocation (RMI) table keyed by integer tags, served by
//!    [Controller::process_rmis] on slave processes
//! 2. Point-to-point messaging ([Controller::send], [Controller::receive])
//! 3. Collectives over a [ProcessGroup] (gather, broadcast, reductions, barriers)
//!
//! On top of the controller sit
//!
//! * [session]: the master/slave bootstrap. Rank 0 hosts the front end, every other
//!   rank serves RMIs until the master tears the session down.
//! * [proxy]: client-side proxies whose property changes are batched and pushed to
//!   the mirrored objects living on remote processes.
//! * [plugins]: information about the plugins loaded on each process and validation
//!   of cross-process plugin requirements.
//! * [redistribute]: the weighted/balanced polygon-data redistribution scheduler.
//!
//! ## Example
//!
//! ```rust
//! use pvremoting::{Controller, MultiProcessController, ProcessingErr, SingleMethod};
//! use std::sync::Arc;
//!
//! struct CountCells;
//!
//! #[async_trait::async_trait]
//! impl SingleMethod for CountCells {
//!     type Arguments = u64;
//!
//!     async fn run(
//!         &self,
//!         mut controller: Controller,
//!         cells: Arc<u64>,
//!     ) -> Result<(), ProcessingErr> {
//!         let world = controller.world();
//!         let total = controller.all_reduce_sum(&world, *cells).await?;
//!         assert_eq!(total, *cells * controller.number_of_processes() as u64);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut group = MultiProcessController::initialize(4).expect("Failed to initialize");
//!     group.set_single_method(CountCells, 10);
//!     group.single_method_execute().await.expect("A process aborted");
//! }
//! ```

#![warn(unused_imports)]
#![warn(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod concurrency;
pub mod controller;
pub mod errors;
pub mod group;
pub mod plugins;
pub mod protocol;
pub mod proxy;
pub mod redistribute;
pub mod session;


// ============== Re-exports ============== //
pub use controller::rmi::{RmiHandler, RmiMessage, RmiOperation, RmiTag};
pub use controller::{Controller, MessageTag, MultiProcessController, SingleMethod};
pub use errors::{ControllerErr, ProcessingErr, ProxyErr, RedistributeErr, RemotingErr};
pub use group::{ProcessGroup, ProcessLayout, ProcessRank, ServerFlags};
pub use plugins::{PluginRecord, PluginsInformation};
pub use proxy::{PropertyValue, Proxy, ProxyId, ProxyManager};
pub use redistribute::{PolyData, RedistributePolyData, Schedule, WeightVector};
pub use session::{MasterSession, Role, ScriptInterpreter, SessionConfig, SessionHooks};
