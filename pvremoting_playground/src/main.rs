// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

use std::env;

use clap::Parser;

mod distributed;
mod schedule;

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run an in-process session where the client builds a small pipeline, runs a
    /// script on the servers and rebalances the mesh
    Session {
        /// Number of processes in the group, the client included
        processes: usize,
        /// Number of cells initially held by the first data server
        cells: u64,
    },
    /// Print the transfer schedule which redistributes the given per-process cell counts
    Schedule {
        /// Comma-separated cell counts, one per process
        #[arg(value_delimiter = ',')]
        counts: Vec<u64>,
        /// Comma-separated process weights. Balanced if omitted.
        #[arg(short, long, value_delimiter = ',')]
        weights: Option<Vec<f64>>,
    },
}

/// Playground for the pvremoting session layer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// The log filter used when `RUST_LOG` is not set (e.g. info, debug,
    /// pvremoting::controller=trace)
    #[arg(short, long, default_value = "debug")]
    log: String,
}

// MAIN //
#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() {
    let args = Args::parse();

    // if it's not set, set the log level from the CLI
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", &args.log);
    }
    env_logger::builder().format_timestamp_millis().init();

    match args.command {
        Command::Session { processes, cells } => {
            tokio::select! {
                out = distributed::run_session(processes, cells) => {
                    if let Err(err) = out {
                        log::error!("Session failed: {err}");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    log::info!("CTRL-C pressed, exiting session");
                }
            }
        }
        Command::Schedule { counts, weights } => {
            schedule::print_schedule(counts, weights);
        }
    }
    log::info!("Playground exiting");
}
