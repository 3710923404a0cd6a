// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

use pvremoting::redistribute::compute_schedule;
use pvremoting::WeightVector;

pub fn print_schedule(counts: Vec<u64>, weights: Option<Vec<f64>>) {
    let weights = match weights {
        Some(weights) => match WeightVector::new(weights) {
            Ok(weights) => weights,
            Err(err) => {
                log::error!("Invalid weights: {err}");
                return;
            }
        },
        None => WeightVector::uniform(counts.len()),
    };

    let schedule = match compute_schedule(&counts, &weights) {
        Ok(schedule) => schedule,
        Err(err) => {
            log::error!("Failed to compute the schedule: {err}");
            return;
        }
    };
    log::info!("Initial counts {:?}", schedule.initial_counts);
    log::info!("Targets        {:?}", schedule.targets);
    for round in 0..schedule.rounds() {
        for entry in schedule.round(round) {
            log::info!(
                "Round {round}: {} -> {} cells [{}, {})",
                entry.source,
                entry.destination,
                entry.block.start,
                entry.block.start + entry.block.count
            );
        }
    }
    log::info!(
        "{} cells moved in {} rounds, final counts {:?}",
        schedule.cells_moved(),
        schedule.rounds(),
        schedule.final_counts
    );
}
