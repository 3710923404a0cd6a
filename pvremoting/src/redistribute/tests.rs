// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::{MultiProcessController, ProcessingErr, SingleMethod};

/// Apply a schedule to explicit per-process holdings of cell ids
fn apply(schedule: &Schedule, holdings: &mut [Vec<u64>]) {
    let mut moved: Vec<(usize, Vec<u64>)> = vec![];
    for round in 0..schedule.rounds() {
        for entry in schedule.round(round) {
            let start = entry.block.start as usize;
            let end = start + entry.block.count as usize;
            moved.push((entry.destination, holdings[entry.source][start..end].to_vec()));
        }
    }
    for (position, held) in holdings.iter_mut().enumerate() {
        let given = schedule
            .entries
            .iter()
            .filter(|e| e.source == position)
            .map(|e| e.block.start as usize..(e.block.start + e.block.count) as usize)
            .collect::<Vec<_>>();
        *held = held
            .iter()
            .enumerate()
            .filter(|(index, _)| !given.iter().any(|range| range.contains(index)))
            .map(|(_, id)| *id)
            .collect();
    }
    for (destination, cells) in moved {
        holdings[destination].extend(cells);
    }
}

#[test]
fn test_one_full_process_balances_into_three_empty_ones() {
    let schedule = compute_schedule(&[100, 0, 0, 0], &WeightVector::uniform(4))
        .expect("Failed to compute schedule");
    assert_eq!(vec![25, 25, 25, 25], schedule.targets);
    assert_eq!(vec![25, 25, 25, 25], schedule.final_counts);
    assert_eq!(75, schedule.cells_moved());
    for destination in 1..4 {
        let incoming = schedule
            .entries
            .iter()
            .filter(|e| e.destination == destination)
            .map(|e| e.block.count)
            .sum::<u64>();
        assert_eq!(25, incoming);
    }
    // rank 0 takes part in every transfer, one per round
    assert_eq!(3, schedule.rounds());
}

#[test]
fn test_no_cells_yield_an_empty_schedule() {
    let schedule = compute_schedule(&[0, 0, 0], &WeightVector::uniform(3))
        .expect("Failed to compute schedule");
    assert!(schedule.is_empty());
    assert_eq!(0, schedule.rounds());
    assert_eq!(vec![0, 0, 0], schedule.final_counts);
}

#[test]
fn test_balanced_input_moves_nothing() {
    let schedule = compute_schedule(&[7, 7, 6], &WeightVector::uniform(3))
        .expect("Failed to compute schedule");
    assert!(schedule.is_empty());
    assert_eq!(vec![7, 7, 6], schedule.final_counts);
}

#[test]
fn test_weighted_targets() {
    let weights = WeightVector::new(vec![1.0, 3.0]).expect("Valid weights");
    let schedule = compute_schedule(&[10, 10], &weights).expect("Failed to compute schedule");
    assert_eq!(vec![5, 15], schedule.targets);
    assert_eq!(
        vec![TransferScheduleEntry {
            source: 0,
            destination: 1,
            block: CellBlock { start: 0, count: 5 },
            round: 0,
        }],
        schedule.entries
    );
}

#[test]
fn test_largest_remainder_targets() {
    // 10 cells over 3 equal shares: 3.33 each, the lowest index takes the extra cell
    assert_eq!(vec![4, 3, 3], WeightVector::uniform(3).targets(10));
    // 0.4 / 1.6 / 2.0 of 4 cells: remainders .4, .6, .0
    let weights = WeightVector::new(vec![1.0, 4.0, 5.0]).expect("Valid weights");
    assert_eq!(vec![0, 2, 2], weights.targets(4));
}

#[test]
fn test_extreme_weights_keep_their_proportions() {
    // the raw sum of these weights overflows to infinity
    let weights = WeightVector::new(vec![1e308, 5e307, 5e307]).expect("Valid weights");
    let schedule = compute_schedule(&[100, 0, 0], &weights).expect("Failed to compute schedule");
    assert_eq!(vec![50, 25, 25], schedule.targets);
    assert_eq!(vec![50, 25, 25], schedule.final_counts);

    let weights = WeightVector::new(vec![1e308, 1.0]).expect("Valid weights");
    let schedule = compute_schedule(&[0, 10], &weights).expect("Failed to compute schedule");
    assert_eq!(vec![10, 0], schedule.targets);
    assert_eq!(
        vec![TransferScheduleEntry {
            source: 1,
            destination: 0,
            block: CellBlock { start: 0, count: 10 },
            round: 0,
        }],
        schedule.entries
    );

    let weights = WeightVector::new(vec![f64::MAX, f64::MAX]).expect("Valid weights");
    assert_eq!(vec![u64::MAX / 2 + 1, u64::MAX / 2], weights.targets(u64::MAX));
}

#[test]
fn test_cell_total_overflow_is_an_error() {
    assert!(matches!(
        compute_schedule(&[u64::MAX, 1], &WeightVector::uniform(2)),
        Err(RedistributeErr::CellCountOverflow)
    ));
}

#[test]
fn test_packed_transfer_reports_its_size() {
    let input = PolyData::triangles(0, 10);
    let entry = TransferScheduleEntry {
        source: 0,
        destination: 1,
        block: CellBlock { start: 4, count: 3 },
        round: 0,
    };
    let packed = entry.pack(&input).expect("Failed to pack");
    assert_eq!(entry, packed.entry);
    assert!(packed.byte_count() > 0);
    assert_eq!(packed.payload.len(), packed.byte_count());
    let cells = poly_data::decode_cells(&packed.payload).expect("Failed to decode cells");
    assert_eq!(vec![4, 5, 6], cells.iter().map(|c| c.id).collect::<Vec<_>>());

    let outside = TransferScheduleEntry {
        block: CellBlock { start: 8, count: 3 },
        ..entry
    };
    assert!(outside.pack(&input).is_err());
}

#[test]
fn test_invalid_weights_are_rejected() {
    assert!(matches!(
        WeightVector::new(vec![1.0, 0.0]),
        Err(RedistributeErr::InvalidWeight { rank: 1, .. })
    ));
    assert!(matches!(
        WeightVector::new(vec![-2.0]),
        Err(RedistributeErr::InvalidWeight { rank: 0, .. })
    ));
    assert!(WeightVector::new(vec![1.0, f64::NAN]).is_err());
    assert!(WeightVector::new(vec![f64::INFINITY]).is_err());

    let mut weights = WeightVector::uniform(4);
    assert!(matches!(
        weights.set_weights(2, 4, 1.0),
        Err(RedistributeErr::InvalidWeightRange { start: 2, end: 4, len: 4 })
    ));
    assert!(weights.set_weights(3, 1, 1.0).is_err());
    assert!(matches!(
        weights.set_weights(0, 1, 0.0),
        Err(RedistributeErr::InvalidWeight { .. })
    ));
    weights.set_weights(1, 2, 3.0).expect("Valid range");
    assert_eq!(&[1.0, 3.0, 3.0, 1.0], weights.as_slice());
    assert_eq!(8.0, weights.total());

    assert!(matches!(
        compute_schedule(&[1, 2], &WeightVector::uniform(3)),
        Err(RedistributeErr::WeightCountMismatch {
            weights: 3,
            processes: 2
        })
    ));
}

#[test]
fn test_random_schedules_conserve_and_converge() {
    let mut rng = StdRng::seed_from_u64(0x5eed_0042);
    for _ in 0..500 {
        let n = rng.gen_range(1..=9);
        let counts = (0..n)
            .map(|_| if rng.gen_bool(0.3) { 0 } else { rng.gen_range(0..300) })
            .collect::<Vec<u64>>();
        let weights = if rng.gen_bool(0.5) {
            WeightVector::uniform(n)
        } else {
            WeightVector::new((0..n).map(|_| rng.gen_range(0.1..10.0)).collect())
                .expect("Valid weights")
        };
        let schedule = compute_schedule(&counts, &weights).expect("Failed to compute schedule");

        let total = counts.iter().sum::<u64>();
        assert_eq!(total, schedule.final_counts.iter().sum::<u64>());
        let sum = weights.total();
        for p in 0..n {
            let share = (total as f64 * weights.as_slice()[p] / sum).round();
            assert!((schedule.final_counts[p] as f64 - share).abs() <= 1.0);
        }
        assert!(schedule.entries.len() < n.max(1) * 2);

        // a process takes part in at most one transfer per round
        for round in 0..schedule.rounds() {
            let mut busy = BTreeSet::new();
            for entry in schedule.round(round) {
                assert_ne!(entry.source, entry.destination);
                assert!(entry.block.count > 0);
                assert!(busy.insert(entry.source));
                assert!(busy.insert(entry.destination));
            }
        }

        // every cell ends up in exactly one place
        let mut next_id = 0;
        let mut holdings = counts
            .iter()
            .map(|count| {
                let ids = (next_id..next_id + count).collect::<Vec<_>>();
                next_id += count;
                ids
            })
            .collect::<Vec<_>>();
        apply(&schedule, &mut holdings);
        let mut all = holdings.iter().flatten().copied().collect::<Vec<_>>();
        assert_eq!(
            schedule.final_counts,
            holdings.iter().map(|h| h.len() as u64).collect::<Vec<_>>()
        );
        all.sort_unstable();
        assert_eq!((0..total).collect::<Vec<_>>(), all);
    }
}

type Results = Mutex<BTreeMap<ProcessRank, Vec<u64>>>;

struct Redistribute {
    redistribution: RedistributePolyData,
    initial: Vec<u64>,
}

#[async_trait::async_trait]
impl SingleMethod for Redistribute {
    type Arguments = Results;

    async fn run(
        &self,
        mut controller: Controller,
        results: Arc<Results>,
    ) -> Result<(), ProcessingErr> {
        let rank = controller.rank();
        let first_id = self.initial[..rank].iter().sum::<u64>();
        let input = PolyData::triangles(first_id, self.initial[rank]);
        let world = controller.world();
        let output = self
            .redistribution
            .request_data(&mut controller, &world, input)
            .await?;
        let ids = output.cells().iter().map(|c| c.id).collect();
        results
            .lock()
            .map_err(|_| "results poisoned")?
            .insert(rank, ids);
        Ok(())
    }
}

async fn redistribute(
    redistribution: RedistributePolyData,
    initial: Vec<u64>,
) -> BTreeMap<ProcessRank, Vec<u64>> {
    let results = Arc::new(Results::default());

    struct Shared(Redistribute, Arc<Results>);

    #[async_trait::async_trait]
    impl SingleMethod for Shared {
        type Arguments = ();

        async fn run(&self, controller: Controller, _: Arc<()>) -> Result<(), ProcessingErr> {
            self.0.run(controller, self.1.clone()).await
        }
    }

    let mut group =
        MultiProcessController::initialize(initial.len()).expect("Failed to initialize");
    group.set_single_method(
        Shared(
            Redistribute {
                redistribution,
                initial,
            },
            results.clone(),
        ),
        (),
    );
    group
        .single_method_execute()
        .await
        .expect("A process aborted");
    let results = results.lock().expect("Results poisoned").clone();
    results
}

#[tokio::test]
async fn test_distributed_balanced_redistribution() {
    let results = redistribute(RedistributePolyData::balanced(), vec![100, 0, 0, 0]).await;
    for ids in results.values() {
        assert_eq!(25, ids.len());
    }
    // the donor keeps its last cells, in order
    assert_eq!((75..100).collect::<Vec<_>>(), results[&0]);
    assert_eq!((0..25).collect::<Vec<_>>(), results[&1]);
    let mut all = results.values().flatten().copied().collect::<Vec<_>>();
    all.sort_unstable();
    assert_eq!((0..100).collect::<Vec<_>>(), all);
}

#[tokio::test]
async fn test_distributed_weighted_redistribution() {
    let weights = WeightVector::new(vec![1.0, 1.0, 2.0]).expect("Valid weights");
    let results = redistribute(RedistributePolyData::weighted(weights), vec![10, 30, 0]).await;
    assert_eq!(
        vec![10, 10, 20],
        results.values().map(|ids| ids.len()).collect::<Vec<_>>()
    );
    // kept cells first, then the received ones
    assert_eq!((30..40).collect::<Vec<_>>(), results[&1]);
    assert_eq!((10..30).collect::<Vec<_>>(), results[&2]);
}

#[tokio::test]
async fn test_weight_mismatch_fails_before_communicating() {
    let mut controller = Controller::builtin();
    let weights = WeightVector::uniform(2);
    let world = controller.world();
    let result = RedistributePolyData::weighted(weights)
        .request_data(&mut controller, &world, PolyData::triangles(0, 5))
        .await;
    assert!(matches!(
        result,
        Err(RedistributeErr::WeightCountMismatch {
            weights: 2,
            processes: 1
        })
    ));
    assert_eq!(0, controller.messages_sent());
}

#[tokio::test]
async fn test_single_process_keeps_its_cells() {
    let mut controller = Controller::builtin();
    let world = controller.world();
    let output = RedistributePolyData::balanced()
        .request_data(&mut controller, &world, PolyData::triangles(0, 5))
        .await
        .expect("Failed to redistribute");
    assert_eq!(PolyData::triangles(0, 5), output);
}
