// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Weighted and balanced redistribution of a distributed polygonal mesh.
//!
//! Given the number of cells each participating process holds and one positive weight
//! per process, [compute_schedule] decides which cells move from which process to
//! which other, so that afterwards every process holds its target share
//! `C * weight[p] / sum(weights)` (within one cell), while moving as few cells as
//! possible:
//!
//! 1. Targets are apportioned by largest remainder, so they sum to exactly `C`.
//! 2. Processes above their target donate, processes below receive.
//! 3. Donors and receivers are paired greedily in ascending order, every pairing
//!    moving `min(surplus, need)` cells. Donors give away their first cells.
//! 4. Every transfer is placed in the first round in which neither of its two
//!    processes already takes part, so a process finishes one transfer before the
//!    next one touches its holdings.
//!
//! [RedistributePolyData] runs the whole thing over a [ProcessGroup]: an all-gather of
//! the local counts, the (identical) schedule computation on every member, then the
//! point-to-point exchange of the cell batches round by round.

use std::cmp::Ordering;

use bytes::Bytes;
use log::debug;

use crate::controller::REDISTRIBUTION_TAG;
use crate::errors::{ControllerErr, RedistributeErr};
use crate::group::{ProcessGroup, ProcessRank};
use crate::Controller;

mod poly_data;

#[cfg(test)]
mod tests;

pub use poly_data::{Cell, PolyData};

/// One positive weight per participating process, defining each process's share of
/// the cells
#[derive(Clone, Debug, PartialEq)]
pub struct WeightVector {
    weights: Vec<f64>,
}

fn check_weight(index: usize, weight: f64) -> Result<(), RedistributeErr> {
    if weight.is_finite() && weight > 0.0 {
        Ok(())
    } else {
        Err(RedistributeErr::InvalidWeight {
            rank: index,
            weight,
        })
    }
}

impl WeightVector {
    /// Weights from explicit values, every one positive and finite
    pub fn new(weights: Vec<f64>) -> Result<Self, RedistributeErr> {
        for (index, weight) in weights.iter().enumerate() {
            check_weight(index, *weight)?;
        }
        Ok(Self { weights })
    }

    /// `n` equal weights
    pub fn uniform(n: usize) -> Self {
        Self {
            weights: vec![1.0; n],
        }
    }

    /// Set the weights of processes `start..=end` to `weight`
    pub fn set_weights(
        &mut self,
        start: usize,
        end: usize,
        weight: f64,
    ) -> Result<(), RedistributeErr> {
        if start > end || end >= self.weights.len() {
            return Err(RedistributeErr::InvalidWeightRange {
                start,
                end,
                len: self.weights.len(),
            });
        }
        check_weight(start, weight)?;
        self.weights[start..=end].fill(weight);
        Ok(())
    }

    /// Number of weights
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// Is the vector empty
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// The weight of the process at `index`
    pub fn get(&self, index: usize) -> Option<f64> {
        self.weights.get(index).copied()
    }

    /// The weights
    pub fn as_slice(&self) -> &[f64] {
        &self.weights
    }

    /// Sum of the weights
    pub fn total(&self) -> f64 {
        self.weights.iter().sum()
    }

    /// Apportion `total` cells by weight. Every target is the floor or the ceiling of
    /// the exact share and the targets sum to `total`.
    pub fn targets(&self, total: u64) -> Vec<u64> {
        if total == 0 || self.weights.is_empty() {
            return vec![0; self.weights.len()];
        }
        // scaled into (0, 1] so the sum stays finite for any valid weights
        let max = self.weights.iter().copied().fold(0.0, f64::max);
        let scaled = self.weights.iter().map(|w| w / max).collect::<Vec<_>>();
        let sum = scaled.iter().sum::<f64>();
        let exact = scaled
            .iter()
            .map(|w| (w / sum * total as f64).clamp(0.0, total as f64))
            .collect::<Vec<_>>();
        let mut targets = exact
            .iter()
            .map(|e| (e.floor() as u64).min(total))
            .collect::<Vec<_>>();

        // largest remainder first, ties to the lower index
        let mut order = (0..exact.len()).collect::<Vec<_>>();
        order.sort_by(|a, b| {
            let fa = exact[*a] - exact[*a].floor();
            let fb = exact[*b] - exact[*b].floor();
            fb.partial_cmp(&fa).unwrap_or(Ordering::Equal).then(a.cmp(b))
        });

        let total = u128::from(total);
        let assigned = targets.iter().map(|t| u128::from(*t)).sum::<u128>();
        if assigned < total {
            for index in order.iter().cycle().take((total - assigned) as usize) {
                targets[*index] += 1;
            }
        } else if assigned > total {
            // only reachable through floating point error
            let mut excess = assigned - total;
            for index in order.iter().rev().cycle() {
                if excess == 0 {
                    break;
                }
                if targets[*index] > 0 {
                    targets[*index] -= 1;
                    excess -= 1;
                }
            }
        }
        targets
    }
}

/// A contiguous run of cells in a donor's local order, as it was before the schedule
/// was applied
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellBlock {
    /// Index of the first cell
    pub start: u64,
    /// Number of cells
    pub count: u64,
}

/// One transfer of a schedule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferScheduleEntry {
    /// The donating rank
    pub source: ProcessRank,
    /// The receiving rank
    pub destination: ProcessRank,
    /// The donor's cells being moved
    pub block: CellBlock,
    /// The round in which the transfer happens
    pub round: usize,
}

impl TransferScheduleEntry {
    /// Serialize the donor's cells of this transfer
    pub fn pack(&self, input: &PolyData) -> Result<PackedTransfer, RedistributeErr> {
        let start = self.block.start as usize;
        let end = start + self.block.count as usize;
        let cells = input
            .cells()
            .get(start..end)
            .ok_or(ControllerErr::MalformedPayload("cell block out of range"))?;
        Ok(PackedTransfer {
            entry: *self,
            payload: poly_data::encode_cells(cells),
        })
    }
}

/// A transfer together with the serialized cells it carries
#[derive(Clone, Debug, PartialEq)]
pub struct PackedTransfer {
    /// The scheduled transfer
    pub entry: TransferScheduleEntry,
    /// The encoded cells
    pub payload: Bytes,
}

impl PackedTransfer {
    /// Size of the serialized cells on the wire
    pub fn byte_count(&self) -> usize {
        self.payload.len()
    }
}

/// An ordered set of transfers converting an initial cell distribution into one
/// matching the targets. Counts are indexed by position within the participating
/// group.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schedule {
    /// The transfers, in pairing order
    pub entries: Vec<TransferScheduleEntry>,
    /// Cells per process before the schedule
    pub initial_counts: Vec<u64>,
    /// Target cells per process
    pub targets: Vec<u64>,
    /// Cells per process after the schedule
    pub final_counts: Vec<u64>,
    rounds: usize,
}

impl Schedule {
    /// Number of rounds
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Does the schedule move nothing
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of cells moved
    pub fn cells_moved(&self) -> u64 {
        self.entries.iter().map(|entry| entry.block.count).sum()
    }

    /// The transfers of one round
    pub fn round(&self, round: usize) -> impl Iterator<Item = &TransferScheduleEntry> + '_ {
        self.entries.iter().filter(move |entry| entry.round == round)
    }

    /// Translate group positions into the ranks of `group`
    pub fn with_ranks(mut self, group: &ProcessGroup) -> Schedule {
        let ranks = group.iter().collect::<Vec<_>>();
        for entry in self.entries.iter_mut() {
            entry.source = ranks.get(entry.source).copied().unwrap_or(entry.source);
            entry.destination = ranks
                .get(entry.destination)
                .copied()
                .unwrap_or(entry.destination);
        }
        self
    }
}

/// Compute the schedule moving `counts` (cells held by each participating process,
/// by position) to the shares given by `weights`. Entries name processes by position.
///
/// The computation is deterministic, so every process computing it from the same
/// inputs gets the same schedule. No cells yields an empty schedule.
pub fn compute_schedule(
    counts: &[u64],
    weights: &WeightVector,
) -> Result<Schedule, RedistributeErr> {
    if counts.len() != weights.len() {
        return Err(RedistributeErr::WeightCountMismatch {
            weights: weights.len(),
            processes: counts.len(),
        });
    }
    let total = counts
        .iter()
        .try_fold(0u64, |acc, count| acc.checked_add(*count))
        .ok_or(RedistributeErr::CellCountOverflow)?;
    let targets = weights.targets(total);

    let donors = (0..counts.len())
        .filter(|p| counts[*p] > targets[*p])
        .map(|p| (p, counts[p] - targets[p]))
        .collect::<Vec<_>>();
    let receivers = (0..counts.len())
        .filter(|p| counts[*p] < targets[*p])
        .map(|p| (p, targets[p] - counts[p]))
        .collect::<Vec<_>>();

    let mut entries = vec![];
    let mut next_round = vec![0usize; counts.len()];
    let mut given = vec![0u64; counts.len()];
    let (mut d, mut r) = (0, 0);
    let (mut surplus, mut need) = (
        donors.first().map(|x| x.1).unwrap_or(0),
        receivers.first().map(|x| x.1).unwrap_or(0),
    );
    while d < donors.len() && r < receivers.len() {
        let (source, destination) = (donors[d].0, receivers[r].0);
        let count = surplus.min(need);
        let round = next_round[source].max(next_round[destination]);
        next_round[source] = round + 1;
        next_round[destination] = round + 1;
        entries.push(TransferScheduleEntry {
            source,
            destination,
            block: CellBlock {
                start: given[source],
                count,
            },
            round,
        });
        given[source] += count;
        surplus -= count;
        need -= count;
        if surplus == 0 {
            d += 1;
            surplus = donors.get(d).map(|x| x.1).unwrap_or(0);
        }
        if need == 0 {
            r += 1;
            need = receivers.get(r).map(|x| x.1).unwrap_or(0);
        }
    }

    let mut final_counts = counts.to_vec();
    for entry in entries.iter() {
        final_counts[entry.source] -= entry.block.count;
        final_counts[entry.destination] += entry.block.count;
    }
    let rounds = entries.iter().map(|e| e.round + 1).max().unwrap_or(0);
    Ok(Schedule {
        entries,
        initial_counts: counts.to_vec(),
        targets,
        final_counts,
        rounds,
    })
}

/// Redistributes the local meshes of a process group, balanced or by weight
#[derive(Clone, Debug, Default)]
pub struct RedistributePolyData {
    weights: Option<WeightVector>,
}

impl RedistributePolyData {
    /// Every process gets the same share
    pub fn balanced() -> Self {
        Self { weights: None }
    }

    /// Process `p` of the group gets the share `weights[p] / sum(weights)`
    pub fn weighted(weights: WeightVector) -> Self {
        Self {
            weights: Some(weights),
        }
    }

    fn weights_for(&self, processes: usize) -> Result<WeightVector, RedistributeErr> {
        match &self.weights {
            None => Ok(WeightVector::uniform(processes)),
            Some(weights) if weights.len() == processes => Ok(weights.clone()),
            Some(weights) => Err(RedistributeErr::WeightCountMismatch {
                weights: weights.len(),
                processes,
            }),
        }
    }

    /// Collectively compute the schedule over `group`. Every member of the group must
    /// call this. Entries name processes by rank.
    pub async fn make_schedule(
        &self,
        controller: &mut Controller,
        group: &ProcessGroup,
        input: &PolyData,
    ) -> Result<Schedule, RedistributeErr> {
        let weights = self.weights_for(group.len())?;
        let counts = controller
            .all_gather_u64(group, input.len() as u64)
            .await?;
        let schedule = compute_schedule(&counts, &weights)?.with_ranks(group);
        debug!(
            "Rank {} computed a schedule moving {} cells in {} rounds",
            controller.rank(),
            schedule.cells_moved(),
            schedule.rounds()
        );
        Ok(schedule)
    }

    /// Apply a schedule computed by [RedistributePolyData::make_schedule] to this
    /// process's mesh. The output holds the cells this process kept, in their
    /// original order, followed by the cells it received in schedule order.
    pub async fn execute_schedule(
        &self,
        controller: &mut Controller,
        schedule: &Schedule,
        input: PolyData,
    ) -> Result<PolyData, RedistributeErr> {
        let me = controller.rank();
        let mut received = vec![];
        let mut bytes_sent = 0;
        for round in 0..schedule.rounds() {
            for entry in schedule.round(round).filter(|e| e.source == me) {
                let packed = entry.pack(&input)?;
                bytes_sent += packed.byte_count();
                debug!(
                    "Rank {me} sending {} cells ({} bytes) to {} in round {round}",
                    entry.block.count,
                    packed.byte_count(),
                    entry.destination
                );
                controller.send_tagged(entry.destination, REDISTRIBUTION_TAG, packed.payload)?;
            }
            for entry in schedule.round(round).filter(|e| e.destination == me) {
                let payload = controller
                    .receive_tagged(entry.source, REDISTRIBUTION_TAG)
                    .await?;
                received.extend(poly_data::decode_cells(&payload)?);
            }
        }

        let given = schedule
            .entries
            .iter()
            .filter(|e| e.source == me)
            .map(|e| e.block.start..e.block.start + e.block.count)
            .collect::<Vec<_>>();
        let mut output = input
            .into_cells()
            .into_iter()
            .enumerate()
            .filter(|(index, _)| !given.iter().any(|range| range.contains(&(*index as u64))))
            .map(|(_, cell)| cell)
            .collect::<Vec<_>>();
        output.extend(received);
        if bytes_sent > 0 {
            debug!("Rank {me} sent {bytes_sent} bytes of cells");
        }
        Ok(PolyData::new(output))
    }

    /// Redistribute this process's mesh over `group`: [RedistributePolyData::make_schedule]
    /// then [RedistributePolyData::execute_schedule]
    pub async fn request_data(
        &self,
        controller: &mut Controller,
        group: &ProcessGroup,
        input: PolyData,
    ) -> Result<PolyData, RedistributeErr> {
        let schedule = self.make_schedule(controller, group, &input).await?;
        self.execute_schedule(controller, &schedule, input).await
    }
}
