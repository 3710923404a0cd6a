// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The local piece of a distributed polygonal mesh

use bytes::Bytes;
use prost::Message;

use crate::errors::{ControllerErr, RedistributeErr};
use crate::protocol::{CellBatch, CellMessage};

/// One polygonal cell
#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    /// Global cell id, unique across the distributed mesh
    pub id: u64,
    /// The cell's points
    pub points: Vec<[f64; 3]>,
}

impl Cell {
    fn to_message(&self) -> CellMessage {
        CellMessage {
            id: self.id,
            points: self.points.iter().flatten().copied().collect(),
        }
    }

    fn from_message(message: CellMessage) -> Result<Self, RedistributeErr> {
        if message.points.len() % 3 != 0 {
            return Err(ControllerErr::MalformedPayload("cell points are not xyz triples").into());
        }
        Ok(Self {
            id: message.id,
            points: message
                .points
                .chunks_exact(3)
                .map(|xyz| [xyz[0], xyz[1], xyz[2]])
                .collect(),
        })
    }
}

/// The cells a process holds, in local order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PolyData {
    cells: Vec<Cell>,
}

impl PolyData {
    /// A mesh of the given cells
    pub fn new(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    /// `count` unit triangles with ids `first_id..first_id + count`, strung along x
    pub fn triangles(first_id: u64, count: u64) -> Self {
        (first_id..first_id + count)
            .map(|id| {
                let x = id as f64;
                Cell {
                    id,
                    points: vec![[x, 0.0, 0.0], [x + 1.0, 0.0, 0.0], [x, 1.0, 0.0]],
                }
            })
            .collect()
    }

    /// The cells
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Take the cells
    pub fn into_cells(self) -> Vec<Cell> {
        self.cells
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Does the mesh have no cells
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Number of points over all cells
    pub fn number_of_points(&self) -> usize {
        self.cells.iter().map(|cell| cell.points.len()).sum()
    }

    /// Append a cell
    pub fn push(&mut self, cell: Cell) {
        self.cells.push(cell);
    }
}

impl FromIterator<Cell> for PolyData {
    fn from_iter<T: IntoIterator<Item = Cell>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

pub(crate) fn encode_cells(cells: &[Cell]) -> Bytes {
    let batch = CellBatch {
        cells: cells.iter().map(Cell::to_message).collect(),
    };
    Bytes::from(batch.encode_to_vec())
}

pub(crate) fn decode_cells(buf: &[u8]) -> Result<Vec<Cell>, RedistributeErr> {
    CellBatch::decode(buf)?
        .cells
        .into_iter()
        .map(Cell::from_message)
        .collect()
}
