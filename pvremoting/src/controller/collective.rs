// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Collective operations over a [ProcessGroup].
//!
//! Every collective is rooted at the group's lowest rank. Every member of the group
//! must call the same collectives in the same order; a mismatched sequence is not
//! detected and leads to undefined results or a hang. Collectives travel on a reserved
//! message tag, so they never collide with user point-to-point traffic.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{Controller, COLLECTIVE_TAG};
use crate::errors::ControllerErr;
use crate::group::{ProcessGroup, ProcessRank};

/// Concatenate length-prefixed frames
fn frame(parts: &[Bytes]) -> Bytes {
    let capacity = parts.iter().map(|part| part.len() + 4).sum();
    let mut buf = BytesMut::with_capacity(capacity);
    for part in parts {
        buf.put_u32(part.len() as u32);
        buf.put_slice(part);
    }
    buf.freeze()
}

fn unframe(mut buf: Bytes) -> Result<Vec<Bytes>, ControllerErr> {
    let mut parts = Vec::new();
    while buf.has_remaining() {
        if buf.remaining() < 4 {
            return Err(ControllerErr::MalformedPayload("truncated frame length"));
        }
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(ControllerErr::MalformedPayload("truncated frame"));
        }
        parts.push(buf.split_to(len));
    }
    Ok(parts)
}

fn decode_u64(mut buf: Bytes) -> Result<u64, ControllerErr> {
    if buf.remaining() != 8 {
        return Err(ControllerErr::MalformedPayload("expected a u64"));
    }
    Ok(buf.get_u64())
}

fn encode_u64(value: u64) -> Bytes {
    Bytes::copy_from_slice(&value.to_be_bytes())
}

fn sum_u64s(parts: Vec<Bytes>) -> Result<u64, ControllerErr> {
    parts.into_iter().try_fold(0u64, |sum, part| {
        sum.checked_add(decode_u64(part)?)
            .ok_or(ControllerErr::MalformedPayload("reduced sum overflows u64"))
    })
}

impl Controller {
    /// The root of `group`, checking this process takes part in it
    fn collective_root(&self, group: &ProcessGroup) -> Result<ProcessRank, ControllerErr> {
        if !group.contains(self.rank) {
            return Err(ControllerErr::NotInGroup(self.rank));
        }
        group.root().ok_or(ControllerErr::NotInGroup(self.rank))
    }

    /// Gather one payload per member at the group's root.
    ///
    /// Returns the payloads in ascending rank order on the root, [None] elsewhere.
    pub async fn gather(
        &mut self,
        group: &ProcessGroup,
        payload: Bytes,
    ) -> Result<Option<Vec<Bytes>>, ControllerErr> {
        let root = self.collective_root(group)?;
        if self.rank != root {
            self.send_tagged(root, COLLECTIVE_TAG, payload)?;
            return Ok(None);
        }
        let mut gathered = Vec::with_capacity(group.len());
        for rank in group.iter() {
            if rank == self.rank {
                gathered.push(payload.clone());
            } else {
                gathered.push(self.receive_tagged(rank, COLLECTIVE_TAG).await?);
            }
        }
        Ok(Some(gathered))
    }

    /// Broadcast the root's payload to every member. The payload passed by non-root
    /// members is ignored; every member returns the root's.
    pub async fn broadcast(
        &mut self,
        group: &ProcessGroup,
        payload: Bytes,
    ) -> Result<Bytes, ControllerErr> {
        let root = self.collective_root(group)?;
        if self.rank != root {
            return self.receive_tagged(root, COLLECTIVE_TAG).await;
        }
        for rank in group.iter().filter(|rank| *rank != root) {
            self.send_tagged(rank, COLLECTIVE_TAG, payload.clone())?;
        }
        Ok(payload)
    }

    /// Every member receives every member's payload, in ascending rank order
    pub async fn all_gather(
        &mut self,
        group: &ProcessGroup,
        payload: Bytes,
    ) -> Result<Vec<Bytes>, ControllerErr> {
        let framed = match self.gather(group, payload).await? {
            Some(parts) => frame(&parts),
            None => Bytes::new(),
        };
        unframe(self.broadcast(group, framed).await?)
    }

    /// [Controller::all_gather] of one integer per member
    pub async fn all_gather_u64(
        &mut self,
        group: &ProcessGroup,
        value: u64,
    ) -> Result<Vec<u64>, ControllerErr> {
        self.all_gather(group, encode_u64(value))
            .await?
            .into_iter()
            .map(decode_u64)
            .collect()
    }

    /// Sum one integer per member at the group's root. [None] on non-root members.
    pub async fn reduce_sum(
        &mut self,
        group: &ProcessGroup,
        value: u64,
    ) -> Result<Option<u64>, ControllerErr> {
        match self.gather(group, encode_u64(value)).await? {
            Some(parts) => Ok(Some(sum_u64s(parts)?)),
            None => Ok(None),
        }
    }

    /// Sum one integer per member, returning the sum on every member
    pub async fn all_reduce_sum(
        &mut self,
        group: &ProcessGroup,
        value: u64,
    ) -> Result<u64, ControllerErr> {
        let reduced = self.reduce_sum(group, value).await?.unwrap_or_default();
        decode_u64(self.broadcast(group, encode_u64(reduced)).await?)
    }

    /// Wait until every member of the group reached the barrier
    pub async fn barrier(&mut self, group: &ProcessGroup) -> Result<(), ControllerErr> {
        self.gather(group, Bytes::new()).await?;
        self.broadcast(group, Bytes::new()).await?;
        Ok(())
    }
}
