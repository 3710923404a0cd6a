// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Process groups are ordered sets of ranks which a collective or an RMI broadcast
//! targets, e.g. "all workers", "render-server root" or "client".
//!
//! A [ProcessLayout] names the roles of the ranks in a session and resolves
//! [ServerFlags] (the locations a proxy lives at) into concrete [ProcessGroup]s.
//!
//! ## Examples
//!
//! ```rust
//! use pvremoting::{ProcessGroup, ProcessLayout, ServerFlags};
//!
//! let layout = ProcessLayout::classic(4);
//! let servers = layout.resolve(ServerFlags::SERVERS);
//! assert_eq!(servers, ProcessGroup::range(1, 4));
//!
//! let root_and_client = layout.resolve(ServerFlags::DATA_SERVER_ROOT | ServerFlags::CLIENT);
//! assert_eq!(root_and_client.iter().collect::<Vec<_>>(), vec![0, 1]);
//! ```

use std::collections::BTreeSet;
use std::ops::{BitOr, BitOrAssign};

/// A process's identity within its group, `0..N`
pub type ProcessRank = usize;

/// An ordered set of ranks
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ProcessGroup {
    ranks: BTreeSet<ProcessRank>,
}

impl ProcessGroup {
    /// Build a group from any collection of ranks. Duplicates collapse.
    pub fn new<I>(ranks: I) -> Self
    where
        I: IntoIterator<Item = ProcessRank>,
    {
        Self {
            ranks: ranks.into_iter().collect(),
        }
    }

    /// The empty group
    pub fn empty() -> Self {
        Self::default()
    }

    /// A group of a single rank
    pub fn single(rank: ProcessRank) -> Self {
        Self::new([rank])
    }

    /// The ranks `start..end`
    pub fn range(start: ProcessRank, end: ProcessRank) -> Self {
        Self::new(start..end)
    }

    /// Does the group contain `rank`
    pub fn contains(&self, rank: ProcessRank) -> bool {
        self.ranks.contains(&rank)
    }

    /// Number of ranks in the group
    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    /// Is the group empty
    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// The lowest rank of the group. Collectives are rooted here.
    pub fn root(&self) -> Option<ProcessRank> {
        self.ranks.iter().next().copied()
    }

    /// Iterate the ranks in ascending order
    pub fn iter(&self) -> impl Iterator<Item = ProcessRank> + '_ {
        self.ranks.iter().copied()
    }

    /// The position of `rank` within the group's ascending order
    pub fn position(&self, rank: ProcessRank) -> Option<usize> {
        self.ranks.iter().position(|r| *r == rank)
    }

    /// The rank at `position` of the group's ascending order
    pub fn rank_at(&self, position: usize) -> Option<ProcessRank> {
        self.ranks.iter().nth(position).copied()
    }

    /// Add a rank to the group
    pub fn insert(&mut self, rank: ProcessRank) {
        self.ranks.insert(rank);
    }

    /// The union of two groups
    pub fn union(&self, other: &ProcessGroup) -> ProcessGroup {
        Self {
            ranks: self.ranks.union(&other.ranks).copied().collect(),
        }
    }

    /// This group without `rank`
    pub fn without(&self, rank: ProcessRank) -> ProcessGroup {
        Self::new(self.iter().filter(|r| *r != rank))
    }
}

impl FromIterator<ProcessRank> for ProcessGroup {
    fn from_iter<T: IntoIterator<Item = ProcessRank>>(iter: T) -> Self {
        Self::new(iter)
    }
}

/// Where a proxy's mirrored objects live, as bit flags
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ServerFlags(u8);

impl ServerFlags {
    /// Nowhere
    pub const NONE: ServerFlags = ServerFlags(0x00);
    /// Every data-server rank
    pub const DATA_SERVER: ServerFlags = ServerFlags(0x01);
    /// The root of the data servers only
    pub const DATA_SERVER_ROOT: ServerFlags = ServerFlags(0x02);
    /// Every render-server rank
    pub const RENDER_SERVER: ServerFlags = ServerFlags(0x04);
    /// The root of the render servers only
    pub const RENDER_SERVER_ROOT: ServerFlags = ServerFlags(0x08);
    /// Data and render servers
    pub const SERVERS: ServerFlags = ServerFlags(0x05);
    /// The client (master) process
    pub const CLIENT: ServerFlags = ServerFlags(0x10);
    /// The client plus every server
    pub const CLIENT_AND_SERVERS: ServerFlags = ServerFlags(0x15);

    /// The raw bits
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Reconstruct flags from raw bits, dropping unknown bits
    pub const fn from_bits_truncate(bits: u8) -> Self {
        ServerFlags(bits & 0x1f)
    }

    /// Are all of `other`'s bits set
    pub const fn contains(self, other: ServerFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Is any of `other`'s bits set
    pub const fn intersects(self, other: ServerFlags) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for ServerFlags {
    type Output = ServerFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        ServerFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ServerFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// The roles of the ranks in a session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessLayout {
    client: ProcessRank,
    data_servers: ProcessGroup,
    render_servers: ProcessGroup,
}

impl ProcessLayout {
    /// Create a layout from explicit role assignments
    pub fn new(
        client: ProcessRank,
        data_servers: ProcessGroup,
        render_servers: ProcessGroup,
    ) -> Self {
        Self {
            client,
            data_servers,
            render_servers,
        }
    }

    /// The classic layout of `num_processes` processes: rank 0 is the client, the
    /// remaining ranks are both data and render servers. A single process hosts
    /// everything itself (builtin mode).
    pub fn classic(num_processes: usize) -> Self {
        if num_processes <= 1 {
            Self::new(0, ProcessGroup::single(0), ProcessGroup::single(0))
        } else {
            let servers = ProcessGroup::range(1, num_processes);
            Self::new(0, servers.clone(), servers)
        }
    }

    /// The client (master) rank
    pub fn client(&self) -> ProcessRank {
        self.client
    }

    /// The data-server ranks
    pub fn data_servers(&self) -> &ProcessGroup {
        &self.data_servers
    }

    /// The render-server ranks
    pub fn render_servers(&self) -> &ProcessGroup {
        &self.render_servers
    }

    /// The data servers which are not the client. Pipeline execution (and thus
    /// redistribution) runs on this group.
    pub fn workers(&self) -> ProcessGroup {
        self.data_servers.without(self.client)
    }

    /// The highest rank referenced by this layout
    pub fn max_rank(&self) -> ProcessRank {
        self.data_servers
            .iter()
            .chain(self.render_servers.iter())
            .fold(self.client, std::cmp::max)
    }

    /// Resolve location flags into the group of ranks they designate
    pub fn resolve(&self, flags: ServerFlags) -> ProcessGroup {
        let mut group = ProcessGroup::empty();
        if flags.intersects(ServerFlags::DATA_SERVER) {
            group = group.union(&self.data_servers);
        } else if flags.intersects(ServerFlags::DATA_SERVER_ROOT) {
            if let Some(root) = self.data_servers.root() {
                group.insert(root);
            }
        }
        if flags.intersects(ServerFlags::RENDER_SERVER) {
            group = group.union(&self.render_servers);
        } else if flags.intersects(ServerFlags::RENDER_SERVER_ROOT) {
            if let Some(root) = self.render_servers.root() {
                group.insert(root);
            }
        }
        if flags.intersects(ServerFlags::CLIENT) {
            group.insert(self.client);
        }
        group
    }
}
