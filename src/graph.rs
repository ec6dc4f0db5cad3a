//! Adjacency storage for the proximity graph.
//!
//! Each slot's out-neighbor list sits behind its own `RwLock`, so concurrent
//! inserts touching disjoint slots never contend and searches only take
//! short per-slot read locks while snapshotting a neighbor list.
//!
//! On-disk layout (`save`/`load`): `[magic "PXGR"][version u32][num_slots u32]
//! [max_degree u32][start u32][num_frozen u32]` followed by one
//! length-prefixed `u32` adjacency list per slot in slot order, then a
//! `[magic][CRC32 BE]` footer over everything before it. Writes go through a
//! temp file and rename so a crash never leaves a torn graph file.

use std::fs;
use std::path::Path;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{IndexError, Result};
use crate::Slot;

const GRAPH_MAGIC: &[u8; 4] = b"PXGR";
const GRAPH_VERSION: u32 = 1;

/// Adjacency storage contract.
///
/// Neighbor mutation takes `&self`; implementations synchronize per slot.
/// Only capacity changes (`expand`/`shrink`) require exclusive access.
pub trait GraphStore: Send + Sync {
    /// Number of slots the store currently covers.
    fn num_slots(&self) -> usize;

    /// Snapshot the out-neighbors of `slot` into `out`.
    fn neighbors_into(&self, slot: Slot, out: &mut Vec<Slot>);

    /// Replace the out-neighbors of `slot`.
    fn set_neighbors(&self, slot: Slot, neighbors: Vec<Slot>);

    /// Append one out-neighbor to `slot` unless already present.
    /// Returns the resulting degree.
    fn append_neighbor(&self, slot: Slot, neighbor: Slot) -> usize;

    /// Drop all out-neighbors of `slot`.
    fn clear_slot(&self, slot: Slot);

    /// Grow to cover `new_num_slots` slots with empty adjacency.
    fn expand(&mut self, new_num_slots: usize);

    /// Shrink to cover exactly `new_num_slots` slots.
    fn shrink(&mut self, new_num_slots: usize);
}

/// All-in-memory adjacency with per-slot locking.
#[derive(Debug)]
pub struct InMemGraphStore {
    adjacency: Vec<RwLock<Vec<Slot>>>,
    max_degree: usize,
}

impl InMemGraphStore {
    pub fn new(num_slots: usize, max_degree: usize) -> Self {
        let mut adjacency = Vec::with_capacity(num_slots);
        for _ in 0..num_slots {
            adjacency.push(RwLock::new(Vec::new()));
        }
        Self {
            adjacency,
            max_degree,
        }
    }

    pub fn max_degree(&self) -> usize {
        self.max_degree
    }

    /// Current out-degree of `slot`.
    pub fn degree(&self, slot: Slot) -> usize {
        self.adjacency[slot as usize].read().len()
    }

    /// Run `f` over a read-locked view of the neighbor list.
    ///
    /// Prefer [`GraphStore::neighbors_into`] when `f` computes distances;
    /// holding the lock across distance evaluation serializes writers.
    pub fn with_neighbors<T>(&self, slot: Slot, f: impl FnOnce(&[Slot]) -> T) -> T {
        f(&self.adjacency[slot as usize].read())
    }

    /// Persist the adjacency together with the entry point bookkeeping.
    pub fn save(&self, path: &Path, start: Slot, num_frozen: u32) -> Result<()> {
        let mut payload = Vec::new();
        payload.extend_from_slice(GRAPH_MAGIC);
        payload.extend_from_slice(&GRAPH_VERSION.to_le_bytes());
        payload.extend_from_slice(&(self.adjacency.len() as u32).to_le_bytes());
        payload.extend_from_slice(&(self.max_degree as u32).to_le_bytes());
        payload.extend_from_slice(&start.to_le_bytes());
        payload.extend_from_slice(&num_frozen.to_le_bytes());

        for lock in &self.adjacency {
            let nbrs = lock.read();
            payload.extend_from_slice(&(nbrs.len() as u32).to_le_bytes());
            for &n in nbrs.iter() {
                payload.extend_from_slice(&n.to_le_bytes());
            }
        }

        let crc = crc32fast::hash(&payload);
        payload.extend_from_slice(GRAPH_MAGIC);
        payload.extend_from_slice(&crc.to_be_bytes());

        // Atomic write: write to temp, then rename
        let tmp = path.with_extension("graph.tmp");
        fs::write(&tmp, &payload)?;
        fs::rename(&tmp, path)?;

        info!(
            path = %path.display(),
            num_slots = self.adjacency.len(),
            bytes = payload.len(),
            crc = format_args!("{crc:#010x}"),
            "saved graph"
        );
        Ok(())
    }

    /// Load a saved graph. Returns the store plus `(start, num_frozen)`.
    pub fn load(path: &Path) -> Result<(Self, Slot, u32)> {
        let raw = fs::read(path)?;
        if raw.len() < 32 {
            return Err(IndexError::Format(format!(
                "{}: graph file too short",
                path.display()
            )));
        }

        let (payload, footer) = raw.split_at(raw.len() - 8);
        if &footer[..4] != GRAPH_MAGIC {
            return Err(IndexError::Format(format!(
                "{}: missing graph CRC footer",
                path.display()
            )));
        }
        let stored_crc = u32::from_be_bytes([footer[4], footer[5], footer[6], footer[7]]);
        let computed_crc = crc32fast::hash(payload);
        if stored_crc != computed_crc {
            return Err(IndexError::Format(format!(
                "{}: graph CRC32 mismatch: expected {:#010x}, got {:#010x}",
                path.display(),
                stored_crc,
                computed_crc
            )));
        }

        let mut cursor = Cursor::new(payload);
        if cursor.take_bytes(4)? != GRAPH_MAGIC {
            return Err(IndexError::Format(format!(
                "{}: bad graph magic",
                path.display()
            )));
        }
        let version = cursor.take_u32()?;
        if version != GRAPH_VERSION {
            return Err(IndexError::Format(format!(
                "{}: unsupported graph version {}",
                path.display(),
                version
            )));
        }
        let num_slots = cursor.take_u32()? as usize;
        let max_degree = cursor.take_u32()? as usize;
        let start = cursor.take_u32()?;
        let num_frozen = cursor.take_u32()?;

        let mut adjacency = Vec::with_capacity(num_slots);
        for slot in 0..num_slots {
            let len = cursor.take_u32()? as usize;
            if len > max_degree {
                return Err(IndexError::Format(format!(
                    "{}: slot {} degree {} exceeds bound {}",
                    path.display(),
                    slot,
                    len,
                    max_degree
                )));
            }
            let mut nbrs = Vec::with_capacity(len);
            for _ in 0..len {
                nbrs.push(cursor.take_u32()?);
            }
            adjacency.push(RwLock::new(nbrs));
        }

        debug!(path = %path.display(), num_slots, start, "loaded graph");
        Ok((
            Self {
                adjacency,
                max_degree,
            },
            start,
            num_frozen,
        ))
    }
}

impl GraphStore for InMemGraphStore {
    fn num_slots(&self) -> usize {
        self.adjacency.len()
    }

    fn neighbors_into(&self, slot: Slot, out: &mut Vec<Slot>) {
        out.clear();
        out.extend_from_slice(&self.adjacency[slot as usize].read());
    }

    fn set_neighbors(&self, slot: Slot, neighbors: Vec<Slot>) {
        *self.adjacency[slot as usize].write() = neighbors;
    }

    fn append_neighbor(&self, slot: Slot, neighbor: Slot) -> usize {
        let mut nbrs = self.adjacency[slot as usize].write();
        if !nbrs.contains(&neighbor) {
            nbrs.push(neighbor);
        }
        nbrs.len()
    }

    fn clear_slot(&self, slot: Slot) {
        self.adjacency[slot as usize].write().clear();
    }

    fn expand(&mut self, new_num_slots: usize) {
        while self.adjacency.len() < new_num_slots {
            self.adjacency.push(RwLock::new(Vec::new()));
        }
    }

    fn shrink(&mut self, new_num_slots: usize) {
        self.adjacency.truncate(new_num_slots);
    }
}

/// Bounds-checked little-endian reader over the graph payload.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(IndexError::Format("graph file truncated".into()));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_u32(&mut self) -> Result<u32> {
        let b = self.take_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}
