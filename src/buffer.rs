//! Buffer-resident aggregation
//!
//! The host keeps one fixed-stride aggregation slot per group inside memory
//! regions it owns and may move slots between regions while compacting. Reservoirs
//! are variable-size, so they cannot live in the slot bytes. Instead they live in
//! an arena owned by the aggregator, and a side table maps each slot address
//! `(region, offset)` to a stable arena handle. Relocation moves the handle, never
//! the reservoir.
//!
//! Misusing the slot protocol (touching a slot that was never initialized, was
//! relocated away, or outlived `close`) is a bug in the host and panics.

use crate::aggregator::{absorb, ColumnSelector};
use crate::reservoir::Reservoir;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Identity of a host memory region
///
/// Two regions with identical contents are still distinct if their identities
/// differ; the id says nothing about the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(u64);

impl RegionId {
    /// Wrap a host-assigned region id
    pub const fn new(id: u64) -> Self {
        RegionId(id)
    }

    /// Identify a region by the address of its backing memory
    ///
    /// The identity is only as stable as the address. If the host can free a
    /// region and allocate another at the same address while slots of the first
    /// are still live, both get the same id; use [`RegionId::new`] with a
    /// host-assigned id in that case.
    pub fn of(region: &[u8]) -> Self {
        RegionId(region.as_ptr() as usize as u64)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Stable handle to a reservoir in the arena; survives relocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle(usize);

/// The slot protocol the host's buffer manager drives
pub trait BufferAggregator {
    /// Start a fresh reservoir at `(region, offset)`
    fn init(&mut self, region: RegionId, offset: usize);

    /// Consume the current cursor value into the reservoir at `(region, offset)`
    fn aggregate(&mut self, region: RegionId, offset: usize);

    /// The reservoir at `(region, offset)`, possibly still being built
    fn get(&self, region: RegionId, offset: usize) -> &Reservoir;

    /// Move the reservoir at the old address to the new one
    fn relocate(
        &mut self,
        old_region: RegionId,
        old_offset: usize,
        new_region: RegionId,
        new_offset: usize,
    );

    /// Drop every slot in every region
    fn close(&mut self);
}

/// Buffer aggregator building one reservoir per slot from a column cursor
pub struct BufferBuildAggregator<S> {
    selector: S,
    capacity: usize,
    slots: HashMap<RegionId, HashMap<usize, SlotHandle>>,
    arena: Vec<Option<Reservoir>>,
    free: Vec<usize>,
    seeds: Option<StdRng>,
    closed: bool,
}

impl<S: ColumnSelector> BufferBuildAggregator<S> {
    /// Create an aggregator whose slots retain up to `capacity` values each
    pub fn new(selector: S, capacity: usize) -> Self {
        BufferBuildAggregator {
            selector,
            capacity,
            slots: HashMap::new(),
            arena: Vec::new(),
            free: Vec::new(),
            seeds: None,
            closed: false,
        }
    }

    /// Create an aggregator whose reservoirs draw deterministic seeds from `seed`
    pub fn with_seed(selector: S, capacity: usize, seed: u64) -> Self {
        let mut agg = Self::new(selector, capacity);
        agg.seeds = Some(StdRng::seed_from_u64(seed));
        agg
    }

    /// The arena handle currently bound to `(region, offset)`, if any
    pub fn slot_handle(&self, region: RegionId, offset: usize) -> Option<SlotHandle> {
        self.slots
            .get(&region)
            .and_then(|slots| slots.get(&offset))
            .copied()
    }

    /// The reservoir behind a handle, if it is still live
    pub fn reservoir(&self, handle: SlotHandle) -> Option<&Reservoir> {
        self.arena.get(handle.0).and_then(Option::as_ref)
    }

    /// Number of regions with at least one live slot
    pub fn region_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of live slots across all regions
    pub fn slot_count(&self) -> usize {
        self.slots.values().map(HashMap::len).sum()
    }

    fn fresh_reservoir(&mut self) -> Reservoir {
        match self.seeds.as_mut() {
            Some(seeds) => Reservoir::with_seed(self.capacity, seeds.gen()),
            None => Reservoir::new(self.capacity),
        }
    }

    fn allocate(&mut self, reservoir: Reservoir) -> SlotHandle {
        match self.free.pop() {
            Some(index) => {
                self.arena[index] = Some(reservoir);
                SlotHandle(index)
            }
            None => {
                self.arena.push(Some(reservoir));
                SlotHandle(self.arena.len() - 1)
            }
        }
    }

    fn release(&mut self, handle: SlotHandle) {
        self.arena[handle.0] = None;
        self.free.push(handle.0);
    }

    /// Bind `handle` to an address, releasing whatever it displaces
    fn bind(&mut self, region: RegionId, offset: usize, handle: SlotHandle) {
        let displaced = self.slots.entry(region).or_default().insert(offset, handle);
        if let Some(old) = displaced {
            trace!(region = region.get(), offset, "slot overwritten, releasing previous reservoir");
            self.release(old);
        }
    }

    fn live_handle(&self, region: RegionId, offset: usize) -> SlotHandle {
        assert!(!self.closed, "buffer aggregator used after close");
        match self.slot_handle(region, offset) {
            Some(handle) => handle,
            None => panic!(
                "no reservoir at region {} offset {}: slot was never initialized or was relocated",
                region.get(),
                offset
            ),
        }
    }
}

impl<S: ColumnSelector> BufferAggregator for BufferBuildAggregator<S> {
    fn init(&mut self, region: RegionId, offset: usize) {
        assert!(!self.closed, "buffer aggregator used after close");
        let reservoir = self.fresh_reservoir();
        let handle = self.allocate(reservoir);
        trace!(region = region.get(), offset, handle = handle.0, "init slot");
        self.bind(region, offset, handle);
    }

    fn aggregate(&mut self, region: RegionId, offset: usize) {
        let handle = self.live_handle(region, offset);
        let value = self.selector.current();
        if value.is_none() {
            return;
        }
        match self.arena[handle.0].as_mut() {
            Some(reservoir) => absorb(reservoir, value),
            None => unreachable!("bound handle {} has no reservoir", handle.0),
        }
    }

    fn get(&self, region: RegionId, offset: usize) -> &Reservoir {
        let handle = self.live_handle(region, offset);
        match self.reservoir(handle) {
            Some(reservoir) => reservoir,
            None => unreachable!("bound handle {} has no reservoir", handle.0),
        }
    }

    fn relocate(
        &mut self,
        old_region: RegionId,
        old_offset: usize,
        new_region: RegionId,
        new_offset: usize,
    ) {
        let handle = self.live_handle(old_region, old_offset);

        if let Some(slots) = self.slots.get_mut(&old_region) {
            slots.remove(&old_offset);
            if slots.is_empty() {
                self.slots.remove(&old_region);
                debug!(region = old_region.get(), "region has no slots left, dropped");
            }
        }

        trace!(
            from_region = old_region.get(),
            from_offset = old_offset,
            to_region = new_region.get(),
            to_offset = new_offset,
            handle = handle.0,
            "relocate slot"
        );
        self.bind(new_region, new_offset, handle);
    }

    fn close(&mut self) {
        debug!(
            regions = self.slots.len(),
            slots = self.slot_count(),
            "closing buffer aggregator"
        );
        self.slots.clear();
        self.arena.clear();
        self.free.clear();
        self.closed = true;
    }
}

/// Buffer aggregator for a column that does not exist
#[derive(Debug, Default)]
pub struct NoopBufferAggregator {
    empty: Reservoir,
}

impl NoopBufferAggregator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BufferAggregator for NoopBufferAggregator {
    fn init(&mut self, _region: RegionId, _offset: usize) {}

    fn aggregate(&mut self, _region: RegionId, _offset: usize) {}

    fn get(&self, _region: RegionId, _offset: usize) -> &Reservoir {
        &self.empty
    }

    fn relocate(&mut self, _: RegionId, _: usize, _: RegionId, _: usize) {}

    fn close(&mut self) {}
}
