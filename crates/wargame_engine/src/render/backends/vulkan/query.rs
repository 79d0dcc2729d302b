//! Occlusion queries
//!
//! Every frame slot owns a query pool that is reset when the slot starts a frame. Before the
//! reset, the results of the slot's previous frame are read back (its fence has signaled, so
//! they are final) and kept until the next harvest. A query therefore learns its answer when
//! its slot comes around again; until then it reports its previous answer, or visible if it
//! never completed.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ash::vk;

use super::context::VulkanDevice;
use super::{VulkanError, VulkanResult};
use crate::render::api::OcclusionQuery;

/// Where a query's samples were counted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QuerySlot {
    pub slot: usize,
    pub frame: u64,
    pub index: u32,
}

#[derive(Default)]
struct SlotState {
    frame: u64,
    used: u32,
    harvested_frame: u64,
    harvested: Vec<u64>,
}

impl SlotState {
    /// Sample count of a query from the last harvest, if it belongs to it
    fn harvested_result(&self, query: QuerySlot) -> Option<u64> {
        (query.frame == self.harvested_frame).then(|| self.harvested.get(query.index as usize).copied()).flatten()
    }
}

/// Query pools of all frame slots
pub(crate) struct QueryPools {
    device: Rc<VulkanDevice>,
    pools: Vec<vk::QueryPool>,
    capacity: u32,
    slots: RefCell<Vec<SlotState>>,
}

impl QueryPools {
    pub(crate) fn new(device: &Rc<VulkanDevice>, slots: usize, capacity: u32) -> VulkanResult<Rc<Self>> {
        let capacity = capacity.max(1);
        let mut created = Self {
            device: Rc::clone(device),
            pools: Vec::with_capacity(slots),
            capacity,
            slots: RefCell::new((0..slots).map(|_| SlotState::default()).collect()),
        };
        let create_info = vk::QueryPoolCreateInfo::builder().query_type(vk::QueryType::OCCLUSION).query_count(capacity);
        for _ in 0..slots {
            let pool = unsafe { device.device.create_query_pool(&create_info, None) }.map_err(VulkanError::Api)?;
            created.pools.push(pool);
        }
        Ok(Rc::new(created))
    }

    /// Harvest the slot's previous results and record the pool reset for `frame`
    ///
    /// The slot's fence must have signaled.
    pub(crate) fn begin_slot(&self, cmd: vk::CommandBuffer, slot: usize, frame: u64) {
        let mut slots = self.slots.borrow_mut();
        let state = &mut slots[slot];
        let pool = self.pools[slot];
        if state.used > 0 {
            state.harvested.resize(state.used as usize, 0);
            let read = unsafe {
                self.device.device.get_query_pool_results(
                    pool,
                    0,
                    state.used,
                    &mut state.harvested,
                    vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
                )
            };
            match read {
                Ok(()) => state.harvested_frame = state.frame,
                Err(e) => {
                    log::warn!("Failed to read occlusion results of frame {}: {:?}", state.frame, e);
                    state.harvested.clear();
                }
            }
        }
        unsafe { self.device.device.cmd_reset_query_pool(cmd, pool, 0, self.capacity) };
        state.frame = frame;
        state.used = 0;
    }

    /// Next free query of `slot`, `None` when the pool is full
    pub(crate) fn allocate(&self, slot: usize) -> Option<(vk::QueryPool, QuerySlot)> {
        let mut slots = self.slots.borrow_mut();
        let state = &mut slots[slot];
        if state.used >= self.capacity {
            return None;
        }
        let index = state.used;
        state.used += 1;
        Some((self.pools[slot], QuerySlot { slot, frame: state.frame, index }))
    }

    fn result(&self, query: QuerySlot) -> Option<u64> {
        self.slots.borrow().get(query.slot).and_then(|state| state.harvested_result(query))
    }
}

impl Drop for QueryPools {
    fn drop(&mut self) {
        for pool in self.pools.drain(..) {
            unsafe { self.device.device.destroy_query_pool(pool, None) };
        }
    }
}

/// Native occlusion query of the Vulkan backend
pub(crate) struct VulkanQuery {
    pools: Rc<QueryPools>,
    pending: Cell<Option<QuerySlot>>,
    visible: Cell<bool>,
    /// Query being counted between begin and end
    pub(crate) active: Option<(vk::QueryPool, QuerySlot)>,
}

impl VulkanQuery {
    pub(crate) fn new(pools: &Rc<QueryPools>) -> Self {
        Self { pools: Rc::clone(pools), pending: Cell::new(None), visible: Cell::new(true), active: None }
    }

    /// Counting finished; the answer arrives with the slot's next harvest
    pub(crate) fn submitted(&mut self, query: QuerySlot) {
        self.pending.set(Some(query));
    }

    fn poll(&self) {
        let Some(query) = self.pending.get() else { return };
        if let Some(samples) = self.pools.result(query) {
            self.visible.set(samples > 0);
            self.pending.set(None);
        }
    }
}

impl OcclusionQuery for VulkanQuery {
    fn is_visible(&self) -> bool {
        self.poll();
        self.visible.get()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_belong_to_their_frame() {
        let state = SlotState { frame: 7, used: 0, harvested_frame: 4, harvested: vec![0, 12] };
        assert_eq!(state.harvested_result(QuerySlot { slot: 0, frame: 4, index: 1 }), Some(12));
        assert_eq!(state.harvested_result(QuerySlot { slot: 0, frame: 4, index: 0 }), Some(0));
        assert_eq!(state.harvested_result(QuerySlot { slot: 0, frame: 4, index: 2 }), None);
        assert_eq!(state.harvested_result(QuerySlot { slot: 0, frame: 7, index: 0 }), None);
    }
}
