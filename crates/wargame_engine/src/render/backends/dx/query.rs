//! Occlusion queries
//!
//! Every frame slot owns an occlusion query set with a resolve and a readback buffer. After a
//! frame's passes the used queries are resolved and copied, and the readback is mapped
//! asynchronously. When the slot comes around again its results are harvested, waiting for
//! the mapping if it is still in flight. Until then a query reports its previous answer, or
//! visible if it never completed.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::render::api::OcclusionQuery;

const RESULT_SIZE: u64 = std::mem::size_of::<u64>() as u64;

/// Where a query's samples were counted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QuerySlot {
    pub slot: usize,
    pub frame: u64,
    pub index: u32,
}

/// Outcome of a readback mapping, set from the `wgpu` callback
type MapOutcome = Arc<Mutex<Option<bool>>>;

#[derive(Default)]
struct SlotState {
    frame: u64,
    used: u32,
    mapping: Option<(MapOutcome, u32)>,
    harvested_frame: u64,
    harvested: Vec<u64>,
}

impl SlotState {
    fn harvested_result(&self, query: QuerySlot) -> Option<u64> {
        (query.frame == self.harvested_frame).then(|| self.harvested.get(query.index as usize).copied()).flatten()
    }
}

struct SlotBuffers {
    set: wgpu::QuerySet,
    resolve: wgpu::Buffer,
    readback: wgpu::Buffer,
}

/// Query sets of all frame slots
pub(crate) struct QuerySets {
    device: Rc<wgpu::Device>,
    buffers: Vec<SlotBuffers>,
    capacity: u32,
    states: RefCell<Vec<SlotState>>,
}

impl QuerySets {
    pub(crate) fn new(device: &Rc<wgpu::Device>, slots: usize, capacity: u32) -> Rc<Self> {
        let capacity = capacity.clamp(1, wgpu::QUERY_SET_MAX_QUERIES);
        let size = u64::from(capacity) * RESULT_SIZE;
        let buffers = (0..slots)
            .map(|_| SlotBuffers {
                set: device.create_query_set(&wgpu::QuerySetDescriptor {
                    label: Some("Occlusion Queries"),
                    ty: wgpu::QueryType::Occlusion,
                    count: capacity,
                }),
                resolve: device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("Occlusion Resolve"),
                    size,
                    usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: false,
                }),
                readback: device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("Occlusion Readback"),
                    size,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                }),
            })
            .collect();
        Rc::new(Self {
            device: Rc::clone(device),
            buffers,
            capacity,
            states: RefCell::new((0..slots).map(|_| SlotState::default()).collect()),
        })
    }

    pub(crate) fn set(&self, slot: usize) -> &wgpu::QuerySet {
        &self.buffers[slot].set
    }

    /// Harvest the slot's previous results and start counting for `frame`
    pub(crate) fn begin_slot(&self, slot: usize, frame: u64) {
        let mut states = self.states.borrow_mut();
        let state = &mut states[slot];
        if let Some((outcome, count)) = state.mapping.take() {
            if outcome.lock().is_none() {
                let _ = self.device.poll(wgpu::Maintain::Wait);
            }
            let readback = &self.buffers[slot].readback;
            let mapped = *outcome.lock();
            if mapped == Some(true) {
                let data = readback.slice(..u64::from(count) * RESULT_SIZE).get_mapped_range();
                state.harvested = data.chunks_exact(RESULT_SIZE as usize).map(bytemuck::pod_read_unaligned::<u64>).collect();
                drop(data);
                readback.unmap();
                state.harvested_frame = state.frame;
            } else {
                log::warn!("Failed to read occlusion results of frame {}", state.frame);
                state.harvested.clear();
            }
        }
        state.frame = frame;
        state.used = 0;
    }

    /// Next free query of `slot`, `None` when the set is full
    pub(crate) fn allocate(&self, slot: usize) -> Option<QuerySlot> {
        let mut states = self.states.borrow_mut();
        let state = &mut states[slot];
        if state.used >= self.capacity {
            return None;
        }
        let index = state.used;
        state.used += 1;
        Some(QuerySlot { slot, frame: state.frame, index })
    }

    /// Record resolving the slot's used queries into its readback buffer
    pub(crate) fn resolve(&self, encoder: &mut wgpu::CommandEncoder, slot: usize) {
        let used = self.states.borrow()[slot].used;
        if used == 0 {
            return;
        }
        let buffers = &self.buffers[slot];
        encoder.resolve_query_set(&buffers.set, 0..used, &buffers.resolve, 0);
        encoder.copy_buffer_to_buffer(&buffers.resolve, 0, &buffers.readback, 0, u64::from(used) * RESULT_SIZE);
    }

    /// Map the readback of a submitted slot
    pub(crate) fn map_results(&self, slot: usize) {
        let mut states = self.states.borrow_mut();
        let state = &mut states[slot];
        if state.used == 0 {
            return;
        }
        let outcome: MapOutcome = Arc::new(Mutex::new(None));
        let callback_outcome = Arc::clone(&outcome);
        self.buffers[slot]
            .readback
            .slice(..u64::from(state.used) * RESULT_SIZE)
            .map_async(wgpu::MapMode::Read, move |result| *callback_outcome.lock() = Some(result.is_ok()));
        state.mapping = Some((outcome, state.used));
    }

    fn result(&self, query: QuerySlot) -> Option<u64> {
        self.states.borrow().get(query.slot).and_then(|state| state.harvested_result(query))
    }
}

/// Native occlusion query of the DirectX backend
pub(crate) struct DxQuery {
    sets: Rc<QuerySets>,
    pending: Cell<Option<QuerySlot>>,
    visible: Cell<bool>,
    /// Query being counted between begin and end
    pub(crate) active: Option<QuerySlot>,
}

impl DxQuery {
    pub(crate) fn new(sets: &Rc<QuerySets>) -> Self {
        Self { sets: Rc::clone(sets), pending: Cell::new(None), visible: Cell::new(true), active: None }
    }

    pub(crate) fn submitted(&mut self, query: QuerySlot) {
        self.pending.set(Some(query));
    }

    fn poll(&self) {
        let Some(query) = self.pending.get() else { return };
        if let Some(samples) = self.sets.result(query) {
            self.visible.set(samples > 0);
            self.pending.set(None);
        }
    }
}

impl OcclusionQuery for DxQuery {
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
        let state = SlotState { frame: 9, harvested_frame: 6, harvested: vec![3], ..SlotState::default() };
        assert_eq!(state.harvested_result(QuerySlot { slot: 1, frame: 6, index: 0 }), Some(3));
        assert_eq!(state.harvested_result(QuerySlot { slot: 1, frame: 6, index: 1 }), None);
        assert_eq!(state.harvested_result(QuerySlot { slot: 1, frame: 9, index: 0 }), None);
    }
}
