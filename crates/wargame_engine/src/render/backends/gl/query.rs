//! GL occlusion queries

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

use glow::HasContext;

use crate::render::api::OcclusionQuery;
use crate::render::handle::Scoped;
use crate::render::{RenderError, RenderResult};

/// Hardware sample query
///
/// Results are polled: until the driver reports the result available the previous answer
/// stands, and a query that never completed reports visible. Drivers without occlusion
/// queries get queries with no native object that always report visible.
pub(crate) struct GlQuery {
    gl: Rc<glow::Context>,
    native: Option<Scoped<glow::Query>>,
    pending: Cell<bool>,
    visible: Cell<bool>,
}

impl GlQuery {
    pub(crate) fn new(gl: &Rc<glow::Context>, supported: bool) -> RenderResult<Self> {
        let native = if supported {
            let query = unsafe { gl.create_query() }.map_err(RenderError::ResourceCreationFailed)?;
            let owner = Rc::clone(gl);
            Some(Scoped::new(query, move |q| unsafe { owner.delete_query(q) }))
        } else {
            None
        };
        Ok(Self { gl: Rc::clone(gl), native, pending: Cell::new(false), visible: Cell::new(true) })
    }

    pub(crate) fn begin(&self, target: u32) {
        if let Some(native) = &self.native {
            unsafe { self.gl.begin_query(target, native.raw()) };
        }
    }

    pub(crate) fn end(&self, target: u32) {
        if self.native.is_some() {
            unsafe { self.gl.end_query(target) };
            self.pending.set(true);
        }
    }

    fn poll(&self) {
        let Some(native) = &self.native else { return };
        if !self.pending.get() {
            return;
        }
        let available = unsafe { self.gl.get_query_parameter_u32(native.raw(), glow::QUERY_RESULT_AVAILABLE) };
        if available != 0 {
            let samples = unsafe { self.gl.get_query_parameter_u32(native.raw(), glow::QUERY_RESULT) };
            self.visible.set(samples > 0);
            self.pending.set(false);
        }
    }
}

impl OcclusionQuery for GlQuery {
    fn is_visible(&self) -> bool {
        self.poll();
        self.visible.get()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
