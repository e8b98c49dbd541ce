//! 当前激活的 shader 程序
//!
//! 渲染器在切换程序或修改当前程序的资源之前，需要先把已经合批的 draw 提交出去。

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use prism_gfx::DeviceContext;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(u64);

pub struct RenderContext {
    device: Rc<dyn DeviceContext>,

    active_graphics: Cell<Option<ProgramId>>,
    active_compute: Cell<Option<ProgramId>>,

    /// 提交已合批 draw 的回调，由渲染器设置
    batch_flusher: RefCell<Option<Box<dyn FnMut()>>>,
    next_program_id: Cell<u64>,
}
// new & init
impl RenderContext {
    pub fn new(device: Rc<dyn DeviceContext>) -> Self {
        Self {
            device,
            active_graphics: Cell::new(None),
            active_compute: Cell::new(None),
            batch_flusher: RefCell::new(None),
            next_program_id: Cell::new(1),
        }
    }

    pub fn set_batch_flusher(&self, flusher: impl FnMut() + 'static) {
        *self.batch_flusher.borrow_mut() = Some(Box::new(flusher));
    }

    pub(crate) fn allocate_program_id(&self) -> ProgramId {
        let id = self.next_program_id.get();
        self.next_program_id.set(id + 1);
        ProgramId(id)
    }
}
// getters
impl RenderContext {
    #[inline]
    pub fn device(&self) -> &Rc<dyn DeviceContext> {
        &self.device
    }

    #[inline]
    pub fn active_graphics_program(&self) -> Option<ProgramId> {
        self.active_graphics.get()
    }

    #[inline]
    pub fn active_compute_program(&self) -> Option<ProgramId> {
        self.active_compute.get()
    }

    #[inline]
    pub fn is_active(&self, id: ProgramId) -> bool {
        self.active_graphics.get() == Some(id)
    }
}
// update
impl RenderContext {
    /// 提交已经合批的 draw；回调执行期间可以安全地再次访问 `RenderContext`
    pub fn flush_batched_draws(&self) {
        let Some(mut flusher) = self.batch_flusher.borrow_mut().take() else {
            return;
        };
        flusher();

        let mut slot = self.batch_flusher.borrow_mut();
        if slot.is_none() {
            *slot = Some(flusher);
        }
    }

    /// 当前程序的资源即将被修改
    pub(crate) fn flush_if_active(&self, id: ProgramId) {
        if self.is_active(id) {
            self.flush_batched_draws();
        }
    }

    pub(crate) fn attach_graphics(&self, id: ProgramId) {
        if self.active_graphics.get() != Some(id) {
            self.flush_batched_draws();
            self.active_graphics.set(Some(id));
        }
    }

    pub(crate) fn attach_compute(&self, id: ProgramId) {
        self.active_compute.set(Some(id));
    }

    /// 程序卸载时不再作为当前程序
    pub(crate) fn detach(&self, id: ProgramId) {
        if self.active_graphics.get() == Some(id) {
            self.active_graphics.set(None);
        }
        if self.active_compute.get() == Some(id) {
            self.active_compute.set(None);
        }
    }
}
