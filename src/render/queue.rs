//! Per-view command queues.

use rustc_hash::FxHashMap;

use super::command::RenderCommand;
use crate::settings::ViewOrder;

/// Numeric view identifier that scene code submits against.
pub type ViewId = u16;

/// FIFO command lists keyed by view.
///
/// Commands of one view are replayed in exactly the order they were
/// submitted; views are never interleaved.
#[derive(Debug, Default)]
pub struct CommandQueue {
    views: FxHashMap<ViewId, Vec<RenderCommand>>,
    /// Views in the order their first command arrived this frame.
    first_seen: Vec<ViewId>,
    len: usize,
}

impl CommandQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&mut self, view: ViewId, command: RenderCommand) {
        let commands = self.views.entry(view).or_insert_with(|| {
            self.first_seen.push(view);
            Vec::new()
        });
        commands.push(command);
        self.len += 1;
    }

    /// Total commands across all views.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn view_len(&self, view: ViewId) -> usize {
        self.views.get(&view).map_or(0, Vec::len)
    }

    /// Views that have commands, in replay order.
    #[must_use]
    pub fn views(&self, order: ViewOrder) -> Vec<ViewId> {
        let mut views = self.first_seen.clone();
        if order == ViewOrder::Ascending {
            views.sort_unstable();
        }
        views
    }

    /// Takes every view's commands, in replay order, leaving the queue empty.
    pub fn drain_ordered(&mut self, order: ViewOrder) -> Vec<(ViewId, Vec<RenderCommand>)> {
        let views = self.views(order);
        let mut out = Vec::with_capacity(views.len());
        for view in views {
            if let Some(commands) = self.views.remove(&view) {
                out.push((view, commands));
            }
        }
        self.clear();
        out
    }

    pub fn clear(&mut self) {
        self.views.clear();
        self.first_seen.clear();
        self.len = 0;
    }
}
