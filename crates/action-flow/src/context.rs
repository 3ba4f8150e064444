//! Frame stack for one item execution

use action_primitives::FrameHandle;

/// Stack of entered frames. The root page sits at the bottom and is never
/// popped, so the stack is never empty.
#[derive(Debug, Clone)]
pub struct FrameStack {
    frames: Vec<FrameHandle>,
}

impl FrameStack {
    pub fn new(root: FrameHandle) -> Self {
        Self { frames: vec![root] }
    }

    /// Frame targeted by subsequent actions.
    pub fn current(&self) -> &FrameHandle {
        // never empty: the root is pushed in `new` and `exit` keeps it
        &self.frames[self.frames.len() - 1]
    }

    pub fn enter(&mut self, frame: FrameHandle) {
        self.frames.push(frame);
    }

    /// Pop the current frame. With only the root left this is a no-op and
    /// returns `None`.
    pub fn exit(&mut self) -> Option<FrameHandle> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    /// Number of entered frames above the root.
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }
}

impl Default for FrameStack {
    fn default() -> Self {
        Self::new(FrameHandle::root())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_current_initially() {
        let stack = FrameStack::default();
        assert!(stack.current().is_root());
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn enter_and_exit_nested_frames() {
        let mut stack = FrameStack::default();
        stack.enter(FrameHandle::child("f1", "iframe#quote"));
        stack.enter(FrameHandle::child("f2", "iframe#inner"));
        assert_eq!(stack.current().id, "f2");
        assert_eq!(stack.depth(), 2);

        assert_eq!(stack.exit().map(|f| f.id), Some("f2".to_string()));
        assert_eq!(stack.current().id, "f1");
        assert_eq!(stack.exit().map(|f| f.id), Some("f1".to_string()));
        assert!(stack.current().is_root());
    }

    #[test]
    fn exit_at_root_is_a_noop() {
        let mut stack = FrameStack::default();
        assert!(stack.exit().is_none());
        assert!(stack.exit().is_none());
        assert!(stack.current().is_root());
        stack.enter(FrameHandle::child("f1", "iframe"));
        assert_eq!(stack.current().id, "f1");
    }
}
