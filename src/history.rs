/// Linear undo/redo over whole snapshots of `T`.
///
/// Every recorded mutation pushes the state it replaced; recording always
/// discards pending redo states.
#[derive(Clone, Debug, Default)]
pub struct EditHistory<T> {
    current: T,
    undo_stack: Vec<T>,
    redo_stack: Vec<T>,
}

impl<T: Clone> EditHistory<T> {
    pub fn new(initial: T) -> Self {
        Self {
            current: initial,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
        }
    }

    pub fn current(&self) -> &T {
        &self.current
    }

    pub fn record(&mut self, mutation: impl FnOnce(&mut T)) {
        self.undo_stack.push(self.current.clone());
        self.redo_stack.clear();
        mutation(&mut self.current);
    }

    /// Returns false when there was nothing to undo.
    pub fn undo(&mut self) -> bool {
        let Some(previous) = self.undo_stack.pop() else {
            return false;
        };
        let replaced = std::mem::replace(&mut self.current, previous);
        self.redo_stack.push(replaced);
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(next) = self.redo_stack.pop() else {
            return false;
        };
        let replaced = std::mem::replace(&mut self.current, next);
        self.undo_stack.push(replaced);
        true
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.can_undo()
    }

    /// Adopts `state` as the saved baseline and forgets both stacks.
    pub fn reset(&mut self, state: T) {
        self.current = state;
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}
