use std::time::{Duration, Instant};

/// Bounded linear undo history of persistent-text snapshots.
///
/// Pushes are gated two ways: the text must differ from the cursor slot, and
/// `debounce` must have elapsed since the previous push so that a burst of
/// keystrokes collapses into one undo step. `flush` bypasses the time gate;
/// callers use it right before undo/redo so the in-progress edit is never
/// lost. Editing mid-history truncates every redo slot first; no branching.
#[derive(Debug)]
pub struct TextHistory {
    snapshots: Vec<String>,
    cursor: usize,
    last_push: Option<Instant>,
}

impl TextHistory {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            snapshots: vec![initial.into()],
            cursor: 0,
            last_push: None,
        }
    }

    pub fn current(&self) -> &str {
        &self.snapshots[self.cursor]
    }

    pub fn should_push(&self, now: Instant, debounce: Duration) -> bool {
        match self.last_push {
            Some(last) => now.saturating_duration_since(last) >= debounce,
            None => true,
        }
    }

    /// Debounce-gated push. Returns whether a snapshot was taken.
    pub fn record(
        &mut self,
        text: &str,
        now: Instant,
        capacity: usize,
        debounce: Duration,
    ) -> bool {
        if text == self.current() || !self.should_push(now, debounce) {
            return false;
        }
        self.push(text, now, capacity);
        true
    }

    /// Unconditional push (still a no-op when the text matches the cursor).
    pub fn flush(&mut self, text: &str, now: Instant, capacity: usize) -> bool {
        if text == self.current() {
            return false;
        }
        self.push(text, now, capacity);
        true
    }

    pub fn undo(&mut self) -> Option<&str> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        Some(self.current())
    }

    pub fn redo(&mut self) -> Option<&str> {
        if self.cursor + 1 >= self.snapshots.len() {
            return None;
        }
        self.cursor += 1;
        Some(self.current())
    }

    pub fn depth(&self) -> usize {
        self.snapshots.len()
    }

    fn push(&mut self, text: &str, now: Instant, capacity: usize) {
        self.snapshots.truncate(self.cursor + 1);
        self.snapshots.push(text.to_string());
        if self.snapshots.len() > capacity.max(1) {
            self.snapshots.remove(0);
        }
        self.cursor = self.snapshots.len() - 1;
        self.last_push = Some(now);
    }
}
