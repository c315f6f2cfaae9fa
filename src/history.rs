use crate::project::ProjectState;

// ============================================================================
// HISTORY ENTRY — a labelled full-state snapshot
// ============================================================================

/// One undo step: the project as it stood after the labelled action.
#[derive(Clone, Debug)]
pub struct HistoryEntry {
    pub label: String,
    snapshot: ProjectState,
}

impl HistoryEntry {
    pub fn snapshot(&self) -> &ProjectState {
        &self.snapshot
    }
}

// ============================================================================
// HISTORY STACK — snapshot undo/redo with a movable cursor
// ============================================================================

/// Undo/redo over whole-project snapshots.
///
/// Usage for an undoable action:
/// 1. `record(label, &state)` before mutating (prunes the redo branch),
/// 2. mutate the state,
/// 3. `commit(&state)` so the entry holds the post-action state.
///
/// The very first entry records the freshly loaded state and needs no commit.
pub struct HistoryStack {
    entries: Vec<HistoryEntry>,
    /// Index of the applied entry; `None` when empty.
    cursor: Option<usize>,
    max_entries: usize,
}

impl Default for HistoryStack {
    fn default() -> Self {
        Self::new(50)
    }
}

impl HistoryStack {
    /// `max_entries == 0` disables the cap.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            cursor: None,
            max_entries,
        }
    }

    pub fn record(&mut self, label: impl Into<String>, state: &ProjectState) {
        // A new action discards the redo branch.
        let keep = self.cursor.map_or(0, |c| c + 1);
        self.entries.truncate(keep);

        self.entries.push(HistoryEntry {
            label: label.into(),
            snapshot: state.clone(),
        });
        self.cursor = Some(self.entries.len() - 1);
        self.prune();
    }

    /// Replace the snapshot at the cursor with the post-action state.
    pub fn commit(&mut self, state: &ProjectState) {
        if let Some(entry) = self.cursor.and_then(|c| self.entries.get_mut(c)) {
            entry.snapshot = state.clone();
        }
    }

    /// Step back one entry. `restore` receives the target snapshot and may
    /// fail (e.g. the base image cannot be decoded); the cursor only moves
    /// when it succeeds. Returns `Ok(None)` when there is nothing to undo.
    pub fn undo<T, E>(
        &mut self,
        restore: impl FnOnce(&ProjectState) -> Result<T, E>,
    ) -> Result<Option<T>, E> {
        match self.cursor {
            Some(c) if c > 0 => self.move_to(c - 1, restore).map(Some),
            _ => Ok(None),
        }
    }

    /// Step forward one entry; same contract as [`HistoryStack::undo`].
    pub fn redo<T, E>(
        &mut self,
        restore: impl FnOnce(&ProjectState) -> Result<T, E>,
    ) -> Result<Option<T>, E> {
        match self.cursor {
            Some(c) if c + 1 < self.entries.len() => self.move_to(c + 1, restore).map(Some),
            _ => Ok(None),
        }
    }

    fn move_to<T, E>(
        &mut self,
        index: usize,
        restore: impl FnOnce(&ProjectState) -> Result<T, E>,
    ) -> Result<T, E> {
        let restored = restore(&self.entries[index].snapshot)?;
        self.cursor = Some(index);
        Ok(restored)
    }

    pub fn can_undo(&self) -> bool {
        self.cursor.is_some_and(|c| c > 0)
    }

    pub fn can_redo(&self) -> bool {
        self.cursor.is_some_and(|c| c + 1 < self.entries.len())
    }

    pub fn undo_label(&self) -> Option<&str> {
        self.can_undo()
            .then(|| self.cursor.and_then(|c| self.entries.get(c)))
            .flatten()
            .map(|e| e.label.as_str())
    }

    pub fn redo_label(&self) -> Option<&str> {
        self.can_redo()
            .then(|| self.cursor.and_then(|c| self.entries.get(c + 1)))
            .flatten()
            .map(|e| e.label.as_str())
    }

    /// All labels, oldest first.
    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.label.as_str()).collect()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn current(&self) -> Option<&HistoryEntry> {
        self.cursor.and_then(|c| self.entries.get(c))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }

    /// Drop the oldest entries beyond the cap, keeping the cursor on the
    /// same snapshot.
    fn prune(&mut self) {
        if self.max_entries == 0 || self.entries.len() <= self.max_entries {
            return;
        }
        let excess = self.entries.len() - self.max_entries;
        self.entries.drain(..excess);
        self.cursor = self.cursor.map(|c| c.saturating_sub(excess));
    }
}
