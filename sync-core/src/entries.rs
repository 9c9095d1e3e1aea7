//! Transform log entries for keelsync.
//!
//! [`LogEntries`] is the in-memory sequence behind the durable transform log.
//! It only grows at the tail and shrinks from either end:
//! - `append` - tail growth
//! - `truncate` - prefix removal
//! - `rollback` - suffix removal
//! - `clear` - everything
//!
//! Positions are addressed by an identifier plus a relative offset. With
//! `i` the identifier's index and `n` the length, the valid offsets are:
//!
//! | Operation  | Keeps              | Valid offsets         |
//! |------------|--------------------|-----------------------|
//! | `before`   | `[0, i + rel)`     | `-i ..= 0`            |
//! | `after`    | `[i + rel + 1, n)` | `-i - 1 ..= n - 1 - i`|
//! | `truncate` | `[i + rel, n)`     | `-i ..= n - i`        |
//! | `rollback` | `[0, i + rel]`     | `-i - 1 ..= n - 1 - i`|

use keelsync_types::{LogError, TransformId};

/// Ordered, append-only sequence of transform identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogEntries {
    entries: Vec<TransformId>,
}

impl LogEntries {
    /// Create an empty sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sequence from existing identifiers, oldest first.
    pub fn from_vec(entries: Vec<TransformId>) -> Self {
        Self { entries }
    }

    /// All identifiers, oldest first.
    pub fn as_slice(&self) -> &[TransformId] {
        &self.entries
    }

    /// Number of identifiers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent identifier, if any.
    pub fn head(&self) -> Option<&TransformId> {
        self.entries.last()
    }

    /// Check whether `id` has been logged.
    pub fn contains(&self, id: &TransformId) -> bool {
        self.entries.contains(id)
    }

    /// Append identifiers to the tail, in order.
    pub fn append(&mut self, ids: impl IntoIterator<Item = TransformId>) {
        self.entries.extend(ids);
    }

    /// Identifiers preceding `id`, shifted by `relative_position`.
    pub fn before(&self, id: &TransformId, relative_position: i64) -> Result<&[TransformId], LogError> {
        let index = self.index_of(id)?;
        let end = self.checked_boundary(id, index, relative_position, -index, 0)?;
        Ok(&self.entries[..end])
    }

    /// Identifiers following `id`, shifted by `relative_position`.
    pub fn after(&self, id: &TransformId, relative_position: i64) -> Result<&[TransformId], LogError> {
        let index = self.index_of(id)?;
        let max = self.len_i64() - 1 - index;
        let start = self.checked_boundary(id, index + 1, relative_position, -index - 1, max)?;
        Ok(&self.entries[start..])
    }

    /// Drop every identifier before `id` (shifted by `relative_position`).
    ///
    /// A boundary one past the last entry empties the sequence.
    pub fn truncate(&mut self, id: &TransformId, relative_position: i64) -> Result<(), LogError> {
        let index = self.index_of(id)?;
        let max = self.len_i64() - index;
        let start = self.checked_boundary(id, index, relative_position, -index, max)?;
        self.entries.drain(..start);
        Ok(())
    }

    /// Drop every identifier after `id` (shifted by `relative_position`).
    ///
    /// A boundary one before the first entry empties the sequence.
    pub fn rollback(&mut self, id: &TransformId, relative_position: i64) -> Result<(), LogError> {
        let index = self.index_of(id)?;
        let max = self.len_i64() - 1 - index;
        let keep = self.checked_boundary(id, index + 1, relative_position, -index - 1, max)?;
        self.entries.truncate(keep);
        Ok(())
    }

    /// Remove every identifier.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Consume the sequence, returning the identifiers.
    pub fn into_vec(self) -> Vec<TransformId> {
        self.entries
    }

    fn index_of(&self, id: &TransformId) -> Result<i64, LogError> {
        self.entries
            .iter()
            .position(|entry| entry == id)
            .map(|index| index as i64)
            .ok_or_else(|| LogError::TransformNotLogged { id: id.clone() })
    }

    /// Validate `relative_position` against `min..=max` and return `base + relative_position`.
    fn checked_boundary(
        &self,
        id: &TransformId,
        base: i64,
        relative_position: i64,
        min: i64,
        max: i64,
    ) -> Result<usize, LogError> {
        if relative_position < min || relative_position > max {
            return Err(LogError::OutOfRange {
                id: id.clone(),
                relative_position,
                min,
                max,
            });
        }
        Ok((base + relative_position) as usize)
    }

    fn len_i64(&self) -> i64 {
        self.entries.len() as i64
    }
}

impl From<Vec<TransformId>> for LogEntries {
    fn from(entries: Vec<TransformId>) -> Self {
        Self::from_vec(entries)
    }
}
