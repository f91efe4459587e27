//! Stack of saved states: bounded regions, deferred lengths and rollbacks.
//!
//! Every `push_*` operation saves the current cursor on a stack. The matching
//! [`PsiBuffer::pop_state`] undoes it according to the kind of push:
//!
//! | push                          | on pop                                          |
//! |-------------------------------|-------------------------------------------------|
//! | `push_state`                  | restore the saved cursor (rollback)             |
//! | `push_read_size*`             | skip unread data, restore the outer read bound  |
//! | `push_write_size`             | restore the outer write bound                   |
//! | `push_write_length`           | patch the length field with the bytes written   |
//!
//! Misuse (pop on an empty stack, swap with a bounded level) never panics, it
//! sets the sticky error of the buffer.

use super::{max_value, Cursor, Mode, PsiBuffer};
use crate::error::BufferError;

/// Why a state was saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reason {
    Full,
    ReadSize,
    WriteSize,
    WriteLength { bits: usize },
}

/// A saved cursor and the reason for saving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SavedState {
    pub(crate) cursor: Cursor,
    pub(crate) reason: Reason,
}

impl PsiBuffer {
    /// Number of currently saved states.
    pub fn pushed_levels(&self) -> usize {
        self.saved.len()
    }

    fn save(&mut self, reason: Reason) {
        self.saved.push(SavedState {
            cursor: self.cursor,
            reason,
        });
    }

    /// Save the cursor. A later [`pop_state`](Self::pop_state) restores it,
    /// discarding everything written or read since.
    pub fn push_state(&mut self) {
        self.save(Reason::Full);
    }

    /// Restrict reads to the next `size` bytes.
    ///
    /// A size larger than what the enclosing region still holds means the
    /// input is truncated: the region is clipped and a read error is set.
    pub fn push_read_size(&mut self, size: usize) {
        self.save(Reason::ReadSize);
        if self.mode != Mode::Read {
            self.set_error(BufferError::WrongMode("read region on a write buffer"));
            return;
        }
        if !self.is_byte_aligned() {
            self.set_error(BufferError::Unaligned(self.bit_position()));
            return;
        }
        let available = self.remaining_bytes();
        if size > available {
            self.set_error(BufferError::ReadOverflow {
                offset: self.bit_position(),
                requested: size * 8,
                available: available * 8,
            });
        }
        self.cursor.end = self.cursor.byte + size.min(available);
    }

    /// Read a `length_bits` length field and restrict reads to that many bytes.
    pub fn push_read_size_from_length(&mut self, length_bits: usize) {
        let length = self.get_bits(length_bits) as usize;
        self.push_read_size(length);
    }

    /// Restrict writes to the next `size` bytes.
    pub fn push_write_size(&mut self, size: usize) {
        self.save(Reason::WriteSize);
        let start = self.position() + usize::from(!self.is_byte_aligned());
        self.cursor.end = self.cursor.end.min(start.saturating_add(size));
    }

    /// Reserve a `length_bits` length field, patched on pop with the number of
    /// bytes written after it.
    ///
    /// The cursor must be byte-aligned right after the length field.
    pub fn push_write_length(&mut self, length_bits: usize) {
        self.save(Reason::WriteLength { bits: length_bits });
        if length_bits == 0 || length_bits > 32 || (self.cursor.bit + length_bits) % 8 != 0 {
            self.set_error(BufferError::Unaligned(self.bit_position() + length_bits));
            return;
        }
        self.put_bits(0, length_bits);
    }

    /// Pop the last saved state.
    ///
    /// Returns `false` when a popped read region was not entirely consumed or
    /// when there was nothing to pop.
    pub fn pop_state(&mut self) -> bool {
        let saved = match self.saved.pop() {
            Some(saved) => saved,
            None => {
                self.set_error(BufferError::StateStack("pop without a saved state"));
                return false;
            }
        };
        match saved.reason {
            Reason::Full => {
                self.cursor = saved.cursor;
                true
            }
            Reason::ReadSize if self.mode != Mode::Read => {
                self.cursor.end = saved.cursor.end;
                false
            }
            Reason::ReadSize => {
                let consumed = self.end_of_read();
                // Unread data in the region is skipped.
                self.cursor.byte = self.cursor.end;
                self.cursor.bit = 0;
                self.cursor.end = saved.cursor.end;
                consumed
            }
            Reason::WriteSize => {
                self.cursor.end = saved.cursor.end;
                true
            }
            Reason::WriteLength { bits } => {
                self.patch_length(saved.cursor, bits);
                true
            }
        }
    }

    fn patch_length(&mut self, field: Cursor, bits: usize) {
        if self.has_error() {
            return;
        }
        let payload_start = (field.bit_offset() + bits) / 8;
        let length = (self.position() + usize::from(!self.is_byte_aligned())).saturating_sub(payload_start);
        if length as u64 > max_value(bits) {
            self.set_error(BufferError::LengthOverflow { length, bits });
            return;
        }
        let current = self.cursor;
        self.cursor = field;
        self.write_bits_unchecked(length as u64, bits);
        self.cursor = current;
    }

    /// Swap the cursor with the last saved state, which must come from
    /// [`push_state`](Self::push_state).
    ///
    /// Typical use: update a counter written before a variable-length loop,
    /// then come back to the end of the loop.
    pub fn swap_state(&mut self) {
        match self.saved.last_mut() {
            Some(top) if top.reason == Reason::Full => {
                std::mem::swap(&mut top.cursor, &mut self.cursor);
            }
            Some(_) => self.set_error(BufferError::StateStack("swap with a bounded region")),
            None => self.set_error(BufferError::StateStack("swap without a saved state")),
        }
    }

    /// Drop the last saved state without applying it (commit).
    pub fn drop_state(&mut self) {
        if self.saved.pop().is_none() {
            self.set_error(BufferError::StateStack("drop without a saved state"));
        }
    }
}
