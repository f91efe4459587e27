//! Multi-section packer.
//!
//! A table payload is written into a [`SectionPacker`] in stages:
//!
//! 1. the fixed part, repeated verbatim at the start of every section
//!    ([`SectionPacker::set_fixed_part`]);
//! 2. any number of stages, in wire order:
//!    - [`pack_entries`](SectionPacker::pack_entries): a list of atomic
//!      entries, optionally preceded by a per-section entry counter,
//!    - [`pack_descriptors`](SectionPacker::pack_descriptors): a top-level
//!      descriptor loop, split at descriptor boundaries,
//!    - [`pack_trailer`](SectionPacker::pack_trailer): trailing fields which
//!      must fit in one section;
//! 3. [`finish`](SectionPacker::finish), which numbers the sections and
//!    computes their CRC32.
//!
//! When a stage needs a new section, the current one is completed by the
//! `close` callback of the stage's [`BreakLayout`] (which writes the fields
//! expected after this stage, usually empty loops), emitted, and a new section
//! is started after the fixed part with the `reopen` callback (which writes
//! the fields expected before this stage).
//!
//! Entries and trailers are first serialized into a scratch buffer sized to
//! the free space of an empty section, then copied into the current section.
//! An entry that does not fit in the scratch buffer can never be packed.

use bytes::Bytes;
use psi_buffer::{max_value, BufferError, DescriptorList, PsiBuffer};

use crate::error::{TableError, TableResult};
use crate::section::{BinaryTable, Section, SectionHeader, MAX_PRIVATE_LONG_PAYLOAD_SIZE};

/// Maximum number of sections in one table.
pub const MAX_SECTION_COUNT: usize = 256;

/// Capacity used to report the size of an entry which overflowed.
const MEASURE_CAPACITY: usize = 1 << 20;

/// What to write around a section break during one packing stage.
#[derive(Clone, Copy, Default)]
pub struct BreakLayout<'a> {
    trailer_size: usize,
    close: Option<&'a dyn Fn(&mut PsiBuffer)>,
    reopen: Option<&'a dyn Fn(&mut PsiBuffer)>,
}

impl<'a> BreakLayout<'a> {
    /// Nothing written around a break.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `trailer_size` bytes free at the end of each section for the
    /// fields written by `close` when the section is completed.
    pub fn with_close(mut self, trailer_size: usize, close: &'a dyn Fn(&mut PsiBuffer)) -> Self {
        self.trailer_size = trailer_size;
        self.close = Some(close);
        self
    }

    /// Fields written after the fixed part of each continuation section.
    pub fn with_reopen(mut self, reopen: &'a dyn Fn(&mut PsiBuffer)) -> Self {
        self.reopen = Some(reopen);
        self
    }

    /// Bytes kept free for the closing fields.
    pub fn trailer_size(&self) -> usize {
        self.trailer_size
    }
}

/// Builds the sections of one table instance.
pub struct SectionPacker {
    header: SectionHeader,
    max_payload_size: usize,
    buf: PsiBuffer,
    fixed_size: usize,
    payloads: Vec<Bytes>,
}

impl SectionPacker {
    /// Create a packer for sections with the given header fields.
    ///
    /// The payload size is clamped to the maximum payload of a long section.
    pub fn new(header: SectionHeader, max_payload_size: usize) -> Self {
        let max_payload_size = max_payload_size.min(MAX_PRIVATE_LONG_PAYLOAD_SIZE);
        SectionPacker {
            header,
            max_payload_size,
            buf: PsiBuffer::writer(max_payload_size),
            fixed_size: 0,
            payloads: Vec::new(),
        }
    }

    /// Payload cursor of the current section.
    pub fn buffer(&mut self) -> &mut PsiBuffer {
        &mut self.buf
    }

    pub fn header(&self) -> &SectionHeader {
        &self.header
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Number of sections started so far, the current one included.
    pub fn section_count(&self) -> usize {
        self.payloads.len() + 1
    }

    /// Mark everything written so far as the fixed part of all sections.
    pub fn set_fixed_part(&mut self) {
        if !self.buf.is_byte_aligned() {
            self.buf
                .set_error(BufferError::Unaligned(self.buf.bit_position()));
            return;
        }
        self.fixed_size = self.buf.position();
    }

    /// Complete the current section and start a new one.
    pub fn break_section(&mut self, layout: &BreakLayout<'_>) -> TableResult<()> {
        if let Some(close) = layout.close {
            close(&mut self.buf);
        }
        self.buf.check()?;
        if self.payloads.len() + 1 >= MAX_SECTION_COUNT {
            return Err(TableError::TooManySections);
        }

        let payload = Bytes::copy_from_slice(self.buf.written());
        log::debug!(
            "Closing section #{} of table 0x{:02X}: {} payload bytes",
            self.payloads.len(),
            self.header.table_id,
            payload.len()
        );
        self.payloads.push(payload);

        self.buf.write_seek(self.fixed_size);
        if let Some(reopen) = layout.reopen {
            reopen(&mut self.buf);
        }
        self.buf.check()?;
        Ok(())
    }

    /// Pack a list of atomic entries.
    ///
    /// With `counter_bits`, a counter of that many bits is written first in
    /// each section and holds the number of entries placed in that section. A
    /// saturated counter also forces a new section.
    ///
    /// An entry is moved to a new section when it does not fit in the current
    /// one. It is a capacity error when it does not fit in an empty section.
    pub fn pack_entries<'e, T, I, F>(
        &mut self,
        layout: &BreakLayout<'_>,
        what: &'static str,
        counter_bits: Option<usize>,
        entries: I,
        mut serialize: F,
    ) -> TableResult<()>
    where
        T: 'e,
        I: IntoIterator<Item = &'e T>,
        F: FnMut(&T, &mut PsiBuffer),
    {
        self.check_aligned()?;
        let counter_bits = counter_bits.unwrap_or(0);
        let capacity = self.empty_capacity(layout, counter_bits.div_ceil(8))?;
        let mut count = 0u64;
        self.open_counter(counter_bits);

        for (index, entry) in entries.into_iter().enumerate() {
            let mut scratch = PsiBuffer::writer(capacity);
            serialize(entry, &mut scratch);
            match scratch.error() {
                Some(err) if err.is_write_overflow() => {
                    let mut measure = PsiBuffer::writer(MEASURE_CAPACITY);
                    serialize(entry, &mut measure);
                    return Err(TableError::Capacity {
                        what,
                        index,
                        size: measure.written().len(),
                        capacity,
                    });
                }
                Some(err) => return Err(err.clone().into()),
                None => {}
            }
            if !scratch.is_byte_aligned() {
                return Err(BufferError::Unaligned(scratch.bit_position()).into());
            }
            let bytes = scratch.into_bytes();

            let saturated = counter_bits > 0 && count == max_value(counter_bits);
            if bytes.len() > self.free_bytes(layout) || saturated {
                log::trace!(
                    "{} #{} ({} bytes) starts section #{}",
                    what,
                    index,
                    bytes.len(),
                    self.payloads.len() + 1
                );
                self.close_counter(counter_bits);
                self.break_section(layout)?;
                self.open_counter(counter_bits);
                count = 0;
            }

            self.buf.put_bytes(&bytes);
            count += 1;
            self.update_counter(counter_bits, count);
            self.buf.check()?;
        }

        self.close_counter(counter_bits);
        self.buf.check()?;
        Ok(())
    }

    /// Pack a top-level descriptor loop with a `length_bits` length field,
    /// split at descriptor boundaries over as many sections as needed.
    pub fn pack_descriptors(
        &mut self,
        layout: &BreakLayout<'_>,
        list: &DescriptorList,
        length_bits: usize,
    ) -> TableResult<()> {
        self.check_aligned()?;
        let mut start = 0;
        let mut fresh = false;
        loop {
            let free = self.free_bytes(layout);
            self.buf.push_write_size(free);
            let next = self
                .buf
                .put_partial_descriptor_list_with_length(list, start, length_bits);
            self.buf.pop_state();

            let overflow = self
                .buf
                .error()
                .map(BufferError::is_write_overflow)
                .unwrap_or(false);
            if overflow {
                // Not even room for the length field, nothing was written.
                self.buf.clear_error();
            } else {
                self.buf.check()?;
                if next >= list.len() {
                    return Ok(());
                }
            }
            if fresh && next == start {
                let size = if overflow { 2 } else { 2 + list[start].size() };
                return Err(TableError::Capacity {
                    what: "descriptor",
                    index: start,
                    size,
                    capacity: free,
                });
            }

            log::trace!(
                "descriptor loop continues at #{} in section #{}",
                next,
                self.payloads.len() + 1
            );
            self.break_section(layout)?;
            fresh = true;
            start = next;
        }
    }

    /// Pack trailing fields which must stay together.
    ///
    /// They go into a new section when they do not fit in the current one. It
    /// is a capacity error when they do not fit in an empty section either.
    pub fn pack_trailer<W>(&mut self, layout: &BreakLayout<'_>, what: &'static str, write: W) -> TableResult<()>
    where
        W: Fn(&mut PsiBuffer),
    {
        self.check_aligned()?;
        let capacity = self.empty_capacity(layout, 0)?;
        let mut scratch = PsiBuffer::writer(capacity);
        write(&mut scratch);
        match scratch.error() {
            Some(err) if err.is_write_overflow() => {
                let mut measure = PsiBuffer::writer(MEASURE_CAPACITY);
                write(&mut measure);
                return Err(TableError::Capacity {
                    what,
                    index: 0,
                    size: measure.written().len(),
                    capacity,
                });
            }
            Some(err) => return Err(err.clone().into()),
            None => {}
        }
        if !scratch.is_byte_aligned() {
            return Err(BufferError::Unaligned(scratch.bit_position()).into());
        }
        let bytes = scratch.into_bytes();
        if bytes.len() > self.free_bytes(layout) {
            log::trace!("{} ({} bytes) moves to a new section", what, bytes.len());
            self.break_section(layout)?;
        }
        self.buf.put_bytes(&bytes);
        self.buf.check()?;
        Ok(())
    }

    /// Emit the last section and build the table.
    pub fn finish(self) -> TableResult<BinaryTable> {
        self.buf.check()?;
        if self.buf.pushed_levels() > 0 {
            return Err(BufferError::StateStack("unbalanced saved states at end of table").into());
        }

        let mut payloads = self.payloads;
        payloads.push(Bytes::copy_from_slice(self.buf.written()));
        if payloads.len() > MAX_SECTION_COUNT {
            return Err(TableError::TooManySections);
        }

        let last = (payloads.len() - 1) as u8;
        let sections = payloads
            .iter()
            .enumerate()
            .map(|(number, payload)| Section::new_long(&self.header, number as u8, last, payload))
            .collect::<TableResult<Vec<_>>>()?;
        log::debug!(
            "Packed table 0x{:02X} (extension 0x{:04X}, version {}) into {} section(s)",
            self.header.table_id,
            self.header.table_id_extension,
            self.header.version,
            sections.len()
        );
        Ok(BinaryTable::from_ordered(sections))
    }

    fn check_aligned(&mut self) -> TableResult<()> {
        self.buf.check()?;
        if !self.buf.is_byte_aligned() {
            return Err(BufferError::Unaligned(self.buf.bit_position()).into());
        }
        Ok(())
    }

    /// Free bytes in the current section, closing fields excluded.
    fn free_bytes(&self, layout: &BreakLayout<'_>) -> usize {
        self.buf.remaining_bytes().saturating_sub(layout.trailer_size)
    }

    /// Free bytes in a continuation section, after the fixed part, the
    /// reopening fields and `extra` leading bytes, closing fields excluded.
    fn empty_capacity(&self, layout: &BreakLayout<'_>, extra: usize) -> TableResult<usize> {
        let mut reopen_size = 0;
        if let Some(reopen) = layout.reopen {
            let mut measure = PsiBuffer::writer(self.max_payload_size);
            reopen(&mut measure);
            reopen_size = measure.written().len();
        }
        let used = self.fixed_size + reopen_size + extra + layout.trailer_size;
        self.max_payload_size
            .checked_sub(used)
            .ok_or(TableError::Capacity {
                what: "section header fields",
                index: 0,
                size: used,
                capacity: self.max_payload_size,
            })
    }

    // The counter position is kept as the top saved state while entries are
    // appended after it.

    fn open_counter(&mut self, bits: usize) {
        if bits > 0 {
            self.buf.push_state();
            self.buf.put_bits(0, bits);
        }
    }

    fn update_counter(&mut self, bits: usize, count: u64) {
        if bits > 0 {
            self.buf.swap_state();
            self.buf.push_state();
            self.buf.put_bits(count, bits);
            self.buf.pop_state();
            self.buf.swap_state();
        }
    }

    fn close_counter(&mut self, bits: usize) {
        if bits > 0 {
            self.buf.drop_state();
        }
    }
}
