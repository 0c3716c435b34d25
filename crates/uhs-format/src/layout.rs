//! Per-encode layout state
//!
//! One `LayoutModel` lives for exactly one encode. It walks through
//! [`Phase`]s in order and refuses calls that belong to another phase:
//!
//! ```text
//! Explore ──finalize_widths──▶ Sized ──begin_render──▶ Render ──finish──▶ Complete
//!   lines, spans,               widths fixed;            widths frozen;
//!   binary high-water marks     base may be injected     binary bytes kept
//! ```
//!
//! Binary positions are tracked relative to the start of the binary segment
//! and printed with `binary_base` added, so the base can be injected after
//! exploration without disturbing what exploration recorded.

use std::collections::BTreeMap;
use tracing::debug;
use uhs_core::{DocumentLayout, LineNumber, NodeId, StructuralError, UhsError, UhsResult};

use crate::hunk::{decimal_digits, field_width, format_padded, MIN_FIELD_WIDTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Explore,
    Sized,
    Render,
    Complete,
}

/// Outcome of looking up a node's line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRef {
    Resolved(LineNumber),
    /// Not registered yet; only possible while exploring
    Unresolved,
}

#[derive(Debug)]
pub struct LayoutModel {
    phase: Phase,

    next_line: LineNumber,
    lines: BTreeMap<NodeId, LineNumber>,
    spans: BTreeMap<NodeId, u32>,

    binary_base: u64,
    binary_cursor: u64,
    attachments: BTreeMap<NodeId, u64>,
    explored_binary_len: u64,
    sections: usize,
    highest_offset: u64,
    highest_length: u64,

    offset_width: usize,
    length_width: usize,

    binary: Vec<u8>,
}

impl LayoutModel {
    pub fn new() -> Self {
        Self::with_binary_base(0)
    }

    pub fn with_binary_base(binary_base: u64) -> Self {
        Self {
            phase: Phase::Explore,
            next_line: 1,
            lines: BTreeMap::new(),
            spans: BTreeMap::new(),
            binary_base,
            binary_cursor: 0,
            attachments: BTreeMap::new(),
            explored_binary_len: 0,
            sections: 0,
            highest_offset: 0,
            highest_length: 0,
            offset_width: MIN_FIELD_WIDTH,
            length_width: MIN_FIELD_WIDTH,
            binary: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn expect_phase(&self, allowed: &[Phase], op: &str) -> UhsResult<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(UhsError::invariant(format!(
                "{op} called during {:?} phase",
                self.phase
            )))
        }
    }

    // ── Lines ──────────────────────────────────────────────────────────────

    /// Line the next claimed hunk line will get
    pub fn next_line(&self) -> LineNumber {
        self.next_line
    }

    pub fn advance_lines(&mut self, count: u32) -> UhsResult<()> {
        self.expect_phase(&[Phase::Explore], "advance_lines")?;
        self.next_line = self
            .next_line
            .checked_add(count)
            .ok_or_else(|| UhsError::invariant("line counter overflow"))?;
        Ok(())
    }

    /// Lines claimed so far
    pub fn text_lines(&self) -> u32 {
        self.next_line - 1
    }

    pub fn register_line(&mut self, id: NodeId, line: LineNumber) -> UhsResult<()> {
        self.expect_phase(&[Phase::Explore], "register_line")?;
        match self.lines.insert(id, line) {
            Some(previous) if previous != line => Err(UhsError::invariant(format!(
                "node {id} registered at line {previous} and again at line {line}"
            ))),
            _ => Ok(()),
        }
    }

    /// Look up a node's line. While exploring, an unknown id is
    /// [`LineRef::Unresolved`]; afterwards it is a dangling reference.
    pub fn resolve_line(&self, id: NodeId) -> UhsResult<LineRef> {
        match self.lines.get(&id) {
            Some(&line) => Ok(LineRef::Resolved(line)),
            None if self.phase == Phase::Explore => Ok(LineRef::Unresolved),
            None => Err(StructuralError::DanglingReference(id).into()),
        }
    }

    /// Line of a node whose reference is about to be printed
    pub fn line_of(&self, id: NodeId) -> UhsResult<LineNumber> {
        self.expect_phase(&[Phase::Sized, Phase::Render], "line_of")?;
        match self.resolve_line(id)? {
            LineRef::Resolved(line) => Ok(line),
            LineRef::Unresolved => Err(StructuralError::DanglingReference(id).into()),
        }
    }

    pub fn register_span(&mut self, id: NodeId, span: u32) -> UhsResult<()> {
        self.expect_phase(&[Phase::Explore], "register_span")?;
        if self.spans.insert(id, span).is_some() {
            return Err(UhsError::invariant(format!("span of node {id} registered twice")));
        }
        Ok(())
    }

    pub fn span(&self, id: NodeId) -> UhsResult<u32> {
        self.spans
            .get(&id)
            .copied()
            .ok_or_else(|| UhsError::invariant(format!("no span recorded for node {id}")))
    }

    // ── Binary segment ─────────────────────────────────────────────────────

    /// Absolute offset the next binary section will be printed with
    pub fn next_binary_offset(&self) -> u64 {
        self.binary_base + self.binary_cursor
    }

    pub fn binary_base(&self) -> u64 {
        self.binary_base
    }

    /// Advance the binary cursor past a section of `length` bytes. While
    /// exploring this also raises the high-water marks the widths are sized
    /// from.
    pub fn register_binary_section(&mut self, length: u64) -> UhsResult<()> {
        self.expect_phase(
            &[Phase::Explore, Phase::Sized, Phase::Render],
            "register_binary_section",
        )?;
        if self.phase == Phase::Explore {
            self.sections += 1;
            self.highest_offset = self.highest_offset.max(self.binary_cursor);
            self.highest_length = self.highest_length.max(length);
        }
        self.binary_cursor += length;
        Ok(())
    }

    /// Remember where an attachment's bytes will start. Returns the offset
    /// as it stands now; the printed value may still gain a base.
    pub fn record_attachment(&mut self, id: NodeId) -> UhsResult<u64> {
        self.expect_phase(&[Phase::Explore], "record_attachment")?;
        if self.attachments.insert(id, self.binary_cursor).is_some() {
            return Err(UhsError::invariant(format!(
                "attachment {id} recorded twice"
            )));
        }
        Ok(self.next_binary_offset())
    }

    /// Lay an attachment's bytes into the binary segment at the position
    /// exploration recorded for it. Returns the absolute offset to print.
    pub fn append_binary(&mut self, id: NodeId, data: &[u8]) -> UhsResult<u64> {
        self.expect_phase(&[Phase::Sized, Phase::Render], "append_binary")?;
        let expected = self
            .attachments
            .get(&id)
            .copied()
            .ok_or_else(|| UhsError::invariant(format!("attachment {id} was never explored")))?;
        if expected != self.binary_cursor {
            return Err(UhsError::invariant(format!(
                "attachment {id} laid out at {} but explored at {expected}",
                self.binary_cursor
            )));
        }

        let offset = self.next_binary_offset();
        self.register_binary_section(data.len() as u64)?;
        if self.phase == Phase::Render {
            self.binary.extend_from_slice(data);
        }
        Ok(offset)
    }

    // ── Widths ─────────────────────────────────────────────────────────────

    fn required_widths(&self) -> (usize, usize) {
        let offset = if self.sections == 0 {
            MIN_FIELD_WIDTH
        } else {
            field_width(self.binary_base + self.highest_offset)
        };
        (offset, field_width(self.highest_length))
    }

    /// Fix the field widths from the explored high-water marks. Ends the
    /// exploratory phase.
    pub fn finalize_widths(&mut self) -> UhsResult<()> {
        self.expect_phase(&[Phase::Explore], "finalize_widths")?;
        let (offset, length) = self.required_widths();
        self.offset_width = offset;
        self.length_width = length;
        self.explored_binary_len = self.binary_cursor;
        self.phase = Phase::Sized;

        debug!(
            lines = self.text_lines(),
            binary_len = self.explored_binary_len,
            sections = self.sections,
            offset_width = offset,
            length_width = length,
            "layout explored"
        );
        Ok(())
    }

    /// Move the binary segment to `base`. Returns true when a field had to
    /// widen to hold the new offsets, meaning the text must be re-measured.
    pub fn inject_binary_base(&mut self, base: u64) -> UhsResult<bool> {
        self.expect_phase(&[Phase::Sized], "inject_binary_base")?;
        self.binary_base = base;
        let (offset, length) = self.required_widths();
        let widened = offset > self.offset_width || length > self.length_width;
        self.offset_width = self.offset_width.max(offset);
        self.length_width = self.length_width.max(length);
        if widened {
            debug!(
                base,
                offset_width = self.offset_width,
                length_width = self.length_width,
                "binary base widened fields"
            );
        }
        Ok(widened)
    }

    pub fn offset_width(&self) -> usize {
        self.offset_width
    }

    pub fn length_width(&self) -> usize {
        self.length_width
    }

    pub fn format_offset(&self, offset: u64) -> UhsResult<String> {
        self.format_field(offset, self.offset_width, "offset")
    }

    pub fn format_length(&self, length: u64) -> UhsResult<String> {
        self.format_field(length, self.length_width, "length")
    }

    fn format_field(&self, value: u64, width: usize, field: &str) -> UhsResult<String> {
        self.expect_phase(&[Phase::Sized, Phase::Render], "format_field")?;
        if decimal_digits(value) > width {
            return Err(UhsError::invariant(format!(
                "{field} {value} does not fit fixed width {width}"
            )));
        }
        Ok(format_padded(value, width))
    }

    pub fn layout(&self) -> DocumentLayout {
        DocumentLayout {
            offset_width: self.offset_width,
            length_width: self.length_width,
            binary_base: self.binary_base,
        }
    }

    // ── Passes ─────────────────────────────────────────────────────────────

    /// Reset the binary cursor before another walk over the tree
    pub fn rewind(&mut self) -> UhsResult<()> {
        self.expect_phase(&[Phase::Sized, Phase::Render], "rewind")?;
        self.binary_cursor = 0;
        self.binary.clear();
        Ok(())
    }

    /// Freeze the widths and base; from here on binary bytes are kept.
    pub fn begin_render(&mut self) -> UhsResult<()> {
        self.expect_phase(&[Phase::Sized], "begin_render")?;
        self.phase = Phase::Render;
        self.rewind()
    }

    /// End the render pass and hand over the binary segment.
    pub fn finish(&mut self) -> UhsResult<Vec<u8>> {
        self.expect_phase(&[Phase::Render], "finish")?;
        if self.binary_cursor != self.explored_binary_len {
            return Err(UhsError::invariant(format!(
                "binary segment rendered {} bytes but exploration laid out {}",
                self.binary_cursor, self.explored_binary_len
            )));
        }
        self.phase = Phase::Complete;
        Ok(std::mem::take(&mut self.binary))
    }
}

impl Default for LayoutModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn unresolved_while_exploring_then_dangling() {
        let mut model = LayoutModel::new();
        model.register_line(NodeId(1), 2).unwrap();
        assert_eq!(model.resolve_line(NodeId(1)).unwrap(), LineRef::Resolved(2));
        assert_eq!(model.resolve_line(NodeId(9)).unwrap(), LineRef::Unresolved);

        model.finalize_widths().unwrap();
        let err = model.resolve_line(NodeId(9)).unwrap_err();
        assert!(matches!(
            err,
            UhsError::Structural(StructuralError::DanglingReference(NodeId(9)))
        ));
        assert_eq!(model.line_of(NodeId(1)).unwrap(), 2);
    }

    #[test]
    fn conflicting_line_registration_is_an_invariant_violation() {
        let mut model = LayoutModel::new();
        model.register_line(NodeId(1), 4).unwrap();
        model.register_line(NodeId(1), 4).unwrap();
        let err = model.register_line(NodeId(1), 5).unwrap_err();
        assert!(matches!(err, UhsError::Invariant(_)));
    }

    #[test]
    fn binary_cursor_advances_from_base() {
        let mut model = LayoutModel::with_binary_base(0);
        assert_eq!(model.next_binary_offset(), 0);
        model.record_attachment(NodeId(3)).unwrap();
        model.register_binary_section(500).unwrap();
        assert_eq!(model.next_binary_offset(), 500);
    }

    #[test]
    fn widths_default_to_six_without_binary() {
        let mut model = LayoutModel::new();
        model.finalize_widths().unwrap();
        assert_eq!(model.offset_width(), 6);
        assert_eq!(model.length_width(), 6);
        assert!(!model.inject_binary_base(5_000_000).unwrap());
        assert_eq!(model.offset_width(), 6);
    }

    #[test]
    fn large_sections_widen_length_field() {
        let mut model = LayoutModel::new();
        model.record_attachment(NodeId(1)).unwrap();
        model.register_binary_section(1_000_000).unwrap();
        model.record_attachment(NodeId(2)).unwrap();
        model.register_binary_section(10).unwrap();
        model.finalize_widths().unwrap();
        assert_eq!(model.length_width(), 7);
        // highest section start is 1_000_000
        assert_eq!(model.offset_width(), 7);
    }

    #[test]
    fn injected_base_can_widen_offsets_only_before_render() {
        let mut model = LayoutModel::new();
        model.record_attachment(NodeId(1)).unwrap();
        model.register_binary_section(100).unwrap();
        model.record_attachment(NodeId(2)).unwrap();
        model.register_binary_section(100).unwrap();
        model.finalize_widths().unwrap();
        assert_eq!(model.offset_width(), 6);

        assert!(model.inject_binary_base(999_950).unwrap());
        assert_eq!(model.offset_width(), 7);
        assert!(!model.inject_binary_base(999_950).unwrap());

        model.begin_render().unwrap();
        assert!(matches!(
            model.inject_binary_base(1).unwrap_err(),
            UhsError::Invariant(_)
        ));
        assert_eq!(model.offset_width(), 7);
    }

    #[test]
    fn render_must_follow_explored_binary_layout() {
        let mut model = LayoutModel::new();
        model.record_attachment(NodeId(1)).unwrap();
        model.register_binary_section(3).unwrap();
        model.record_attachment(NodeId(2)).unwrap();
        model.register_binary_section(2).unwrap();
        model.finalize_widths().unwrap();
        model.inject_binary_base(40).unwrap();
        model.begin_render().unwrap();

        // out of order
        let err = model.append_binary(NodeId(2), b"yz").unwrap_err();
        assert!(matches!(err, UhsError::Invariant(_)));

        model.rewind().unwrap();
        assert_eq!(model.append_binary(NodeId(1), b"abc").unwrap(), 40);
        assert_eq!(model.append_binary(NodeId(2), b"yz").unwrap(), 43);
        assert_eq!(model.finish().unwrap(), b"abcyz".to_vec());
        assert_eq!(model.phase(), Phase::Complete);
    }

    #[test]
    fn short_render_is_caught_at_finish() {
        let mut model = LayoutModel::new();
        model.record_attachment(NodeId(1)).unwrap();
        model.register_binary_section(3).unwrap();
        model.finalize_widths().unwrap();
        model.begin_render().unwrap();
        assert!(matches!(model.finish().unwrap_err(), UhsError::Invariant(_)));
    }

    #[test]
    fn phase_order_is_enforced() {
        let mut model = LayoutModel::new();
        assert!(model.begin_render().is_err());
        assert!(model.format_offset(1).is_err());
        assert!(model.line_of(NodeId(1)).is_err());
        model.finalize_widths().unwrap();
        assert!(model.finalize_widths().is_err());
        assert!(model.register_line(NodeId(1), 1).is_err());
        assert!(model.advance_lines(1).is_err());
    }

    #[test]
    fn format_checks_fixed_width() {
        let mut model = LayoutModel::new();
        model.finalize_widths().unwrap();
        assert_eq!(model.format_offset(42).unwrap(), "000042");
        assert_eq!(model.format_length(0).unwrap(), "000000");
        assert!(matches!(
            model.format_length(1_000_000).unwrap_err(),
            UhsError::Invariant(_)
        ));
    }

    proptest! {
        #[test]
        fn widths_are_at_least_six_and_minimal(
            lengths in proptest::collection::vec(0u64..3_000_000, 0..8),
            base in 0u64..5_000_000,
        ) {
            let mut model = LayoutModel::new();
            for (i, len) in lengths.iter().enumerate() {
                model.record_attachment(NodeId(i as u32)).unwrap();
                model.register_binary_section(*len).unwrap();
            }
            model.finalize_widths().unwrap();
            model.inject_binary_base(base).unwrap();

            prop_assert!(model.offset_width() >= 6);
            prop_assert!(model.length_width() >= 6);

            let longest = lengths.iter().copied().max().unwrap_or(0);
            prop_assert_eq!(model.length_width(), decimal_digits(longest).max(6));

            if lengths.is_empty() {
                prop_assert_eq!(model.offset_width(), 6);
            } else {
                let last_start: u64 = lengths[..lengths.len() - 1].iter().sum();
                prop_assert_eq!(model.offset_width(), decimal_digits(base + last_start).max(6));
            }
        }
    }
}
