//! Per-kind hunk encoders
//!
//! Each node kind knows how many body lines it needs (independent of field
//! widths, so exploration can count lines before widths exist), what it must
//! register while exploring, and how to print its body once widths are fixed.
//! Headers and child recursion are handled by the writer.

use uhs_core::{AttachmentFormat, LineNumber, NodeId, NodeKind, Text, UhsError, UhsResult};
use uhs_crypto::{encrypt_str_with, CipherKey, Keystream};

use crate::hunk::{CipherTag, HunkHeader, HunkWord, NO_TARGET};
use crate::layout::LayoutModel;

/// Output of one walk over the tree, plus what a body needs to print itself
pub struct RenderContext<'a> {
    pub model: &'a mut LayoutModel,
    key: Option<&'a CipherKey>,
    out: Vec<u8>,
    line: LineNumber,
}

impl<'a> RenderContext<'a> {
    pub fn new(model: &'a mut LayoutModel, key: Option<&'a CipherKey>) -> Self {
        Self {
            model,
            key,
            out: Vec::new(),
            line: 1,
        }
    }

    /// Line number the next emitted line will have
    pub fn current_line(&self) -> LineNumber {
        self.line
    }

    pub fn line(&mut self, text: &str) {
        self.out.extend_from_slice(text.as_bytes());
        self.out.push(b'\n');
        self.line += 1;
    }

    pub fn header(&mut self, span: u32, word: HunkWord) {
        self.line(&HunkHeader { span, word }.render());
    }

    /// Emit a text payload one line at a time, enciphering each line on its
    /// own with `stream` when the text is marked encrypted.
    pub fn text_block(&mut self, text: &Text, stream: Keystream) -> UhsResult<()> {
        if !text.encrypted {
            for line in text.lines() {
                self.line(line);
            }
            return Ok(());
        }

        let key = self
            .key
            .ok_or_else(|| UhsError::invariant("encrypted text rendered without a key"))?;
        for line in text.lines() {
            let enciphered = encrypt_str_with(line, key, stream);
            self.line(&enciphered);
        }
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }
}

/// Capability every node kind provides to the writer
pub trait HunkEncoder {
    fn word(&self) -> HunkWord;

    /// Lines between the header and the first child hunk
    fn body_lines(&self) -> u32;

    /// Phase 1: claim anything besides lines (binary sections)
    fn estimate_layout(&self, _id: NodeId, _model: &mut LayoutModel) -> UhsResult<()> {
        Ok(())
    }

    /// Phase 3: print the body. Widths are fixed and every line resolved.
    fn render_body(&self, id: NodeId, cx: &mut RenderContext<'_>) -> UhsResult<()>;
}

pub fn encoder_for(kind: &NodeKind) -> Box<dyn HunkEncoder + '_> {
    match kind {
        NodeKind::Root { title } | NodeKind::Group { title } => Box::new(SubjectEncoder { title }),
        NodeKind::TextHint { title, text, link } => Box::new(HintEncoder {
            title,
            text,
            link: *link,
        }),
        NodeKind::NestedHint { text } => Box::new(NestHintEncoder { text }),
        NodeKind::BinaryAttachment {
            title,
            format,
            data,
        } => Box::new(AttachmentEncoder {
            title,
            format: *format,
            data,
        }),
        NodeKind::Comment { title, text } => Box::new(CommentEncoder { title, text }),
        NodeKind::Link { title, target } => Box::new(LinkEncoder {
            title,
            target: *target,
        }),
    }
}

struct SubjectEncoder<'a> {
    title: &'a str,
}

impl HunkEncoder for SubjectEncoder<'_> {
    fn word(&self) -> HunkWord {
        HunkWord::Subject
    }

    fn body_lines(&self) -> u32 {
        1
    }

    fn render_body(&self, _id: NodeId, cx: &mut RenderContext<'_>) -> UhsResult<()> {
        cx.line(self.title);
        Ok(())
    }
}

struct HintEncoder<'a> {
    title: &'a str,
    text: &'a Text,
    link: Option<NodeId>,
}

impl HunkEncoder for HintEncoder<'_> {
    fn word(&self) -> HunkWord {
        HunkWord::Hint
    }

    fn body_lines(&self) -> u32 {
        2 + self.text.line_count()
    }

    fn render_body(&self, _id: NodeId, cx: &mut RenderContext<'_>) -> UhsResult<()> {
        let target = match self.link {
            Some(target) => cx.model.line_of(target)?.to_string(),
            None => NO_TARGET.to_string(),
        };
        cx.line(self.title);
        cx.line(&format!(
            "{} {} {}",
            CipherTag::from_flag(self.text.encrypted).as_str(),
            self.text.line_count(),
            target
        ));
        cx.text_block(self.text, Keystream::TextHunk)
    }
}

struct NestHintEncoder<'a> {
    text: &'a Text,
}

impl HunkEncoder for NestHintEncoder<'_> {
    fn word(&self) -> HunkWord {
        HunkWord::NestHint
    }

    fn body_lines(&self) -> u32 {
        1 + self.text.line_count()
    }

    fn render_body(&self, _id: NodeId, cx: &mut RenderContext<'_>) -> UhsResult<()> {
        cx.line(&format!(
            "{} {}",
            CipherTag::from_flag(self.text.encrypted).as_str(),
            self.text.line_count()
        ));
        cx.text_block(self.text, Keystream::NestString)
    }
}

struct AttachmentEncoder<'a> {
    title: &'a str,
    format: AttachmentFormat,
    data: &'a [u8],
}

impl HunkEncoder for AttachmentEncoder<'_> {
    fn word(&self) -> HunkWord {
        HunkWord::Attachment(self.format)
    }

    fn body_lines(&self) -> u32 {
        2
    }

    fn estimate_layout(&self, id: NodeId, model: &mut LayoutModel) -> UhsResult<()> {
        model.record_attachment(id)?;
        model.register_binary_section(self.data.len() as u64)
    }

    fn render_body(&self, id: NodeId, cx: &mut RenderContext<'_>) -> UhsResult<()> {
        let offset = cx.model.append_binary(id, self.data)?;
        let fields = format!(
            "{} {}",
            cx.model.format_offset(offset)?,
            cx.model.format_length(self.data.len() as u64)?
        );
        cx.line(self.title);
        cx.line(&fields);
        Ok(())
    }
}

struct CommentEncoder<'a> {
    title: &'a str,
    text: &'a str,
}

impl HunkEncoder for CommentEncoder<'_> {
    fn word(&self) -> HunkWord {
        HunkWord::Comment
    }

    fn body_lines(&self) -> u32 {
        2 + self.text.split('\n').count() as u32
    }

    fn render_body(&self, _id: NodeId, cx: &mut RenderContext<'_>) -> UhsResult<()> {
        cx.line(self.title);
        cx.line(&self.text.split('\n').count().to_string());
        for line in self.text.split('\n') {
            cx.line(line);
        }
        Ok(())
    }
}

struct LinkEncoder<'a> {
    title: &'a str,
    target: NodeId,
}

impl HunkEncoder for LinkEncoder<'_> {
    fn word(&self) -> HunkWord {
        HunkWord::Link
    }

    fn body_lines(&self) -> u32 {
        2
    }

    fn render_body(&self, _id: NodeId, cx: &mut RenderContext<'_>) -> UhsResult<()> {
        let target = cx.model.line_of(self.target)?;
        cx.line(self.title);
        cx.line(&target.to_string());
        Ok(())
    }
}
