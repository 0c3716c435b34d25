//! Document deserializer: container bytes → tree
//!
//! Hunks are parsed in one preorder sweep over the text segment, minting
//! node ids as they are met and indexing each hunk's header line. The root
//! hunk's span marks where the text segment ends and the binary segment
//! begins. A second pass resolves line references into node ids, slices
//! attachments out of the binary segment, and deciphers encrypted text.

use std::collections::BTreeMap;
use tracing::{debug, warn};
use uhs_core::config::CodecConfig;
use uhs_core::{
    AttachmentFormat, Document, DocumentLayout, IdAllocator, LineNumber, Node, NodeId, NodeKind,
    StructuralError, Text, UhsError, UhsResult,
};
use uhs_crypto::{decrypt_str_with, CipherKey, KeySchedule, Keystream, TitleKeySchedule};

use crate::hunk::{
    field_width, malformed, parse_number, parse_padded, CipherTag, HunkHeader, HunkWord,
    PaddedField, MAGIC, MAX_DEPTH, MIN_FIELD_WIDTH, NO_TARGET,
};

#[derive(Debug, Clone, Default)]
pub struct Reader<S: KeySchedule = TitleKeySchedule> {
    schedule: S,
    config: CodecConfig,
}

impl Reader<TitleKeySchedule> {
    pub fn new() -> Self {
        Self::with_config(CodecConfig::default())
    }

    pub fn with_config(config: CodecConfig) -> Self {
        Self {
            schedule: TitleKeySchedule,
            config,
        }
    }
}

impl<S: KeySchedule> Reader<S> {
    pub fn with_schedule(schedule: S, config: CodecConfig) -> Self {
        Self { schedule, config }
    }

    pub fn decode(&self, data: &[u8]) -> UhsResult<Document> {
        let size = data.len() as u64;
        if size > self.config.max_document_bytes {
            return Err(UhsError::TooLarge {
                size,
                limit: self.config.max_document_bytes,
            });
        }

        let mut parser = Parser {
            cursor: LineCursor::new(data),
            ids: IdAllocator::new(),
            hunk_lines: BTreeMap::new(),
        };
        let magic = parser
            .cursor
            .read()
            .map_err(|_| StructuralError::BadMagic)?;
        if magic.1 != MAGIC {
            return Err(StructuralError::BadMagic.into());
        }

        let root = parser.parse_hunk(LineNumber::MAX, 0)?;
        let title = match &root.body {
            RawBody::Subject { title } => title.clone(),
            other => {
                return Err(StructuralError::MisplacedRoot {
                    found: other.word().as_str(),
                    depth: 0,
                }
                .into())
            }
        };

        let base = parser.cursor.pos as u64;
        let binary = &data[parser.cursor.pos..];
        debug!(
            text_lines = parser.cursor.next_line - 1,
            text_bytes = base,
            binary_bytes = binary.len(),
            "text segment parsed"
        );

        let key = root
            .any_crypt()
            .then(|| self.schedule.derive(&title));

        let mut fields = FieldWidths::default();
        let mut assembler = Assembler {
            hunk_lines: &parser.hunk_lines,
            key: key.as_ref(),
            base,
            binary,
            binary_used: 0,
            fields: &mut fields,
        };
        let mut root_node = assembler.assemble(root)?;
        root_node.kind = NodeKind::Root { title };

        if assembler.binary_used < binary.len() as u64 {
            warn!(
                unreferenced = binary.len() as u64 - assembler.binary_used,
                "binary segment has trailing bytes no attachment references"
            );
        }

        let (offset_width, length_width) = fields.check(self.config.strict_field_widths)?;
        Ok(Document {
            root: root_node,
            key,
            layout: Some(DocumentLayout {
                offset_width,
                length_width,
                binary_base: base,
            }),
        })
    }
}

/// Decode with the default title-derived key schedule and limits
pub fn decode(data: &[u8]) -> UhsResult<Document> {
    Reader::new().decode(data)
}

// ── Text segment scanning ─────────────────────────────────────────────────────

struct LineCursor<'a> {
    data: &'a [u8],
    pos: usize,
    next_line: LineNumber,
}

impl<'a> LineCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            next_line: 1,
        }
    }

    fn read(&mut self) -> UhsResult<(LineNumber, &'a str)> {
        let line = self.next_line;
        let data: &'a [u8] = self.data;
        let rest = &data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or(StructuralError::TruncatedText { line })?;
        let text = std::str::from_utf8(&rest[..end])
            .map_err(|_| StructuralError::InvalidUtf8 { line })?;
        self.pos += end + 1;
        self.next_line += 1;
        Ok((line, text))
    }
}

enum RawBody {
    Subject {
        title: String,
    },
    Hint {
        title: String,
        cipher: CipherTag,
        lines: Vec<String>,
        target: Option<RawTarget>,
    },
    NestHint {
        cipher: CipherTag,
        lines: Vec<String>,
    },
    Attachment {
        title: String,
        format: AttachmentFormat,
        line: LineNumber,
        offset: PaddedField,
        length: PaddedField,
    },
    Comment {
        title: String,
        lines: Vec<String>,
    },
    Link {
        title: String,
        target: RawTarget,
    },
}

impl RawBody {
    fn word(&self) -> HunkWord {
        match self {
            RawBody::Subject { .. } => HunkWord::Subject,
            RawBody::Hint { .. } => HunkWord::Hint,
            RawBody::NestHint { .. } => HunkWord::NestHint,
            RawBody::Attachment { format, .. } => HunkWord::Attachment(*format),
            RawBody::Comment { .. } => HunkWord::Comment,
            RawBody::Link { .. } => HunkWord::Link,
        }
    }
}

/// A line reference and the line it was printed on
#[derive(Clone, Copy)]
struct RawTarget {
    site: LineNumber,
    target: LineNumber,
}

struct RawHunk {
    id: NodeId,
    body: RawBody,
    children: Vec<RawHunk>,
}

impl RawHunk {
    fn any_crypt(&self) -> bool {
        let own = match &self.body {
            RawBody::Hint { cipher, .. } | RawBody::NestHint { cipher, .. } => cipher.is_crypt(),
            _ => false,
        };
        own || self.children.iter().any(RawHunk::any_crypt)
    }
}

struct Parser<'a> {
    cursor: LineCursor<'a>,
    ids: IdAllocator,
    hunk_lines: BTreeMap<LineNumber, NodeId>,
}

impl<'a> Parser<'a> {
    /// Parse the hunk starting at the cursor. `end` is the last line the
    /// enclosing hunk owns.
    fn parse_hunk(&mut self, end: LineNumber, depth: usize) -> UhsResult<RawHunk> {
        if depth > MAX_DEPTH {
            return Err(StructuralError::TooDeep {
                line: self.cursor.next_line,
                limit: MAX_DEPTH,
            }
            .into());
        }

        let (line, header) = self.cursor.read()?;
        let header = HunkHeader::parse(header, line)?;
        let last = line
            .checked_add(header.span - 1)
            .filter(|&last| last <= end)
            .ok_or(StructuralError::SpanOverflow {
                line,
                span: header.span,
            })?;

        let id = self.ids.next_id();
        self.hunk_lines.insert(line, id);

        let body = self.parse_body(header, line, last)?;
        let mut children = Vec::new();
        while self.cursor.next_line <= last {
            children.push(self.parse_hunk(last, depth + 1)?);
        }

        Ok(RawHunk { id, body, children })
    }

    fn parse_body(&mut self, header: HunkHeader, line: LineNumber, last: LineNumber) -> UhsResult<RawBody> {
        Ok(match header.word {
            HunkWord::Subject => RawBody::Subject {
                title: self.body_line(line, header, last)?.1.to_string(),
            },
            HunkWord::Hint => {
                let title = self.body_line(line, header, last)?.1.to_string();
                let (meta_line, meta) = self.body_line(line, header, last)?;
                let parts: Vec<&str> = meta.split(' ').collect();
                let [cipher, count, target] = parts[..] else {
                    return Err(malformed(meta_line, "hint parameters", meta));
                };
                let cipher = CipherTag::parse(cipher, meta_line)?;
                let count = parse_text_count(count, meta_line)?;
                let target = if target == NO_TARGET {
                    None
                } else {
                    Some(RawTarget {
                        site: meta_line,
                        target: parse_number(target, meta_line, "target line")?,
                    })
                };
                let lines = self.text_lines(count, line, header, last)?;
                RawBody::Hint {
                    title,
                    cipher,
                    lines,
                    target,
                }
            }
            HunkWord::NestHint => {
                let (meta_line, meta) = self.body_line(line, header, last)?;
                let Some((cipher, count)) = meta.split_once(' ') else {
                    return Err(malformed(meta_line, "nested hint parameters", meta));
                };
                let cipher = CipherTag::parse(cipher, meta_line)?;
                let count = parse_text_count(count, meta_line)?;
                let lines = self.text_lines(count, line, header, last)?;
                RawBody::NestHint { cipher, lines }
            }
            HunkWord::Attachment(format) => {
                let title = self.body_line(line, header, last)?.1.to_string();
                let (field_line, fields) = self.body_line(line, header, last)?;
                let Some((offset, length)) = fields.split_once(' ') else {
                    return Err(malformed(field_line, "binary section", fields));
                };
                RawBody::Attachment {
                    title,
                    format,
                    line: field_line,
                    offset: parse_padded(offset, field_line, "offset")?,
                    length: parse_padded(length, field_line, "length")?,
                }
            }
            HunkWord::Comment => {
                let title = self.body_line(line, header, last)?.1.to_string();
                let (count_line, count) = self.body_line(line, header, last)?;
                let count = parse_text_count(count, count_line)?;
                let lines = self.text_lines(count, line, header, last)?;
                RawBody::Comment { title, lines }
            }
            HunkWord::Link => {
                let title = self.body_line(line, header, last)?.1.to_string();
                let (site, target) = self.body_line(line, header, last)?;
                RawBody::Link {
                    title,
                    target: RawTarget {
                        site,
                        target: parse_number(target, site, "target line")?,
                    },
                }
            }
        })
    }

    /// Read one more line belonging to the hunk whose header is at `line`
    fn body_line(
        &mut self,
        line: LineNumber,
        header: HunkHeader,
        last: LineNumber,
    ) -> UhsResult<(LineNumber, &'a str)> {
        if self.cursor.next_line > last {
            return Err(StructuralError::SpanOverflow {
                line,
                span: header.span,
            }
            .into());
        }
        self.cursor.read()
    }

    fn text_lines(
        &mut self,
        count: u32,
        line: LineNumber,
        header: HunkHeader,
        last: LineNumber,
    ) -> UhsResult<Vec<String>> {
        let mut lines = Vec::new();
        for _ in 0..count {
            lines.push(self.body_line(line, header, last)?.1.to_string());
        }
        Ok(lines)
    }
}

fn parse_text_count(s: &str, line: LineNumber) -> UhsResult<u32> {
    match parse_number(s, line, "text line count")? {
        0 => Err(malformed(line, "text line count", s)),
        count => Ok(count),
    }
}

// ── Tree assembly ─────────────────────────────────────────────────────────────

/// Widths seen for each zero-padded field type, with the first line each
/// was seen on
#[derive(Default)]
struct FieldWidths {
    offset: Option<(LineNumber, usize)>,
    length: Option<(LineNumber, usize)>,
    max_offset: u64,
    max_length: u64,
}

impl FieldWidths {
    fn observe(&mut self, line: LineNumber, offset: PaddedField, length: PaddedField) -> UhsResult<()> {
        observe_width(&mut self.offset, line, offset.width, "offset")?;
        observe_width(&mut self.length, line, length.width, "length")?;
        self.max_offset = self.max_offset.max(offset.value);
        self.max_length = self.max_length.max(length.value);
        Ok(())
    }

    /// Returns the document's offset and length widths
    fn check(&self, strict: bool) -> UhsResult<(usize, usize)> {
        let offset = self.offset.map_or(MIN_FIELD_WIDTH, |(_, w)| w);
        let length = self.length.map_or(MIN_FIELD_WIDTH, |(_, w)| w);
        if strict {
            if let Some((line, width)) = self.offset {
                check_minimal(line, width, field_width(self.max_offset), "offset")?;
            }
            if let Some((line, width)) = self.length {
                check_minimal(line, width, field_width(self.max_length), "length")?;
            }
        }
        Ok((offset, length))
    }
}

fn observe_width(
    seen: &mut Option<(LineNumber, usize)>,
    line: LineNumber,
    width: usize,
    field: &'static str,
) -> UhsResult<()> {
    match *seen {
        None => {
            *seen = Some((line, width));
            Ok(())
        }
        Some((_, expected)) if expected != width => Err(StructuralError::FieldWidth {
            line,
            field,
            width,
            expected,
        }
        .into()),
        Some(_) => Ok(()),
    }
}

fn check_minimal(line: LineNumber, width: usize, expected: usize, field: &'static str) -> UhsResult<()> {
    if width != expected {
        return Err(StructuralError::FieldWidth {
            line,
            field,
            width,
            expected,
        }
        .into());
    }
    Ok(())
}

struct Assembler<'a> {
    hunk_lines: &'a BTreeMap<LineNumber, NodeId>,
    key: Option<&'a CipherKey>,
    base: u64,
    binary: &'a [u8],
    binary_used: u64,
    fields: &'a mut FieldWidths,
}

impl Assembler<'_> {
    fn assemble(&mut self, hunk: RawHunk) -> UhsResult<Node> {
        let kind = match hunk.body {
            RawBody::Subject { title } => NodeKind::Group { title },
            RawBody::Hint {
                title,
                cipher,
                lines,
                target,
            } => NodeKind::TextHint {
                title,
                text: self.text(cipher, lines, Keystream::TextHunk),
                link: target.map(|t| self.resolve(t)).transpose()?,
            },
            RawBody::NestHint { cipher, lines } => NodeKind::NestedHint {
                text: self.text(cipher, lines, Keystream::NestString),
            },
            RawBody::Attachment {
                title,
                format,
                line,
                offset,
                length,
            } => {
                self.fields.observe(line, offset, length)?;
                NodeKind::BinaryAttachment {
                    title,
                    format,
                    data: self.slice_binary(line, offset.value, length.value)?,
                }
            }
            RawBody::Comment { title, lines } => NodeKind::Comment {
                title,
                text: lines.join("\n"),
            },
            RawBody::Link { title, target } => NodeKind::Link {
                title,
                target: self.resolve(target)?,
            },
        };

        let mut node = Node::new(hunk.id, kind);
        for child in hunk.children {
            node.children.push(self.assemble(child)?);
        }
        Ok(node)
    }

    fn resolve(&self, target: RawTarget) -> UhsResult<NodeId> {
        self.hunk_lines.get(&target.target).copied().ok_or_else(|| {
            StructuralError::DanglingLine {
                line: target.site,
                target: target.target,
            }
            .into()
        })
    }

    fn text(&self, cipher: CipherTag, lines: Vec<String>, stream: Keystream) -> Text {
        match (cipher, self.key) {
            (CipherTag::Crypt, Some(key)) => {
                let plain: Vec<String> = lines
                    .iter()
                    .map(|l| decrypt_str_with(l, key, stream))
                    .collect();
                Text::encrypted(plain.join("\n"))
            }
            (CipherTag::Crypt, None) => Text::encrypted(lines.join("\n")),
            (CipherTag::Plain, _) => Text::plain(lines.join("\n")),
        }
    }

    fn slice_binary(&mut self, line: LineNumber, offset: u64, length: u64) -> UhsResult<Vec<u8>> {
        let end = self.base + self.binary.len() as u64;
        let truncated = || StructuralError::TruncatedBinary {
            line,
            offset,
            length,
            end,
        };

        let start = offset
            .checked_sub(self.base)
            .ok_or(StructuralError::OffsetBeforeBinary {
                line,
                offset,
                base: self.base,
            })?;
        let stop = start
            .checked_add(length)
            .filter(|&stop| stop <= self.binary.len() as u64)
            .ok_or_else(truncated)?;

        self.binary_used = self.binary_used.max(stop);
        Ok(self.binary[start as usize..stop as usize].to_vec())
    }
}
