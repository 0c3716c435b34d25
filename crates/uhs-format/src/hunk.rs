//! Hunk vocabulary shared by the writer and the reader
//!
//! ```text
//! <span> <word>        header; span counts header, body, and all descendants
//! <body lines>         kind-specific, see HunkWord
//! <child hunks>        in reveal order
//! ```

use uhs_core::{AttachmentFormat, LineNumber, StructuralError, UhsResult};

/// First line of every container
pub const MAGIC: &str = "UHS";

/// Narrowest zero-padded offset/length field
pub const MIN_FIELD_WIDTH: usize = 6;

/// Deepest hunk nesting either direction will handle
pub const MAX_DEPTH: usize = 256;

/// Printed in a hint's target slot when it references nothing
pub const NO_TARGET: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HunkWord {
    /// Root (outermost) or group: title
    Subject,
    /// Text hint: title, `<cipher> <lines> <target>`, text
    Hint,
    /// Nested hint: `<cipher> <lines>`, text
    NestHint,
    /// Comment: title, `<lines>`, text
    Comment,
    /// Link: title, `<target>`
    Link,
    /// Binary attachment: title, `<offset> <length>`
    Attachment(AttachmentFormat),
}

impl HunkWord {
    pub fn as_str(&self) -> &'static str {
        match self {
            HunkWord::Subject => "subject",
            HunkWord::Hint => "hint",
            HunkWord::NestHint => "nesthint",
            HunkWord::Comment => "comment",
            HunkWord::Link => "link",
            HunkWord::Attachment(AttachmentFormat::Png) => "hyperpng",
            HunkWord::Attachment(AttachmentFormat::Gif) => "gifa",
            HunkWord::Attachment(AttachmentFormat::Wav) => "sound",
            HunkWord::Attachment(AttachmentFormat::Other) => "blob",
        }
    }

    pub fn parse(word: &str) -> Option<Self> {
        Some(match word {
            "subject" => HunkWord::Subject,
            "hint" => HunkWord::Hint,
            "nesthint" => HunkWord::NestHint,
            "comment" => HunkWord::Comment,
            "link" => HunkWord::Link,
            "hyperpng" => HunkWord::Attachment(AttachmentFormat::Png),
            "gifa" => HunkWord::Attachment(AttachmentFormat::Gif),
            "sound" => HunkWord::Attachment(AttachmentFormat::Wav),
            "blob" => HunkWord::Attachment(AttachmentFormat::Other),
            _ => return None,
        })
    }
}

/// Whether a hunk's text lines are enciphered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherTag {
    Plain,
    Crypt,
}

impl CipherTag {
    pub fn from_flag(encrypted: bool) -> Self {
        if encrypted {
            CipherTag::Crypt
        } else {
            CipherTag::Plain
        }
    }

    pub fn is_crypt(&self) -> bool {
        matches!(self, CipherTag::Crypt)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CipherTag::Plain => "plain",
            CipherTag::Crypt => "crypt",
        }
    }

    pub fn parse(s: &str, line: LineNumber) -> UhsResult<Self> {
        match s {
            "plain" => Ok(CipherTag::Plain),
            "crypt" => Ok(CipherTag::Crypt),
            other => Err(malformed(line, "cipher tag", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HunkHeader {
    pub span: u32,
    pub word: HunkWord,
}

impl HunkHeader {
    pub fn render(&self) -> String {
        format!("{} {}", self.span, self.word.as_str())
    }

    pub fn parse(text: &str, line: LineNumber) -> UhsResult<Self> {
        let bad = || StructuralError::BadHeader {
            line,
            header: text.to_string(),
        };
        let (span, word) = text.split_once(' ').ok_or_else(bad)?;
        let span = parse_decimal(span).ok_or_else(bad)?;
        let span = u32::try_from(span).map_err(|_| bad())?;
        if span == 0 {
            return Err(bad().into());
        }
        let word = HunkWord::parse(word).ok_or_else(|| StructuralError::UnknownHunk {
            line,
            word: word.to_string(),
        })?;
        Ok(Self { span, word })
    }
}

/// Number of decimal digits needed to print `value`
pub fn decimal_digits(value: u64) -> usize {
    let mut digits = 1;
    let mut rest = value / 10;
    while rest > 0 {
        digits += 1;
        rest /= 10;
    }
    digits
}

/// Width of a zero-padded field able to hold `max_value`
pub fn field_width(max_value: u64) -> usize {
    decimal_digits(max_value).max(MIN_FIELD_WIDTH)
}

pub fn format_padded(value: u64, width: usize) -> String {
    format!("{value:0width$}")
}

/// A zero-padded numeric field as read from a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddedField {
    pub value: u64,
    pub width: usize,
}

/// Parse a zero-padded field: ASCII digits only, at least
/// [`MIN_FIELD_WIDTH`] wide.
pub fn parse_padded(s: &str, line: LineNumber, field: &'static str) -> UhsResult<PaddedField> {
    let value = parse_decimal(s).ok_or_else(|| malformed(line, field, s))?;
    if s.len() < MIN_FIELD_WIDTH {
        return Err(StructuralError::FieldWidth {
            line,
            field,
            width: s.len(),
            expected: MIN_FIELD_WIDTH,
        }
        .into());
    }
    Ok(PaddedField {
        value,
        width: s.len(),
    })
}

/// Parse an unpadded count or line number
pub fn parse_number(s: &str, line: LineNumber, field: &'static str) -> UhsResult<u32> {
    if s.len() > 1 && s.starts_with('0') {
        return Err(malformed(line, field, s));
    }
    parse_decimal(s)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| malformed(line, field, s))
}

fn parse_decimal(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

pub(crate) fn malformed(line: LineNumber, field: &'static str, value: &str) -> uhs_core::UhsError {
    StructuralError::MalformedField {
        line,
        field,
        value: value.to_string(),
    }
    .into()
}
