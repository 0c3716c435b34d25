//! uhs-format: hunk-tree serialization engine for UHS hint containers
//!
//! # Overview
//! - `hunk`: header grammar, hunk words, zero-padded field helpers
//! - `layout`: per-encode line/binary bookkeeping and field-width sizing
//! - `encoders`: one hunk encoder per node kind
//! - `writer`: three-phase tree → bytes serializer
//! - `reader`: bytes → tree deserializer
//!
//! A container is a text segment of newline-terminated hunks followed
//! directly by a binary segment. Hunks cross-reference each other by line
//! number; attachments are located by zero-padded absolute offset and length.

pub mod encoders;
pub mod hunk;
pub mod layout;
pub mod reader;
pub mod writer;

// Convenience re-exports for the most common operations
pub use encoders::{encoder_for, HunkEncoder, RenderContext};
pub use hunk::{HunkHeader, HunkWord, MAGIC, MIN_FIELD_WIDTH};
pub use layout::{LayoutModel, LineRef, Phase};
pub use reader::{decode, Reader};
pub use writer::{encode, Encoded, Writer};
