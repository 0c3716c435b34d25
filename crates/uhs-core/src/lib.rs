pub mod config;
pub mod error;
pub mod types;

pub use error::{StructuralError, UhsError, UhsResult};
pub use types::{
    AttachmentFormat, Document, DocumentLayout, IdAllocator, LineNumber, Node, NodeId, NodeKind,
    Text,
};

/// Re-exported so callers holding a [`Document`] can name its key type.
pub use uhs_crypto::CipherKey;
