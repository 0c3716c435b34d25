use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uhs_crypto::CipherKey;

/// 1-based line number within a container's text segment
pub type LineNumber = u32;

/// Document-unique node identifier. Used for cross-referencing only; ids
/// are never written to a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Mints sequential node ids starting at 1
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_id(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Hint text, optionally stored enciphered in the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Text {
    pub body: String,
    #[serde(default)]
    pub encrypted: bool,
}

impl Text {
    pub fn plain(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            encrypted: false,
        }
    }

    pub fn encrypted(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            encrypted: true,
        }
    }

    /// Container lines this text occupies (the empty text still takes one)
    pub fn lines(&self) -> std::str::Split<'_, char> {
        self.body.split('\n')
    }

    pub fn line_count(&self) -> u32 {
        self.lines().count() as u32
    }
}

/// Media type of a binary attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentFormat {
    Png,
    Gif,
    Wav,
    Other,
}

/// The closed set of hint node kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// Document top. Exactly one, always at the top of the tree.
    Root { title: String },
    /// Titled container of further nodes (a subject or question)
    Group { title: String },
    /// A titled hint, optionally pointing at another node
    TextHint {
        title: String,
        text: Text,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        link: Option<NodeId>,
    },
    /// Raw bytes stored in the binary segment
    BinaryAttachment {
        title: String,
        format: AttachmentFormat,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// One stage of a progressively revealed hint; children reveal further
    NestedHint { text: Text },
    /// Author's note, never enciphered
    Comment { title: String, text: String },
    /// Pure jump to another node
    Link { title: String, target: NodeId },
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Root { .. } => "root",
            NodeKind::Group { .. } => "group",
            NodeKind::TextHint { .. } => "text hint",
            NodeKind::BinaryAttachment { .. } => "binary attachment",
            NodeKind::NestedHint { .. } => "nested hint",
            NodeKind::Comment { .. } => "comment",
            NodeKind::Link { .. } => "link",
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            NodeKind::Root { title }
            | NodeKind::Group { title }
            | NodeKind::TextHint { title, .. }
            | NodeKind::BinaryAttachment { title, .. }
            | NodeKind::Comment { title, .. }
            | NodeKind::Link { title, .. } => Some(title.as_str()),
            NodeKind::NestedHint { .. } => None,
        }
    }

    /// The node this one cross-references, if any
    pub fn reference(&self) -> Option<NodeId> {
        match self {
            NodeKind::TextHint { link, .. } => *link,
            NodeKind::Link { target, .. } => Some(*target),
            _ => None,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        match self {
            NodeKind::TextHint { text, .. } | NodeKind::NestedHint { text } => text.encrypted,
            _ => false,
        }
    }

    fn with_reference(&self, id: NodeId) -> NodeKind {
        let mut kind = self.clone();
        match &mut kind {
            NodeKind::TextHint { link: Some(link), .. } => *link = id,
            NodeKind::Link { target, .. } => *target = id,
            _ => {}
        }
        kind
    }
}

/// A hint tree node. Child order is reveal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children);
        self
    }

    /// All nodes of this subtree in preorder, paired with their depth
    pub fn preorder(&self) -> Vec<(usize, &Node)> {
        let mut out = Vec::new();
        let mut stack = vec![(0usize, self)];
        while let Some((depth, node)) = stack.pop() {
            out.push((depth, node));
            for child in node.children.iter().rev() {
                stack.push((depth + 1, child));
            }
        }
        out
    }
}

/// Field widths and binary base a container was laid out with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLayout {
    pub offset_width: usize,
    pub length_width: usize,
    /// Byte length of the text segment; binary offsets are relative to 0
    /// but printed with this base added
    pub binary_base: u64,
}

/// A whole hint document
///
/// `key` only matters when some text is encrypted. With nothing to decipher
/// it is ignored by the writer, by [`Document::structurally_eq`], and never
/// produced by the reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub root: Node,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<CipherKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<DocumentLayout>,
}

impl Document {
    pub fn new(root: Node) -> Self {
        Self {
            root,
            key: None,
            layout: None,
        }
    }

    pub fn with_key(mut self, key: CipherKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Root title; the seed for title-derived keys
    pub fn title(&self) -> &str {
        self.root.kind.title().unwrap_or_default()
    }

    pub fn contains_encrypted(&self) -> bool {
        self.root
            .preorder()
            .iter()
            .any(|(_, node)| node.kind.is_encrypted())
    }

    /// Preorder `(depth, kind)` listing with every cross-reference rewritten
    /// to the preorder position of its target. Two documents with the same
    /// outline differ at most in node ids. References to unknown ids map to
    /// `u32::MAX`.
    pub fn canonical_outline(&self) -> Vec<(usize, NodeKind)> {
        let nodes = self.root.preorder();
        let positions: BTreeMap<NodeId, u32> = nodes
            .iter()
            .enumerate()
            .map(|(pos, (_, node))| (node.id, pos as u32))
            .collect();

        nodes
            .iter()
            .map(|(depth, node)| {
                let kind = match node.kind.reference() {
                    Some(target) => {
                        let pos = positions.get(&target).copied().unwrap_or(u32::MAX);
                        node.kind.with_reference(NodeId(pos))
                    }
                    None => node.kind.clone(),
                };
                (*depth, kind)
            })
            .collect()
    }

    /// The key that actually applies: `key`, if any text is encrypted
    pub fn effective_key(&self) -> Option<&CipherKey> {
        self.key.as_ref().filter(|_| self.contains_encrypted())
    }

    /// Equality on kinds, payloads, child order, reference targets, and
    /// effective key; ids and layout metadata are ignored.
    pub fn structurally_eq(&self, other: &Document) -> bool {
        self.effective_key() == other.effective_key()
            && self.canonical_outline() == other.canonical_outline()
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
