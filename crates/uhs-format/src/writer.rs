//! Document serializer: tree → container bytes
//!
//! 1. Explore: walk the tree in reveal order claiming lines and binary
//!    sections. References may point forward and stay unresolved.
//! 2. Size: fix field widths from the high-water marks, then settle the
//!    binary base. The base is the text segment's length, which depends on
//!    the widths, which depend on the base; measure and re-inject until no
//!    field widens.
//! 3. Render: walk again with frozen widths and append the binary segment.
//!
//! Nothing is returned unless all three phases succeed.

use std::collections::BTreeSet;
use tracing::debug;
use uhs_core::{Document, DocumentLayout, Node, NodeKind, StructuralError, UhsError, UhsResult};
use uhs_crypto::{CipherKey, KeySchedule, TitleKeySchedule};

use crate::encoders::{encoder_for, RenderContext};
use crate::hunk::{MAGIC, MAX_DEPTH};
use crate::layout::LayoutModel;

/// Container bytes plus the layout they were printed with
#[derive(Debug, Clone)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub layout: DocumentLayout,
}

#[derive(Debug, Clone, Default)]
pub struct Writer<S: KeySchedule = TitleKeySchedule> {
    schedule: S,
}

impl Writer<TitleKeySchedule> {
    pub fn new() -> Self {
        Self {
            schedule: TitleKeySchedule,
        }
    }
}

impl<S: KeySchedule> Writer<S> {
    pub fn with_schedule(schedule: S) -> Self {
        Self { schedule }
    }

    pub fn encode(&self, doc: &Document) -> UhsResult<Vec<u8>> {
        Ok(self.encode_with_layout(doc)?.bytes)
    }

    pub fn encode_with_layout(&self, doc: &Document) -> UhsResult<Encoded> {
        validate(&doc.root)?;
        let key = self.select_key(doc)?;
        let key = key.as_ref();
        let mut model = LayoutModel::new();

        // Phase 1
        model.advance_lines(1)?;
        explore(&doc.root, &mut model)?;

        // Phase 2
        model.finalize_widths()?;
        let mut passes = 0;
        loop {
            passes += 1;
            let text_len = render_text(&doc.root, &mut model, key)?.len() as u64;
            if !model.inject_binary_base(text_len)? {
                break;
            }
        }
        debug!(passes, base = model.binary_base(), "binary base settled");

        // Phase 3
        model.begin_render()?;
        let mut bytes = render_text(&doc.root, &mut model, key)?;
        if bytes.len() as u64 != model.binary_base() {
            return Err(UhsError::invariant(format!(
                "text segment rendered {} bytes but was measured at {}",
                bytes.len(),
                model.binary_base()
            )));
        }
        let layout = model.layout();
        let binary = model.finish()?;
        bytes.extend_from_slice(&binary);

        debug!(
            text_bytes = layout.binary_base,
            binary_bytes = binary.len(),
            offset_width = layout.offset_width,
            length_width = layout.length_width,
            "document encoded"
        );
        Ok(Encoded { bytes, layout })
    }

    /// The key readers sharing this writer's schedule will derive. A
    /// supplied key they cannot reproduce is refused rather than written.
    fn select_key(&self, doc: &Document) -> UhsResult<Option<CipherKey>> {
        if !doc.contains_encrypted() {
            if doc.key.is_some() {
                debug!("document has no encrypted text; ignoring supplied key");
            }
            return Ok(None);
        }

        let derived = self.schedule.derive(doc.title());
        match &doc.key {
            Some(key) if *key != derived => Err(StructuralError::UnrecoverableKey {
                title: doc.title().to_string(),
            }
            .into()),
            _ => Ok(Some(derived)),
        }
    }
}

/// Encode with the default title-derived key schedule
pub fn encode(doc: &Document) -> UhsResult<Vec<u8>> {
    Writer::new().encode(doc)
}

/// Reject trees the format cannot express before any layout happens.
fn validate(root: &Node) -> UhsResult<()> {
    if !matches!(root.kind, NodeKind::Root { .. }) {
        return Err(StructuralError::MisplacedRoot {
            found: root.kind.name(),
            depth: 0,
        }
        .into());
    }

    let mut seen = BTreeSet::new();
    for (depth, node) in root.preorder() {
        if depth > MAX_DEPTH {
            return Err(StructuralError::NestingTooDeep {
                id: node.id,
                limit: MAX_DEPTH,
            }
            .into());
        }
        if depth > 0 && matches!(node.kind, NodeKind::Root { .. }) {
            return Err(StructuralError::MisplacedRoot {
                found: node.kind.name(),
                depth,
            }
            .into());
        }
        if !seen.insert(node.id) {
            return Err(StructuralError::DuplicateId(node.id).into());
        }
        if node.kind.title().is_some_and(|t| t.contains('\n')) {
            return Err(StructuralError::NewlineInTitle(node.id).into());
        }
    }
    Ok(())
}

fn explore(node: &Node, model: &mut LayoutModel) -> UhsResult<()> {
    let line = model.next_line();
    model.register_line(node.id, line)?;

    let encoder = encoder_for(&node.kind);
    model.advance_lines(1 + encoder.body_lines())?;
    encoder.estimate_layout(node.id, model)?;

    for child in &node.children {
        explore(child, model)?;
    }

    model.register_span(node.id, model.next_line() - line)
}

/// Walk the tree once with the current widths and return the text segment.
fn render_text(root: &Node, model: &mut LayoutModel, key: Option<&CipherKey>) -> UhsResult<Vec<u8>> {
    model.rewind()?;
    let mut cx = RenderContext::new(model, key);
    cx.line(MAGIC);
    render_node(root, &mut cx)?;
    Ok(cx.into_bytes())
}

fn render_node(node: &Node, cx: &mut RenderContext<'_>) -> UhsResult<()> {
    let expected = cx.model.line_of(node.id)?;
    if cx.current_line() != expected {
        return Err(UhsError::invariant(format!(
            "node {} rendered at line {} but explored at line {expected}",
            node.id,
            cx.current_line()
        )));
    }

    let encoder = encoder_for(&node.kind);
    let span = cx.model.span(node.id)?;
    cx.header(span, encoder.word());
    encoder.render_body(node.id, cx)?;

    for child in &node.children {
        render_node(child, cx)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uhs_core::{AttachmentFormat, IdAllocator, NodeId, Text};
    use uhs_crypto::FixedKeySchedule;

    fn two_hint_doc() -> Document {
        let mut ids = IdAllocator::new();
        let root = ids.next_id();
        let first = ids.next_id();
        let second = ids.next_id();
        Document::new(
            Node::new(root, NodeKind::Root { title: "Zork".into() })
                .with_child(Node::new(
                    first,
                    NodeKind::TextHint {
                        title: "Lamp?".into(),
                        text: Text::plain("In the living room."),
                        link: None,
                    },
                ))
                .with_child(Node::new(
                    second,
                    NodeKind::TextHint {
                        title: "Dark?".into(),
                        text: Text::plain("Light the lamp."),
                        link: Some(first),
                    },
                )),
        )
    }

    #[test]
    fn two_hints_with_backward_reference() {
        let encoded = Writer::new().encode_with_layout(&two_hint_doc()).unwrap();
        assert_eq!(encoded.layout.offset_width, 6);
        assert_eq!(encoded.layout.length_width, 6);

        let text = String::from_utf8(encoded.bytes.clone()).unwrap();
        assert_eq!(
            text,
            "UHS\n\
             10 subject\n\
             Zork\n\
             4 hint\n\
             Lamp?\n\
             plain 1 -\n\
             In the living room.\n\
             4 hint\n\
             Dark?\n\
             plain 1 4\n\
             Light the lamp.\n"
        );
        assert_eq!(encoded.layout.binary_base, encoded.bytes.len() as u64);
    }

    #[test]
    fn forward_reference_resolves() {
        let mut doc = two_hint_doc();
        let second = doc.root.children[1].id;
        if let NodeKind::TextHint { link, .. } = &mut doc.root.children[0].kind {
            *link = Some(second);
        }
        let text = String::from_utf8(encode(&doc).unwrap()).unwrap();
        assert!(text.contains("Lamp?\nplain 1 8\n"));
    }

    #[test]
    fn dangling_reference_fails_without_output() {
        let mut doc = two_hint_doc();
        if let NodeKind::TextHint { link, .. } = &mut doc.root.children[1].kind {
            *link = Some(NodeId(404));
        }
        let err = encode(&doc).unwrap_err();
        assert!(matches!(
            err,
            UhsError::Structural(StructuralError::DanglingReference(NodeId(404)))
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut doc = two_hint_doc();
        doc.root.children[1].id = doc.root.children[0].id;
        assert!(matches!(
            encode(&doc).unwrap_err(),
            UhsError::Structural(StructuralError::DuplicateId(_))
        ));
    }

    #[test]
    fn root_must_be_on_top_only() {
        let leaf = Node::new(NodeId(1), NodeKind::Group { title: "g".into() });
        assert!(matches!(
            encode(&Document::new(leaf)).unwrap_err(),
            UhsError::Structural(StructuralError::MisplacedRoot { depth: 0, .. })
        ));

        let nested = Node::new(NodeId(1), NodeKind::Root { title: "a".into() })
            .with_child(Node::new(NodeId(2), NodeKind::Root { title: "b".into() }));
        assert!(matches!(
            encode(&Document::new(nested)).unwrap_err(),
            UhsError::Structural(StructuralError::MisplacedRoot { depth: 1, .. })
        ));
    }

    #[test]
    fn newline_in_title_is_rejected() {
        let root = Node::new(NodeId(1), NodeKind::Root { title: "two\nlines".into() });
        assert!(matches!(
            encode(&Document::new(root)).unwrap_err(),
            UhsError::Structural(StructuralError::NewlineInTitle(NodeId(1)))
        ));
    }

    #[test]
    fn over_deep_trees_are_rejected() {
        let mut node = Node::new(NodeId(10_000), NodeKind::NestedHint { text: Text::plain("x") });
        for i in 0..MAX_DEPTH as u32 {
            node = Node::new(NodeId(i + 2), NodeKind::Group { title: "g".into() }).with_child(node);
        }
        let root = Node::new(NodeId(1), NodeKind::Root { title: "deep".into() }).with_child(node);
        assert!(matches!(
            encode(&Document::new(root)).unwrap_err(),
            UhsError::Structural(StructuralError::NestingTooDeep { .. })
        ));
    }

    #[test]
    fn attachment_offsets_include_text_length() {
        let root = Node::new(NodeId(1), NodeKind::Root { title: "Myst".into() })
            .with_child(Node::new(
                NodeId(2),
                NodeKind::BinaryAttachment {
                    title: "a".into(),
                    format: AttachmentFormat::Png,
                    data: b"AAAA".to_vec(),
                },
            ))
            .with_child(Node::new(
                NodeId(3),
                NodeKind::BinaryAttachment {
                    title: "b".into(),
                    format: AttachmentFormat::Wav,
                    data: b"BB".to_vec(),
                },
            ));
        let encoded = Writer::new().encode_with_layout(&Document::new(root)).unwrap();
        let base = encoded.layout.binary_base as usize;

        let text = std::str::from_utf8(&encoded.bytes[..base]).unwrap();
        assert!(text.contains(&format!("a\n{:06} 000004\n", base)));
        assert!(text.contains(&format!("b\n{:06} 000002\n", base + 4)));
        assert_eq!(&encoded.bytes[base..], b"AAAABB");
    }

    #[test]
    fn encoding_is_deterministic() {
        let mut doc = two_hint_doc();
        if let NodeKind::TextHint { text, .. } = &mut doc.root.children[0].kind {
            text.encrypted = true;
        }
        assert_eq!(encode(&doc).unwrap(), encode(&doc).unwrap());
    }

    #[test]
    fn supplied_key_must_match_schedule() {
        let mut doc = two_hint_doc();
        if let NodeKind::TextHint { text, .. } = &mut doc.root.children[0].kind {
            text.encrypted = true;
        }
        let custom = CipherKey::new(vec![3, 1, 4, 1, 5]);
        let keyed = doc.clone().with_key(custom.clone());

        let err = encode(&keyed).unwrap_err();
        assert!(matches!(
            err,
            UhsError::Structural(StructuralError::UnrecoverableKey { ref title }) if title == "Zork"
        ));

        let by_doc = Writer::with_schedule(FixedKeySchedule::new(custom.clone()))
            .encode(&keyed)
            .unwrap();
        let by_schedule = Writer::with_schedule(FixedKeySchedule::new(custom)).encode(&doc).unwrap();
        assert_eq!(by_doc, by_schedule);
        assert_ne!(by_doc, encode(&doc).unwrap());
    }

    #[test]
    fn title_derived_key_is_accepted() {
        let mut doc = two_hint_doc();
        if let NodeKind::TextHint { text, .. } = &mut doc.root.children[0].kind {
            text.encrypted = true;
        }
        let derived = TitleKeySchedule.derive("Zork");
        assert_eq!(
            encode(&doc.clone().with_key(derived)).unwrap(),
            encode(&doc).unwrap()
        );
    }

    #[test]
    fn key_on_plain_document_is_ignored() {
        let doc = two_hint_doc();
        let keyed = doc.clone().with_key(CipherKey::new(vec![3, 1, 4]));
        assert_eq!(encode(&keyed).unwrap(), encode(&doc).unwrap());
    }
}
