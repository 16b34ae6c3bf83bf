//! Document model boundary.
//!
//! The editor owns the real document; this module describes the small surface
//! the link-preview code needs from it. Positions follow the usual structured
//! document convention: a text node counts one per character, an atomic leaf
//! counts 1, and every other node counts 2 (open and close) plus its content.
//! Top-level content starts at position 0.

use crate::error::PreviewError;
use crate::PreviewData;
use serde::{Deserialize, Serialize};

pub const DOC: &str = "doc";
pub const PARAGRAPH: &str = "paragraph";
pub const TEXT: &str = "text";
pub const LINK_PREVIEW: &str = "linkPreview";

/// Minimal capability a tree needs for a position-aware walk.
pub trait TreeNode: Sized {
    fn type_tag(&self) -> &str;

    fn children(&self) -> &[Self];

    /// Character count for text nodes, `None` for everything else.
    fn text_len(&self) -> Option<usize>;

    /// Atomic leaves occupy a single position.
    fn is_atom(&self) -> bool;

    fn node_size(&self) -> usize {
        if let Some(len) = self.text_len() {
            return len;
        }
        if self.is_atom() {
            return 1;
        }
        2 + self.children().iter().map(TreeNode::node_size).sum::<usize>()
    }
}

/// Lazy pre-order walk yielding `(position, node)` for every descendant of
/// the starting node, in document order.
pub struct Descendants<'a, N> {
    stack: Vec<(std::slice::Iter<'a, N>, usize)>,
}

pub fn descendants<N: TreeNode>(root: &N) -> Descendants<'_, N> {
    Descendants {
        stack: vec![(root.children().iter(), 0)],
    }
}

impl<'a, N: TreeNode> Iterator for Descendants<'a, N> {
    type Item = (usize, &'a N);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (siblings, offset) = self.stack.last_mut()?;
            match siblings.next() {
                Some(node) => {
                    let pos = *offset;
                    *offset += node.node_size();
                    if !node.children().is_empty() {
                        self.stack.push((node.children().iter(), pos + 1));
                    }
                    return Some((pos, node));
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

/// Lifecycle of a card as seen by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    Loading,
    Resolved,
    ErrorResolved,
}

/// Attributes of a link preview card node.
///
/// A loading card carries nothing but its `url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardAttrs {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
    pub loading: bool,
}

impl CardAttrs {
    pub fn loading(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            description: None,
            image_url: None,
            icon_url: None,
            site_name: None,
            loading: true,
        }
    }

    /// The card keeps its own `url` so it stays paired with the link line
    /// above it even when the fetcher reports a redirected URL.
    pub fn resolved(url: impl Into<String>, data: &PreviewData) -> Self {
        Self {
            url: url.into(),
            title: data.title.clone(),
            description: data.description.clone(),
            image_url: data.image_url.clone(),
            icon_url: data.icon_url.clone(),
            site_name: data.site_name.clone(),
            loading: false,
        }
    }

    pub fn error_resolved(&self) -> Self {
        Self {
            loading: false,
            ..self.clone()
        }
    }

    pub fn state(&self) -> CardState {
        if self.loading {
            CardState::Loading
        } else if self.title.is_some()
            || self.description.is_some()
            || self.image_url.is_some()
            || self.icon_url.is_some()
            || self.site_name.is_some()
        {
            CardState::Resolved
        } else {
            CardState::ErrorResolved
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Doc,
    Paragraph,
    /// Inline text, optionally carrying a link mark.
    Text { text: String, link: Option<String> },
    LinkPreview(CardAttrs),
    /// Any other block container (heading, blockquote, list item...).
    Block(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub children: Vec<Node>,
}

impl Node {
    pub fn doc(children: Vec<Node>) -> Self {
        Self {
            kind: NodeKind::Doc,
            children,
        }
    }

    pub fn paragraph(children: Vec<Node>) -> Self {
        Self {
            kind: NodeKind::Paragraph,
            children,
        }
    }

    pub fn empty_paragraph() -> Self {
        Self::paragraph(Vec::new())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Text {
                text: text.into(),
                link: None,
            },
            children: Vec::new(),
        }
    }

    pub fn link_text(text: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Text {
                text: text.into(),
                link: Some(href.into()),
            },
            children: Vec::new(),
        }
    }

    /// A paragraph holding `url` as link-decorated text.
    pub fn link_paragraph(url: &str) -> Self {
        Self::paragraph(vec![Self::link_text(url, url)])
    }

    pub fn link_preview(attrs: CardAttrs) -> Self {
        Self {
            kind: NodeKind::LinkPreview(attrs),
            children: Vec::new(),
        }
    }

    pub fn block(tag: impl Into<String>, children: Vec<Node>) -> Self {
        Self {
            kind: NodeKind::Block(tag.into()),
            children,
        }
    }

    pub fn is_paragraph(&self) -> bool {
        matches!(self.kind, NodeKind::Paragraph)
    }

    pub fn card(&self) -> Option<&CardAttrs> {
        match &self.kind {
            NodeKind::LinkPreview(attrs) => Some(attrs),
            _ => None,
        }
    }

    /// For a paragraph whose only child is link-decorated text, returns that text.
    pub fn sole_link_text(&self) -> Option<&str> {
        if !self.is_paragraph() {
            return None;
        }
        match self.children.as_slice() {
            [Node {
                kind: NodeKind::Text {
                    text,
                    link: Some(_),
                },
                ..
            }] => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn text_content(&self) -> String {
        let mut text = String::new();
        self.collect_text(&mut text);
        text
    }

    fn collect_text(&self, output: &mut String) {
        if let NodeKind::Text { text, .. } = &self.kind {
            output.push_str(text);
        }
        for child in &self.children {
            child.collect_text(output);
        }
    }

    fn is_inline(&self) -> bool {
        matches!(self.kind, NodeKind::Text { .. })
    }

    fn accepts(&self, child: &Node) -> bool {
        match self.kind {
            NodeKind::Paragraph => child.is_inline(),
            NodeKind::Doc | NodeKind::Block(_) => {
                !child.is_inline() && !matches!(child.kind, NodeKind::Doc)
            }
            NodeKind::Text { .. } | NodeKind::LinkPreview(_) => false,
        }
    }
}

impl TreeNode for Node {
    fn type_tag(&self) -> &str {
        match &self.kind {
            NodeKind::Doc => DOC,
            NodeKind::Paragraph => PARAGRAPH,
            NodeKind::Text { .. } => TEXT,
            NodeKind::LinkPreview(_) => LINK_PREVIEW,
            NodeKind::Block(tag) => tag,
        }
    }

    fn children(&self) -> &[Self] {
        &self.children
    }

    fn text_len(&self) -> Option<usize> {
        match &self.kind {
            NodeKind::Text { text, .. } => Some(text.chars().count()),
            _ => None,
        }
    }

    fn is_atom(&self) -> bool {
        matches!(self.kind, NodeKind::LinkPreview(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    pub anchor: usize,
    pub head: usize,
}

impl Selection {
    pub fn cursor(pos: usize) -> Self {
        Self {
            anchor: pos,
            head: pos,
        }
    }

    pub fn range(anchor: usize, head: usize) -> Self {
        Self { anchor, head }
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.head
    }
}

/// The only mutation path the link-preview code uses.
///
/// All methods run on the document's mutation context; implementations are
/// not expected to be `Send`.
pub trait DocumentPatcher {
    fn root(&self) -> &Node;

    fn selection(&self) -> Selection;

    /// Inserts `node` as the next sibling of the node starting at `pos`.
    /// Returns the position of the inserted node.
    fn insert_node_after(&mut self, pos: usize, node: Node) -> Result<usize, PreviewError>;

    /// Replaces the sibling nodes exactly covering `start..end` with `nodes`,
    /// as a single transaction.
    fn replace_node_range(
        &mut self,
        start: usize,
        end: usize,
        nodes: Vec<Node>,
    ) -> Result<(), PreviewError>;

    fn walk(&self) -> Descendants<'_, Node> {
        descendants(self.root())
    }

    fn find_nodes<F>(&self, mut predicate: F) -> Vec<(usize, &Node)>
    where
        F: FnMut(&Node) -> bool,
    {
        self.walk().filter(|(_, node)| predicate(*node)).collect()
    }

    /// Innermost paragraph whose content range contains `pos`.
    fn text_block_at(&self, pos: usize) -> Option<(usize, &Node)> {
        self.walk()
            .filter(|(start, node)| {
                node.is_paragraph() && *start < pos && pos < *start + node.node_size()
            })
            .last()
    }
}

/// In-memory document used by sessions that do not sit on a live editor, and by tests.
#[derive(Debug, Clone)]
pub struct MemoryDocument {
    root: Node,
    selection: Selection,
    revision: u64,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new(vec![Node::empty_paragraph()])
    }
}

impl MemoryDocument {
    pub fn new(blocks: Vec<Node>) -> Self {
        Self {
            root: Node::doc(blocks),
            selection: Selection::default(),
            revision: 0,
        }
    }

    pub fn blocks(&self) -> &[Node] {
        &self.root.children
    }

    pub fn set_selection(&mut self, selection: Selection) {
        self.selection = selection;
    }

    /// Bulk content replacement, e.g. a programmatic load.
    pub fn replace_content(&mut self, blocks: Vec<Node>) {
        self.root = Node::doc(blocks);
        self.selection = Selection::default();
        self.revision += 1;
    }

    /// Incremented by every successful mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn content_size(&self) -> usize {
        self.root.node_size() - 2
    }

    /// Finds the parent path and child index of the node starting at `pos`.
    fn locate(&self, pos: usize) -> Option<(Vec<usize>, usize)> {
        let mut path = Vec::new();
        let index = locate_in(&self.root, 0, pos, &mut path)?;
        Some((path, index))
    }

    fn parent_mut(&mut self, path: &[usize]) -> Option<&mut Node> {
        let mut node = &mut self.root;
        for &index in path {
            node = node.children.get_mut(index)?;
        }
        Some(node)
    }
}

fn locate_in(
    parent: &Node,
    content_start: usize,
    pos: usize,
    path: &mut Vec<usize>,
) -> Option<usize> {
    let mut offset = content_start;
    for (index, child) in parent.children.iter().enumerate() {
        let size = child.node_size();
        if offset == pos {
            return Some(index);
        }
        if pos > offset && pos < offset + size && !child.children.is_empty() {
            path.push(index);
            return locate_in(child, offset + 1, pos, path);
        }
        offset += size;
    }
    None
}

impl DocumentPatcher for MemoryDocument {
    fn root(&self) -> &Node {
        &self.root
    }

    fn selection(&self) -> Selection {
        self.selection
    }

    fn insert_node_after(&mut self, pos: usize, node: Node) -> Result<usize, PreviewError> {
        let (path, index) = self
            .locate(pos)
            .ok_or_else(|| PreviewError::DocumentError(format!("no node starts at {pos}")))?;
        let parent = self
            .parent_mut(&path)
            .ok_or_else(|| PreviewError::DocumentError("stale parent path".into()))?;
        if !parent.accepts(&node) {
            return Err(PreviewError::DocumentError(format!(
                "{} cannot hold {}",
                parent.type_tag(),
                node.type_tag()
            )));
        }
        let inserted_at = pos + parent.children[index].node_size();
        parent.children.insert(index + 1, node);
        self.revision += 1;
        Ok(inserted_at)
    }

    fn replace_node_range(
        &mut self,
        start: usize,
        end: usize,
        nodes: Vec<Node>,
    ) -> Result<(), PreviewError> {
        if start >= end {
            return Err(PreviewError::DocumentError(format!(
                "empty range {start}..{end}"
            )));
        }
        let (path, first) = self
            .locate(start)
            .ok_or_else(|| PreviewError::DocumentError(format!("no node starts at {start}")))?;
        let parent = self
            .parent_mut(&path)
            .ok_or_else(|| PreviewError::DocumentError("stale parent path".into()))?;
        if let Some(node) = nodes.iter().find(|node| !parent.accepts(node)) {
            return Err(PreviewError::DocumentError(format!(
                "{} cannot hold {}",
                parent.type_tag(),
                node.type_tag()
            )));
        }

        let mut offset = start;
        let mut last = None;
        for (index, child) in parent.children.iter().enumerate().skip(first) {
            offset += child.node_size();
            if offset == end {
                last = Some(index);
                break;
            }
            if offset > end {
                break;
            }
        }
        let last = last.ok_or_else(|| {
            PreviewError::DocumentError(format!("{start}..{end} does not cover whole nodes"))
        })?;

        parent.children.splice(first..=last, nodes);
        self.revision += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemoryDocument {
        // 0: paragraph "ab" (size 4), 4: card (1), 5: blockquote [paragraph "c"] (size 5)
        MemoryDocument::new(vec![
            Node::paragraph(vec![Node::text("ab")]),
            Node::link_preview(CardAttrs::loading("https://a.example")),
            Node::block("blockquote", vec![Node::paragraph(vec![Node::text("c")])]),
        ])
    }

    #[test]
    fn test_node_sizes() {
        assert_eq!(Node::empty_paragraph().node_size(), 2);
        assert_eq!(Node::paragraph(vec![Node::text("héllo")]).node_size(), 7);
        assert_eq!(Node::link_preview(CardAttrs::loading("u")).node_size(), 1);
        assert_eq!(sample().content_size(), 10);
    }

    #[test]
    fn test_walk_positions_in_document_order() {
        let doc = sample();
        let seen: Vec<(usize, String)> = doc
            .walk()
            .map(|(pos, node)| (pos, node.type_tag().to_string()))
            .collect();
        assert_eq!(
            seen,
            vec![
                (0, "paragraph".to_string()),
                (1, "text".to_string()),
                (4, "linkPreview".to_string()),
                (5, "blockquote".to_string()),
                (6, "paragraph".to_string()),
                (7, "text".to_string()),
            ]
        );
    }

    #[test]
    fn test_walk_is_lazy() {
        let doc = sample();
        let first_card = doc.walk().find(|(_, node)| node.card().is_some());
        assert_eq!(first_card.map(|(pos, _)| pos), Some(4));
    }

    #[test]
    fn test_find_nodes() {
        let doc = sample();
        let paragraphs = doc.find_nodes(Node::is_paragraph);
        let positions: Vec<usize> = paragraphs.iter().map(|(pos, _)| *pos).collect();
        assert_eq!(positions, vec![0, 6]);
    }

    #[test]
    fn test_insert_node_after_nested() {
        let mut doc = sample();
        let at = doc
            .insert_node_after(6, Node::link_preview(CardAttrs::loading("https://c.example")))
            .unwrap();
        assert_eq!(at, 9);
        let (pos, card) = doc.walk().filter(|(_, n)| n.card().is_some()).last().unwrap();
        assert_eq!(pos, 9);
        assert_eq!(card.card().unwrap().url, "https://c.example");
        assert_eq!(doc.revision(), 1);
    }

    #[test]
    fn test_insert_rejects_unknown_position() {
        let mut doc = sample();
        let result = doc.insert_node_after(2, Node::empty_paragraph());
        assert!(matches!(result, Err(PreviewError::DocumentError(_))));
        assert_eq!(doc.revision(), 0);
    }

    #[test]
    fn test_replace_node_range() {
        let mut doc = sample();
        doc.replace_node_range(
            4,
            5,
            vec![Node::link_preview(CardAttrs {
                title: Some("A".into()),
                ..CardAttrs::loading("https://a.example").error_resolved()
            })],
        )
        .unwrap();
        let card = doc.blocks()[1].card().unwrap();
        assert!(!card.loading);
        assert_eq!(card.state(), CardState::Resolved);
    }

    #[test]
    fn test_replace_rejects_partial_range() {
        let mut doc = sample();
        assert!(doc.replace_node_range(0, 3, vec![]).is_err());
        assert!(doc.replace_node_range(4, 4, vec![]).is_err());
    }

    #[test]
    fn test_schema_rejects_block_in_paragraph() {
        let mut doc = sample();
        let result = doc.insert_node_after(1, Node::link_preview(CardAttrs::loading("u")));
        assert!(result.is_err());
    }

    #[test]
    fn test_text_block_at() {
        let doc = MemoryDocument::new(vec![
            Node::paragraph(vec![Node::text("x")]),
            Node::empty_paragraph(),
        ]);
        let (pos, node) = doc.text_block_at(4).unwrap();
        assert_eq!(pos, 3);
        assert!(node.children.is_empty());
        assert!(doc.text_block_at(3).is_none());
    }

    #[test]
    fn test_sole_link_text() {
        assert_eq!(
            Node::link_paragraph("https://x.example").sole_link_text(),
            Some("https://x.example")
        );
        assert_eq!(
            Node::paragraph(vec![Node::text("https://x.example")]).sole_link_text(),
            None
        );
    }

    #[test]
    fn test_card_states() {
        let loading = CardAttrs::loading("u");
        assert_eq!(loading.state(), CardState::Loading);
        assert_eq!(loading.error_resolved().state(), CardState::ErrorResolved);
        let data = PreviewData::new("u").with_title("T");
        assert_eq!(CardAttrs::resolved("u", &data).state(), CardState::Resolved);
    }
}
