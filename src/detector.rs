use crate::document::{DocumentPatcher, TreeNode};
use crate::validate::UrlValidator;
use std::collections::HashMap;
use tracing::debug;

/// An empty paragraph under a collapsed cursor that a pasted URL will replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasteTarget {
    pub paragraph_pos: usize,
    pub url: String,
}

/// A standalone link paragraph with no card after it yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCandidate {
    pub paragraph_pos: usize,
    pub url: String,
}

/// Recognises standalone URL lines.
#[derive(Debug, Clone, Default)]
pub struct UrlDetector {
    validator: UrlValidator,
}

impl UrlDetector {
    pub fn new(validator: UrlValidator) -> Self {
        Self { validator }
    }

    pub fn validator(&self) -> &UrlValidator {
        &self.validator
    }

    /// Returns a target only when the pasted text is a valid URL, the
    /// selection is collapsed, and the cursor sits in an empty paragraph.
    /// Anything else is left to the editor's default paste handling.
    pub fn detect_paste<D: DocumentPatcher>(&self, doc: &D, text: &str) -> Option<PasteTarget> {
        let url = text.trim();
        if !self.validator.is_valid(url) {
            return None;
        }

        let selection = doc.selection();
        if !selection.is_collapsed() {
            debug!("Paste over a range selection, not handled");
            return None;
        }

        let (paragraph_pos, paragraph) = doc.text_block_at(selection.head)?;
        if !paragraph.children.is_empty() {
            debug!(pos = paragraph_pos, "Paste into non-empty paragraph, not handled");
            return None;
        }

        Some(PasteTarget {
            paragraph_pos,
            url: url.to_string(),
        })
    }

    /// Finds link paragraphs that still need a card, ordered from the highest
    /// document position to the lowest so they can be filled in that order
    /// without invalidating each other's positions.
    pub fn scan<D: DocumentPatcher>(&self, doc: &D) -> Vec<ScanCandidate> {
        let mut cards_at: HashMap<usize, &str> = HashMap::new();
        let mut links = Vec::new();

        for (pos, node) in doc.walk() {
            if let Some(card) = node.card() {
                cards_at.insert(pos, card.url.as_str());
            } else if let Some(text) = node.sole_link_text() {
                if self.validator.is_valid(text) {
                    links.push((pos, pos + node.node_size(), text));
                }
            }
        }

        let mut candidates: Vec<ScanCandidate> = links
            .into_iter()
            .filter(|(_, after, url)| cards_at.get(after) != Some(url))
            .map(|(paragraph_pos, _, url)| ScanCandidate {
                paragraph_pos,
                url: url.to_string(),
            })
            .collect();
        candidates.sort_by(|a, b| b.paragraph_pos.cmp(&a.paragraph_pos));

        debug!(count = candidates.len(), "Document scan found link lines");
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{CardAttrs, MemoryDocument, Node, Selection};

    const URL: &str = "https://example.org";

    #[test]
    fn test_paste_into_empty_paragraph() {
        let mut doc = MemoryDocument::new(vec![
            Node::paragraph(vec![Node::text("intro")]),
            Node::empty_paragraph(),
        ]);
        doc.set_selection(Selection::cursor(8));

        let target = UrlDetector::default().detect_paste(&doc, "  https://example.org\n");
        assert_eq!(
            target,
            Some(PasteTarget {
                paragraph_pos: 7,
                url: URL.to_string()
            })
        );
    }

    #[test]
    fn test_paste_into_text_is_not_handled() {
        let mut doc = MemoryDocument::new(vec![Node::paragraph(vec![Node::text("hello")])]);
        doc.set_selection(Selection::cursor(3));
        assert!(UrlDetector::default().detect_paste(&doc, URL).is_none());
    }

    #[test]
    fn test_paste_with_range_selection_is_not_handled() {
        let mut doc = MemoryDocument::new(vec![Node::empty_paragraph(), Node::empty_paragraph()]);
        doc.set_selection(Selection::range(1, 3));
        assert!(UrlDetector::default().detect_paste(&doc, URL).is_none());
    }

    #[test]
    fn test_paste_of_non_url_is_not_handled() {
        let mut doc = MemoryDocument::default();
        doc.set_selection(Selection::cursor(1));
        let detector = UrlDetector::default();
        assert!(detector.detect_paste(&doc, "just words").is_none());
        assert!(detector.detect_paste(&doc, "https://a.example and more").is_none());
    }

    #[test]
    fn test_scan_orders_highest_first_and_skips_paired() {
        let doc = MemoryDocument::new(vec![
            Node::link_paragraph("https://one.example"),
            Node::paragraph(vec![Node::text("plain https://two.example")]),
            Node::link_paragraph("https://three.example"),
            Node::link_preview(CardAttrs::loading("https://three.example")),
            Node::block("blockquote", vec![Node::link_paragraph("https://four.example")]),
        ]);

        let urls: Vec<String> = UrlDetector::default()
            .scan(&doc)
            .into_iter()
            .map(|c| c.url)
            .collect();
        assert_eq!(urls, vec!["https://four.example", "https://one.example"]);
    }

    #[test]
    fn test_scan_requires_matching_card_url() {
        let doc = MemoryDocument::new(vec![
            Node::link_paragraph("https://one.example"),
            Node::link_preview(CardAttrs::loading("https://other.example")),
        ]);
        let candidates = UrlDetector::default().scan(&doc);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].paragraph_pos, 0);
    }

    #[test]
    fn test_scan_ignores_unlinked_or_invalid_text() {
        let doc = MemoryDocument::new(vec![
            Node::paragraph(vec![Node::text("https://bare.example")]),
            Node::paragraph(vec![Node::link_text("click here", "https://x.example")]),
            Node::paragraph(vec![
                Node::link_text("https://a.example", "https://a.example"),
                Node::text(" trailing"),
            ]),
        ]);
        assert!(UrlDetector::default().scan(&doc).is_empty());
    }
}
