//! Records exchanged between the document context and the native fetch backend.

use crate::{PreviewData, PreviewError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundMessage {
    #[serde(rename_all = "camelCase")]
    FetchLinkPreview { request_id: String, url: String },
    EditorReady,
    ContentChanged { content: String },
}

impl OutboundMessage {
    pub fn fetch(request_id: impl Into<String>, url: impl Into<String>) -> Self {
        OutboundMessage::FetchLinkPreview {
            request_id: request_id.into(),
            url: url.into(),
        }
    }
}

/// Inbound answer to a `fetchLinkPreview`. Exactly one of `data` and `error`
/// is set when built through the constructors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    pub request_id: String,
    #[serde(default)]
    pub data: Option<PreviewData>,
    #[serde(default)]
    pub error: Option<String>,
}

impl FetchResponse {
    pub fn success(request_id: impl Into<String>, data: PreviewData) -> Self {
        Self {
            request_id: request_id.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(request_id: impl Into<String>, error: &PreviewError) -> Self {
        Self {
            request_id: request_id.into(),
            data: None,
            error: Some(error.to_wire()),
        }
    }

    pub fn from_result(
        request_id: impl Into<String>,
        result: &Result<PreviewData, PreviewError>,
    ) -> Self {
        match result {
            Ok(data) => Self::success(request_id, data.clone()),
            Err(e) => Self::failure(request_id, e),
        }
    }

    /// Data wins when a malformed record carries both fields; a record with
    /// neither counts as `noMetadata`.
    pub fn into_result(self) -> Result<PreviewData, PreviewError> {
        match (self.data, self.error) {
            (Some(data), _) => Ok(data),
            (None, Some(error)) => Err(PreviewError::from_wire(&error)),
            (None, None) => Err(PreviewError::NoMetadata),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_shapes() {
        let fetch = serde_json::to_value(OutboundMessage::fetch("r1", "https://a.example")).unwrap();
        assert_eq!(
            fetch,
            json!({"type": "fetchLinkPreview", "requestId": "r1", "url": "https://a.example"})
        );

        let ready = serde_json::to_value(OutboundMessage::EditorReady).unwrap();
        assert_eq!(ready, json!({"type": "editorReady"}));

        let changed = serde_json::to_value(OutboundMessage::ContentChanged {
            content: "<p>x</p>".into(),
        })
        .unwrap();
        assert_eq!(changed, json!({"type": "contentChanged", "content": "<p>x</p>"}));
    }

    #[test]
    fn test_inbound_success() {
        let response: FetchResponse = serde_json::from_value(json!({
            "requestId": "r1",
            "data": {"url": "https://a.example", "title": "A", "siteName": "Site"},
            "error": null
        }))
        .unwrap();

        let data = response.into_result().unwrap();
        assert_eq!(data.title.as_deref(), Some("A"));
        assert_eq!(data.site_name.as_deref(), Some("Site"));
        assert_eq!(data.image_url, None);
    }

    #[test]
    fn test_inbound_failure() {
        let response: FetchResponse = serde_json::from_value(json!({
            "requestId": "r2",
            "data": null,
            "error": "noMetadata"
        }))
        .unwrap();
        assert!(matches!(response.into_result(), Err(PreviewError::NoMetadata)));
    }

    #[test]
    fn test_constructors_set_exactly_one_side() {
        let ok = FetchResponse::success("a", PreviewData::new("u"));
        assert!(ok.data.is_some() && ok.error.is_none());

        let err = FetchResponse::failure("b", &PreviewError::FetchFailed("timeout".into()));
        assert!(err.data.is_none());
        assert_eq!(err.error.as_deref(), Some("fetchFailed: timeout"));

        let empty = FetchResponse {
            request_id: "c".into(),
            data: None,
            error: None,
        };
        assert!(matches!(empty.into_result(), Err(PreviewError::NoMetadata)));
    }
}
