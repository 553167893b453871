//! Internal content model and the wire codec.
//!
//! The host keeps conversation content in its own model ([`ContentPart`])
//! and converts at the protocol boundary: inbound wire messages become
//! content parts, and outbound content parts become wire artifacts. The
//! conversions are pure functions; each can fail with [`A2AError`] and the
//! caller decides whether a failure aborts the request (inbound) or is
//! skipped to keep a stream alive (outbound, per-event).

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{A2AError, A2AResult};
use crate::types::{Artifact, Message, Part};

/// Classification of a content part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// Plain text.
    Text,
    /// Image media.
    Image,
    /// Audio media.
    Audio,
    /// Video media.
    Video,
    /// Documents and any other binary content.
    Document,
    /// A tool invocation. Opaque; never serialized to the wire.
    ToolCall,
}

/// Where a media part's bytes live.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSource {
    /// Inline bytes.
    Bytes(Vec<u8>),
    /// An external URL.
    Url(String),
    /// A storage handle resolvable only by the conversation engine.
    /// Has no wire representation.
    Handle(String),
}

/// A unit of conversation content in the internal model.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// Media content (image, audio, video, document).
    Media {
        /// Classification, usually derived from the MIME type.
        content_type: ContentType,
        /// The media bytes or a reference to them.
        source: MediaSource,
        /// MIME type, if known.
        mime_type: Option<String>,
        /// File name, if known.
        filename: Option<String>,
    },
    /// A tool invocation. The host never exposes these to callers.
    ToolCall,
}

impl ContentPart {
    /// A text part.
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }
}

/// Media payload emitted by a streaming conversation.
///
/// Carries either inline base64 `data` or a `url`; the codec turns it into
/// a [`ContentPart::Media`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaContent {
    /// Base64-encoded bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    /// External URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// MIME type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// File name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Classify a MIME type into a [`ContentType`].
///
/// Unknown and `application/*` types land on `Document`.
pub fn infer_content_type(mime_type: &str) -> ContentType {
    if mime_type.starts_with("image/") {
        ContentType::Image
    } else if mime_type.starts_with("audio/") {
        ContentType::Audio
    } else if mime_type.starts_with("video/") {
        ContentType::Video
    } else if mime_type.starts_with("text/") {
        ContentType::Text
    } else {
        ContentType::Document
    }
}

/// Convert an inbound wire message into internal content parts.
///
/// Rejects messages with no parts, parts with structured `data` set, and
/// parts with no content field at all.
pub fn message_to_content(message: &Message) -> A2AResult<Vec<ContentPart>> {
    if message.parts.is_empty() {
        return Err(A2AError::invalid_params("message has no parts"));
    }

    message.parts.iter().map(wire_part_to_content).collect()
}

fn wire_part_to_content(part: &Part) -> A2AResult<ContentPart> {
    if part.data.is_some() {
        return Err(A2AError::invalid_params(
            "structured data parts are not supported",
        ));
    }

    if let Some(ref text) = part.text {
        return Ok(ContentPart::Text { text: text.clone() });
    }

    if let Some(ref raw) = part.raw {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(raw)
            .map_err(|e| A2AError::invalid_params(format!("invalid base64 content: {}", e)))?;
        return Ok(ContentPart::Media {
            content_type: infer_content_type(part.media_type.as_deref().unwrap_or_default()),
            source: MediaSource::Bytes(bytes),
            mime_type: part.media_type.clone(),
            filename: part.filename.clone(),
        });
    }

    if let Some(ref url) = part.url {
        return Ok(ContentPart::Media {
            content_type: infer_content_type(part.media_type.as_deref().unwrap_or_default()),
            source: MediaSource::Url(url.clone()),
            mime_type: part.media_type.clone(),
            filename: part.filename.clone(),
        });
    }

    Err(A2AError::invalid_params(
        "part has no content (one of text, raw, url required)",
    ))
}

/// Convert a content part into its wire form.
///
/// Tool calls and storage handles have no wire representation and fail.
pub fn part_to_wire(part: &ContentPart) -> A2AResult<Part> {
    match part {
        ContentPart::Text { text } => Ok(Part::text(text.clone())),
        ContentPart::Media {
            source,
            mime_type,
            filename,
            ..
        } => {
            let mut wire = match source {
                MediaSource::Bytes(bytes) => Part {
                    raw: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
                    ..Part::default()
                },
                MediaSource::Url(url) => Part {
                    url: Some(url.clone()),
                    ..Part::default()
                },
                MediaSource::Handle(handle) => {
                    return Err(A2AError::Conversation(format!(
                        "storage handle {} has no wire representation",
                        handle
                    )));
                }
            };
            wire.media_type = mime_type.clone();
            wire.filename = filename.clone();
            Ok(wire)
        }
        ContentPart::ToolCall => Err(A2AError::Conversation(
            "tool calls have no wire representation".to_string(),
        )),
    }
}

/// Convert conversation output parts into wire artifacts.
///
/// Unconvertible parts (tool calls, storage handles) are skipped. The
/// convertible remainder becomes a single artifact `artifact-1`; an empty
/// remainder yields an empty list, letting the caller fall back to the
/// outcome's plain text.
pub fn parts_to_artifacts(parts: &[ContentPart]) -> A2AResult<Vec<Artifact>> {
    let wire_parts: Vec<Part> = parts.iter().filter_map(|p| part_to_wire(p).ok()).collect();

    if wire_parts.is_empty() {
        return Ok(Vec::new());
    }

    Ok(vec![Artifact::new("artifact-1", wire_parts)])
}

/// Convert a streamed media payload into a content part.
///
/// Fails when the payload carries neither inline data nor a URL, or when
/// the inline data is not valid base64.
pub fn media_to_part(media: &MediaContent) -> A2AResult<ContentPart> {
    let mime = media.mime_type.clone().unwrap_or_default();

    let source = if let Some(ref data) = media.data {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| A2AError::Conversation(format!("invalid base64 media: {}", e)))?;
        MediaSource::Bytes(bytes)
    } else if let Some(ref url) = media.url {
        MediaSource::Url(url.clone())
    } else {
        return Err(A2AError::Conversation(
            "media payload has neither data nor url".to_string(),
        ));
    };

    Ok(ContentPart::Media {
        content_type: infer_content_type(&mime),
        source,
        mime_type: media.mime_type.clone(),
        filename: media.filename.clone(),
    })
}
