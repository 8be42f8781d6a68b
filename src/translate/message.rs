//! Incoming message translation.
//!
//! An `IncomingMessage` envelope carries exactly one of a data message, a
//! receipt, or a typing notification. [`translate_incoming`] routes the
//! three cases; data messages (including sync replays of our own sends
//! from other linked devices) are flattened into a [`NormalizedMessage`].
//!
//! Body assembly order: rendered attachments, sticker, quote prefix,
//! reaction text, literal body. A reaction substitutes the quote text
//! entirely - reaction events never render a quote of their own. An empty
//! final body means "no content" and the caller must not open or emit a
//! conversation event for it.

use serde_json::Value;

use crate::config::BridgeConfig;
use crate::events::{MessageKind, NormalizedMessage};
use crate::log::log_warn;
use crate::protocol::envelope::{address_identifier, body_text};
use crate::session::Session;
use crate::translate::ImageStore;
use crate::translate::attachment::render_attachment;

/// Receipt flavor reported by the daemon.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiptKind {
    Delivery,
    Read,
    Viewed,
    Unknown,
}

impl ReceiptKind {
    fn from_wire(s: &str) -> Self {
        match s {
            "DELIVERY" => Self::Delivery,
            "READ" => Self::Read,
            "VIEWED" => Self::Viewed,
            _ => Self::Unknown,
        }
    }

    /// Short notice text for conversation display.
    pub fn describe(self) -> &'static str {
        match self {
            Self::Delivery => "message delivered",
            Self::Read => "message read",
            Self::Viewed => "message viewed",
            Self::Unknown => "receipt received",
        }
    }
}

/// Routed result of one `IncomingMessage` envelope.
#[derive(Debug)]
pub enum Incoming {
    /// Receipt payload; surfaced or ignored per config.
    Receipt {
        sender: String,
        kind: ReceiptKind,
        timestamps: Vec<i64>,
    },
    /// Typing payload; always ignored.
    Typing,
    /// A translated chat message ready for dispatch. `timestamp_millis`
    /// keeps the daemon's exact value for mark_read round-trips.
    Message {
        message: NormalizedMessage,
        timestamp_millis: i64,
    },
    /// Nothing displayable (empty content, or mandatory fields missing).
    Nothing,
}

/// Route and translate one `IncomingMessage` data payload.
pub fn translate_incoming(
    data: &Value,
    session: &Session,
    config: &BridgeConfig,
    images: &mut dyn ImageStore,
) -> Incoming {
    let source = data
        .get("source")
        .and_then(address_identifier)
        .map(str::to_owned);

    if let Some(receipt) = data.get("receipt_message").or_else(|| data.get("receiptMessage")) {
        let Some(sender) = source else {
            return Incoming::Nothing;
        };
        let kind = receipt
            .get("type")
            .and_then(Value::as_str)
            .map(ReceiptKind::from_wire)
            .unwrap_or(ReceiptKind::Unknown);
        let timestamps = receipt
            .get("timestamps")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default();
        return Incoming::Receipt { sender, kind, timestamps };
    }

    if data.get("typing_message").or_else(|| data.get("typingMessage")).is_some() {
        return Incoming::Typing;
    }

    // Our own message sent from another linked device, replayed for echo.
    if let Some(sent) = data
        .get("sync_message")
        .or_else(|| data.get("syncMessage"))
        .and_then(|s| s.get("sent"))
    {
        let Some(inner) = sent.get("message").or_else(|| sent.get("data_message")) else {
            return Incoming::Nothing;
        };
        // Direct sync echoes route by destination: the conversation peer
        // is who we sent to, not ourselves.
        let destination = sent
            .get("destination")
            .and_then(address_identifier)
            .map(str::to_owned)
            .unwrap_or_else(|| session.account.clone());
        let timestamp = sent.get("timestamp").and_then(Value::as_i64);
        return translate_data_message(inner, destination, true, timestamp, config, images);
    }

    if let Some(inner) = data.get("data_message").or_else(|| data.get("dataMessage")) {
        let Some(sender) = source else {
            log_warn("translate", "message_without_source", "dropping data message");
            return Incoming::Nothing;
        };
        let timestamp = data.get("timestamp").and_then(Value::as_i64);
        return translate_data_message(inner, sender, false, timestamp, config, images);
    }

    Incoming::Nothing
}

/// Flatten one data-message payload into a normalized message.
fn translate_data_message(
    inner: &Value,
    sender: String,
    is_sync_echo: bool,
    fallback_timestamp: Option<i64>,
    config: &BridgeConfig,
    images: &mut dyn ImageStore,
) -> Incoming {
    let timestamp_millis = inner
        .get("timestamp")
        .and_then(Value::as_i64)
        .or(fallback_timestamp)
        .unwrap_or(0);

    let group_id = inner
        .get("groupV2")
        .or_else(|| inner.get("group"))
        .and_then(crate::protocol::envelope::group_id)
        .map(str::to_owned);

    let mut parts: Vec<String> = Vec::new();
    let mut has_attachment = false;

    if let Some(attachments) = inner.get("attachments").and_then(Value::as_array) {
        for attachment in attachments {
            parts.push(render_attachment(attachment, config, images));
            has_attachment = true;
        }
    }

    if let Some(sticker) = inner.get("sticker").and_then(|s| s.get("attachment")) {
        parts.push(render_attachment(sticker, config, images));
        has_attachment = true;
    }

    if let Some(reaction) = inner.get("reaction") {
        // A reaction substitutes the quoted text entirely.
        parts.push(describe_reaction(reaction));
    } else if let Some(quote) = inner.get("quote") {
        if let Some(prefix) = quote_prefix(quote) {
            parts.push(prefix);
        }
    }

    if let Some(text) = body_text(inner).filter(|t| !t.is_empty()) {
        parts.push(text.to_owned());
    }

    let body = parts.join("\n");
    if body.trim().is_empty() {
        return Incoming::Nothing;
    }

    let kind = if group_id.is_some() { MessageKind::Group } else { MessageKind::Direct };
    Incoming::Message {
        message: NormalizedMessage {
            kind,
            sender,
            group_id,
            is_sync_echo,
            timestamp_secs: timestamp_millis / 1000,
            body,
            has_attachment,
        },
        timestamp_millis,
    }
}

/// "reacted with X" / "removed their X reaction".
fn describe_reaction(reaction: &Value) -> String {
    let emoji = reaction.get("emoji").and_then(Value::as_str).unwrap_or("?");
    let removed = reaction.get("remove").and_then(Value::as_bool).unwrap_or(false);
    if removed {
        format!("removed their {} reaction", emoji)
    } else {
        format!("reacted with {}", emoji)
    }
}

/// Author line plus `> `-prefixed quoted lines.
fn quote_prefix(quote: &Value) -> Option<String> {
    let text = quote.get("text").and_then(Value::as_str)?;
    if text.is_empty() {
        return None;
    }
    let author = quote
        .get("author")
        .and_then(address_identifier)
        .unwrap_or("?");
    let mut prefix = format!("{}:", author);
    for line in text.lines() {
        prefix.push_str("\n> ");
        prefix.push_str(line);
    }
    Some(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::testing::MemoryImageStore;
    use serde_json::json;

    fn session() -> Session {
        Session::new("+15550100", None, 0)
    }

    fn config() -> BridgeConfig {
        BridgeConfig::new("+15550100")
    }

    fn translate(data: Value) -> Incoming {
        let mut images = MemoryImageStore::default();
        translate_incoming(&data, &session(), &config(), &mut images)
    }

    #[test]
    fn test_direct_text_message() {
        let data = json!({
            "source": {"uuid": "peer-uuid", "number": "+15550101"},
            "timestamp": 1700000000123i64,
            "data_message": {"timestamp": 1700000000123i64, "body": "hello"}
        });
        let Incoming::Message { message, timestamp_millis } = translate(data) else {
            panic!("expected message");
        };
        assert_eq!(message.kind, MessageKind::Direct);
        assert_eq!(message.sender, "peer-uuid");
        assert_eq!(message.body, "hello");
        assert_eq!(message.timestamp_secs, 1700000000);
        assert_eq!(timestamp_millis, 1700000000123);
        assert!(!message.is_sync_echo);
        assert!(!message.has_attachment);
        assert!(message.group_id.is_none());
    }

    #[test]
    fn test_group_message_carries_group_id() {
        let data = json!({
            "source": {"number": "+15550101"},
            "data_message": {
                "timestamp": 1700000001000i64,
                "body": "hi all",
                "groupV2": {"id": "grp==", "title": "Rust folks"}
            }
        });
        let Incoming::Message { message, .. } = translate(data) else {
            panic!("expected message");
        };
        assert_eq!(message.kind, MessageKind::Group);
        assert_eq!(message.group_id.as_deref(), Some("grp=="));
    }

    #[test]
    fn test_legacy_group_and_body_spellings() {
        let data = json!({
            "source": "+15550101",
            "dataMessage": {
                "timestamp": 1700000001000i64,
                "message": "old shape",
                "group": {"groupId": "legacy-group"}
            }
        });
        let Incoming::Message { message, .. } = translate(data) else {
            panic!("expected message");
        };
        assert_eq!(message.body, "old shape");
        assert_eq!(message.group_id.as_deref(), Some("legacy-group"));
    }

    #[test]
    fn test_reaction_substitutes_body() {
        let data = json!({
            "source": {"uuid": "peer"},
            "data_message": {
                "timestamp": 1,
                "reaction": {"emoji": "👍", "remove": false},
                "quote": {"text": "should not appear", "author": {"uuid": "x"}}
            }
        });
        let Incoming::Message { message, .. } = translate(data) else {
            panic!("expected message");
        };
        assert_eq!(message.body, "reacted with 👍");
    }

    #[test]
    fn test_removed_reaction_text() {
        let data = json!({
            "source": {"uuid": "peer"},
            "data_message": {
                "timestamp": 1,
                "reaction": {"emoji": "🎉", "remove": true}
            }
        });
        let Incoming::Message { message, .. } = translate(data) else {
            panic!("expected message");
        };
        assert_eq!(message.body, "removed their 🎉 reaction");
    }

    #[test]
    fn test_quote_prefix_lines() {
        let data = json!({
            "source": {"uuid": "peer"},
            "data_message": {
                "timestamp": 1,
                "body": "agreed",
                "quote": {
                    "author": {"number": "+15550102"},
                    "text": "line one\nline two"
                }
            }
        });
        let Incoming::Message { message, .. } = translate(data) else {
            panic!("expected message");
        };
        assert_eq!(message.body, "+15550102:\n> line one\n> line two\nagreed");
    }

    #[test]
    fn test_attachment_precedes_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"data").unwrap();
        let data = json!({
            "source": {"uuid": "peer"},
            "data_message": {
                "timestamp": 1,
                "body": "see file",
                "attachments": [{"contentType": "application/pdf", "storedFilename": path.to_str().unwrap()}]
            }
        });
        let Incoming::Message { message, .. } = translate(data) else {
            panic!("expected message");
        };
        assert!(message.has_attachment);
        let expected = format!("file://{}\nsee file", path.display());
        assert_eq!(message.body, expected);
    }

    #[test]
    fn test_receipt_routed_not_translated() {
        let data = json!({
            "source": {"uuid": "peer"},
            "receipt_message": {"type": "READ", "timestamps": [1700000000123i64]}
        });
        let Incoming::Receipt { sender, kind, timestamps } = translate(data) else {
            panic!("expected receipt");
        };
        assert_eq!(sender, "peer");
        assert_eq!(kind, ReceiptKind::Read);
        assert_eq!(timestamps, vec![1700000000123]);
    }

    #[test]
    fn test_typing_ignored() {
        let data = json!({
            "source": {"uuid": "peer"},
            "typing_message": {"action": "STARTED"}
        });
        assert!(matches!(translate(data), Incoming::Typing));
    }

    #[test]
    fn test_sync_sent_routes_by_destination() {
        let data = json!({
            "sync_message": {
                "sent": {
                    "destination": {"uuid": "peer-uuid"},
                    "timestamp": 1700000002000i64,
                    "message": {"timestamp": 1700000002000i64, "body": "from my phone"}
                }
            }
        });
        let Incoming::Message { message, .. } = translate(data) else {
            panic!("expected message");
        };
        assert!(message.is_sync_echo);
        assert_eq!(message.sender, "peer-uuid");
        assert_eq!(message.body, "from my phone");
    }

    #[test]
    fn test_empty_content_is_nothing() {
        let data = json!({
            "source": {"uuid": "peer"},
            "data_message": {"timestamp": 1}
        });
        assert!(matches!(translate(data), Incoming::Nothing));
    }

    #[test]
    fn test_message_without_source_is_skipped() {
        let data = json!({
            "data_message": {"timestamp": 1, "body": "orphan"}
        });
        assert!(matches!(translate(data), Incoming::Nothing));
    }
}
