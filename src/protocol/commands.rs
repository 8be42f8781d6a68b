//! Outbound command building.
//!
//! Every command the bridge sends is a [`Command`] variant; [`encode`]
//! serializes it and stamps the protocol version. Field names follow the
//! daemon's v1 dialect - legacy daemons are only ever adapted on input
//! (see `protocol::envelope`), never spoken to in their own dialect.

use serde::Serialize;
use serde_json::Value;

/// Protocol dialect version stamped on every outbound object.
pub const PROTOCOL_VERSION: &str = "v1";

/// A recipient or contact address as the daemon expects it.
#[derive(Clone, Debug, Serialize)]
pub struct JsonAddress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
}

impl JsonAddress {
    /// Address for an identifier that may be a UUID or an E.164 number.
    pub fn from_identifier(id: &str) -> Self {
        if id.starts_with('+') {
            Self { uuid: None, number: Some(id.to_owned()) }
        } else {
            Self { uuid: Some(id.to_owned()), number: None }
        }
    }
}

/// One outgoing attachment, already written to a local file.
#[derive(Clone, Debug, Serialize)]
pub struct OutboundAttachment {
    pub filename: String,
    #[serde(rename = "contentType", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Every command this bridge can issue, serialized as
/// `{"type": "<command>", "version": "v1", ...}`.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Version,
    ListAccounts,
    Subscribe {
        account: String,
    },
    Unsubscribe {
        account: String,
    },
    RequestSync {
        account: String,
    },
    ListContacts {
        account: String,
    },
    GetProfile {
        account: String,
        address: JsonAddress,
    },
    GetGroup {
        account: String,
        #[serde(rename = "groupID")]
        group_id: String,
    },
    ListGroups {
        account: String,
    },
    LeaveGroup {
        account: String,
        #[serde(rename = "groupID")]
        group_id: String,
    },
    AcceptInvitation {
        account: String,
        #[serde(rename = "groupID")]
        group_id: String,
    },
    GenerateLinkingUri,
    FinishLink {
        device_name: String,
        session_id: String,
    },
    SetDeviceName {
        account: String,
        device_name: String,
    },
    Register {
        account: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        captcha: Option<String>,
    },
    Verify {
        account: String,
        code: String,
    },
    Send {
        username: String,
        #[serde(rename = "recipientAddress", skip_serializing_if = "Option::is_none")]
        recipient_address: Option<JsonAddress>,
        #[serde(rename = "recipientGroupId", skip_serializing_if = "Option::is_none")]
        recipient_group_id: Option<String>,
        #[serde(rename = "messageBody")]
        message_body: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<OutboundAttachment>,
    },
    MarkRead {
        account: String,
        to: JsonAddress,
        timestamps: Vec<i64>,
    },
}

/// Serialize a command to one wire frame (no trailing newline).
///
/// The version tag is injected here so no call site can forget it.
pub fn encode(command: &Command) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(command)?;
    if let Value::Object(obj) = &mut value {
        obj.insert("version".to_owned(), Value::String(PROTOCOL_VERSION.to_owned()));
    }
    serde_json::to_string(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(command: &Command) -> Value {
        serde_json::from_str(&encode(command).unwrap()).unwrap()
    }

    #[test]
    fn test_every_command_carries_version_v1() {
        let commands = [
            Command::Version,
            Command::ListAccounts,
            Command::Subscribe { account: "+15550100".into() },
            Command::GenerateLinkingUri,
            Command::MarkRead {
                account: "+15550100".into(),
                to: JsonAddress::from_identifier("+15550101"),
                timestamps: vec![1700000000000],
            },
        ];
        for command in &commands {
            let value = encoded(command);
            assert_eq!(value["version"], "v1", "missing version on {:?}", command);
        }
    }

    #[test]
    fn test_type_tags_use_wire_names() {
        assert_eq!(encoded(&Command::ListAccounts)["type"], "list_accounts");
        assert_eq!(encoded(&Command::GenerateLinkingUri)["type"], "generate_linking_uri");
        assert_eq!(
            encoded(&Command::RequestSync { account: "+1".into() })["type"],
            "request_sync"
        );
    }

    #[test]
    fn test_send_to_direct_recipient() {
        let command = Command::Send {
            username: "+15550100".into(),
            recipient_address: Some(JsonAddress::from_identifier(
                "3f8e9c7a-0000-0000-0000-000000000001",
            )),
            recipient_group_id: None,
            message_body: "hello".into(),
            attachments: vec![],
        };
        let value = encoded(&command);
        assert_eq!(value["type"], "send");
        assert_eq!(value["username"], "+15550100");
        assert_eq!(
            value["recipientAddress"]["uuid"],
            "3f8e9c7a-0000-0000-0000-000000000001"
        );
        assert!(value.get("recipientGroupId").is_none());
        assert_eq!(value["messageBody"], "hello");
        assert!(value.get("attachments").is_none());
    }

    #[test]
    fn test_send_to_group_uses_group_field() {
        let command = Command::Send {
            username: "+15550100".into(),
            recipient_address: None,
            recipient_group_id: Some("grp==".into()),
            message_body: "hi all".into(),
            attachments: vec![OutboundAttachment {
                filename: "/tmp/a.png".into(),
                content_type: Some("image/png".into()),
            }],
        };
        let value = encoded(&command);
        assert_eq!(value["recipientGroupId"], "grp==");
        assert_eq!(value["attachments"][0]["filename"], "/tmp/a.png");
        assert_eq!(value["attachments"][0]["contentType"], "image/png");
    }

    #[test]
    fn test_group_commands_spell_group_id_like_the_daemon() {
        let value = encoded(&Command::GetGroup {
            account: "+1".into(),
            group_id: "g".into(),
        });
        assert_eq!(value["groupID"], "g");
        assert!(value.get("group_id").is_none());
    }

    #[test]
    fn test_address_classification() {
        let number = JsonAddress::from_identifier("+15550100");
        assert_eq!(number.number.as_deref(), Some("+15550100"));
        assert!(number.uuid.is_none());

        let uuid = JsonAddress::from_identifier("3f8e9c7a-1111");
        assert_eq!(uuid.uuid.as_deref(), Some("3f8e9c7a-1111"));
        assert!(uuid.number.is_none());
    }

    #[test]
    fn test_register_omits_absent_captcha() {
        let value = encoded(&Command::Register {
            account: "+1".into(),
            captcha: None,
        });
        assert!(value.get("captcha").is_none());
    }
}
