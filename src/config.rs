//! Per-account bridge configuration.
//!
//! Every option the account-options collaborator exposes lands in one
//! struct, handed to the bridge at session creation. Nothing here is
//! global: two accounts in the same process get two configs (and two
//! sessions).

use std::path::PathBuf;

/// How received attachments are presented to the conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttachmentHosting {
    /// Inline image references plus local file links (default).
    Local,
    /// Copy each attachment into `dir` and link it under `base_url`.
    External {
        /// Target directory; must exist and be a directory.
        dir: PathBuf,
        /// URL prefix the copied file is reachable under.
        base_url: String,
    },
}

/// Configuration for one bridged account.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Account identifier as signald knows it (E.164 number).
    pub account: String,
    /// Explicit signald socket path; empty/None races the default candidates.
    pub socket_path: Option<String>,
    /// Device name sent after linking completes.
    pub device_name: String,
    /// true = link to an existing account via QR, false = register fresh.
    pub link_device: bool,
    /// Report the account as online to the daemon-side presence fakery.
    pub fake_online_presence: bool,
    /// Attachment hosting mode.
    pub attachment_hosting: AttachmentHosting,
    /// Register inline images with the client image store when displayable.
    pub cache_images_locally: bool,
    /// Reply-quote cache capacity; 0 disables the cache.
    pub reply_cache_capacity: usize,
    /// Hold the local echo until the daemon acks the send.
    pub wait_for_send_ack: bool,
    /// Send mark_read for messages the UI displays.
    pub send_read_marks: bool,
    /// Surface delivery/read receipts as conversation notices.
    pub display_receipts: bool,
}

impl BridgeConfig {
    /// Config with documented defaults for `account`.
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            socket_path: None,
            device_name: "sigbridge".to_string(),
            link_device: true,
            fake_online_presence: true,
            attachment_hosting: AttachmentHosting::Local,
            cache_images_locally: true,
            reply_cache_capacity: 0,
            wait_for_send_ack: true,
            send_read_marks: false,
            display_receipts: false,
        }
    }
}
