//! Normalized events delivered to the UI collaborator.
//!
//! The bridge core never touches conversation windows or buddy lists
//! directly; it emits the small vocabulary of events defined here through
//! [`EventSink`], and the embedding client renders them. All calls arrive
//! on the single logical thread that drives the session.

use std::collections::HashSet;
use std::path::PathBuf;

/// Opaque conversation handle allocated by the session.
///
/// Handles are 1:1 with daemon group ids for the lifetime of the session;
/// the embedder maps them to its own conversation objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConvHandle(pub u64);

/// Whether a normalized message belongs to a direct or a group conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Direct,
    Group,
}

/// The translated output of one incoming chat event.
///
/// `body` is final display text: attachment renderings, quote prefix and
/// reaction text are already merged in. Produced fresh per event and not
/// retained by the core beyond the bounded reply cache.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedMessage {
    pub kind: MessageKind,
    /// Sender identifier (UUID when known, otherwise number).
    pub sender: String,
    /// Group id for `MessageKind::Group`, None for direct messages.
    pub group_id: Option<String>,
    /// True when this is our own message replayed from another linked device.
    pub is_sync_echo: bool,
    pub timestamp_secs: i64,
    pub body: String,
    pub has_attachment: bool,
}

/// Group roster snapshot. Rebuilt wholesale on every update event -
/// membership is always replaced, never patched.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupState {
    pub group_id: String,
    pub title: String,
    pub avatar_path: Option<PathBuf>,
    pub members: HashSet<String>,
    pub pending_members: HashSet<String>,
}

/// One buddy-list update merged from a contact or profile payload.
#[derive(Clone, Debug, PartialEq)]
pub struct BuddyUpsert {
    /// Primary identifier (UUID when known, otherwise number).
    pub identifier: String,
    pub alias: Option<String>,
    pub avatar_path: Option<PathBuf>,
    /// Set when a legacy number-keyed record must be renamed to this
    /// identifier, moving its auxiliary data rather than duplicating it.
    pub renamed_from: Option<String>,
    /// Presence to report for the buddy. Signal has no real presence;
    /// accounts that opt into fake presence show everyone online.
    pub online: bool,
}

/// Where an in-conversation notice (delivery failure, receipt) lands.
#[derive(Clone, Debug, PartialEq)]
pub enum NoticeTarget {
    /// Direct conversation with this identifier.
    Direct(String),
    /// Group conversation by handle.
    Group(ConvHandle),
}

/// Daemon-side connectivity as shown in the client's connection indicator.
///
/// There is deliberately no Disconnected value: signald reconnects its
/// own websocket, so DISCONNECTED reports are downgraded to Connecting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Connectivity {
    Connecting,
    Connected,
}

/// Current node of the protocol state machine, re-exported to the UI for
/// progress display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Start,
    AwaitingVersion,
    AwaitingAccountList,
    AwaitingSubscribeOrLink,
    AwaitingLinkCompletion,
    AwaitingVerification,
    AwaitingSync,
    Running,
}

/// Callbacks the embedding client implements.
///
/// All methods are invoked synchronously from the session's thread while
/// an envelope is being dispatched; implementations should hand off to
/// their own rendering machinery rather than block.
pub trait EventSink {
    /// A translated incoming message ready for display.
    fn normalized_message(&mut self, message: NormalizedMessage);

    /// Our own just-sent message, echoed once the daemon acked delivery.
    fn send_echo(&mut self, target: NoticeTarget, body: String, timestamp_secs: i64);

    /// A status line for a conversation (delivery failure, receipt).
    fn conversation_notice(&mut self, target: NoticeTarget, text: String);

    /// Wholesale roster replacement for a tracked group.
    fn group_roster_changed(&mut self, handle: ConvHandle, group: GroupState);

    /// A group conversation was closed (left or removed).
    fn group_removed(&mut self, handle: ConvHandle, group_id: String);

    /// Contact/profile data merged into a buddy record.
    fn buddy_upserted(&mut self, upsert: BuddyUpsert);

    /// The state machine moved to a new phase.
    fn connection_phase_changed(&mut self, phase: Phase);

    /// The daemon's own upstream connectivity changed.
    fn connectivity_changed(&mut self, connectivity: Connectivity);

    /// A linking URI arrived; render it as a QR code for the user to scan.
    fn linking_uri(&mut self, uri: String);

    /// Registration needs the SMS/voice verification code from the user.
    fn verification_required(&mut self, account: String);

    /// The connection is dead; tear the account down.
    fn fatal_error(&mut self, message: String);
}
