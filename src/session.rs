//! Per-connection session state.
//!
//! One [`Session`] per logical connection to the daemon. All mutation is
//! synchronous and single-owner: the event-reactor thread that drives the
//! state machine is the only writer, so there is no locking here.

use std::collections::HashMap;
use std::collections::VecDeque;

use uuid::Uuid;

use crate::events::{ConvHandle, NoticeTarget, Phase};

/// Which JSON shape the connected daemon speaks.
///
/// Discovered empirically: the version probe either answers cleanly
/// (current) or errors in a version-specific way (legacy). Outbound
/// traffic is always current-dialect; this only tunes diagnostics and
/// input expectations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Dialect {
    #[default]
    Unknown,
    Legacy,
    Current,
}

/// The single in-flight "last sent message" record.
///
/// Held until the daemon acks the send, then echoed into the target
/// conversation. Only one can be outstanding - the next send overwrites
/// it. That is a known limitation, not a queue.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingEcho {
    pub target: NoticeTarget,
    pub body: String,
}

/// One cached inbound message for reply-quote lookup.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplyCacheEntry {
    pub sender: String,
    pub body: String,
    pub timestamp_secs: i64,
}

/// Bounded FIFO of recent inbound messages.
///
/// Capacity 0 disables the cache entirely. When full, pushing evicts
/// exactly the oldest entry. Lookup is substring containment against the
/// cached body text, scanning newest-first; that can match an older
/// message containing the same substring, which is accepted as a
/// heuristic.
#[derive(Debug)]
pub struct ReplyCache {
    entries: VecDeque<ReplyCacheEntry>,
    capacity: usize,
}

impl ReplyCache {
    pub fn new(capacity: usize) -> Self {
        Self { entries: VecDeque::with_capacity(capacity), capacity }
    }

    /// Insert one entry, evicting the oldest when at capacity.
    pub fn push(&mut self, entry: ReplyCacheEntry) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Most recent entry whose body contains `needle`.
    pub fn find(&self, needle: &str) -> Option<&ReplyCacheEntry> {
        self.entries.iter().rev().find(|e| e.body.contains(needle))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Split a reply-command sigil of the form `@needle: rest`.
///
/// Returns the needle and the remaining text, or None when the body does
/// not start with the sigil.
pub fn split_reply_sigil(body: &str) -> Option<(&str, &str)> {
    let after_at = body.strip_prefix('@')?;
    let colon = after_at.find(':')?;
    let needle = &after_at[..colon];
    if needle.is_empty() {
        return None;
    }
    let rest = after_at[colon + 1..].trim_start();
    Some((needle, rest))
}

/// All mutable state for one bridged account connection.
pub struct Session {
    /// Account identifier as signald knows it (E.164 number).
    pub account: String,
    /// Explicit socket path from the account options, if any.
    pub socket_path: Option<String>,
    own_uuid: Option<Uuid>,
    pub dialect: Dialect,
    pub phase: Phase,
    groups: HashMap<String, ConvHandle>,
    next_handle: u64,
    pending_echo: Option<PendingEcho>,
    pub reply_cache: ReplyCache,
    /// Present only while a room-listing request is outstanding.
    pub room_listing: Option<ConvHandle>,
    /// Identifier of an outstanding explicit profile-info request.
    pub pending_profile: Option<String>,
}

impl Session {
    pub fn new(account: impl Into<String>, socket_path: Option<String>, reply_cache_capacity: usize) -> Self {
        Self {
            account: account.into(),
            socket_path,
            own_uuid: None,
            dialect: Dialect::Unknown,
            phase: Phase::Start,
            groups: HashMap::new(),
            next_handle: 1,
            pending_echo: None,
            reply_cache: ReplyCache::new(reply_cache_capacity),
            room_listing: None,
            pending_profile: None,
        }
    }

    /// Record the account UUID once the daemon confirms it.
    ///
    /// Once set it stays set for the session lifetime; re-linking may
    /// refresh it but nothing clears it short of teardown.
    pub fn record_own_uuid(&mut self, uuid: Uuid) {
        self.own_uuid = Some(uuid);
    }

    pub fn own_uuid(&self) -> Option<&Uuid> {
        self.own_uuid.as_ref()
    }

    /// True when `identifier` names this account (by UUID or number).
    pub fn is_self(&self, identifier: &str) -> bool {
        if identifier == self.account {
            return true;
        }
        match &self.own_uuid {
            Some(u) => identifier.eq_ignore_ascii_case(&u.to_string()),
            None => false,
        }
    }

    pub fn record_dialect(&mut self, dialect: Dialect) {
        self.dialect = dialect;
    }

    /// Handle for a group id, allocating one on first sight.
    ///
    /// Handles are stable: the same id maps to the same handle for the
    /// session lifetime.
    pub fn upsert_group(&mut self, group_id: &str) -> ConvHandle {
        if let Some(handle) = self.groups.get(group_id) {
            return *handle;
        }
        let handle = self.alloc_handle();
        self.groups.insert(group_id.to_owned(), handle);
        handle
    }

    pub fn group_handle(&self, group_id: &str) -> Option<ConvHandle> {
        self.groups.get(group_id).copied()
    }

    pub fn remove_group(&mut self, group_id: &str) -> Option<ConvHandle> {
        self.groups.remove(group_id)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn alloc_handle(&mut self) -> ConvHandle {
        let handle = ConvHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    /// Replace the in-flight echo record. Overwriting a previous one is
    /// the documented single-slot behavior.
    pub fn set_pending_echo(&mut self, target: NoticeTarget, body: String) {
        self.pending_echo = Some(PendingEcho { target, body });
    }

    pub fn take_pending_echo(&mut self) -> Option<PendingEcho> {
        self.pending_echo.take()
    }

    pub fn pending_echo(&self) -> Option<&PendingEcho> {
        self.pending_echo.as_ref()
    }

    pub fn clear_pending_echo(&mut self) {
        self.pending_echo = None;
    }
}
