//! Group roster translation.
//!
//! Every group payload rebuilds the full [`GroupState`]: the member and
//! pending-member sets are replaced wholesale, never diffed against the
//! previous roster. The group id is mandatory; payloads without one are
//! skipped.

use std::collections::HashSet;

use serde_json::Value;

use crate::events::GroupState;
use crate::protocol::envelope::{address_identifier, group_id};
use crate::session::Session;

/// Rebuild a [`GroupState`] from a group-v2 payload.
pub fn translate_group(group: &Value) -> Option<GroupState> {
    // leave_group and some acks wrap the group info under "v2".
    let info = group.get("v2").unwrap_or(group);
    let id = group_id(info)?.to_owned();

    let title = info
        .get("title")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(&id)
        .to_owned();

    let avatar_path = info
        .get("avatar")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(Into::into);

    Some(GroupState {
        group_id: id,
        title,
        avatar_path,
        members: member_set(info.get("members")),
        pending_members: member_set(info.get("pendingMembers")),
    })
}

/// Identifier set out of a member array; entries without an identifier
/// are dropped.
fn member_set(members: Option<&Value>) -> HashSet<String> {
    members
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(address_identifier)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// True when our own account sits in the pending-member set, i.e. this
/// roster update is an invitation we can accept.
pub fn invites_self(group: &GroupState, session: &Session) -> bool {
    group.pending_members.iter().any(|m| session.is_self(m))
}
