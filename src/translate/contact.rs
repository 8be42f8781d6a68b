//! Contact and profile translation.
//!
//! Profile payloads arrive from `get_profile` and `list_contacts`. Both
//! shapes merge into one [`BuddyUpsert`]. A UUID is mandatory - contacts
//! without one are skipped, because the number-keyed records they would
//! create are exactly the legacy shape this translator migrates away
//! from.

use serde_json::Value;

use crate::config::BridgeConfig;
use crate::events::BuddyUpsert;
use crate::protocol::envelope::address_number;
use crate::session::Session;

/// Merge one profile payload into a buddy record.
///
/// Alias fallback chain: contact name, then profile name, then number,
/// then (for our own account) the account identifier itself. When the
/// payload also carries a number, `renamed_from` tells the embedder to
/// migrate any legacy number-keyed record to the UUID key - moving its
/// auxiliary data, never duplicating the buddy.
pub fn translate_profile(
    profile: &Value,
    session: &Session,
    config: &BridgeConfig,
) -> Option<BuddyUpsert> {
    let address = profile.get("address").unwrap_or(profile);
    let uuid = address
        .get("uuid")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())?;
    let number = address_number(address).map(str::to_owned);

    let alias = pick_alias(profile)
        .or_else(|| number.clone())
        .or_else(|| session.is_self(uuid).then(|| session.account.clone()));

    let avatar_path = profile
        .get("avatar")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(Into::into);

    Some(BuddyUpsert {
        identifier: uuid.to_owned(),
        alias,
        avatar_path,
        renamed_from: number,
        online: config.fake_online_presence,
    })
}

/// First non-empty display name in the payload.
fn pick_alias(profile: &Value) -> Option<String> {
    for key in ["contact_name", "name", "profile_name"] {
        if let Some(name) = profile.get(key).and_then(Value::as_str) {
            let name = name.trim();
            if !name.is_empty() {
                return Some(name.to_owned());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> Session {
        Session::new("+15550100", None, 0)
    }

    fn config() -> BridgeConfig {
        BridgeConfig::new("+15550100")
    }

    #[test]
    fn test_full_profile_merges_all_fields() {
        let profile = json!({
            "address": {"uuid": "peer-uuid", "number": "+15550101"},
            "name": "Alice",
            "avatar": "/var/lib/signald/avatars/a1"
        });
        let upsert = translate_profile(&profile, &session(), &config()).unwrap();
        assert_eq!(upsert.identifier, "peer-uuid");
        assert_eq!(upsert.alias.as_deref(), Some("Alice"));
        assert_eq!(upsert.renamed_from.as_deref(), Some("+15550101"));
        assert_eq!(
            upsert.avatar_path.as_deref(),
            Some(std::path::Path::new("/var/lib/signald/avatars/a1"))
        );
    }

    #[test]
    fn test_contact_name_wins_over_profile_name() {
        let profile = json!({
            "address": {"uuid": "u"},
            "contact_name": "Work Alice",
            "profile_name": "alice.99"
        });
        let upsert = translate_profile(&profile, &session(), &config()).unwrap();
        assert_eq!(upsert.alias.as_deref(), Some("Work Alice"));
    }

    #[test]
    fn test_alias_falls_back_to_number() {
        let profile = json!({"address": {"uuid": "u", "number": "+15550101"}});
        let upsert = translate_profile(&profile, &session(), &config()).unwrap();
        assert_eq!(upsert.alias.as_deref(), Some("+15550101"));
    }

    #[test]
    fn test_self_without_names_falls_back_to_account() {
        let mut session = session();
        session.record_own_uuid("3f8e9c7a-0000-0000-0000-000000000001".parse().unwrap());
        let profile = json!({"address": {"uuid": "3f8e9c7a-0000-0000-0000-000000000001"}});
        let upsert = translate_profile(&profile, &session, &config()).unwrap();
        assert_eq!(upsert.alias.as_deref(), Some("+15550100"));
    }

    #[test]
    fn test_missing_uuid_skips_contact() {
        let profile = json!({"address": {"number": "+15550101"}, "name": "No UUID"});
        assert!(translate_profile(&profile, &session(), &config()).is_none());
        let empty = json!({"address": {"uuid": "", "number": "+15550101"}});
        assert!(translate_profile(&empty, &session(), &config()).is_none());
    }

    #[test]
    fn test_flat_payload_without_address_wrapper() {
        let profile = json!({"uuid": "u2", "number": "+15550102", "profile_name": "bob"});
        let upsert = translate_profile(&profile, &session(), &config()).unwrap();
        assert_eq!(upsert.identifier, "u2");
        assert_eq!(upsert.alias.as_deref(), Some("bob"));
    }

    #[test]
    fn test_blank_names_are_skipped() {
        let profile = json!({
            "address": {"uuid": "u"},
            "name": "  ",
            "profile_name": "real"
        });
        let upsert = translate_profile(&profile, &session(), &config()).unwrap();
        assert_eq!(upsert.alias.as_deref(), Some("real"));
    }

    #[test]
    fn test_presence_follows_account_option() {
        let profile = json!({"address": {"uuid": "u"}});
        let mut cfg = config();
        assert!(translate_profile(&profile, &session(), &cfg).unwrap().online);
        cfg.fake_online_presence = false;
        assert!(!translate_profile(&profile, &session(), &cfg).unwrap().online);
    }
}
