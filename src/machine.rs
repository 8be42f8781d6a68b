//! The protocol state machine.
//!
//! [`Bridge`] owns one [`Session`] and drives it through login, linking
//! or registration, subscription, and the steady-state event loop:
//!
//! - `Start`: version probe sent on connect
//! - `AwaitingVersion`: waiting for the daemon's version report; an error
//!   here is the legacy-dialect discovery, not a failure
//! - `AwaitingAccountList`: deciding between subscribe and link/register
//! - `AwaitingSubscribeOrLink`: subscription ack or linking URI expected
//! - `AwaitingLinkCompletion`: QR displayed, waiting for the scan
//! - `AwaitingVerification`: registration sent, waiting for the SMS code
//! - `AwaitingSync`: sync requested, contact/group listing next
//! - `Running`: steady state; all chat traffic self-loops here
//!
//! Error envelopes never reach the per-phase table: they are intercepted
//! first and matched against an ordered signature list. The auth-failure
//! signature is a global interrupt - it restarts linking from whatever
//! phase the session is in.

use serde_json::Value;

use crate::config::BridgeConfig;
use crate::error::ProtocolError;
use crate::events::{Connectivity, ConvHandle, EventSink, NoticeTarget, Phase};
use crate::log::{log_info, log_warn};
use crate::protocol::commands::{Command, JsonAddress, encode};
use crate::protocol::envelope::{self, Envelope, group_id};
use crate::session::{Dialect, ReplyCacheEntry, Session, split_reply_sigil};
use crate::translate::ImageStore;
use crate::translate::contact::translate_profile;
use crate::translate::group::{invites_self, translate_group};
use crate::translate::message::{Incoming, translate_incoming};
use crate::translate::outgoing::extract_images;
use crate::transport::FrameSender;

/// Where an outbound message goes.
#[derive(Clone, Debug, PartialEq)]
pub enum SendTarget {
    /// Direct conversation with this identifier (UUID or number).
    Direct(String),
    /// Group conversation by daemon group id.
    Group(String),
}

/// Ordered error classification - first matching rule wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ErrorClass {
    /// Authorization failed: restart linking, from any phase.
    AuthFailure,
    /// A send was rejected: surface in the last-known conversation.
    SendFailure,
    /// Subscribe was rejected: the account needs (re-)linking.
    SubscribeFailure,
    /// Best-effort commands whose errors carry no consequence.
    Ignorable,
    /// signald's storage is busy; nothing we can do but reconnect.
    TransientStorage,
    /// Anything else is a hard connection error.
    Generic,
}

const AUTH_SIGNATURES: &[&str] = &["AuthorizationFailedException", "[401]"];
const STORAGE_SIGNATURES: &[&str] = &["SQLITE_BUSY", "database is locked"];

fn classify_error(typ: &str, message: &str) -> ErrorClass {
    if AUTH_SIGNATURES.iter().any(|sig| message.contains(sig)) {
        return ErrorClass::AuthFailure;
    }
    if typ == "send" {
        return ErrorClass::SendFailure;
    }
    if typ == "subscribe" {
        return ErrorClass::SubscribeFailure;
    }
    if STORAGE_SIGNATURES.iter().any(|sig| message.contains(sig)) {
        return ErrorClass::TransientStorage;
    }
    if matches!(typ, "unsubscribe" | "mark_read" | "typing") {
        return ErrorClass::Ignorable;
    }
    ErrorClass::Generic
}

/// Wire name of a command, for diagnostics without logging payloads.
fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Version => "version",
        Command::ListAccounts => "list_accounts",
        Command::Subscribe { .. } => "subscribe",
        Command::Unsubscribe { .. } => "unsubscribe",
        Command::RequestSync { .. } => "request_sync",
        Command::ListContacts { .. } => "list_contacts",
        Command::GetProfile { .. } => "get_profile",
        Command::GetGroup { .. } => "get_group",
        Command::ListGroups { .. } => "list_groups",
        Command::LeaveGroup { .. } => "leave_group",
        Command::AcceptInvitation { .. } => "accept_invitation",
        Command::GenerateLinkingUri => "generate_linking_uri",
        Command::FinishLink { .. } => "finish_link",
        Command::SetDeviceName { .. } => "set_device_name",
        Command::Register { .. } => "register",
        Command::Verify { .. } => "verify",
        Command::Send { .. } => "send",
        Command::MarkRead { .. } => "mark_read",
    }
}

/// Driver for one bridged account.
pub struct Bridge {
    session: Session,
    config: BridgeConfig,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        let session = Session::new(
            config.account.clone(),
            config.socket_path.clone(),
            config.reply_cache_capacity,
        );
        Self { session, config }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    fn send(&self, command: &Command, out: &mut dyn FrameSender) -> Result<(), ProtocolError> {
        let frame = encode(command)?;
        out.send_frame(&frame)?;
        log_info("machine", "command_sent", command_name(command));
        Ok(())
    }

    fn set_phase(&mut self, phase: Phase, sink: &mut dyn EventSink) {
        if self.session.phase != phase {
            log_info(
                "machine",
                "phase",
                &format!("{:?} -> {:?}", self.session.phase, phase),
            );
            self.session.phase = phase;
            sink.connection_phase_changed(phase);
        }
    }

    /// Kick off the login sequence once the transport is connected.
    pub fn start(
        &mut self,
        out: &mut dyn FrameSender,
        sink: &mut dyn EventSink,
    ) -> Result<(), ProtocolError> {
        sink.connectivity_changed(Connectivity::Connecting);
        self.send(&Command::Version, out)?;
        self.set_phase(Phase::AwaitingVersion, sink);
        Ok(())
    }

    /// Dispatch one complete inbound frame.
    ///
    /// Frames are processed strictly in arrival order by the single
    /// thread that owns this bridge; transitions are not commutative.
    pub fn handle_frame(
        &mut self,
        raw: &str,
        out: &mut dyn FrameSender,
        sink: &mut dyn EventSink,
        images: &mut dyn ImageStore,
    ) -> Result<(), ProtocolError> {
        let envelope = match envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Drop the frame, keep the connection.
                log_warn("machine", "decode_failed", &e.to_string());
                return Ok(());
            }
        };

        // InternalError frames sometimes arrive without the error field
        // set; they still carry their report in data.message.
        if envelope.is_error() || envelope.typ == "InternalError" {
            return self.handle_error_envelope(&envelope, out, sink);
        }

        match (self.session.phase, envelope.typ.as_str()) {
            (Phase::AwaitingVersion, "version") => self.handle_version(&envelope, out, sink),
            (Phase::AwaitingAccountList, "list_accounts") => {
                self.handle_account_list(&envelope, out, sink)
            }
            (Phase::AwaitingSubscribeOrLink, "subscribe" | "subscribed") => {
                self.handle_subscribed(out, sink)
            }
            (Phase::AwaitingSubscribeOrLink, "generate_linking_uri" | "linking_uri") => {
                self.handle_linking_uri(&envelope, out, sink)
            }
            (Phase::AwaitingSubscribeOrLink, "register") => {
                sink.verification_required(self.session.account.clone());
                self.set_phase(Phase::AwaitingVerification, sink);
                Ok(())
            }
            (Phase::AwaitingVerification, "verify") => self.handle_verified(&envelope, out, sink),
            (Phase::AwaitingLinkCompletion, "finish_link") => {
                self.handle_finish_link(&envelope, out, sink)
            }
            (Phase::AwaitingSync, "request_sync") => self.handle_sync_complete(out, sink),
            (Phase::Running, "IncomingMessage" | "message") => {
                self.handle_incoming(&envelope, out, sink, images)
            }
            (Phase::Running, "send") => self.handle_send_ack(&envelope, sink),
            (Phase::Running, "get_profile") => self.handle_profile(&envelope, sink),
            (Phase::Running, "list_contacts") => self.handle_contact_list(&envelope, sink),
            (Phase::Running, "get_group") => self.handle_group(&envelope.data, out, sink),
            (Phase::Running, "list_groups") => self.handle_group_list(&envelope, out, sink),
            (Phase::Running, "leave_group") => self.handle_leave_group(&envelope, sink),
            (Phase::Running, "WebSocketConnectionState") => {
                self.handle_connectivity(&envelope, sink)
            }
            (phase, typ) => {
                // Unhandled (phase, type) pairs are dropped with a
                // diagnostic - never a panic, never a transition.
                log_info(
                    "machine",
                    "frame_ignored",
                    &format!("type={} phase={:?}", typ, phase),
                );
                Ok(())
            }
        }
    }

    // ── Error envelopes ─────────────────────────────────────────────────

    fn handle_error_envelope(
        &mut self,
        envelope: &Envelope,
        out: &mut dyn FrameSender,
        sink: &mut dyn EventSink,
    ) -> Result<(), ProtocolError> {
        // A version probe that errors identifies a legacy daemon. Record
        // the dialect and continue the login sequence.
        if self.session.phase == Phase::AwaitingVersion {
            self.session.record_dialect(Dialect::Legacy);
            log_info("machine", "dialect", "legacy daemon detected from version probe");
            self.send(&Command::ListAccounts, out)?;
            self.set_phase(Phase::AwaitingAccountList, sink);
            return Ok(());
        }

        let message = envelope
            .error_message()
            .filter(|m| !m.is_empty())
            .or_else(|| envelope.data.get("message").and_then(Value::as_str))
            .map(str::to_owned)
            .unwrap_or_else(|| format!("daemon reported an error for {}", envelope.typ));

        match classify_error(&envelope.typ, &message) {
            ErrorClass::AuthFailure => {
                // Global interrupt: fires from any phase and always routes
                // back into the link/register branch.
                log_warn("machine", "auth_failure", &message);
                self.start_link_or_register(out, sink)
            }
            ErrorClass::SendFailure => {
                log_warn("machine", "send_failed", &message);
                match self.session.take_pending_echo() {
                    Some(echo) => {
                        sink.conversation_notice(echo.target, format!("not delivered: {}", message));
                    }
                    None => log_warn("machine", "send_failed_no_context", &message),
                }
                Ok(())
            }
            ErrorClass::SubscribeFailure => {
                log_warn("machine", "subscribe_failed", &message);
                self.start_link_or_register(out, sink)
            }
            ErrorClass::Ignorable => {
                log_info("machine", "error_ignored", &format!("type={}: {}", envelope.typ, message));
                Ok(())
            }
            ErrorClass::TransientStorage | ErrorClass::Generic => {
                sink.fatal_error(message.clone());
                Err(ProtocolError::Fatal(message))
            }
        }
    }

    /// Step 3's link branch: linking or registration per account options.
    fn start_link_or_register(
        &mut self,
        out: &mut dyn FrameSender,
        sink: &mut dyn EventSink,
    ) -> Result<(), ProtocolError> {
        if self.config.link_device {
            self.send(&Command::GenerateLinkingUri, out)?;
        } else {
            self.send(
                &Command::Register {
                    account: self.session.account.clone(),
                    captcha: None,
                },
                out,
            )?;
        }
        self.set_phase(Phase::AwaitingSubscribeOrLink, sink);
        Ok(())
    }

    // ── Login sequence ──────────────────────────────────────────────────

    fn handle_version(
        &mut self,
        envelope: &Envelope,
        out: &mut dyn FrameSender,
        sink: &mut dyn EventSink,
    ) -> Result<(), ProtocolError> {
        let version = envelope
            .data
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        log_info("machine", "daemon_version", version);
        self.session.record_dialect(Dialect::Current);
        self.send(&Command::ListAccounts, out)?;
        self.set_phase(Phase::AwaitingAccountList, sink);
        Ok(())
    }

    fn handle_account_list(
        &mut self,
        envelope: &Envelope,
        out: &mut dyn FrameSender,
        sink: &mut dyn EventSink,
    ) -> Result<(), ProtocolError> {
        let account = self.session.account.clone();
        let entry = envelope
            .data
            .get("accounts")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|a| {
                a.get("address")
                    .and_then(|addr| addr.get("number"))
                    .and_then(Value::as_str)
                    == Some(account.as_str())
                    || a.get("account_id").and_then(Value::as_str) == Some(account.as_str())
            });

        let registered = entry
            .map(|a| !a.get("pending").and_then(Value::as_bool).unwrap_or(false))
            .unwrap_or(false);

        if registered {
            if let Some(uuid) = entry
                .and_then(|a| a.get("address"))
                .and_then(|addr| addr.get("uuid"))
                .and_then(Value::as_str)
            {
                self.record_uuid(uuid);
            }
            self.send(&Command::Subscribe { account }, out)?;
            self.set_phase(Phase::AwaitingSubscribeOrLink, sink);
            Ok(())
        } else {
            log_info("machine", "account_not_registered", &account);
            self.start_link_or_register(out, sink)
        }
    }

    fn handle_linking_uri(
        &mut self,
        envelope: &Envelope,
        out: &mut dyn FrameSender,
        sink: &mut dyn EventSink,
    ) -> Result<(), ProtocolError> {
        let Some(uri) = envelope.data.get("uri").and_then(Value::as_str) else {
            log_warn("machine", "linking_uri_missing", "no uri in linking response");
            return Ok(());
        };
        sink.linking_uri(uri.to_owned());

        let session_id = envelope
            .data
            .get("session_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        // finish_link blocks daemon-side until the QR is scanned; the
        // response arrives as a regular event later.
        self.send(
            &Command::FinishLink {
                device_name: self.config.device_name.clone(),
                session_id,
            },
            out,
        )?;
        self.set_phase(Phase::AwaitingLinkCompletion, sink);
        Ok(())
    }

    fn handle_finish_link(
        &mut self,
        envelope: &Envelope,
        out: &mut dyn FrameSender,
        sink: &mut dyn EventSink,
    ) -> Result<(), ProtocolError> {
        self.capture_identity(&envelope.data);
        let account = self.session.account.clone();
        self.send(
            &Command::SetDeviceName {
                account: account.clone(),
                device_name: self.config.device_name.clone(),
            },
            out,
        )?;
        self.send(&Command::Subscribe { account }, out)?;
        self.set_phase(Phase::AwaitingSubscribeOrLink, sink);
        Ok(())
    }

    fn handle_verified(
        &mut self,
        envelope: &Envelope,
        out: &mut dyn FrameSender,
        sink: &mut dyn EventSink,
    ) -> Result<(), ProtocolError> {
        self.capture_identity(&envelope.data);
        let account = self.session.account.clone();
        self.send(&Command::Subscribe { account }, out)?;
        self.set_phase(Phase::AwaitingSubscribeOrLink, sink);
        Ok(())
    }

    fn handle_subscribed(
        &mut self,
        out: &mut dyn FrameSender,
        sink: &mut dyn EventSink,
    ) -> Result<(), ProtocolError> {
        sink.connectivity_changed(Connectivity::Connected);
        self.send(
            &Command::RequestSync {
                account: self.session.account.clone(),
            },
            out,
        )?;
        self.set_phase(Phase::AwaitingSync, sink);
        Ok(())
    }

    fn handle_sync_complete(
        &mut self,
        out: &mut dyn FrameSender,
        sink: &mut dyn EventSink,
    ) -> Result<(), ProtocolError> {
        let account = self.session.account.clone();
        self.send(&Command::ListContacts { account: account.clone() }, out)?;
        self.send(&Command::ListGroups { account }, out)?;
        self.set_phase(Phase::Running, sink);
        Ok(())
    }

    /// Pull the account UUID out of a linking/verification response.
    fn capture_identity(&mut self, data: &Value) {
        let uuid = data
            .get("address")
            .and_then(|addr| addr.get("uuid"))
            .and_then(Value::as_str)
            .or_else(|| data.get("uuid").and_then(Value::as_str));
        match uuid {
            Some(uuid) => self.record_uuid(uuid),
            None => log_warn("machine", "identity_missing", "no uuid in response"),
        }
    }

    fn record_uuid(&mut self, uuid: &str) {
        match uuid.parse() {
            Ok(parsed) => {
                self.session.record_own_uuid(parsed);
                log_info("machine", "identity", uuid);
            }
            Err(_) => log_warn("machine", "identity_unparsable", uuid),
        }
    }

    // ── Steady state ────────────────────────────────────────────────────

    fn handle_incoming(
        &mut self,
        envelope: &Envelope,
        out: &mut dyn FrameSender,
        sink: &mut dyn EventSink,
        images: &mut dyn ImageStore,
    ) -> Result<(), ProtocolError> {
        match translate_incoming(&envelope.data, &self.session, &self.config, images) {
            Incoming::Receipt { sender, kind, .. } => {
                if self.config.display_receipts {
                    sink.conversation_notice(NoticeTarget::Direct(sender), kind.describe().to_owned());
                }
                Ok(())
            }
            Incoming::Typing => Ok(()),
            Incoming::Nothing => Ok(()),
            Incoming::Message { message, timestamp_millis } => {
                self.session.reply_cache.push(ReplyCacheEntry {
                    sender: message.sender.clone(),
                    body: message.body.clone(),
                    timestamp_secs: message.timestamp_secs,
                });

                // First sight of a group: track it and ask for its roster.
                if let Some(group) = &message.group_id {
                    if self.session.group_handle(group).is_none() {
                        self.session.upsert_group(group);
                        self.send(
                            &Command::GetGroup {
                                account: self.session.account.clone(),
                                group_id: group.clone(),
                            },
                            out,
                        )?;
                    }
                }

                let mark = self.config.send_read_marks && !message.is_sync_echo;
                let sender = message.sender.clone();
                sink.normalized_message(message);

                if mark {
                    self.send(
                        &Command::MarkRead {
                            account: self.session.account.clone(),
                            to: JsonAddress::from_identifier(&sender),
                            timestamps: vec![timestamp_millis],
                        },
                        out,
                    )?;
                }
                Ok(())
            }
        }
    }

    fn handle_send_ack(
        &mut self,
        envelope: &Envelope,
        sink: &mut dyn EventSink,
    ) -> Result<(), ProtocolError> {
        let results = envelope.data.get("results").and_then(Value::as_array);
        // An empty result set shows up when sending to our own number;
        // signald reports no per-device results there. Counted as one
        // delivery - the daemon's contract for self-sends is not pinned
        // down, see DESIGN notes.
        let successes: usize = match results {
            Some(results) if !results.is_empty() => {
                results.iter().map(count_device_successes).sum()
            }
            _ => 1,
        };

        let Some(echo) = self.session.take_pending_echo() else {
            log_info("machine", "send_ack_unmatched", "no echo pending");
            return Ok(());
        };

        if successes >= 1 {
            let timestamp_secs = envelope
                .data
                .get("timestamp")
                .and_then(Value::as_i64)
                .unwrap_or(0)
                / 1000;
            sink.send_echo(echo.target, echo.body, timestamp_secs);
        } else {
            sink.conversation_notice(
                echo.target,
                "message was not delivered to any device".to_owned(),
            );
        }
        Ok(())
    }

    fn handle_profile(
        &mut self,
        envelope: &Envelope,
        sink: &mut dyn EventSink,
    ) -> Result<(), ProtocolError> {
        let Some(upsert) = translate_profile(&envelope.data, &self.session, &self.config) else {
            log_warn("machine", "profile_skipped", "profile without uuid");
            return Ok(());
        };

        // Satisfies an explicit profile-info request if one is pending.
        if self
            .session
            .pending_profile
            .as_deref()
            .is_some_and(|p| p == upsert.identifier || Some(p) == upsert.renamed_from.as_deref())
        {
            self.session.pending_profile = None;
        }

        sink.buddy_upserted(upsert);
        Ok(())
    }

    fn handle_contact_list(
        &mut self,
        envelope: &Envelope,
        sink: &mut dyn EventSink,
    ) -> Result<(), ProtocolError> {
        let contacts = envelope
            .data
            .get("profiles")
            .or_else(|| envelope.data.get("contacts"))
            .and_then(Value::as_array);
        for contact in contacts.into_iter().flatten() {
            if let Some(upsert) = translate_profile(contact, &self.session, &self.config) {
                sink.buddy_upserted(upsert);
            }
        }
        Ok(())
    }

    fn handle_group(
        &mut self,
        payload: &Value,
        out: &mut dyn FrameSender,
        sink: &mut dyn EventSink,
    ) -> Result<(), ProtocolError> {
        let Some(state) = translate_group(payload) else {
            log_warn("machine", "group_skipped", "group without id");
            return Ok(());
        };
        let handle = self.session.upsert_group(&state.group_id);

        // Accept invitations addressed to us before publishing the roster.
        if invites_self(&state, &self.session) {
            self.send(
                &Command::AcceptInvitation {
                    account: self.session.account.clone(),
                    group_id: state.group_id.clone(),
                },
                out,
            )?;
        }

        sink.group_roster_changed(handle, state);
        Ok(())
    }

    fn handle_group_list(
        &mut self,
        envelope: &Envelope,
        out: &mut dyn FrameSender,
        sink: &mut dyn EventSink,
    ) -> Result<(), ProtocolError> {
        let groups: Vec<Value> = envelope
            .data
            .get("groups")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for group in &groups {
            self.handle_group(group, out, sink)?;
        }
        if self.session.room_listing.take().is_some() {
            log_info("machine", "room_listing_complete", &format!("{} groups", groups.len()));
        }
        Ok(())
    }

    fn handle_leave_group(
        &mut self,
        envelope: &Envelope,
        sink: &mut dyn EventSink,
    ) -> Result<(), ProtocolError> {
        let info = envelope.data.get("v2").unwrap_or(&envelope.data);
        let Some(group) = group_id(info) else {
            log_warn("machine", "leave_without_id", "leave_group ack without group id");
            return Ok(());
        };
        if let Some(handle) = self.session.remove_group(group) {
            sink.group_removed(handle, group.to_owned());
        }
        Ok(())
    }

    fn handle_connectivity(
        &mut self,
        envelope: &Envelope,
        sink: &mut dyn EventSink,
    ) -> Result<(), ProtocolError> {
        let state = envelope
            .data
            .get("state")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN");
        // DISCONNECTED maps to Connecting on purpose: signald reconnects
        // its own websocket, and a fatal indicator here would flap.
        let connectivity = match state {
            "CONNECTED" => Connectivity::Connected,
            _ => Connectivity::Connecting,
        };
        log_info("machine", "daemon_connectivity", state);
        sink.connectivity_changed(connectivity);
        Ok(())
    }

    // ── Public operations driven by the UI ──────────────────────────────

    /// Send a user-composed message, extracting embedded images first.
    ///
    /// The original body (markup included) is what gets echoed locally,
    /// so inline images still render in our own conversation view.
    pub fn send_text(
        &mut self,
        target: SendTarget,
        body: &str,
        out: &mut dyn FrameSender,
        sink: &mut dyn EventSink,
        images: &dyn ImageStore,
    ) -> Result<(), ProtocolError> {
        if self.session.own_uuid().is_none() {
            return Err(ProtocolError::IdentityRequired("send"));
        }

        let (stripped, attachments) = extract_images(body, images);
        if stripped.trim().is_empty() && attachments.is_empty() {
            return Ok(());
        }

        let (recipient_address, recipient_group_id, echo_target) = match &target {
            SendTarget::Direct(id) => (
                Some(JsonAddress::from_identifier(id)),
                None,
                NoticeTarget::Direct(id.clone()),
            ),
            SendTarget::Group(group) => {
                let handle = self.session.upsert_group(group);
                (None, Some(group.clone()), NoticeTarget::Group(handle))
            }
        };

        self.send(
            &Command::Send {
                username: self.session.account.clone(),
                recipient_address,
                recipient_group_id,
                message_body: stripped,
                attachments,
            },
            out,
        )?;

        if self.config.wait_for_send_ack {
            self.session.set_pending_echo(echo_target, body.to_owned());
        } else {
            sink.send_echo(echo_target, body.to_owned(), 0);
        }
        Ok(())
    }

    /// Ask for one contact's profile; the next matching `get_profile`
    /// event satisfies the request.
    pub fn request_profile(
        &mut self,
        identifier: &str,
        out: &mut dyn FrameSender,
    ) -> Result<(), ProtocolError> {
        self.session.pending_profile = Some(identifier.to_owned());
        self.send(
            &Command::GetProfile {
                account: self.session.account.clone(),
                address: JsonAddress::from_identifier(identifier),
            },
            out,
        )
    }

    /// Start a room listing; roster events stream in via the sink and the
    /// handle marks the listing as outstanding until `list_groups` lands.
    pub fn request_room_list(
        &mut self,
        out: &mut dyn FrameSender,
    ) -> Result<ConvHandle, ProtocolError> {
        let handle = self.session.alloc_handle();
        self.session.room_listing = Some(handle);
        self.send(
            &Command::ListGroups {
                account: self.session.account.clone(),
            },
            out,
        )?;
        Ok(handle)
    }

    /// Forward the user's SMS/voice verification code during registration.
    pub fn submit_verification_code(
        &mut self,
        code: &str,
        out: &mut dyn FrameSender,
    ) -> Result<(), ProtocolError> {
        if self.session.phase != Phase::AwaitingVerification {
            log_warn(
                "machine",
                "verify_out_of_phase",
                &format!("phase={:?}", self.session.phase),
            );
        }
        self.send(
            &Command::Verify {
                account: self.session.account.clone(),
                code: code.to_owned(),
            },
            out,
        )
    }

    /// Mark a displayed message read, independent of the auto-mark flag.
    pub fn mark_displayed(
        &mut self,
        sender: &str,
        timestamp_millis: i64,
        out: &mut dyn FrameSender,
    ) -> Result<(), ProtocolError> {
        if self.session.own_uuid().is_none() {
            return Err(ProtocolError::IdentityRequired("mark_read"));
        }
        self.send(
            &Command::MarkRead {
                account: self.session.account.clone(),
                to: JsonAddress::from_identifier(sender),
                timestamps: vec![timestamp_millis],
            },
            out,
        )
    }

    /// Leave a group on user request; the roster entry goes away when the
    /// daemon acks with `leave_group`.
    pub fn leave_group(
        &mut self,
        group: &str,
        out: &mut dyn FrameSender,
    ) -> Result<(), ProtocolError> {
        self.send(
            &Command::LeaveGroup {
                account: self.session.account.clone(),
                group_id: group.to_owned(),
            },
            out,
        )
    }

    /// Resolve a reply-command sigil (`@needle: text`) against the
    /// bounded cache of recent inbound messages.
    ///
    /// Returns the cached message being answered plus the body with the
    /// sigil stripped, for the embedder to compose a quoted reply. The
    /// match is substring containment, newest first - close enough in
    /// practice, but it can hit an older message with the same text.
    pub fn lookup_reply<'a>(&self, body: &'a str) -> Option<(&ReplyCacheEntry, &'a str)> {
        let (needle, rest) = split_reply_sigil(body)?;
        let entry = self.session.reply_cache.find(needle)?;
        Some((entry, rest))
    }

    /// Best-effort unsubscribe before the transport is closed for good.
    pub fn shutdown(&mut self, out: &mut dyn FrameSender) {
        let unsubscribe = Command::Unsubscribe {
            account: self.session.account.clone(),
        };
        if let Err(e) = self.send(&unsubscribe, out) {
            log_warn("machine", "unsubscribe_failed", &e.to_string());
        }
    }
}

/// Successful per-device deliveries reported in one recipient result.
fn count_device_successes(result: &Value) -> usize {
    match result.get("success") {
        Some(Value::Object(success)) => success
            .get("devices")
            .and_then(Value::as_array)
            .map(|devices| devices.len().max(1))
            .unwrap_or(1),
        Some(Value::Bool(true)) => 1,
        _ => 0,
    }
}
