//! sigbridge: protocol core of a Signal bridge for IM client frameworks.
//!
//! Speaks newline-delimited JSON to a local signald daemon over a Unix
//! domain socket. The crate owns the protocol state machine, the session
//! model, and the translators between daemon payloads and normalized UI
//! events; rendering, buddy lists, and daemon supervision belong to the
//! embedding client.
//!
//! ## Embedding contract
//!
//! One logical thread drives one [`machine::Bridge`]. The transport's
//! reader thread only moves bytes; every dispatch and every session
//! mutation happens on the reactor thread, in arrival order:
//!
//! ```text
//! let mut transport = connect_for(&config)?;
//! let mut bridge = Bridge::new(config);
//! bridge.start(&mut transport, &mut sink)?;
//! loop {
//!     let event = transport.events().recv()?;
//!     match event {
//!         TransportEvent::Frame(frame) => {
//!             bridge.handle_frame(&frame, &mut transport, &mut sink, &mut images)?
//!         }
//!         TransportEvent::Closed(reason) => break,  // fatal: tear down
//!     }
//! }
//! bridge.shutdown(&mut transport);
//! transport.close();
//! ```
//!
//! Outbound operations (`send_text`, `request_profile`, ...) are called
//! from the same thread, typically between `recv` iterations.

pub mod config;
pub mod error;
pub mod events;
pub mod log;
pub mod machine;
pub mod paths;
pub mod protocol;
pub mod session;
pub mod translate;
pub mod transport;

pub use config::{AttachmentHosting, BridgeConfig};
pub use error::{DecodeError, ProtocolError, TransportError};
pub use events::{
    BuddyUpsert, Connectivity, ConvHandle, EventSink, GroupState, MessageKind, NormalizedMessage,
    NoticeTarget, Phase,
};
pub use machine::{Bridge, SendTarget};
pub use session::{Dialect, ReplyCacheEntry, Session};
pub use translate::ImageStore;
pub use transport::{FrameSender, Transport, TransportEvent, connect_for};
