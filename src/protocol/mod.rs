//! Wire protocol layer: inbound envelope decoding and outbound command
//! building for the signald newline-delimited JSON socket.

pub mod commands;
pub mod envelope;
