//! Translators between daemon JSON payloads and normalized domain events.
//!
//! Everything here consumes decoded [`serde_json::Value`] payloads by
//! reference and produces owned output; no translator retains wire data.
//! Failure policy across the module: a missing or malformed sub-field
//! degrades the output (fallback text, skipped fragment), and only a
//! missing mandatory identifier skips the enclosing item.

pub mod attachment;
pub mod contact;
pub mod group;
pub mod message;
pub mod outgoing;

/// The embedding client's inline-image store.
///
/// Displayable received images are registered here and referenced from
/// message bodies as `<img id="N">`; outgoing rich text is resolved back
/// through the same store.
pub trait ImageStore {
    /// Register image bytes, returning the reference id for inline markup.
    /// None means the store refused the image (too large, shutting down).
    fn add_image(&mut self, bytes: Vec<u8>) -> Option<u32>;

    /// Bytes of a previously registered image, for outgoing extraction.
    fn image_bytes(&self, id: u32) -> Option<Vec<u8>>;
}
