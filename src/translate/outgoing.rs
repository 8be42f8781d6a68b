//! Outgoing rich-text image extraction.
//!
//! User-composed text may embed inline images as `<img id="N">` markup
//! referencing the client image store. Before a send, every valid
//! reference is written to a temp file with a fixed-format name and
//! attached as an outbound attachment descriptor; the markup is stripped
//! from the body. Dangling references (unknown id, unparsable markup)
//! are left in the text untouched - that is not an error.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::log::log_warn;
use crate::protocol::commands::OutboundAttachment;
use crate::translate::ImageStore;

static IMG_MARKUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img\s+[^>]*id="(\d+)"[^>]*>"#).expect("static image markup pattern")
});

/// Sniffed image format: (extension, content type).
///
/// Unknown bytes still ship - the daemon accepts arbitrary attachments -
/// but get a neutral name and no claimed type.
fn sniff_format(bytes: &[u8]) -> (&'static str, Option<&'static str>) {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        ("png", Some("image/png"))
    } else if bytes.starts_with(b"\xff\xd8\xff") {
        ("jpg", Some("image/jpeg"))
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        ("gif", Some("image/gif"))
    } else {
        ("bin", None)
    }
}

/// Temp path for one extracted image: sigbridge-out-<pid>-<imgid>.<ext>
fn temp_path(image_id: u32, ext: &str) -> PathBuf {
    std::env::temp_dir().join(format!("sigbridge-out-{}-{}.{}", std::process::id(), image_id, ext))
}

/// Extract embedded images from an outgoing body.
///
/// Returns the body with extracted markup removed, plus one attachment
/// descriptor per successfully written image.
pub fn extract_images(body: &str, images: &dyn ImageStore) -> (String, Vec<OutboundAttachment>) {
    let mut attachments = Vec::new();
    let mut stripped = String::with_capacity(body.len());
    let mut last_end = 0;

    for caps in IMG_MARKUP.captures_iter(body) {
        let whole = caps.get(0).expect("capture 0 always present");
        let id: u32 = match caps[1].parse() {
            Ok(id) => id,
            Err(_) => continue, // id overflows u32; leave the markup alone
        };

        let Some(bytes) = images.image_bytes(id) else {
            // Dangling reference - keep the markup in the text.
            continue;
        };

        let (ext, content_type) = sniff_format(&bytes);
        let path = temp_path(id, ext);
        if let Err(e) = std::fs::write(&path, &bytes) {
            log_warn(
                "outgoing",
                "temp_write_failed",
                &format!("{}: {}", path.display(), e),
            );
            continue;
        }

        attachments.push(OutboundAttachment {
            filename: path.to_string_lossy().into_owned(),
            content_type: content_type.map(str::to_owned),
        });
        stripped.push_str(&body[last_end..whole.start()]);
        last_end = whole.end();
    }
    stripped.push_str(&body[last_end..]);

    (stripped, attachments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::testing::MemoryImageStore;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nrest-of-image";

    #[test]
    fn test_valid_image_extracted_and_markup_stripped() {
        let mut store = MemoryImageStore::default();
        let id = {
            use crate::translate::ImageStore;
            store.add_image(PNG.to_vec()).unwrap()
        };
        let body = format!("look: <img id=\"{}\"> nice?", id);

        let (stripped, attachments) = extract_images(&body, &store);

        assert_eq!(stripped, "look:  nice?");
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].content_type.as_deref(), Some("image/png"));
        assert!(attachments[0].filename.ends_with(&format!("-{}.png", id)));
        let written = std::fs::read(&attachments[0].filename).unwrap();
        assert_eq!(written, PNG);
        let _ = std::fs::remove_file(&attachments[0].filename);
    }

    #[test]
    fn test_dangling_reference_left_untouched() {
        let store = MemoryImageStore::default();
        let body = "ghost: <img id=\"99\"> here";
        let (stripped, attachments) = extract_images(body, &store);
        assert_eq!(stripped, body);
        assert!(attachments.is_empty());
    }

    #[test]
    fn test_unparsable_markup_ignored() {
        let store = MemoryImageStore::default();
        let body = "<img id=\"abc\"> and <img> and plain text";
        let (stripped, attachments) = extract_images(body, &store);
        assert_eq!(stripped, body);
        assert!(attachments.is_empty());
    }

    #[test]
    fn test_multiple_images_and_case_insensitive_markup() {
        use crate::translate::ImageStore;
        let mut store = MemoryImageStore::default();
        let a = store.add_image(PNG.to_vec()).unwrap();
        let b = store.add_image(b"\xff\xd8\xffjpegdata".to_vec()).unwrap();
        let body = format!("<IMG ID=\"{}\">between<img id=\"{}\">", a, b);

        let (stripped, attachments) = extract_images(&body, &store);

        assert_eq!(stripped, "between");
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[1].content_type.as_deref(), Some("image/jpeg"));
        for attachment in &attachments {
            let _ = std::fs::remove_file(&attachment.filename);
        }
    }

    #[test]
    fn test_unknown_bytes_ship_without_claimed_type() {
        use crate::translate::ImageStore;
        let mut store = MemoryImageStore::default();
        let id = store.add_image(b"not an image".to_vec()).unwrap();
        let body = format!("<img id=\"{}\">", id);

        let (stripped, attachments) = extract_images(&body, &store);

        assert_eq!(stripped, "");
        assert_eq!(attachments.len(), 1);
        assert!(attachments[0].content_type.is_none());
        assert!(attachments[0].filename.ends_with(".bin"));
        let _ = std::fs::remove_file(&attachments[0].filename);
    }
}
