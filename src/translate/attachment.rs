//! Attachment rendering for incoming messages.
//!
//! Each attachment becomes a text fragment in the message body. Three
//! modes, decided per attachment:
//!
//! - displayable image + local caching on: register with the client image
//!   store, emit `<img id="N">` plus a file link to the stored file;
//! - external hosting configured: copy the stored file into the hosting
//!   directory and emit a link under the configured base URL, with the
//!   extension derived from the MIME type (the sender-claimed filename is
//!   never trusted for the extension);
//! - otherwise: a plain `file://` link to the daemon's stored file.
//!
//! A failed copy or read degrades to an inline error fragment; rendering
//! never aborts the message.

use std::path::Path;

use serde_json::Value;

use crate::config::{AttachmentHosting, BridgeConfig};
use crate::log::log_warn;
use crate::translate::ImageStore;

/// Content types the IM client can display inline.
const DISPLAYABLE_IMAGES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
    "image/bmp",
];

/// File extension derived from the MIME type.
///
/// The sender controls the claimed filename, so its extension is never
/// reused; unknown types get a neutral extension.
pub fn extension_for_mime(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        "audio/aac" => "aac",
        "audio/mpeg" => "mp3",
        "video/mp4" => "mp4",
        "application/pdf" => "pdf",
        _ => "bin",
    }
}

/// True when the client can render this content type inline.
pub fn is_displayable_image(content_type: &str) -> bool {
    DISPLAYABLE_IMAGES.contains(&content_type)
}

/// The daemon's local path for an attachment payload.
fn stored_path(attachment: &Value) -> Option<&str> {
    attachment
        .get("storedFilename")
        .or_else(|| attachment.get("filename"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Render one attachment payload into a body fragment.
pub fn render_attachment(
    attachment: &Value,
    config: &BridgeConfig,
    images: &mut dyn ImageStore,
) -> String {
    let content_type = attachment
        .get("contentType")
        .and_then(Value::as_str)
        .unwrap_or("application/octet-stream");

    let Some(path) = stored_path(attachment) else {
        return "[attachment unavailable]".to_owned();
    };

    if let AttachmentHosting::External { dir, base_url } = &config.attachment_hosting {
        return render_hosted(path, content_type, attachment, dir, base_url);
    }

    if config.cache_images_locally && is_displayable_image(content_type) {
        match std::fs::read(path) {
            Ok(bytes) => {
                if let Some(id) = images.add_image(bytes) {
                    return format!("<img id=\"{}\">\nfile://{}", id, path);
                }
                // Store refused the image; the file link below still works.
            }
            Err(e) => {
                log_warn("attachment", "read_failed", &format!("{}: {}", path, e));
                return format!("[failed to read attachment {}: {}]", path, e);
            }
        }
    }

    format!("file://{}", path)
}

/// Copy into the hosting directory and emit a base-URL link.
fn render_hosted(
    path: &str,
    content_type: &str,
    attachment: &Value,
    dir: &Path,
    base_url: &str,
) -> String {
    if !dir.is_dir() {
        log_warn(
            "attachment",
            "hosting_dir_invalid",
            &format!("{} is not a directory", dir.display()),
        );
        return format!("[attachment hosting misconfigured; file kept at file://{}]", path);
    }

    // Name by the daemon's attachment id when present so repeated renders
    // are stable; extension always comes from the MIME type.
    let stem = attachment
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| {
            Path::new(path)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "attachment".to_owned())
        });
    let name = format!("{}.{}", sanitize_stem(&stem), extension_for_mime(content_type));
    let dest = dir.join(&name);

    match std::fs::copy(path, &dest) {
        Ok(_) => format!("{}/{}", base_url.trim_end_matches('/'), name),
        Err(e) => {
            log_warn(
                "attachment",
                "copy_failed",
                &format!("{} -> {}: {}", path, dest.display(), e),
            );
            format!("[failed to copy attachment: {}]", e)
        }
    }
}

/// Keep hosted file names shell- and URL-safe.
fn sanitize_stem(stem: &str) -> String {
    stem.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::testing::MemoryImageStore;
    use serde_json::json;
    use std::io::Write;

    fn config() -> BridgeConfig {
        BridgeConfig::new("+15550100")
    }

    fn write_temp(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> String {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_displayable_image_emits_inline_ref_and_file_link() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(&dir, "photo", b"\x89PNGfake");
        let attachment = json!({"contentType": "image/jpeg", "storedFilename": path});
        let mut images = MemoryImageStore::default();

        let fragment = render_attachment(&attachment, &config(), &mut images);

        assert!(fragment.starts_with("<img id=\"1\">"), "got: {}", fragment);
        assert!(fragment.contains(&format!("file://{}", path)));
        assert_eq!(images.images.len(), 1);
    }

    #[test]
    fn test_non_image_gets_plain_file_link() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(&dir, "doc", b"pdf");
        let attachment = json!({"contentType": "application/pdf", "storedFilename": path});
        let mut images = MemoryImageStore::default();

        let fragment = render_attachment(&attachment, &config(), &mut images);
        assert_eq!(fragment, format!("file://{}", path));
        assert!(images.images.is_empty());
    }

    #[test]
    fn test_caching_disabled_skips_image_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(&dir, "photo", b"img");
        let attachment = json!({"contentType": "image/png", "storedFilename": path});
        let mut cfg = config();
        cfg.cache_images_locally = false;
        let mut images = MemoryImageStore::default();

        let fragment = render_attachment(&attachment, &cfg, &mut images);
        assert_eq!(fragment, format!("file://{}", path));
    }

    #[test]
    fn test_external_hosting_uses_mime_extension_not_claimed_name() {
        let source = tempfile::tempdir().unwrap();
        let hosting = tempfile::tempdir().unwrap();
        let path = write_temp(&source, "evil.exe", b"jpegdata");
        let attachment = json!({
            "contentType": "image/jpeg",
            "storedFilename": path,
            "id": "att42",
        });
        let mut cfg = config();
        cfg.attachment_hosting = AttachmentHosting::External {
            dir: hosting.path().to_path_buf(),
            base_url: "https://files.example.net/sig/".into(),
        };
        let mut images = MemoryImageStore::default();

        let fragment = render_attachment(&attachment, &cfg, &mut images);
        assert_eq!(fragment, "https://files.example.net/sig/att42.jpg");
        assert!(hosting.path().join("att42.jpg").is_file());
    }

    #[test]
    fn test_external_hosting_copy_failure_degrades_to_text() {
        let hosting = tempfile::tempdir().unwrap();
        let attachment = json!({
            "contentType": "image/png",
            "storedFilename": "/nonexistent/source/file.png",
            "id": "gone",
        });
        let mut cfg = config();
        cfg.attachment_hosting = AttachmentHosting::External {
            dir: hosting.path().to_path_buf(),
            base_url: "https://files.example.net".into(),
        };
        let mut images = MemoryImageStore::default();

        let fragment = render_attachment(&attachment, &cfg, &mut images);
        assert!(fragment.starts_with("[failed to copy attachment"), "got: {}", fragment);
    }

    #[test]
    fn test_external_hosting_missing_dir_keeps_local_file() {
        let attachment = json!({
            "contentType": "image/png",
            "storedFilename": "/tmp/a.png",
        });
        let mut cfg = config();
        cfg.attachment_hosting = AttachmentHosting::External {
            dir: "/nonexistent/hosting/dir".into(),
            base_url: "https://files.example.net".into(),
        };
        let mut images = MemoryImageStore::default();

        let fragment = render_attachment(&attachment, &cfg, &mut images);
        assert!(fragment.contains("misconfigured"));
        assert!(fragment.contains("file:///tmp/a.png"));
    }

    #[test]
    fn test_refused_image_store_degrades_to_file_link() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(&dir, "photo", b"img");
        let attachment = json!({"contentType": "image/png", "storedFilename": path});
        let mut images = MemoryImageStore { refuse: true, ..Default::default() };

        let fragment = render_attachment(&attachment, &config(), &mut images);
        assert_eq!(fragment, format!("file://{}", path));
    }

    #[test]
    fn test_missing_stored_path_is_unavailable() {
        let attachment = json!({"contentType": "image/png"});
        let mut images = MemoryImageStore::default();
        let fragment = render_attachment(&attachment, &config(), &mut images);
        assert_eq!(fragment, "[attachment unavailable]");
    }

    #[test]
    fn test_mime_extension_mapping() {
        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("application/pdf"), "pdf");
        assert_eq!(extension_for_mime("application/x-whatever"), "bin");
    }
}
