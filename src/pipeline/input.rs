//! Input resolution: turn a user-supplied path or URL into a [`FileBlob`].
//!
//! Uploads carry a MIME type, which decides whether a file is rasterised as a
//! PDF or decoded as an image. Paths and URLs don't, so the type is sniffed:
//! a server `Content-Type` naming a PDF or image wins, then magic bytes, then
//! the file extension.

use crate::error::{IngestSkip, Scan2SheetError};
use crate::ingest::FileBlob;
use futures::future::join_all;
use std::path::Path;
use tracing::{debug, info, warn};

/// MIME type used when nothing identifies the content.
pub const UNKNOWN_MIME_TYPE: &str = "application/octet-stream";

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to an in-memory file.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<FileBlob, Scan2SheetError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(Path::new(input)).await
    }
}

/// Resolve every input concurrently. Inputs that cannot be read become
/// [`IngestSkip::Unreadable`] entries; the rest come back in input order.
pub async fn resolve_inputs<S: AsRef<str>>(
    inputs: &[S],
    timeout_secs: u64,
) -> (Vec<FileBlob>, Vec<IngestSkip>) {
    let results = join_all(
        inputs
            .iter()
            .map(|input| resolve_input(input.as_ref(), timeout_secs)),
    )
    .await;

    let mut blobs = Vec::with_capacity(results.len());
    let mut skipped = Vec::new();
    for (input, result) in inputs.iter().zip(results) {
        match result {
            Ok(blob) => blobs.push(blob),
            Err(e) => {
                warn!("Skipping '{}': {}", input.as_ref(), e);
                skipped.push(IngestSkip::Unreadable {
                    name: input.as_ref().to_string(),
                    detail: e.to_string(),
                });
            }
        }
    }
    (blobs, skipped)
}

/// Guess a MIME type from content, falling back to the file name.
pub fn sniff_mime_type(name: &str, bytes: &[u8]) -> String {
    if bytes.starts_with(b"%PDF") {
        return "application/pdf".to_string();
    }
    if let Ok(format) = image::guess_format(bytes) {
        return format.to_mime_type().to_string();
    }
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("pdf") => "application/pdf".to_string(),
        Some(ext) => image::ImageFormat::from_extension(ext)
            .map(|f| f.to_mime_type().to_string())
            .unwrap_or_else(|| UNKNOWN_MIME_TYPE.to_string()),
        None => UNKNOWN_MIME_TYPE.to_string(),
    }
}

async fn read_local(path: &Path) -> Result<FileBlob, Scan2SheetError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => Scan2SheetError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => Scan2SheetError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mime_type = sniff_mime_type(&name, &bytes);
    debug!("Read {} ({}, {} bytes)", path.display(), mime_type, bytes.len());

    Ok(FileBlob::new(name, mime_type, bytes))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<FileBlob, Scan2SheetError> {
    info!("Downloading from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Scan2SheetError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            Scan2SheetError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Scan2SheetError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(Scan2SheetError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let declared = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase());

    let bytes = response
        .bytes()
        .await
        .map_err(|e| Scan2SheetError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let name = filename_from_url(url);
    let mime_type = match declared {
        Some(t) if t == "application/pdf" || t.starts_with("image/") => t,
        _ => sniff_mime_type(&name, &bytes),
    };
    info!("Downloaded {} ({}, {} bytes)", name, mime_type, bytes.len());

    Ok(FileBlob::new(name, mime_type, bytes.to_vec()))
}

/// Last non-empty path segment of the URL, or a generic name.
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty())
        .unwrap_or_else(|| "download".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/scan.png"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn sniff_prefers_magic_bytes() {
        assert_eq!(sniff_mime_type("misnamed.png", b"%PDF-1.7\n"), "application/pdf");
        let png_magic = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        assert_eq!(sniff_mime_type("scan.bin", &png_magic), "image/png");
    }

    #[test]
    fn sniff_falls_back_to_extension() {
        assert_eq!(sniff_mime_type("photo.JPG", b"not really"), "image/jpeg");
        assert_eq!(sniff_mime_type("doc.pdf", b""), "application/pdf");
        assert_eq!(sniff_mime_type("notes.txt", b"hello"), UNKNOWN_MIME_TYPE);
        assert_eq!(sniff_mime_type("README", b"hello"), UNKNOWN_MIME_TYPE);
    }

    #[test]
    fn filename_from_url_uses_last_segment() {
        assert_eq!(filename_from_url("https://x.org/a/b/form-7.pdf"), "form-7.pdf");
        assert_eq!(filename_from_url("https://x.org/"), "download");
    }

    #[tokio::test]
    async fn missing_local_file_is_not_found() {
        let err = resolve_input("/definitely/not/here.png", 5).await.unwrap_err();
        assert!(matches!(err, Scan2SheetError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn local_file_is_read_and_sniffed() {
        let mut tmp = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        tmp.write_all(b"%PDF-1.4 minimal").unwrap();
        let blob = resolve_input(tmp.path().to_str().unwrap(), 5).await.unwrap();
        assert_eq!(blob.mime_type, "application/pdf");
        assert!(blob.name.ends_with(".pdf"));
        assert_eq!(blob.bytes.len(), 16);
    }

    #[tokio::test]
    async fn unreadable_input_is_skipped_not_fatal() {
        let mut tmp = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        tmp.write_all(b"pixels").unwrap();
        let good = tmp.path().to_str().unwrap().to_string();
        let inputs = vec![good, "/definitely/not/here.png".to_string()];

        let (blobs, skipped) = resolve_inputs(&inputs, 5).await;
        assert_eq!(blobs.len(), 1);
        assert!(blobs[0].name.ends_with(".png"));
        assert_eq!(skipped.len(), 1);
        assert!(matches!(
            skipped[0],
            IngestSkip::Unreadable { ref name, .. } if name == "/definitely/not/here.png"
        ));
    }
}
