/// Photo discovery and the default pre-scoring validator.
use crate::classifier::ErrorKind;
use crate::scorer::{PhotoMetadata, PhotoValidator, ValidationReport};
use async_trait::async_trait;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Extensions picked up from the photo directory. Broader than what the
/// scorer accepts so that e.g. a stray HEIC shows up as a failed photo with a
/// remedy instead of being silently ignored.
const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "heic", "heif", "tif", "tiff", "bmp"];

/// MIME types the vision model accepts.
const SUPPORTED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/gif"];

/// Files above this size still go through, with a warning.
pub const LARGE_FILE_BYTES: u64 = 20 * 1024 * 1024;

const SNIFF_BYTES: usize = 512;

/// Photo files directly inside `dir`, sorted by filename. Hidden files and
/// subdirectories are skipped.
pub fn list_photos(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut photos = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        if name.starts_with('.') {
            continue;
        }
        let is_photo = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| PHOTO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_photo {
            photos.push(path);
        }
    }
    photos.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(photos)
}

/// Filename used as the photo's key in checkpoints and reports.
pub fn photo_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Checks magic bytes and trailers, never decodes pixels.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignatureValidator;

#[async_trait]
impl PhotoValidator for SignatureValidator {
    async fn validate(&self, photo: &Path) -> ValidationReport {
        match inspect(photo).await {
            Ok(report) => report,
            Err(e) => {
                let kind = match e.kind() {
                    io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => ErrorKind::CorruptedFile,
                    _ => ErrorKind::Filesystem,
                };
                ValidationReport::rejected(kind, format!("cannot read {}: {e}", photo.display()))
            }
        }
    }
}

async fn inspect(photo: &Path) -> io::Result<ValidationReport> {
    let mut file = tokio::fs::File::open(photo).await?;
    let size = file.metadata().await?.len();
    if size == 0 {
        return Ok(ValidationReport::rejected(ErrorKind::CorruptedFile, "file is empty"));
    }

    let mut head = vec![0u8; SNIFF_BYTES.min(size as usize)];
    file.read_exact(&mut head).await?;

    let Some(kind) = infer::get(&head) else {
        return Ok(ValidationReport::rejected(
            ErrorKind::CorruptedFile,
            "unrecognized file signature; the file may be corrupt",
        ));
    };
    let mime = kind.mime_type();
    if !SUPPORTED_MIME_TYPES.contains(&mime) {
        return Ok(ValidationReport::rejected(
            ErrorKind::InvalidFormat,
            format!("unsupported format {mime}"),
        ));
    }

    let mut report = ValidationReport::ok(PhotoMetadata { mime_type: mime.to_string(), size_bytes: size });

    let tail_len = size.min(12);
    file.seek(SeekFrom::End(-(tail_len as i64))).await?;
    let mut tail = vec![0u8; tail_len as usize];
    file.read_exact(&mut tail).await?;

    match mime {
        "image/png" if !tail.windows(4).any(|w| w == b"IEND") => {
            return Ok(ValidationReport::rejected(
                ErrorKind::CorruptedFile,
                "PNG has no IEND chunk; the file is truncated",
            ));
        }
        "image/jpeg" if !tail.ends_with(&[0xFF, 0xD9]) => {
            report = report.with_warning("JPEG end marker missing; the file may be truncated");
        }
        _ => {}
    }

    if size > LARGE_FILE_BYTES {
        let mb = size as f64 / (1024.0 * 1024.0);
        report = match report.warning.take() {
            Some(w) => report.with_warning(format!("{w}; large file ({mb:.1} MB)")),
            None => report.with_warning(format!("large file ({mb:.1} MB), upload may be slow")),
        };
    }

    Ok(report)
}
