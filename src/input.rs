use bytes::Bytes;
use std::path::Path;
use tracing::debug;

use crate::error::ExtractError;

/// MIME types the uploader accepts. `image/jpg` and `image/pjpeg` are what some
/// browsers declare for ordinary JPEG files.
pub const ACCEPTED_MIME_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/pjpeg", "image/png"];

/// A file as handed over by the user, before any validation.
#[derive(Debug, Clone)]
pub struct FileHandle {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl FileHandle {
    pub fn new(file_name: Option<String>, content_type: Option<String>, bytes: impl Into<Bytes>) -> Self {
        Self { file_name, content_type, bytes: bytes.into() }
    }

    /// Reads a local file; its declared type comes from the extension.
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path.file_name().and_then(|n| n.to_str()).map(str::to_string);
        let content_type = file_name.as_deref().and_then(mime_from_extension).map(str::to_string);
        Ok(Self::new(file_name, content_type, bytes))
    }
}

#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub bytes: Bytes,
    pub mime_type: String,
    pub file_name: Option<String>,
}

/// A question that is known not to be blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question(String);

impl Question {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Raw inputs of one submit action.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub image: Option<FileHandle>,
    pub question: String,
}

#[derive(Debug, Clone)]
pub struct ValidatedSubmission {
    pub image: UploadedImage,
    pub question: Question,
}

impl Submission {
    /// The file is checked before the question, matching the order the
    /// warnings are shown in the page.
    pub fn validate(self) -> Result<ValidatedSubmission, ExtractError> {
        let image = collect_image(self.image)?;
        let question = collect_question(&self.question)?;
        Ok(ValidatedSubmission { image, question })
    }
}

pub fn collect_image(file: Option<FileHandle>) -> Result<UploadedImage, ExtractError> {
    // Browsers send an empty part when the file input was left untouched.
    let file = match file {
        Some(f) if !f.bytes.is_empty() => f,
        _ => return Err(ExtractError::NoFileUploaded),
    };

    let mime_type = resolve_mime_type(file.content_type.as_deref(), file.file_name.as_deref())?;
    debug!(
        "Collected image {:?}: {} bytes, {}",
        file.file_name,
        file.bytes.len(),
        mime_type
    );
    Ok(UploadedImage {
        bytes: file.bytes,
        mime_type,
        file_name: file.file_name,
    })
}

pub fn collect_question(text: &str) -> Result<Question, ExtractError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ExtractError::EmptyPrompt);
    }
    Ok(Question(trimmed.to_string()))
}

/// Picks the MIME type to send: the declared one when it is specific, the
/// extension's otherwise. Parameters such as `; charset=` are dropped.
fn resolve_mime_type(declared: Option<&str>, file_name: Option<&str>) -> Result<String, ExtractError> {
    let declared = declared
        .and_then(|d| d.split(';').next())
        .map(|d| d.trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty() && d != "application/octet-stream");

    let mime_type = match declared {
        Some(d) => d,
        None => match file_name.and_then(mime_from_extension) {
            Some(m) => m.to_string(),
            None => {
                return Err(ExtractError::UnsupportedImageType {
                    mime_type: "unknown".to_string(),
                });
            }
        },
    };

    if !ACCEPTED_MIME_TYPES.contains(&mime_type.as_str()) {
        return Err(ExtractError::UnsupportedImageType { mime_type });
    }
    // The model only knows the canonical JPEG name.
    match mime_type.as_str() {
        "image/jpg" | "image/pjpeg" => Ok("image/jpeg".to_string()),
        _ => Ok(mime_type),
    }
}

pub fn mime_from_extension(file_name: &str) -> Option<&'static str> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        _ => None,
    }
}
