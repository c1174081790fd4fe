use serde::{Deserialize, Serialize};

/// Top-level media category, the part of a media type before the slash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCategory {
    Image,
    Application,
    Text,
    Audio,
    Video,
    Other,
}

impl MediaCategory {
    pub fn of(media_type: &str) -> Self {
        let top = media_type
            .split('/')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match top.as_str() {
            "image" => MediaCategory::Image,
            "application" => MediaCategory::Application,
            "text" => MediaCategory::Text,
            "audio" => MediaCategory::Audio,
            "video" => MediaCategory::Video,
            _ => MediaCategory::Other,
        }
    }
}

/// Which category crossings count as a security-relevant contradiction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPolicy {
    pub critical_crossings: Vec<(MediaCategory, MediaCategory)>,
}

impl Default for CategoryPolicy {
    fn default() -> Self {
        Self {
            critical_crossings: vec![
                (MediaCategory::Image, MediaCategory::Application),
                (MediaCategory::Image, MediaCategory::Text),
            ],
        }
    }
}

impl CategoryPolicy {
    /// Crossings are symmetric
    pub fn is_critical(&self, a: MediaCategory, b: MediaCategory) -> bool {
        self.critical_crossings
            .iter()
            .any(|&(x, y)| (x == a && y == b) || (x == b && y == a))
    }
}

/// Identify content by its header bytes
pub fn sniff(content: &[u8]) -> Option<&'static str> {
    infer::get(content).map(|kind| kind.mime_type())
}

/// Lowercase and fold common aliases onto one spelling
pub fn normalize_mime(media_type: &str) -> String {
    let base = media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match base.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        "image/x-png" => "image/png".to_string(),
        "application/x-pdf" => "application/pdf".to_string(),
        _ => base,
    }
}

/// Declared types that carry no information about the content
pub fn is_generic(media_type: &str) -> bool {
    let normalized = normalize_mime(media_type);
    normalized.is_empty() || normalized == "application/octet-stream"
}

/// Media type a file extension implies
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    let mime = match extension.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "doc" | "xls" => "application/x-ole-storage",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "exe" | "dll" => "application/vnd.microsoft.portable-executable",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => return None,
    };
    Some(mime)
}

/// Two types describe the same kind of content.
///
/// Office documents are zip or OLE containers, so a container signature is
/// treated as agreeing with any application type in the same family.
pub fn types_agree(a: &str, b: &str) -> bool {
    let a = normalize_mime(a);
    let b = normalize_mime(b);
    if a == b {
        return true;
    }
    let zip_family = |t: &str| t == "application/zip" || t.starts_with("application/vnd.openxmlformats");
    let ole_family = |t: &str| {
        t == "application/x-ole-storage"
            || t == "application/msword"
            || t == "application/vnd.ms-excel"
    };
    (zip_family(&a) && zip_family(&b)) || (ole_family(&a) && ole_family(&b))
}
