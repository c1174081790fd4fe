use crate::validation::signature::CategoryPolicy;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default per-file ceiling used when a config does not set one
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// A user-selected file, immutable once created
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFile {
    pub name: String,
    /// Media type as declared by the picker or browser
    pub media_type: String,
    /// Byte length as declared at selection time
    pub size: u64,
    pub content: Bytes,
}

impl CandidateFile {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, content: impl Into<Bytes>) -> Self {
        let content = content.into();
        Self {
            name: name.into(),
            media_type: media_type.into(),
            size: content.len() as u64,
            content,
        }
    }

    /// Read a file from disk, declaring its type explicitly
    pub async fn from_path(path: &Path, media_type: impl Into<String>) -> std::io::Result<Self> {
        let content = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self::new(name, media_type, content))
    }

    /// Override the declared length (a picker may report more than can be read)
    pub fn with_declared_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Content shorter than the declared length could not be fully read
    pub fn is_unreadable(&self) -> bool {
        (self.content.len() as u64) < self.size
    }

    /// Lowercased final extension, if the name has one
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.name)
    }
}

pub(crate) fn extension_of(name: &str) -> Option<String> {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext.to_ascii_lowercase()),
        _ => None,
    }
}

/// Ordered so that sorting puts critical issues first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: String,
    pub message: String,
    pub severity: Severity,
    pub field: Option<String>,
}

impl ValidationIssue {
    pub fn new(code: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity,
            field: None,
        }
    }

    pub fn on_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub code: String,
    pub message: String,
    pub recommendation: Option<String>,
}

impl ValidationWarning {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            recommendation: None,
        }
    }

    pub fn recommend(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_error_count(count: usize) -> Self {
        match count {
            0 => RiskLevel::None,
            1..=2 => RiskLevel::Low,
            3..=4 => RiskLevel::Medium,
            _ => RiskLevel::High,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferredMetadata {
    pub declared_type: String,
    /// Media type recognised from the byte header, if any signature matched
    pub sniffed_type: Option<String>,
    pub has_plausible_extension: bool,
    pub risk_level: RiskLevel,
    pub quality_score: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub is_acceptable: bool,
    /// Sorted by severity, critical first
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationWarning>,
    pub metadata: InferredMetadata,
}

impl ValidationOutcome {
    pub fn has_error(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    pub fn has_warning(&self, code: &str) -> bool {
        self.warnings.iter().any(|w| w.code == code)
    }

    pub fn error_codes(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.code.as_str()).collect()
    }

    /// Highest severity present, if any
    pub fn worst_severity(&self) -> Option<Severity> {
        self.errors.iter().map(|e| e.severity).min()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub max_size_bytes: u64,
    /// Lowercase extensions without the dot; empty admits everything
    pub allowed_extensions: Vec<String>,
    /// Media types, `image/*` style patterns allowed; empty admits everything
    pub allowed_mime_types: Vec<String>,
    pub strict_type_check: bool,
    pub security_scan: bool,
    pub header_check: bool,
    pub category_policy: CategoryPolicy,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            allowed_extensions: Vec::new(),
            allowed_mime_types: Vec::new(),
            strict_type_check: true,
            security_scan: true,
            header_check: true,
            category_policy: CategoryPolicy::default(),
        }
    }
}

impl ValidatorConfig {
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn with_mime_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_mime_types = types
            .into_iter()
            .map(|t| t.as_ref().to_ascii_lowercase())
            .collect();
        self
    }

    pub fn extension_allowed(&self, extension: Option<&str>) -> bool {
        if self.allowed_extensions.is_empty() {
            return true;
        }
        match extension {
            Some(ext) => self.allowed_extensions.iter().any(|a| a == ext),
            None => false,
        }
    }

    pub fn mime_allowed(&self, media_type: &str) -> bool {
        if self.allowed_mime_types.is_empty() {
            return true;
        }
        let media_type = media_type.to_ascii_lowercase();
        self.allowed_mime_types.iter().any(|pattern| match pattern.strip_suffix('*') {
            Some(prefix) => media_type.starts_with(prefix),
            None => *pattern == media_type,
        })
    }
}
