use crate::validation::signature::{self, MediaCategory};
use crate::validation::types::{
    CandidateFile, InferredMetadata, RiskLevel, Severity, ValidationIssue, ValidationOutcome,
    ValidationWarning, ValidatorConfig,
};
use std::sync::Arc;

/// Size above which a file is flagged regardless of configuration (1 GiB)
pub const ABSOLUTE_MAX_SIZE_BYTES: u64 = 1024 * 1024 * 1024;

/// Longest accepted file name, in characters
pub const MAX_NAME_LENGTH: usize = 255;

/// Bytes of content inspected for embedded script patterns
pub const CONTENT_SCAN_BYTES: usize = 1024;

/// Prefix every custom rule code carries
pub const CUSTOM_CODE_PREFIX: &str = "CUSTOM_";

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const DANGEROUS_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "com", "scr", "pif", "msi", "vbs", "vbe", "js", "jse", "jar", "ps1",
    "sh", "dll", "cpl", "hta", "wsf", "reg", "lnk", "app",
];

const SUSPICIOUS_PATTERNS: &[&str] = &[
    "<script",
    "javascript:",
    "vbscript:",
    "data:text/html",
    "data:application/javascript",
    "onerror=",
    "onload=",
    "<?php",
    "eval(",
];

/// Application-supplied check that runs after the built-in ones
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, file: &CandidateFile, config: &ValidatorConfig) -> Vec<ValidationIssue>;
}

/// Validate with the built-in checks only
pub fn validate(file: &CandidateFile, config: &ValidatorConfig) -> ValidationOutcome {
    FileValidator::new(config.clone()).validate(file)
}

#[derive(Clone, Default)]
pub struct FileValidator {
    config: ValidatorConfig,
    rules: Vec<Arc<dyn ValidationRule>>,
}

/// Errors and warnings collected while the checks run
#[derive(Default)]
struct Findings {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationWarning>,
}

impl Findings {
    fn error(&mut self, code: &str, message: impl Into<String>, severity: Severity, field: &str) {
        self.errors
            .push(ValidationIssue::new(code, message, severity).on_field(field));
    }

    fn warn(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }
}

impl FileValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: Arc<dyn ValidationRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Run every check in order and summarise the findings
    pub fn validate(&self, file: &CandidateFile) -> ValidationOutcome {
        let config = &self.config;
        let mut findings = Findings::default();
        let extension = file.extension();
        let sniffed = signature::sniff(&file.content);

        // 1. Basic properties
        self.check_basics(file, &mut findings);

        // 2. Size ceiling
        self.check_size(file, &mut findings);

        // 3. Name safety
        self.check_name_safety(file, &mut findings);

        // 4. Admissibility
        if !config.extension_allowed(extension.as_deref()) {
            let shown = extension.as_deref().unwrap_or("(none)");
            findings.error(
                "EXTENSION_NOT_ALLOWED",
                format!("Extension '{shown}' is not accepted here"),
                Severity::Critical,
                "name",
            );
        }
        if !config.mime_allowed(&file.media_type) {
            findings.error(
                "MIME_TYPE_NOT_ALLOWED",
                format!("Type '{}' is not accepted here", file.media_type),
                Severity::Critical,
                "media_type",
            );
        }

        // 5. Declared type against the byte header
        if config.strict_type_check {
            if let Some(sniffed) = sniffed {
                self.check_declared_type(file, sniffed, &mut findings);
            }
        }

        // 6. Security scan; unreadable content ends validation here
        let mut readable = true;
        if config.security_scan {
            readable = self.check_security(file, &mut findings);
        }

        if readable {
            // 7. Byte header against the extension
            if config.header_check {
                if let (Some(sniffed), Some(ext)) = (sniffed, extension.as_deref()) {
                    self.check_header(sniffed, ext, &mut findings);
                }
            }

            // 8. Custom rules
            for rule in &self.rules {
                for mut issue in rule.check(file, config) {
                    if !issue.code.starts_with(CUSTOM_CODE_PREFIX) {
                        issue.code = format!("{CUSTOM_CODE_PREFIX}{}", issue.code);
                    }
                    tracing::debug!("Rule {} raised {}", rule.name(), issue.code);
                    findings.errors.push(issue);
                }
            }
        }

        let Findings {
            mut errors,
            warnings,
        } = findings;
        errors.sort_by_key(|e| e.severity);

        let valid_extension = extension.is_some() && config.extension_allowed(extension.as_deref());
        let metadata = InferredMetadata {
            declared_type: file.media_type.clone(),
            sniffed_type: sniffed.map(str::to_string),
            has_plausible_extension: valid_extension,
            risk_level: RiskLevel::from_error_count(errors.len()),
            quality_score: quality_score(
                errors.len(),
                valid_extension,
                !signature::is_generic(&file.media_type),
                file.size > 0 && file.size <= config.max_size_bytes,
            ),
        };

        if !errors.is_empty() {
            tracing::debug!(
                "Rejected {}: {}",
                file.name,
                errors
                    .iter()
                    .map(|e| e.code.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        ValidationOutcome {
            is_acceptable: errors.is_empty(),
            errors,
            warnings,
            metadata,
        }
    }

    fn check_basics(&self, file: &CandidateFile, findings: &mut Findings) {
        if file.size == 0 {
            findings.error("EMPTY_FILE", "File is empty", Severity::Critical, "size");
        }

        let trimmed = file.name.trim();
        if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
            findings.error("INVALID_NAME", "File name is missing or invalid", Severity::Critical, "name");
        }

        if file.name.chars().count() > MAX_NAME_LENGTH {
            findings.error(
                "NAME_TOO_LONG",
                format!("File name exceeds {MAX_NAME_LENGTH} characters"),
                Severity::High,
                "name",
            );
        }
    }

    fn check_size(&self, file: &CandidateFile, findings: &mut Findings) {
        if file.size > self.config.max_size_bytes {
            findings.error(
                "FILE_TOO_LARGE",
                format!(
                    "File is {} bytes, the limit is {} bytes",
                    file.size, self.config.max_size_bytes
                ),
                Severity::Critical,
                "size",
            );
        }
        if file.size > ABSOLUTE_MAX_SIZE_BYTES {
            findings.error(
                "EXCEPTIONALLY_LARGE",
                "File exceeds 1 GiB",
                Severity::Medium,
                "size",
            );
        }
    }

    fn check_name_safety(&self, file: &CandidateFile, findings: &mut Findings) {
        if file
            .name
            .chars()
            .any(|c| c.is_control() || c == '/' || c == '\\')
        {
            findings.error(
                "UNSAFE_CHARACTERS",
                "File name contains control characters or path separators",
                Severity::High,
                "name",
            );
        }

        let stem = file.name.split('.').next().unwrap_or_default().trim();
        if RESERVED_NAMES
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(stem))
        {
            findings.error(
                "RESERVED_NAME",
                format!("'{stem}' is a reserved device name"),
                Severity::High,
                "name",
            );
        }
    }

    fn check_declared_type(&self, file: &CandidateFile, sniffed: &str, findings: &mut Findings) {
        if signature::is_generic(&file.media_type) {
            findings.warn(
                ValidationWarning::new(
                    "TYPE_MISMATCH",
                    format!("Declared type is generic, content looks like {sniffed}"),
                )
                .recommend(format!("Declare the file as {sniffed}")),
            );
            return;
        }

        if signature::types_agree(&file.media_type, sniffed) {
            return;
        }

        let declared = MediaCategory::of(&file.media_type);
        let actual = MediaCategory::of(sniffed);
        let message = format!(
            "Declared as {} but content looks like {sniffed}",
            file.media_type
        );

        if declared != actual && self.config.category_policy.is_critical(declared, actual) {
            findings.error("TYPE_MISMATCH", message, Severity::High, "media_type");
        } else {
            findings.warn(ValidationWarning::new("TYPE_MISMATCH", message));
        }
    }

    /// Returns false when the content could not be fully read
    fn check_security(&self, file: &CandidateFile, findings: &mut Findings) -> bool {
        let segments: Vec<String> = file
            .name
            .split('.')
            .skip(1)
            .map(|s| s.trim().to_ascii_lowercase())
            .collect();
        let dangerous = |ext: &str| DANGEROUS_EXTENSIONS.contains(&ext);

        if let Some(last) = segments.last().filter(|ext| dangerous(ext)) {
            findings.error(
                "DANGEROUS_EXTENSION",
                format!("Executable extension '.{last}' is not allowed"),
                Severity::Critical,
                "name",
            );
        }

        if segments.len() >= 2 {
            let last = &segments[segments.len() - 1];
            let previous = &segments[segments.len() - 2];
            if dangerous(last) || dangerous(previous) {
                findings.error(
                    "DOUBLE_EXTENSION",
                    format!("Name '{}' hides an executable extension", file.name),
                    Severity::Critical,
                    "name",
                );
            }
        }

        let head = &file.content[..file.content.len().min(CONTENT_SCAN_BYTES)];
        let text = String::from_utf8_lossy(head).to_ascii_lowercase();
        if let Some(pattern) = SUSPICIOUS_PATTERNS.iter().find(|p| text.contains(*p)) {
            findings.error(
                "SUSPICIOUS_CONTENT",
                format!("Content contains '{pattern}'"),
                Severity::Critical,
                "content",
            );
        }

        if file.is_unreadable() {
            findings.error(
                "UNREADABLE_CONTENT",
                format!(
                    "Only {} of {} declared bytes could be read",
                    file.content.len(),
                    file.size
                ),
                Severity::High,
                "content",
            );
            return false;
        }

        true
    }

    fn check_header(&self, sniffed: &str, extension: &str, findings: &mut Findings) {
        let Some(implied) = signature::mime_for_extension(extension) else {
            return;
        };
        if signature::types_agree(implied, sniffed) {
            return;
        }

        let message = format!("Extension '.{extension}' does not match content ({sniffed})");
        let implied_category = MediaCategory::of(implied);
        let actual = MediaCategory::of(sniffed);

        if implied_category != actual
            && self.config.category_policy.is_critical(implied_category, actual)
        {
            findings.error("HEADER_MISMATCH", message, Severity::High, "content");
        } else {
            findings.warn(
                ValidationWarning::new("HEADER_MISMATCH", message)
                    .recommend("Rename the file to match its content"),
            );
        }
    }
}

fn quality_score(errors: usize, valid_extension: bool, specific_type: bool, size_ok: bool) -> u8 {
    let bonus = [valid_extension, specific_type, size_ok]
        .iter()
        .filter(|&&b| b)
        .count() as i64
        * 10;
    let score = 100 - 20 * errors as i64 + bonus;
    score.clamp(0, 100) as u8
}
