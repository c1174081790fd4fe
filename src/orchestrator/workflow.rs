use crate::orchestrator::types::WorkflowKind;
use crate::transform::{OutputFormat, TransformOptions};
use crate::validation::ValidatorConfig;
use serde::{Deserialize, Serialize};

/// Which registration call the owning backend receives after a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfirmationKind {
    RegisterAvatar,
    RegisterAttachment,
    TriggerImport,
}

impl ConfirmationKind {
    pub fn endpoint(&self) -> &'static str {
        match self {
            ConfirmationKind::RegisterAvatar => "/avatars/register",
            ConfirmationKind::RegisterAttachment => "/attachments/register",
            ConfirmationKind::TriggerImport => "/imports/process",
        }
    }

    /// Inverse of [`endpoint`](Self::endpoint), used when routing replays
    pub fn from_endpoint(target: &str) -> Option<Self> {
        [
            ConfirmationKind::RegisterAvatar,
            ConfirmationKind::RegisterAttachment,
            ConfirmationKind::TriggerImport,
        ]
        .into_iter()
        .find(|kind| kind.endpoint() == target)
    }
}

/// Everything that distinguishes one workflow kind from another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowProfile {
    pub validator: ValidatorConfig,
    /// Applied to image files only; `None` uploads bytes as selected
    #[serde(default)]
    pub transform: Option<TransformOptions>,
    pub category: String,
    #[serde(default)]
    pub is_public: bool,
    pub confirmation: ConfirmationKind,
}

impl WorkflowProfile {
    pub fn avatar() -> Self {
        Self {
            validator: ValidatorConfig::default()
                .with_max_size(2 * 1024 * 1024)
                .with_extensions(["png", "jpg", "jpeg", "webp"])
                .with_mime_types(["image/*"]),
            transform: Some(TransformOptions {
                max_width: 300,
                max_height: 300,
                quality: 0.85,
                output_format: OutputFormat::Webp,
                make_thumbnail: true,
                thumbnail_size: 80,
                ..TransformOptions::default()
            }),
            category: "avatars".to_string(),
            is_public: true,
            confirmation: ConfirmationKind::RegisterAvatar,
        }
    }

    pub fn document() -> Self {
        Self {
            validator: ValidatorConfig::default()
                .with_max_size(10 * 1024 * 1024)
                .with_extensions(["pdf", "doc", "docx", "xls", "xlsx", "txt", "png", "jpg", "jpeg"]),
            transform: None,
            category: "documents".to_string(),
            is_public: false,
            confirmation: ConfirmationKind::RegisterAttachment,
        }
    }

    pub fn tabular_import() -> Self {
        Self {
            validator: ValidatorConfig::default()
                .with_max_size(25 * 1024 * 1024)
                .with_extensions(["csv", "xls", "xlsx"]),
            transform: None,
            category: "imports".to_string(),
            is_public: false,
            confirmation: ConfirmationKind::TriggerImport,
        }
    }

    pub fn defaults_for(kind: WorkflowKind) -> Self {
        match kind {
            WorkflowKind::Avatar => Self::avatar(),
            WorkflowKind::Document => Self::document(),
            WorkflowKind::TabularImport => Self::tabular_import(),
        }
    }
}

/// Strategy table of workflow profiles, one per kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct WorkflowRegistry {
    pub avatar: WorkflowProfile,
    pub document: WorkflowProfile,
    pub tabular_import: WorkflowProfile,
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self {
            avatar: WorkflowProfile::avatar(),
            document: WorkflowProfile::document(),
            tabular_import: WorkflowProfile::tabular_import(),
        }
    }
}

impl WorkflowRegistry {
    pub fn profile(&self, kind: WorkflowKind) -> &WorkflowProfile {
        match kind {
            WorkflowKind::Avatar => &self.avatar,
            WorkflowKind::Document => &self.document,
            WorkflowKind::TabularImport => &self.tabular_import,
        }
    }

    pub fn set(&mut self, kind: WorkflowKind, profile: WorkflowProfile) {
        match kind {
            WorkflowKind::Avatar => self.avatar = profile,
            WorkflowKind::Document => self.document = profile,
            WorkflowKind::TabularImport => self.tabular_import = profile,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let registry = WorkflowRegistry::default();

        let avatar = registry.profile(WorkflowKind::Avatar);
        assert_eq!(avatar.validator.max_size_bytes, 2 * 1024 * 1024);
        assert!(avatar.is_public);
        let transform = avatar.transform.as_ref().unwrap();
        assert_eq!(transform.output_format, OutputFormat::Webp);
        assert_eq!((transform.max_width, transform.max_height), (300, 300));
        assert_eq!(transform.thumbnail_size, 80);

        let document = registry.profile(WorkflowKind::Document);
        assert!(document.transform.is_none());
        assert!(document.validator.extension_allowed(Some("docx")));
        assert!(!document.validator.extension_allowed(Some("csv")));

        let import = registry.profile(WorkflowKind::TabularImport);
        assert_eq!(import.validator.max_size_bytes, 25 * 1024 * 1024);
        assert_eq!(import.confirmation, ConfirmationKind::TriggerImport);
        assert_eq!(import.category, "imports");
    }

    #[test]
    fn test_set_overrides_profile() {
        let mut registry = WorkflowRegistry::default();
        let mut profile = WorkflowProfile::document();
        profile.category = "contracts".into();
        registry.set(WorkflowKind::Document, profile);

        assert_eq!(registry.profile(WorkflowKind::Document).category, "contracts");
        assert_eq!(registry.profile(WorkflowKind::Avatar).category, "avatars");
    }

    #[test]
    fn test_endpoints_round_trip() {
        for kind in [
            ConfirmationKind::RegisterAvatar,
            ConfirmationKind::RegisterAttachment,
            ConfirmationKind::TriggerImport,
        ] {
            assert_eq!(ConfirmationKind::from_endpoint(kind.endpoint()), Some(kind));
        }
        assert_eq!(ConfirmationKind::from_endpoint("/storage/confirm"), None);
    }

    #[test]
    fn test_registry_from_json() {
        let json = serde_json::json!({
            "document": {
                "validator": { "max_size_bytes": 1024 },
                "category": "letters",
                "confirmation": "register-attachment"
            }
        });
        let registry: WorkflowRegistry = serde_json::from_value(json).unwrap();

        assert_eq!(registry.document.category, "letters");
        assert_eq!(registry.document.validator.max_size_bytes, 1024);
        assert_eq!(registry.avatar, WorkflowProfile::avatar());
    }
}
