//! Format and security validation of user-selected files
//!
//! Checks the name, declared type, size and byte header of a
//! [`CandidateFile`] and produces a [`ValidationOutcome`]. Validation never
//! fails; problems are reported as ordered issues.

pub mod signature;
pub mod types;
pub mod validator;

pub use signature::{CategoryPolicy, MediaCategory};
pub use types::{
    CandidateFile, InferredMetadata, RiskLevel, Severity, ValidationIssue, ValidationOutcome,
    ValidationWarning, ValidatorConfig,
};
pub use validator::{validate, FileValidator, ValidationRule};
