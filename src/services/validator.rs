//! Structural checks for the standard transfer layout.
//!
//! A standard transfer carries a `documentation/` directory holding the
//! digital file list (and, after agreement resolution, the submission
//! agreement) plus a `content/` directory with the records themselves.

use crate::services::archive::TransferPackage;
use regex::Regex;
use std::{fmt, sync::LazyLock};

pub const DOCUMENTATION_DIR: &str = "documentation";
pub const CONTENT_DIR: &str = "content";

const MAX_ENTRY_PATH_LEN: usize = 1024;

static FILE_LIST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(Digital_File_List|File\sList)").expect("file list pattern is valid")
});

static AGREEMENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Submission_Agreement").expect("agreement pattern is valid")
});

/// File names accepted for the digital file list.
pub fn file_list_pattern() -> &'static Regex {
    &FILE_LIST_PATTERN
}

/// Case-sensitive prefix every submission agreement name carries.
pub fn agreement_pattern() -> &'static Regex {
    &AGREEMENT_PATTERN
}

/// Every required artifact the package lacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureError {
    pub missing: Vec<String>,
}

impl fmt::Display for StructureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transfer package does not follow the standard transfer structure: {}",
            self.missing.join("; ")
        )
    }
}

impl std::error::Error for StructureError {}

/// Check the standard transfer layout, reporting every missing artifact.
pub fn validate_structure(package: &TransferPackage) -> Result<(), StructureError> {
    into_result(structure_violations(package))
}

/// Same as [`validate_structure`], and additionally require the submission
/// agreement inside `documentation/`. Run after agreement resolution.
pub fn validate_structure_with_agreement(package: &TransferPackage) -> Result<(), StructureError> {
    let mut missing = structure_violations(package);
    if package.find_entry(DOCUMENTATION_DIR, agreement_pattern()).is_none() {
        missing.push(format!(
            "Submission Agreement (beginning with 'Submission_Agreement') must be included in the {DOCUMENTATION_DIR} directory"
        ));
    }
    into_result(missing)
}

fn structure_violations(package: &TransferPackage) -> Vec<String> {
    let mut missing = Vec::new();

    for entry in package.entries() {
        if let Err(reason) = ensure_entry_path_safe(&entry.path) {
            missing.push(format!("entry `{}` has an unsafe path: {reason}", entry.path));
        }
    }

    if !package.has_directory(DOCUMENTATION_DIR) {
        missing.push(format!("`{DOCUMENTATION_DIR}/` directory"));
    } else if package.find_entry(DOCUMENTATION_DIR, file_list_pattern()).is_none() {
        missing.push(format!(
            "digital file list (beginning with 'Digital_File_List' or 'File List') in `{DOCUMENTATION_DIR}/`"
        ));
    }

    let content_prefix = format!("{CONTENT_DIR}/");
    if !package.files().any(|entry| entry.path.starts_with(&content_prefix)) {
        missing.push(format!("`{CONTENT_DIR}/` directory with at least one file"));
    }

    missing
}

/// Rejects absolute paths, parent traversal, backslashes and control bytes.
fn ensure_entry_path_safe(path: &str) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("empty path");
    }
    if path.len() > MAX_ENTRY_PATH_LEN {
        return Err("path too long");
    }
    if path.starts_with('/') {
        return Err("absolute path");
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err("parent directory reference");
    }
    if path.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
        return Err("backslash or control character");
    }
    Ok(())
}

fn into_result(missing: Vec<String>) -> Result<(), StructureError> {
    if missing.is_empty() {
        Ok(())
    } else {
        Err(StructureError { missing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::zip_bytes;

    fn package(entries: &[(&str, &[u8])]) -> TransferPackage {
        TransferPackage::from_bytes(zip_bytes(entries)).unwrap()
    }

    #[test]
    fn accepts_standard_layout() {
        let package = package(&[
            ("documentation/Digital_File_List_123.json", b"{}"),
            ("content/file1.txt", b"a"),
        ]);
        assert_eq!(validate_structure(&package), Ok(()));
    }

    #[test]
    fn accepts_file_list_with_space_variant() {
        let package = package(&[
            ("documentation/File List.json", b"{}"),
            ("content/file1.txt", b"a"),
        ]);
        assert_eq!(validate_structure(&package), Ok(()));
    }

    #[test]
    fn reports_every_missing_artifact_at_once() {
        let package = package(&[("readme.txt", b"hi")]);
        let err = validate_structure(&package).unwrap_err();
        assert_eq!(err.missing.len(), 2);
        assert!(err.missing[0].contains("documentation/"));
        assert!(err.missing[1].contains("content/"));
    }

    #[test]
    fn file_list_must_sit_directly_in_documentation() {
        let package = package(&[
            ("documentation/old/Digital_File_List.json", b"{}"),
            ("content/file1.txt", b"a"),
        ]);
        let err = validate_structure(&package).unwrap_err();
        assert_eq!(err.missing.len(), 1);
        assert!(err.missing[0].contains("digital file list"));
    }

    #[test]
    fn flags_traversal_paths() {
        let package = package(&[
            ("documentation/Digital_File_List.json", b"{}"),
            ("content/../../etc/passwd", b"a"),
        ]);
        let err = validate_structure(&package).unwrap_err();
        assert!(err.missing.iter().any(|m| m.contains("unsafe path")));
    }

    #[test]
    fn agreement_is_required_on_revalidation() {
        let without = package(&[
            ("documentation/Digital_File_List.json", b"{}"),
            ("content/file1.txt", b"a"),
        ]);
        assert!(validate_structure(&without).is_ok());
        let err = validate_structure_with_agreement(&without).unwrap_err();
        assert!(err.missing[0].contains("Submission_Agreement"));

        let with = without
            .with_added_entry("documentation/Submission_Agreement_1_2.pdf", b"%PDF")
            .unwrap();
        assert!(validate_structure_with_agreement(&with).is_ok());
    }

    #[test]
    fn agreement_prefix_is_case_sensitive() {
        let package = package(&[
            ("documentation/Digital_File_List.json", b"{}"),
            ("documentation/submission_agreement.pdf", b"%PDF"),
            ("content/file1.txt", b"a"),
        ]);
        assert!(validate_structure_with_agreement(&package).is_err());
    }
}
