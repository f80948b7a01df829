//! Digital file list extraction and cross-validation.
//!
//! The file list is the producer's manifest of the package. It is parsed
//! into [`FileListMetadata`] and then checked against what the archive
//! actually holds. Every disagreement is collected so the submitter receives
//! one complete correction list.

use crate::{
    models::filelist::{FileListDocument, FileListMetadata},
    services::{
        archive::{ArchiveError, TransferPackage},
        checksum, file_list_xlsx,
        validator::{DOCUMENTATION_DIR, file_list_pattern},
    },
};
use regex::Regex;
use std::{collections::BTreeSet, sync::LazyLock};
use thiserror::Error;
use tracing::{debug, warn};

// A label needs an explicit marker (`#`, `No.`, `Number:` or `:`) and the
// value must start with a digit, so prose around the words never matches.
static ACCESSION_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\baccession\s*(?:#\s*:?|no\.\s*:?|number\s*:|:)\s*([0-9][0-9A-Za-z-]*)")
        .expect("accession pattern is valid")
});

static APPLICATION_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bapplication\s*(?:#\s*:?|no\.\s*:?|number\s*:|:)\s*([0-9][0-9A-Za-z-]*)")
        .expect("application pattern is valid")
});

static CANONICAL_AGREEMENT_STEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Submission_Agreement_([A-Za-z0-9-]+)_([A-Za-z0-9-]+)$")
        .expect("agreement name pattern is valid")
});

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error(
        "digital file list (beginning with 'Digital_File_List' or 'File List') not found in `documentation/`"
    )]
    FileListNotFound,
    #[error("{message}")]
    Invalid {
        message: String,
        violations: Vec<String>,
    },
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl MetadataError {
    fn invalid(message: impl Into<String>, violations: Vec<String>) -> Self {
        Self::Invalid {
            message: message.into(),
            violations,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractedMetadata {
    pub file_list_path: String,
    pub output_file_type: String,
    pub metadata: FileListMetadata,
}

/// Locate, parse and cross-validate the package's digital file list.
pub fn extract(
    package: &TransferPackage,
    accession: &str,
    application: &str,
) -> Result<ExtractedMetadata, MetadataError> {
    let entry = package
        .find_entry(DOCUMENTATION_DIR, file_list_pattern())
        .ok_or(MetadataError::FileListNotFound)?;
    let file_list_path = entry.path.clone();
    let lowered = file_list_path.to_ascii_lowercase();

    let document = if lowered.ends_with(".json") {
        let raw = package.read_entry(&file_list_path)?;
        serde_json::from_slice::<FileListDocument>(&raw).map_err(|err| {
            MetadataError::invalid(
                "digital file list could not be parsed",
                vec![format!("`{file_list_path}`: {err}")],
            )
        })?
    } else if lowered.ends_with(".xlsx") {
        let raw = package.read_entry(&file_list_path)?;
        let metadata = file_list_xlsx::parse(&raw).map_err(|problems| {
            MetadataError::invalid(
                "digital file list could not be parsed",
                problems
                    .into_iter()
                    .map(|problem| format!("`{file_list_path}`: {problem}"))
                    .collect(),
            )
        })?;
        FileListDocument {
            output_file_type: Some(file_list_xlsx::OUTPUT_FILE_TYPE.to_string()),
            metadata,
        }
    } else {
        return Err(MetadataError::invalid(
            "unsupported digital file list format",
            vec![format!("`{file_list_path}` must be a JSON or Excel (.xlsx) file list")],
        ));
    };

    let mut violations = admin_violations(&document.metadata, accession, application);
    violations.extend(cross_validate(package, &document.metadata)?);
    if !violations.is_empty() {
        return Err(MetadataError::invalid(
            format!(
                "digital file list does not match the transfer package ({} problem(s))",
                violations.len()
            ),
            violations,
        ));
    }

    debug!(
        path = %file_list_path,
        folders = document.metadata.folders.len(),
        files = document.metadata.files.values().map(Vec::len).sum::<usize>(),
        "file list validated"
    );

    Ok(ExtractedMetadata {
        file_list_path,
        output_file_type: document.output_file_type.unwrap_or_else(|| "json".into()),
        metadata: document.metadata,
    })
}

/// Confirm any accession/application identifiers embedded in the submission
/// agreement match the transfer.
///
/// Identifiers are read from the agreement's text and, when the file name has
/// exactly the canonical `Submission_Agreement_{accession}_{application}`
/// form, from the name. Any other name after the prefix (`_signed`, a date)
/// carries no identifiers. Agreements with no readable identifiers pass.
pub fn check_agreement(
    package: &TransferPackage,
    agreement_path: &str,
    accession: &str,
    application: &str,
) -> Result<(), MetadataError> {
    let bytes = package.read_entry(agreement_path)?;
    let text = String::from_utf8_lossy(&bytes);

    let mut found = Vec::new();
    for caps in ACCESSION_IN_TEXT.captures_iter(&text) {
        found.push(("accession", caps[1].to_string()));
    }
    for caps in APPLICATION_IN_TEXT.captures_iter(&text) {
        found.push(("application", caps[1].to_string()));
    }

    let file_name = agreement_path.rsplit('/').next().unwrap_or(agreement_path);
    let stem = file_name
        .strip_suffix(".pdf")
        .or_else(|| file_name.strip_suffix(".PDF"))
        .unwrap_or(file_name);
    if let Some(caps) = CANONICAL_AGREEMENT_STEM.captures(stem) {
        found.push(("accession", caps[1].to_string()));
        found.push(("application", caps[2].to_string()));
    }

    if found.is_empty() {
        warn!(path = %agreement_path, "submission agreement carries no readable identifiers");
        return Ok(());
    }

    let violations: Vec<String> = found
        .into_iter()
        .filter_map(|(label, value)| {
            let expected = if label == "accession" { accession } else { application };
            (value != expected).then(|| {
                format!(
                    "submission agreement `{agreement_path}` names {label} `{value}` but the transfer is for {label} `{expected}`"
                )
            })
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(MetadataError::invalid(
            "submission agreement does not match the transfer",
            violations,
        ))
    }
}

fn admin_violations(metadata: &FileListMetadata, accession: &str, application: &str) -> Vec<String> {
    let Some(admin) = &metadata.admin else {
        return Vec::new();
    };

    let mut violations = Vec::new();
    for (label, declared, expected) in [
        ("accession", admin.accession.as_deref(), accession),
        ("application", admin.application.as_deref(), application),
    ] {
        if let Some(declared) = declared.filter(|value| *value != expected) {
            violations.push(format!(
                "file list {label} `{declared}` does not match the transfer {label} `{expected}`"
            ));
        }
    }
    violations
}

/// Compare the file list against the archive listing in both directions.
fn cross_validate(
    package: &TransferPackage,
    metadata: &FileListMetadata,
) -> Result<Vec<String>, MetadataError> {
    let mut violations = Vec::new();

    let folders: BTreeSet<&str> = metadata
        .folders
        .keys()
        .chain(metadata.files.keys())
        .map(|folder| folder.trim_end_matches('/'))
        .collect();
    for folder in folders {
        if folder.is_empty() || !package.has_directory(folder) {
            violations.push(format!("folder `{folder}` is listed but not present in the archive"));
        }
    }

    let mut referenced = BTreeSet::new();
    for (folder, files) in &metadata.files {
        let folder = folder.trim_end_matches('/');
        for file in files {
            referenced.insert(file.filepath.as_str());

            if !package.contains_file(&file.filepath) {
                violations.push(format!(
                    "file `{}` is listed but not present in the archive",
                    file.filepath
                ));
                continue;
            }

            let parent = file.filepath.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
            if parent != folder && !parent.starts_with(&format!("{folder}/")) {
                violations.push(format!(
                    "file `{}` is listed under folder `{folder}` but is stored in `{parent}`",
                    file.filepath
                ));
            }

            let contents = package.read_entry(&file.filepath)?;
            if !checksum::verify(&contents, &file.checksum) {
                violations.push(format!(
                    "file `{}` checksum does not match the file list ({} `{}`)",
                    file.filepath,
                    checksum::DIGEST_ALGORITHM,
                    file.checksum
                ));
            }
        }
    }

    let reserved = format!("{DOCUMENTATION_DIR}/");
    for entry in package.files() {
        if entry.path.starts_with(&reserved) || referenced.contains(entry.path.as_str()) {
            continue;
        }
        violations.push(format!(
            "file `{}` is in the archive but missing from the file list",
            entry.path
        ));
    }

    Ok(violations)
}
