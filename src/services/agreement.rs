//! Submission agreement resolution.
//!
//! Every transfer must carry a signed submission agreement in
//! `documentation/`. Packages that arrive without one fall back to the
//! template stored for the same accession/application pair, which is
//! injected into a rebuilt archive under the canonical file name.

use crate::services::{
    archive::{ArchiveError, TransferPackage},
    object_store::ObjectStore,
    retry::{RemoteError, RetryPolicy, with_retry},
    validator::{DOCUMENTATION_DIR, agreement_pattern},
};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Note returned to the submitter when the stored template was used.
pub const FALLBACK_NOTE: &str =
    "Used submission agreement from s3 because one was not provided in the transfer input.";

#[derive(Debug, Error)]
pub enum AgreementError {
    #[error(
        "Submission Agreement (beginning with 'Submission_Agreement') must be included and have a .pdf extension in the documentation directory; no stored agreement exists at `{key}`"
    )]
    TemplateNotFound { key: String },
    #[error(transparent)]
    Store(#[from] RemoteError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

#[derive(Debug, Clone)]
pub struct AgreementResolution {
    /// The package to carry forward; rebuilt when the fallback was injected.
    pub package: TransferPackage,
    /// Archive path of the agreement in `package`.
    pub path: String,
    pub used_fallback: bool,
}

/// Object store key of the stored agreement template.
pub fn template_key(accession: &str, application: &str) -> String {
    format!("submission-agreements/{accession}_{application}.pdf")
}

/// File name given to an injected agreement.
pub fn canonical_name(accession: &str, application: &str) -> String {
    format!("Submission_Agreement_{accession}_{application}.pdf")
}

#[derive(Clone)]
pub struct AgreementResolver {
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
}

impl AgreementResolver {
    pub fn new(store: Arc<dyn ObjectStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Return the package with a submission agreement in place.
    ///
    /// An agreement already in the package is always kept. Otherwise the
    /// template is fetched and injected; a missing template rejects the
    /// transfer.
    pub async fn resolve(
        &self,
        package: TransferPackage,
        accession: &str,
        application: &str,
    ) -> Result<AgreementResolution, AgreementError> {
        if let Some(entry) = package.find_entry(DOCUMENTATION_DIR, agreement_pattern()) {
            let path = entry.path.clone();
            return Ok(AgreementResolution {
                package,
                path,
                used_fallback: false,
            });
        }

        let key = template_key(accession, application);
        let (store, key_ref) = (&self.store, key.as_str());
        let template = with_retry(&self.retry, "object_store.get_agreement", move || {
            store.get(key_ref)
        })
        .await?
        .ok_or_else(|| AgreementError::TemplateNotFound { key: key.clone() })?;

        info!(
            "No Submission Agreement was found in the transfer files for TR_{}_{}; using stored agreement {}",
            accession, application, key
        );

        let path = format!("{DOCUMENTATION_DIR}/{}", canonical_name(accession, application));
        let package = package.with_added_entry(&path, &template)?;
        Ok(AgreementResolution {
            package,
            path,
            used_fallback: true,
        })
    }
}
