//! Hierarchical prefix deletion shared by both capabilities

use crate::key::{matches_prefix, normalize_prefix};
use crate::{Backend, Result, DEFAULT_DELETE_CONCURRENCY, DEFAULT_PAGE_SIZE};
use tracing::{debug, instrument};

/// Tuning for [`delete_prefix`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixDeleteOptions {
    /// Keys requested per listing page
    pub page_size: usize,
    /// Individual deletes in flight when the backend has no bulk delete
    pub concurrency: usize,
}

impl Default for PrefixDeleteOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: DEFAULT_DELETE_CONCURRENCY,
        }
    }
}

/// Outcome of a completed prefix deletion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteDirReport {
    pub deleted: usize,
}

/// Delete every key under `prefix`.
///
/// Pages through the listing and deletes each page before fetching the next.
/// Not atomic: the first failure is returned and keys already removed stay
/// removed, so running it again finishes the job.
#[instrument(skip(backend, options), fields(prefix = %prefix))]
pub async fn delete_prefix<B: Backend + ?Sized>(
    backend: &B,
    prefix: &str,
    options: &PrefixDeleteOptions,
) -> Result<DeleteDirReport> {
    let prefix = normalize_prefix(prefix)?;
    let page_size = options.page_size.max(1);
    let mut start_after: Option<String> = None;
    let mut report = DeleteDirReport::default();

    loop {
        let page = backend
            .list_page(prefix, start_after.as_deref(), page_size)
            .await?;

        let matching: Vec<String> = page
            .keys
            .into_iter()
            .filter(|key| matches_prefix(key, prefix))
            .collect();

        if !matching.is_empty() {
            debug!(count = matching.len(), "Deleting page");
            report.deleted += backend.delete_many(matching, options.concurrency).await?;
        }

        match page.next {
            Some(next) => start_after = Some(next),
            None => break,
        }
    }

    debug!(deleted = report.deleted, "Prefix deleted");
    Ok(report)
}
