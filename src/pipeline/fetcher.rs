//! Message fetcher — candidate messages not yet in the processed set.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::error::Result;
use crate::pipeline::types::{CandidateMessage, Mailbox};
use crate::store::ProcessedSet;

/// List candidates from `mailbox`, excluding everything in `since`.
///
/// The exclusion is enforced here even if the mailbox ignores it. Duplicate
/// ids within one listing keep their first occurrence; mailbox order is
/// otherwise preserved.
pub async fn fetch(mailbox: &dyn Mailbox, since: &ProcessedSet) -> Result<Vec<CandidateMessage>> {
    let listed = mailbox.list_unprocessed(since).await?;
    let total = listed.len();

    let mut seen = HashSet::with_capacity(total);
    let candidates: Vec<CandidateMessage> = listed
        .into_iter()
        .filter(|m| !since.contains(&m.id))
        .filter(|m| seen.insert(m.id.clone()))
        .collect();

    if candidates.len() != total {
        debug!(
            listed = total,
            kept = candidates.len(),
            "Dropped already-processed or duplicate messages"
        );
    }
    info!(
        mailbox = mailbox.name(),
        count = candidates.len(),
        "Fetched candidate messages"
    );
    Ok(candidates)
}
