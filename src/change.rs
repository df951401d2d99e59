//! Decides which targets are due for re-indexing.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::discover::FileFilter;
use crate::models::WatchTarget;

/// Whether `target` should be indexed now.
///
/// The directory walk runs on the blocking pool. A panicked walk counts as
/// "not changed" so that one broken target cannot stall the cycle.
pub async fn needs_reindex(target: &WatchTarget, filter: Arc<FileFilter>, now: DateTime<Utc>) -> bool {
    if target.last_indexed_at.is_none() {
        return true;
    }

    let latest = if target.reindex_on_change {
        let walk_target = target.clone();
        match tokio::task::spawn_blocking(move || filter.latest_modification(&walk_target)).await {
            Ok(latest) => latest,
            Err(e) => {
                warn!(target = %target.id, error = %e, "change walk failed");
                return false;
            }
        }
    } else {
        None
    };

    let due = decide(target, latest, now);
    debug!(target = %target.id, due, "change check");
    due
}

/// The ordered policy given the newest file mtime, if one was looked up.
pub fn decide(target: &WatchTarget, latest_modification: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    let Some(last_indexed) = target.last_indexed_at else {
        return true;
    };

    if target.reindex_on_change {
        return latest_modification.is_some_and(|m| m > last_indexed);
    }

    target.next_scheduled_at.is_some_and(|next| now >= next)
}
