//! Per-partition retention: keep at most N captures, evicting oldest first.

use std::path::Path;

use tokio::fs;

use super::layout::{file_kind, FileKind, METADATA_EXT};

/// Trim `partition` down to `max_images` captures.
///
/// Oldest is decided by lexical file name. Each evicted image takes its
/// metadata file with it. Stale `.tmp` files are swept as well. All deletion
/// errors are logged and skipped. Returns the number of captures evicted.
pub async fn enforce_retention(partition: &Path, max_images: usize) -> usize {
    let mut entries = match fs::read_dir(partition).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("[store] Retention scan of {:?} failed: {}", partition, e);
            return 0;
        }
    };

    let mut images = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("[store] Retention scan of {:?} interrupted: {}", partition, e);
                break;
            }
        };
        let path = entry.path();
        match file_kind(&path) {
            FileKind::Image => images.push(path),
            FileKind::Temp => try_delete(&path).await,
            FileKind::Metadata => {}
        }
    }

    if images.len() <= max_images {
        return 0;
    }

    images.sort();
    let excess = images.len() - max_images;
    for image in images.iter().take(excess) {
        try_delete(image).await;
        try_delete(&image.with_extension(METADATA_EXT)).await;
    }

    tracing::debug!(
        "[store] Evicted {} captures from {:?} (limit {})",
        excess,
        partition,
        max_images
    );
    excess
}

async fn try_delete(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("[store] Failed to delete {:?}: {}", path, e),
    }
}
