//! Slides and other non-video media attached to a lesson.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::LectureError;
use crate::metadata::Attachment;
use crate::naming::{partial_path, remove_if_present, sanitize_component};
use crate::transport::AuthenticatedTransport;

pub fn attachment_url(portal_base: &str, attachment: &Attachment) -> String {
    format!(
        "{portal_base}/media/download/{}/{}",
        attachment.id, attachment.title
    )
}

/// Downloads every attachment into `dir`, skipping files that already exist.
///
/// Failures are logged and do not stop the remaining attachments. Returns the
/// number of files written.
pub async fn fetch_attachments(
    transport: &dyn AuthenticatedTransport,
    portal_base: &str,
    attachments: &[Attachment],
    dir: &Path,
) -> usize {
    let mut written = 0;
    for attachment in attachments {
        match fetch_one(transport, portal_base, attachment, dir).await {
            Ok(true) => written += 1,
            Ok(false) => {}
            Err(e) => warn!(
                attachment = %attachment.title,
                error = %e,
                "Failed to download attachment"
            ),
        }
    }
    written
}

async fn fetch_one(
    transport: &dyn AuthenticatedTransport,
    portal_base: &str,
    attachment: &Attachment,
    dir: &Path,
) -> Result<bool, LectureError> {
    let path = dir.join(sanitize_component(&attachment.title));
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        debug!(path = %path.display(), "Attachment exists, skipping");
        return Ok(false);
    }

    tokio::fs::create_dir_all(dir).await?;
    let part = partial_path(&path);
    let url = attachment_url(portal_base, attachment);
    let mut file = tokio::fs::File::create(&part).await?;
    match transport.download_to(&url, &mut file, &|_: u64| {}).await {
        Ok(bytes) => {
            drop(file);
            tokio::fs::rename(&part, &path).await?;
            info!(path = %path.display(), bytes, "Attachment saved");
            Ok(true)
        }
        Err(e) => {
            drop(file);
            remove_if_present(&part).await;
            Err(e)
        }
    }
}
