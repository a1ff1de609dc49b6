//! Backup exclusion for the data directory.
//!
//! The exclusion flag is persisted as a filesystem attribute of the
//! directory, not inside any store: a `CACHEDIR.TAG` file per the Cache
//! Directory Tagging Standard. Backup tools that recognize the tag skip
//! the whole tree, which is the right default for data that can always
//! be re-downloaded.

use std::io;
use std::path::Path;

use tokio::fs;
use tracing::debug;

const TAG_FILE_NAME: &str = "CACHEDIR.TAG";

const TAG_CONTENTS: &str = "Signature: 8a477f597d28d172789f06886806bc55\n\
# This directory holds re-downloadable offline map data.\n\
# It is tagged so that backup tools skip it.\n";

/// Applies the exclusion flag to `dir`: writes the tag when `excluded`,
/// removes it otherwise. Idempotent in both directions.
pub async fn apply(dir: &Path, excluded: bool) -> io::Result<()> {
    let tag = dir.join(TAG_FILE_NAME);
    if excluded {
        if fs::try_exists(&tag).await.unwrap_or(false) {
            return Ok(());
        }
        debug!(path = %tag.display(), "writing backup-exclusion tag");
        fs::write(&tag, TAG_CONTENTS).await
    } else {
        match fs::remove_file(&tag).await {
            Ok(()) => {
                debug!(path = %tag.display(), "removed backup-exclusion tag");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Whether `dir` currently carries the exclusion tag.
pub async fn is_excluded(dir: &Path) -> bool {
    fs::try_exists(dir.join(TAG_FILE_NAME))
        .await
        .unwrap_or(false)
}
