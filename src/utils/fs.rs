use std::io;
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Check if a path exists, treating errors other than NotFound as "exists".
///
/// A permission error on a candidate name must not let two runs claim it.
pub async fn path_taken(path: impl AsRef<Path>) -> bool {
    match fs::symlink_metadata(path.as_ref()).await {
        Ok(_) => true,
        Err(e) => e.kind() != io::ErrorKind::NotFound,
    }
}

/// Check if a path is an existing regular file (symlinks followed).
pub async fn is_regular_file(path: impl AsRef<Path>) -> bool {
    fs::metadata(path.as_ref())
        .await
        .map(|m| m.file_type().is_file())
        .unwrap_or(false)
}

/// Remove a file, ignoring a missing one.
pub fn remove_if_exists(path: impl AsRef<Path>) {
    let path = path.as_ref();
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => debug!("Failed to remove {}: {}", path.display(), e),
    }
}

/// Get file extension as lowercase string
pub fn get_extension(path: impl AsRef<Path>) -> Option<String> {
    path.as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Copy `src` into a new file at `dst`, refusing to overwrite.
pub async fn copy_new(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> io::Result<u64> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    let mut reader = fs::File::open(src).await?;
    let mut writer = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dst)
        .await?;
    let copied = tokio::io::copy(&mut reader, &mut writer).await?;
    writer.sync_all().await?;
    Ok(copied)
}
