use kiln_errors::{Error, StorageError};
use std::path::{Path, PathBuf};

/// Recursively copy `src` to `dst`, preserving symlinks and permissions
///
/// # Errors
///
/// Returns an error if any entry cannot be read or written.
pub async fn copy_tree(src: &Path, dst: &Path) -> Result<(), Error> {
    let mut pending: Vec<(PathBuf, PathBuf)> = vec![(src.to_path_buf(), dst.to_path_buf())];
    // applied once the contents are in place, deepest first, so read-only
    // directories can still be filled
    let mut directories = Vec::new();

    while let Some((from, to)) = pending.pop() {
        tokio::fs::create_dir_all(&to)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, &to))?;
        let permissions = tokio::fs::metadata(&from).await?.permissions();
        directories.push((to.clone(), permissions));

        let mut entries = tokio::fs::read_dir(&from)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, &from))?;
        while let Some(entry) = entries.next_entry().await? {
            let source = entry.path();
            let target = to.join(entry.file_name());
            let file_type = entry.file_type().await?;

            if file_type.is_symlink() {
                let link = tokio::fs::read_link(&source).await?;
                symlink(&link, &target).await?;
            } else if file_type.is_dir() {
                pending.push((source, target));
            } else {
                // fs::copy carries the permission bits along
                tokio::fs::copy(&source, &target)
                    .await
                    .map_err(|e| StorageError::from_io_with_path(&e, &source))?;
            }
        }
    }

    for (dir, permissions) in directories.into_iter().rev() {
        tokio::fs::set_permissions(&dir, permissions)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, &dir))?;
    }
    Ok(())
}

#[cfg(unix)]
async fn symlink(link: &Path, target: &Path) -> Result<(), Error> {
    tokio::fs::symlink(link, target)
        .await
        .map_err(|e| StorageError::from_io_with_path(&e, target).into())
}

#[cfg(not(unix))]
async fn symlink(link: &Path, target: &Path) -> Result<(), Error> {
    tokio::fs::copy(link, target)
        .await
        .map(|_| ())
        .map_err(|e| StorageError::from_io_with_path(&e, target).into())
}
