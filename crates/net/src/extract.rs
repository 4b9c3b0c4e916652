//! Archive extraction

use async_compression::tokio::bufread::{BzDecoder, GzipDecoder, XzDecoder, ZstdDecoder};
use kiln_errors::{BuildError, Error};
use std::fs::File;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::task;

/// Supported source archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    TarZst,
    Zip,
}

impl ArchiveFormat {
    /// Guess the format from a file name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        let table: [(&[&str], Self); 6] = [
            (&[".tar.gz", ".tgz"], Self::TarGz),
            (&[".tar.bz2", ".tbz2", ".tbz"], Self::TarBz2),
            (&[".tar.xz", ".txz"], Self::TarXz),
            (&[".tar.zst", ".tzst"], Self::TarZst),
            (&[".tar"], Self::Tar),
            (&[".zip"], Self::Zip),
        ];
        table
            .iter()
            .find(|(suffixes, _)| suffixes.iter().any(|s| name.ends_with(s)))
            .map(|(_, format)| *format)
    }

    /// Identify the format from leading bytes
    #[must_use]
    pub fn from_magic(header: &[u8]) -> Option<Self> {
        if header.starts_with(&[0x1f, 0x8b]) {
            Some(Self::TarGz)
        } else if header.starts_with(b"BZh") {
            Some(Self::TarBz2)
        } else if header.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            Some(Self::TarXz)
        } else if header.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Some(Self::TarZst)
        } else if header.starts_with(b"PK\x03\x04") {
            Some(Self::Zip)
        } else if header.get(257..262) == Some(b"ustar".as_slice()) {
            Some(Self::Tar)
        } else {
            None
        }
    }

    /// Detect by name first, then by content
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedArchiveFormat` if neither matches.
    pub async fn detect(path: &Path, name_hint: &str) -> Result<Self, Error> {
        if let Some(format) = Self::from_name(name_hint) {
            return Ok(format);
        }
        let mut header = [0u8; 512];
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| Error::io_with_path(&e, path))?;
        let mut filled = 0;
        while filled < header.len() {
            let n = file.read(&mut header[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Self::from_magic(&header[..filled]).ok_or_else(|| {
            BuildError::UnsupportedArchiveFormat {
                format: name_hint.to_string(),
            }
            .into()
        })
    }
}

/// Unpack `archive` into `dest`
///
/// # Errors
///
/// Returns `ExtractionFailed` if the archive is unreadable or corrupt.
pub async fn extract(archive: &Path, format: ArchiveFormat, dest: &Path) -> Result<(), Error> {
    tokio::fs::create_dir_all(dest)
        .await
        .map_err(|e| Error::io_with_path(&e, dest))?;

    match format {
        ArchiveFormat::Tar => unpack_tar(archive.to_path_buf(), dest.to_path_buf()).await,
        ArchiveFormat::Zip => unpack_zip(archive.to_path_buf(), dest.to_path_buf()).await,
        compressed => {
            // decompressed tar sits next to dest so it is cleaned up with it
            let scratch = tempfile::NamedTempFile::new_in(dest.parent().unwrap_or(dest))
                .map_err(|e| Error::io_with_path(&e, dest))?;
            let reader = BufReader::new(
                tokio::fs::File::open(archive)
                    .await
                    .map_err(|e| Error::io_with_path(&e, archive))?,
            );
            match compressed {
                ArchiveFormat::TarGz => {
                    let mut decoder = GzipDecoder::new(reader);
                    decoder.multiple_members(true);
                    decompress_into(decoder, scratch.path()).await?;
                }
                ArchiveFormat::TarBz2 => decompress_into(BzDecoder::new(reader), scratch.path()).await?,
                ArchiveFormat::TarXz => decompress_into(XzDecoder::new(reader), scratch.path()).await?,
                _ => decompress_into(ZstdDecoder::new(reader), scratch.path()).await?,
            }
            unpack_tar(scratch.path().to_path_buf(), dest.to_path_buf()).await
        }
    }
}

async fn decompress_into<R: AsyncRead + Unpin>(mut decoder: R, out: &Path) -> Result<(), Error> {
    let mut file = tokio::fs::File::create(out)
        .await
        .map_err(|e| Error::io_with_path(&e, out))?;
    tokio::io::copy(&mut decoder, &mut file)
        .await
        .map_err(|e| extraction_failed(format!("decompression failed: {e}")))?;
    Ok(())
}

async fn unpack_tar(archive: PathBuf, dest: PathBuf) -> Result<(), Error> {
    task::spawn_blocking(move || {
        let file = File::open(&archive).map_err(|e| Error::io_with_path(&e, &archive))?;
        let mut tar = tar::Archive::new(file);
        tar.set_preserve_permissions(true);
        tar.unpack(&dest)
            .map_err(|e| extraction_failed(format!("failed to unpack tar: {e}")))
    })
    .await
    .map_err(|e| Error::internal(format!("extraction task failed: {e}")))?
}

async fn unpack_zip(archive: PathBuf, dest: PathBuf) -> Result<(), Error> {
    task::spawn_blocking(move || {
        let file = File::open(&archive).map_err(|e| Error::io_with_path(&e, &archive))?;
        let mut zip = zip::ZipArchive::new(file)
            .map_err(|e| extraction_failed(format!("failed to read zip archive: {e}")))?;

        for i in 0..zip.len() {
            let mut entry = zip
                .by_index(i)
                .map_err(|e| extraction_failed(format!("failed to read zip entry: {e}")))?;
            let Some(relative) = entry.enclosed_name() else {
                continue;
            };
            let out = dest.join(relative);

            if entry.is_dir() {
                std::fs::create_dir_all(&out).map_err(|e| Error::io_with_path(&e, &out))?;
                continue;
            }
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io_with_path(&e, parent))?;
            }
            let mut file = File::create(&out).map_err(|e| Error::io_with_path(&e, &out))?;
            std::io::copy(&mut entry, &mut file)
                .map_err(|e| extraction_failed(format!("failed to extract {}: {e}", out.display())))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Some(mode) = entry.unix_mode() {
                    std::fs::set_permissions(&out, std::fs::Permissions::from_mode(mode)).ok();
                }
            }
        }
        Ok(())
    })
    .await
    .map_err(|e| Error::internal(format!("extraction task failed: {e}")))?
}

/// Root of an extracted tree: the single top-level directory if there is
/// exactly one entry and it is a directory, otherwise `dir` itself
///
/// # Errors
///
/// Returns an error if `dir` cannot be read.
pub async fn unwrap_single_dir(dir: &Path) -> Result<PathBuf, Error> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::io_with_path(&e, dir))?;
    let Some(first) = entries.next_entry().await? else {
        return Ok(dir.to_path_buf());
    };
    if entries.next_entry().await?.is_some() {
        return Ok(dir.to_path_buf());
    }
    if first.file_type().await?.is_dir() {
        Ok(first.path())
    } else {
        Ok(dir.to_path_buf())
    }
}

fn extraction_failed(message: String) -> Error {
    BuildError::ExtractionFailed { message }.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(ArchiveFormat::from_name("zlib-1.3.1.tar.gz"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_name("X.TGZ"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_name("make-4.4.tar.xz"), Some(ArchiveFormat::TarXz));
        assert_eq!(ArchiveFormat::from_name("a.tar.zst"), Some(ArchiveFormat::TarZst));
        assert_eq!(ArchiveFormat::from_name("a.tar"), Some(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::from_name("a.zip"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_name("download"), None);
    }

    #[test]
    fn magic() {
        assert_eq!(ArchiveFormat::from_magic(&[0x1f, 0x8b, 8]), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_magic(b"BZh91AY"), Some(ArchiveFormat::TarBz2));
        assert_eq!(ArchiveFormat::from_magic(b"PK\x03\x04...."), Some(ArchiveFormat::Zip));
        let mut tar = vec![0u8; 512];
        tar[257..262].copy_from_slice(b"ustar");
        assert_eq!(ArchiveFormat::from_magic(&tar), Some(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::from_magic(b"plain text"), None);
    }

    fn write_tar(path: &Path) {
        let file = File::create(path).unwrap();
        let mut builder = tar::Builder::new(file);
        let data = b"int main(void) { return 0; }\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "pkg-1.0/main.c", &data[..])
            .unwrap();
        builder.finish().unwrap();
    }

    #[tokio::test]
    async fn tar_is_extracted_and_unwrapped() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("pkg.bin");
        write_tar(&archive);

        let format = ArchiveFormat::detect(&archive, "download").await.unwrap();
        assert_eq!(format, ArchiveFormat::Tar);

        let dest = temp.path().join("out");
        extract(&archive, format, &dest).await.unwrap();
        let root = unwrap_single_dir(&dest).await.unwrap();
        assert_eq!(root, dest.join("pkg-1.0"));
        assert!(root.join("main.c").is_file());
    }

    #[tokio::test]
    async fn several_top_level_entries_stay_wrapped() {
        let temp = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(temp.path().join("a")).await.unwrap();
        tokio::fs::write(temp.path().join("README"), "x").await.unwrap();
        assert_eq!(unwrap_single_dir(temp.path()).await.unwrap(), temp.path());
    }

    #[tokio::test]
    async fn garbage_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("blob");
        tokio::fs::write(&archive, b"definitely not an archive").await.unwrap();
        let err = ArchiveFormat::detect(&archive, "blob").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Build(BuildError::UnsupportedArchiveFormat { .. })
        ));
    }
}
