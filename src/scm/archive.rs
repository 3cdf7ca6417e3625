//! Gzipped tarball extraction.

use std::{
    fs,
    path::{Path, PathBuf},
};

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};

use super::SourceControlError;

fn archive_error(context: &str, err: impl std::fmt::Display) -> SourceControlError {
    SourceControlError::Archive(format!("{context}: {err}"))
}

/// Unpacks `bytes` into `dest` and returns the single top-level directory.
///
/// Entries that would land outside `dest` are skipped by `unpack_in`.
pub(crate) fn unpack_tarball(bytes: &[u8], dest: &Path) -> Result<PathBuf, SourceControlError> {
    let mut archive = Archive::new(GzDecoder::new(bytes));
    let entries = archive
        .entries()
        .map_err(|e| archive_error("reading archive", e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| archive_error("reading entry", e))?;
        if entry.header().entry_type() == EntryType::XGlobalHeader {
            continue;
        }
        entry
            .unpack_in(dest)
            .map_err(|e| archive_error("unpacking entry", e))?;
    }

    top_level_dir(dest)
}

fn top_level_dir(dest: &Path) -> Result<PathBuf, SourceControlError> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dest).map_err(|e| archive_error("listing archive root", e))? {
        let entry = entry.map_err(|e| archive_error("listing archive root", e))?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }

    match dirs.as_slice() {
        [single] => Ok(single.clone()),
        [] => Err(SourceControlError::Archive(
            "archive has no top-level directory".to_string(),
        )),
        _ => Err(SourceControlError::Archive(format!(
            "archive has {} top-level directories, expected one",
            dirs.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compression, write::GzEncoder};
    use tempfile::TempDir;

    fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_unpack_returns_top_level_dir() {
        let dest = TempDir::new().unwrap();
        let bytes = tarball(&[
            ("acme-widgets-abc1234/app.yml", "name: widgets-pr\n"),
            ("acme-widgets-abc1234/manifest.yml", "applications: []\n"),
        ]);

        let root = unpack_tarball(&bytes, dest.path()).unwrap();

        assert_eq!(root, dest.path().join("acme-widgets-abc1234"));
        assert_eq!(
            fs::read_to_string(root.join("app.yml")).unwrap(),
            "name: widgets-pr\n"
        );
    }

    #[test]
    fn test_unpack_rejects_multiple_roots() {
        let dest = TempDir::new().unwrap();
        let bytes = tarball(&[("one/a.txt", "a"), ("two/b.txt", "b")]);
        assert!(matches!(
            unpack_tarball(&bytes, dest.path()),
            Err(SourceControlError::Archive(_))
        ));
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        let dest = TempDir::new().unwrap();
        assert!(unpack_tarball(b"not a tarball", dest.path()).is_err());
    }
}
