//! Packaged web application archives.
//!
//! An archive is a tar file laid out like an exploded application. It is
//! unpacked under `<temp_dir>/apps/` when the server is initialized and then
//! served like any exploded application.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tar::Archive;

use crate::error::{BootstrapError, Result};

/// Where the archive bytes come from
#[derive(Debug, Clone)]
pub enum ArchiveSource {
    /// Archive file on disk
    File(PathBuf),
    /// Archive compiled into the binary, e.g. with `include_bytes!`
    Embedded {
        name: String,
        bytes: &'static [u8],
    },
}

impl ArchiveSource {
    pub fn name(&self) -> String {
        match self {
            ArchiveSource::File(path) => path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default(),
            ArchiveSource::Embedded { name, .. } => name.clone(),
        }
    }
}

/// Directory name for the `index`-th mount, safe to use on any filesystem
pub(crate) fn extraction_dir(apps_dir: &Path, index: usize, source: &ArchiveSource) -> PathBuf {
    let name: String = source
        .name()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    apps_dir.join(format!("{index}-{name}"))
}

/// Unpack `source` into `dest`, replacing any previous extraction.
pub(crate) fn extract(source: &ArchiveSource, dest: &Path) -> Result<()> {
    if dest.exists() {
        std::fs::remove_dir_all(dest).map_err(|e| {
            BootstrapError::io(format!("Can't remove previous extraction {}", dest.display()), e)
        })?;
    }
    std::fs::create_dir_all(dest)
        .map_err(|e| BootstrapError::io(format!("Can't create {}", dest.display()), e))?;

    match source {
        ArchiveSource::File(path) => {
            let file = File::open(path).map_err(|e| {
                BootstrapError::io(format!("Can't open archive {}", path.display()), e)
            })?;
            unpack(file, dest, &path.display().to_string())?;
        }
        ArchiveSource::Embedded { name, bytes } => unpack(*bytes, dest, name)?,
    }

    tracing::debug!(archive = %source.name(), dest = %dest.display(), "Extracted web archive");
    Ok(())
}

fn unpack<R: Read>(reader: R, dest: &Path, label: &str) -> Result<()> {
    Archive::new(reader)
        .unpack(dest)
        .map_err(|e| BootstrapError::io(format!("Can't extract archive {label}"), e))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build an in-memory tar archive from `(path, contents)` pairs.
    pub(crate) fn tar_bytes(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, contents.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn extracts_file_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("site.tar");
        std::fs::write(&archive, tar_bytes(&[("index.html", "hello"), ("css/a.css", "body{}")]))
            .unwrap();

        let source = ArchiveSource::File(archive);
        let dest = extraction_dir(&dir.path().join("apps"), 0, &source);
        extract(&source, &dest).unwrap();

        assert!(dest.ends_with("0-site"));
        assert_eq!(std::fs::read_to_string(dest.join("index.html")).unwrap(), "hello");
        assert!(dest.join("css/a.css").exists());
    }

    #[test]
    fn extraction_replaces_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let bytes: &'static [u8] = Box::leak(tar_bytes(&[("index.html", "v2")]).into_boxed_slice());
        let source = ArchiveSource::Embedded {
            name: "my app.tar".to_string(),
            bytes,
        };
        let dest = extraction_dir(dir.path(), 3, &source);
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("stale.html"), "old").unwrap();

        extract(&source, &dest).unwrap();

        assert!(dest.ends_with("3-my_app_tar"));
        assert!(!dest.join("stale.html").exists());
        assert_eq!(std::fs::read_to_string(dest.join("index.html")).unwrap(), "v2");
    }

    #[test]
    fn missing_archive_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = ArchiveSource::File(dir.path().join("missing.tar"));
        let err = extract(&source, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, BootstrapError::Io { .. }));
    }
}
