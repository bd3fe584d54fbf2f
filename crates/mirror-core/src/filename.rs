//! Resolving the user-facing name of a download from daemon file lists.

use std::path::{Component, Path, PathBuf};

use crate::types::DaemonFile;

/// Name shown while only torrent metadata is known.
pub const METADATA_NAME: &str = "Metadata";

const METADATA_PREFIX: &str = "[METADATA]";

/// First file of a daemon job, split into what is known about it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilePath {
    /// Real content path inside the work dir; `None` for metadata.
    pub path: Option<PathBuf>,
    /// Raw path reported by the daemon, present even for metadata.
    pub input_path: Option<String>,
    pub download_uri: Option<String>,
}

pub fn find_file_path(files: &[DaemonFile], work_dir: &Path) -> FilePath {
    let Some(first) = files.first() else {
        return FilePath::default();
    };
    let raw = Path::new(&first.path);
    let is_content = !first.path.is_empty()
        && raw.starts_with(work_dir)
        && raw.extension().map_or(true, |ext| ext != "torrent");
    FilePath {
        path: is_content.then(|| raw.to_path_buf()),
        input_path: (!first.path.is_empty()).then(|| first.path.clone()),
        download_uri: first.uris.first().cloned(),
    }
}

/// The top-level item below `work_dir` that contains `path`.
pub fn top_level_path(path: &Path, work_dir: &Path) -> Option<PathBuf> {
    let rel = path.strip_prefix(work_dir).ok()?;
    match rel.components().next()? {
        Component::Normal(name) => Some(work_dir.join(name)),
        _ => None,
    }
}

/// Name of the file, or of the top-level directory holding it.
pub fn name_from_path(path: &Path, work_dir: &Path) -> Option<String> {
    top_level_path(path, work_dir)
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .filter(|n| !n.is_empty())
}

/// Best known name for a job. Falls back to the metadata name, then to the
/// URI, which may differ from the final file name.
pub fn display_name(file: &FilePath, work_dir: &Path) -> String {
    if let Some(name) = file.path.as_deref().and_then(|p| name_from_path(p, work_dir)) {
        return name;
    }
    match (&file.input_path, &file.download_uri) {
        (Some(input), _) => match input.strip_prefix(METADATA_PREFIX) {
            Some(name) => name.to_string(),
            None => METADATA_NAME.to_string(),
        },
        (None, Some(uri)) => name_from_uri(uri),
        (None, None) => METADATA_NAME.to_string(),
    }
}

fn name_from_uri(uri: &str) -> String {
    let end = uri.find(['#', '?']).unwrap_or(uri.len());
    let trimmed = uri[..end].trim_end_matches('/');
    match trimmed.rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => METADATA_NAME.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, uri: Option<&str>) -> DaemonFile {
        DaemonFile { path: path.to_string(), uris: uri.map(|u| vec![u.to_string()]).unwrap_or_default() }
    }

    #[test]
    fn content_file_resolves_to_top_level_name() {
        let wd = Path::new("/dl/abc");
        let fp = find_file_path(&[file("/dl/abc/Show/ep1.mkv", None)], wd);
        assert_eq!(fp.path.as_deref(), Some(Path::new("/dl/abc/Show/ep1.mkv")));
        assert_eq!(display_name(&fp, wd), "Show");
        assert_eq!(top_level_path(Path::new("/dl/abc/Show/ep1.mkv"), wd), Some(PathBuf::from("/dl/abc/Show")));
    }

    #[test]
    fn torrent_file_is_metadata() {
        let wd = Path::new("/dl/abc");
        let fp = find_file_path(&[file("/dl/abc/x.torrent", None)], wd);
        assert!(fp.path.is_none());
        assert_eq!(display_name(&fp, wd), METADATA_NAME);
    }

    #[test]
    fn metadata_prefix_names_the_torrent() {
        let wd = Path::new("/dl/abc");
        let fp = find_file_path(&[file("[METADATA]ubuntu.iso", None)], wd);
        assert_eq!(display_name(&fp, wd), "ubuntu.iso");
    }

    #[test]
    fn uri_name_used_before_files_are_known() {
        let wd = Path::new("/dl/abc");
        let fp = find_file_path(&[file("", Some("https://host/a/file.zip?x=1#frag"))], wd);
        assert_eq!(display_name(&fp, wd), "file.zip");
        let empty = find_file_path(&[], wd);
        assert_eq!(display_name(&empty, wd), METADATA_NAME);
    }
}
