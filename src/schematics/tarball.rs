use crate::fs::archive_matching;
use crate::schematics::SchematicsError;
use std::path::{Path, PathBuf};

/// Template tarball uploaded to a workspace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tarball {
    pub path: PathBuf,
    /// Archived paths, relative to the repository root.
    pub files: Vec<String>,
}

pub struct TarballBuilder<'a> {
    root: &'a Path,
    include_patterns: &'a [String],
}

impl<'a> TarballBuilder<'a> {
    pub fn new(root: &'a Path, include_patterns: &'a [String]) -> Self {
        TarballBuilder { root, include_patterns }
    }

    /// Writes `<into_dir>/<name>.tar.gz`. A tarball without any file is an error, the service
    /// would only fail later with a less helpful message.
    pub fn build(&self, into_dir: &Path, name: &str) -> Result<Tarball, SchematicsError> {
        let path = into_dir.join(format!("{name}.tar.gz"));
        let files = archive_matching(self.root, self.include_patterns, &path)
            .map_err(|e| SchematicsError::Tarball(e.to_string()))?;

        if files.is_empty() {
            return Err(SchematicsError::EmptyTarball {
                root: self.root.display().to_string(),
            });
        }
        debug!("tarball {} content: {}", path.display(), files.join(", "));

        Ok(Tarball { path, files })
    }
}
