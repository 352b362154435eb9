use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs::{self, File, create_dir_all};
use std::io::{Error, ErrorKind};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use itertools::Itertools;
use regex::Regex;
use walkdir::{DirEntry, WalkDir};

/// Terraform working files which never belong to a copy or an archive of a configuration.
const TERRAFORM_LOCAL_FILES: [&str; 3] = [".terraform", "terraform.tfstate", "terraform.tfstate.d"];

fn is_terraform_local_file(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    TERRAFORM_LOCAL_FILES.contains(&name.as_ref())
        || name.starts_with(".terraform-")
        || name.starts_with("terraform.tfstate.")
        || name.ends_with(".tfplan")
}

pub fn copy_files(from: &Path, to: &Path) -> Result<(), Error> {
    create_dir_all(to)?;

    for entry in WalkDir::new(from)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| !is_terraform_local_file(e))
    {
        let entry = entry.map_err(|e| Error::other(e.to_string()))?;
        let relative_path = entry
            .path()
            .strip_prefix(from)
            .map_err(|err| Error::new(ErrorKind::InvalidInput, err))?;
        let dest = to.join(relative_path);

        if entry.file_type().is_dir() {
            create_dir_all(&dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }

    Ok(())
}

/// Copies a terraform configuration into a fresh directory under the system temp dir, leaving
/// local state and provider caches behind. The directory is not removed automatically so that
/// state survives a failed run, see [`remove_dir_if_exists`].
pub fn copy_terraform_dir_to_temp(terraform_dir: &Path, name: &str) -> Result<PathBuf, Error> {
    let dir_name = terraform_dir.file_name().unwrap_or_else(|| OsStr::new("terraform"));
    let temp_root = tempfile::Builder::new().prefix(&format!("{name}-")).tempdir()?.keep();
    let dest = temp_root.join(dir_name);

    copy_files(terraform_dir, &dest)?;
    debug!("terraform dir {} copied to {}", terraform_dir.display(), dest.display());

    Ok(dest)
}

pub fn remove_dir_if_exists(dir: &Path) -> Result<(), Error> {
    if !dir.exists() {
        return Ok(());
    }

    fs::remove_dir_all(dir)
}

/// Compiles include patterns, relative to a root directory. `*` matches within a path segment,
/// `?` a single character, a leading `/` is ignored.
pub fn include_patterns_to_regex(patterns: &[String]) -> Result<Regex, regex::Error> {
    let alternatives = patterns
        .iter()
        .map(|pattern| {
            regex::escape(pattern.trim_start_matches('/'))
                .replace("\\*", "[^/]*")
                .replace("\\?", "[^/]")
        })
        .map(|pattern| format!("(?:{pattern})"))
        .join("|");

    Regex::new(&format!("^(?:{alternatives})$"))
}

/// Archives every file under `root_dir` whose relative path matches one of `include_patterns`
/// into the `.tar.gz` file `archive_path`. Returns the archived relative paths, sorted.
pub fn archive_matching(root_dir: &Path, include_patterns: &[String], archive_path: &Path) -> Result<Vec<String>, Error> {
    let matcher =
        include_patterns_to_regex(include_patterns).map_err(|err| Error::new(ErrorKind::InvalidInput, err))?;
    let excluded_dirs: HashSet<&'static OsStr> = vec![OsStr::new(".git"), OsStr::new(".terraform")]
        .into_iter()
        .collect();

    let mut files = vec![];
    for entry in WalkDir::new(root_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !excluded_dirs.contains(&e.file_name()))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                error!("Cannot read file {:?}", err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let relative_path = entry
            .path()
            .strip_prefix(root_dir)
            .map_err(|err| Error::new(ErrorKind::InvalidInput, err))?
            .to_string_lossy()
            .replace('\\', "/");
        if matcher.is_match(&relative_path) {
            files.push((entry.path().to_path_buf(), relative_path));
        }
    }

    if let Some(parent) = archive_path.parent() {
        create_dir_all(parent)?;
    }
    let enc = GzEncoder::new(File::create(archive_path)?, Compression::default());
    let mut tar = tar::Builder::new(enc);
    for (path, relative_path) in files.iter() {
        tar.append_path_with_name(path, relative_path)?;
    }
    tar.into_inner()?.finish()?;

    info!("{} files archived into {}", files.len(), archive_path.display());
    Ok(files.into_iter().map(|(_, relative_path)| relative_path).collect())
}
