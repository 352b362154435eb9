use std::path::Path;

use crate::constants::UPGRADE_SKIP_MARKERS;
use git2::build::CheckoutBuilder;
use git2::{Error, Object, Repository};

fn resolve<'r>(repo: &'r Repository, git_ref: &str) -> Result<Object<'r>, Error> {
    repo.revparse_single(git_ref).map_err(|err| {
        let repo_path = repo.workdir().unwrap_or_else(|| repo.path()).display().to_string();
        let msg = format!(
            "Unable to use git reference {} on repository {}: {}",
            git_ref, repo_path, err
        );
        Error::from_str(&msg)
    })
}

/// Writes the tree of `git_ref` into `into_dir`, the repository itself (index, HEAD, working
/// tree) is left untouched.
pub fn export_ref<P, Q>(repo_dir: P, git_ref: &str, into_dir: Q) -> Result<(), Error>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let repo = Repository::discover(repo_dir.as_ref())?;
    let tree = resolve(&repo, git_ref)?.peel_to_tree()?;

    let mut checkout_opts = CheckoutBuilder::new();
    checkout_opts
        .target_dir(into_dir.as_ref())
        .update_index(false)
        .recreate_missing(true)
        .force();

    repo.checkout_tree(tree.as_object(), Some(&mut checkout_opts))
}

/// First commit between `base_ref` (excluded) and `HEAD` whose message opts out of the upgrade
/// test, as `<short id> <summary>`.
pub fn find_upgrade_skip_marker<P: AsRef<Path>>(repo_dir: P, base_ref: &str) -> Result<Option<String>, Error> {
    let repo = Repository::discover(repo_dir.as_ref())?;
    let base = resolve(&repo, base_ref)?.peel_to_commit()?;

    let mut revwalk = repo.revwalk()?;
    revwalk.push_head()?;
    revwalk.hide(base.id())?;

    for oid in revwalk {
        let commit = repo.find_commit(oid?)?;
        let message = commit.message().unwrap_or_default();

        if let Some(marker) = UPGRADE_SKIP_MARKERS.iter().find(|marker| message.contains(*marker)) {
            let short_id = commit.as_object().short_id()?;
            debug!("commit {} carries upgrade skip marker {}", commit.id(), marker);
            return Ok(Some(format!(
                "{} {}",
                short_id.as_str().unwrap_or_default(),
                commit.summary().unwrap_or_default()
            )));
        }
    }

    Ok(None)
}
