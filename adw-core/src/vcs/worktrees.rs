use git2::{BranchType, Error, Repository, WorktreeAddOptions, WorktreePruneOptions};
use std::fs;
use std::path::{Path, PathBuf};

/// `ensure_worktree` (C2): create a fresh feature branch off `base_branch`
/// named for `run_id`, register a worktree for it under
/// `<repo_path>/trees/<run_id>`, and return the worktree path. The feature
/// branch name and worktree directory are both derived from `run_id`,
/// which callers must have already verified is collision-free (see
/// `allocate_run_id` in the dispatcher).
pub fn ensure_worktree_in<P: AsRef<Path>>(
    repo_path: P,
    run_id: &str,
    base_branch: &str,
) -> Result<(PathBuf, String), Error> {
    let repo_path = repo_path.as_ref();
    let repo = Repository::open(repo_path)?;
    let feature_branch = format!("adw/{}", sanitize_branch_component(run_id));
    let base = repo.find_branch(base_branch, BranchType::Local)?;
    let base_commit = base.into_reference().peel_to_commit()?;
    repo.branch(&feature_branch, &base_commit, false)?;

    let worktree_path = repo_path.join("trees").join(run_id);
    if let Err(err) =
        add_worktree_for_branch_in(repo_path, run_id, &worktree_path, &feature_branch)
    {
        let _ = repo.find_branch(&feature_branch, BranchType::Local).map(|mut b| b.delete());
        return Err(err);
    }
    Ok((worktree_path, feature_branch))
}

pub fn add_worktree_for_branch_in<P: AsRef<Path>, Q: AsRef<Path>>(
    repo_path: P,
    worktree_name: &str,
    path: Q,
    branch_name: &str,
) -> Result<(), Error> {
    let repo = Repository::open(repo_path)?;
    let path = path.as_ref();
    let target_refname = format!("refs/heads/{branch_name}");
    match add_worktree_for_reference(&repo, worktree_name, path, &target_refname) {
        Ok(()) => Ok(()),
        Err(err) if branch_already_checked_out(&err) => {
            add_worktree_for_checked_out_branch(&repo, worktree_name, path, branch_name)
        }
        Err(err) => Err(err),
    }
}

fn add_worktree_for_reference(
    repo: &Repository,
    worktree_name: &str,
    path: &Path,
    reference_name: &str,
) -> Result<(), Error> {
    let mut opts = WorktreeAddOptions::new();
    opts.checkout_existing(true);
    let reference = repo.find_reference(reference_name)?;
    opts.reference(Some(&reference));
    repo.worktree(worktree_name, path, Some(&opts))?;
    Ok(())
}

fn add_worktree_for_checked_out_branch(
    repo: &Repository,
    worktree_name: &str,
    path: &Path,
    branch_name: &str,
) -> Result<(), Error> {
    let target_refname = format!("refs/heads/{branch_name}");
    let target_reference = repo.find_reference(&target_refname)?;
    let target_oid = target_reference.target().ok_or_else(|| {
        Error::from_str(&format!(
            "branch `{branch_name}` does not resolve to a direct commit target"
        ))
    })?;
    let target_commit = repo.find_commit(target_oid)?;

    let temp_branch_name = allocate_temp_branch_name(repo, worktree_name)?;
    repo.branch(&temp_branch_name, &target_commit, false)?;
    let temp_refname = format!("refs/heads/{temp_branch_name}");

    let add_result = add_worktree_for_reference(repo, worktree_name, path, &temp_refname);
    let mut cleanup_error: Option<Error> = None;

    if add_result.is_ok()
        && let Err(err) = repoint_worktree_head(path, &target_refname)
    {
        cleanup_error = Some(err);
    }

    if let Ok(mut temp_branch) = repo.find_branch(&temp_branch_name, BranchType::Local)
        && let Err(err) = temp_branch.delete()
        && cleanup_error.is_none()
    {
        cleanup_error = Some(err);
    }

    if let Some(err) = cleanup_error {
        return Err(err);
    }

    add_result
}

fn allocate_temp_branch_name(repo: &Repository, worktree_name: &str) -> Result<String, Error> {
    let sanitized = sanitize_branch_component(worktree_name);
    for attempt in 0..1000 {
        let candidate = format!("__adw/worktree/{sanitized}/{attempt}");
        if repo
            .find_reference(&format!("refs/heads/{candidate}"))
            .is_err()
        {
            return Ok(candidate);
        }
    }
    Err(Error::from_str(
        "could not allocate unique temporary branch for worktree add",
    ))
}

fn sanitize_branch_component(value: &str) -> String {
    let mut sanitized = value
        .chars()
        .map(|ch| match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => ch,
            _ => '-',
        })
        .collect::<String>();
    if sanitized.trim_matches('-').is_empty() {
        sanitized = "worktree".to_string();
    }
    sanitized.trim_matches('-').to_string()
}

fn repoint_worktree_head(worktree_path: &Path, target_refname: &str) -> Result<(), Error> {
    let worktree_repo = Repository::open(worktree_path)?;
    let head_path = worktree_repo.path().join("HEAD");
    fs::write(&head_path, format!("ref: {target_refname}\n"))
        .map_err(|err| Error::from_str(&format!("failed to update worktree HEAD: {err}")))
}

fn branch_already_checked_out(err: &Error) -> bool {
    err.message().contains("already checked out")
}

/// `release_worktree`: prune the worktree registration (and optionally
/// its working directory). Per spec.md §4.2 callers must invoke this
/// exactly once per successful `ensure_worktree`; enforcing that is out
/// of core scope.
pub fn remove_worktree_in<P: AsRef<Path>>(
    repo_path: P,
    worktree_name: &str,
    remove_dir: bool,
) -> Result<(), Error> {
    let repo = Repository::open(repo_path)?;
    let worktree = repo.find_worktree(worktree_name)?;
    let mut opts = WorktreePruneOptions::new();
    opts.valid(true).locked(true).working_tree(remove_dir);
    worktree.prune(Some(&mut opts))
}

pub fn find_worktree_name_by_path_in<P: AsRef<Path>, Q: AsRef<Path>>(
    repo_path: P,
    worktree_path: Q,
) -> Result<Option<String>, Error> {
    let repo = Repository::open(repo_path)?;
    let target = match worktree_path.as_ref().canonicalize() {
        Ok(path) => path,
        Err(_) => return Ok(None),
    };
    let worktrees = repo.worktrees()?;
    for name in worktrees.iter().flatten() {
        if let Ok(worktree) = repo.find_worktree(name)
            && worktree.path().canonicalize().ok() == Some(target.clone())
        {
            return Ok(Some(name.to_string()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn init_repo(dir: &Path) {
        let run = |args: &[&str]| {
            assert!(
                Command::new("git")
                    .args(args)
                    .current_dir(dir)
                    .status()
                    .unwrap()
                    .success()
            );
        };
        run(&["init", "-q"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "Test"]);
        std::fs::write(dir.join("README.md"), "hi\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-q", "-m", "init"]);
        run(&["branch", "-M", "main"]);
    }

    #[test]
    fn ensure_worktree_creates_branch_and_checkout() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());

        let (path, branch) = ensure_worktree_in(tmp.path(), "run-123", "main").unwrap();
        assert!(path.exists());
        assert_eq!(branch, "adw/run-123");
        assert_eq!(
            find_worktree_name_by_path_in(tmp.path(), &path).unwrap(),
            Some("run-123".to_string())
        );
    }

    #[test]
    fn release_worktree_prunes_registration() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let (path, _branch) = ensure_worktree_in(tmp.path(), "run-456", "main").unwrap();
        remove_worktree_in(tmp.path(), "run-456", true).unwrap();
        assert!(!path.exists());
    }
}
