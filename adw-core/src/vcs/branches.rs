use git2::build::CheckoutBuilder;
use git2::{BranchType, Error, ErrorCode, Repository};
use std::path::Path;

/// Determine a repository's primary branch: prefer `origin/HEAD`, then
/// `main`/`master`, then the most recently committed local branch.
pub fn detect_primary_branch_in<P: AsRef<Path>>(repo_path: P) -> Option<String> {
    let repo = Repository::open(repo_path).ok()?;

    if let Ok(ref_remote_head) = repo.find_reference("refs/remotes/origin/HEAD")
        && let Some(symbolic) = ref_remote_head.symbolic_target()
        && let Some(name) = symbolic.strip_prefix("refs/remotes/origin/")
        && repo.find_branch(name, BranchType::Local).is_ok()
    {
        return Some(name.to_string());
    }

    for candidate in ["main", "master"] {
        if repo.find_branch(candidate, BranchType::Local).is_ok() {
            return Some(candidate.to_string());
        }
    }

    let mut newest: Option<(String, i64)> = None;
    if let Ok(branches) = repo.branches(Some(BranchType::Local)) {
        for (branch, _) in branches.flatten() {
            if let Ok(commit) = branch.get().peel_to_commit()
                && let Ok(Some(name)) = branch.name()
            {
                let seconds = commit.time().seconds();
                match newest {
                    Some((_, current)) if current >= seconds => {}
                    _ => {
                        newest = Some((name.to_string(), seconds));
                    }
                }
            }
        }
    }

    newest.map(|(name, _)| name)
}

pub fn branch_exists_in<P: AsRef<Path>>(repo_path: P, name: &str) -> Result<bool, Error> {
    let repo = Repository::open(repo_path)?;
    match repo.find_branch(name, BranchType::Local) {
        Ok(_) => Ok(true),
        Err(err) if err.code() == ErrorCode::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

pub fn create_branch_from_in<P: AsRef<Path>>(
    repo_path: P,
    base: &str,
    new_branch: &str,
) -> Result<(), Error> {
    let repo = Repository::open(repo_path)?;
    let base_branch = repo.find_branch(base, BranchType::Local)?;
    let commit = base_branch.into_reference().peel_to_commit()?;
    repo.branch(new_branch, &commit, false)?;
    Ok(())
}

pub fn delete_branch_in<P: AsRef<Path>>(repo_path: P, name: &str) -> Result<(), Error> {
    let repo = Repository::open(repo_path)?;
    match repo.find_branch(name, BranchType::Local) {
        Ok(mut branch) => branch.delete(),
        Err(err) if err.code() == ErrorCode::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

pub fn checkout_branch_in<P: AsRef<Path>>(repo_path: P, name: &str) -> Result<(), Error> {
    let repo = Repository::open(repo_path)?;
    let mut checkout = CheckoutBuilder::new();
    checkout.force();
    repo.set_head(&format!("refs/heads/{name}"))?;
    repo.checkout_head(Some(&mut checkout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn init_repo(dir: &Path) {
        let run = |args: &[&str]| {
            assert!(Command::new("git").args(args).current_dir(dir).status().unwrap().success());
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
    fn create_and_find_branch() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        assert!(branch_exists_in(tmp.path(), "main").unwrap());
        assert!(!branch_exists_in(tmp.path(), "nope").unwrap());
        create_branch_from_in(tmp.path(), "main", "feature").unwrap();
        assert!(branch_exists_in(tmp.path(), "feature").unwrap());
        delete_branch_in(tmp.path(), "feature").unwrap();
        assert!(!branch_exists_in(tmp.path(), "feature").unwrap());
    }
}
