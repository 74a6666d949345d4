//! `branch_differs_from_base` (C2): does a feature branch carry at least
//! one commit not reachable from base? On any lookup failure the answer
//! is `false` — "no divergence" is the safe classification, since the
//! only caller-visible use is "should the pipeline treat this as having
//! produced work".

use std::path::Path;

use git2::Repository;

/// Returns true iff `feature` contains at least one commit not
/// reachable from `base`, i.e. `graph_ahead_behind(base, feature).0 > 0`.
/// A missing `feature` or `base` ref, or any other lookup error, yields
/// `false` rather than propagating an error.
pub fn branch_differs_from_base_in<P: AsRef<Path>>(repo_path: P, feature: &str, base: &str) -> bool {
    let resolve = || -> Result<bool, git2::Error> {
        let repo = Repository::open(repo_path.as_ref())?;
        let feature_oid = repo
            .find_branch(feature, git2::BranchType::Local)?
            .get()
            .target()
            .ok_or_else(|| git2::Error::from_str("feature branch has no direct target"))?;
        let base_oid = repo
            .find_branch(base, git2::BranchType::Local)?
            .get()
            .target()
            .ok_or_else(|| git2::Error::from_str("base branch has no direct target"))?;
        let (ahead, _behind) = repo.graph_ahead_behind(feature_oid, base_oid)?;
        Ok(ahead > 0)
    };
    resolve().unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::process::Command;

    fn git(dir: &Path, args: &[&str]) {
        assert!(
            Command::new("git")
                .args(args)
                .current_dir(dir)
                .status()
                .unwrap()
                .success(),
            "git {args:?} failed"
        );
    }

    fn init_repo(dir: &Path) {
        git(dir, &["init", "-q"]);
        git(dir, &["config", "user.email", "test@example.com"]);
        git(dir, &["config", "user.name", "Test"]);
        std::fs::write(dir.join("README.md"), "# test\n").unwrap();
        git(dir, &["add", "."]);
        git(dir, &["commit", "-q", "-m", "initial"]);
        git(dir, &["branch", "-M", "develop"]);
    }

    fn commit_file(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), "content\n").unwrap();
        git(dir, &["add", "."]);
        git(dir, &["commit", "-q", "-m", name]);
    }

    #[test]
    fn diverges_with_unique_commits() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        git(tmp.path(), &["checkout", "-q", "-b", "feature-branch"]);
        commit_file(tmp.path(), "feature.txt");
        assert!(branch_differs_from_base_in(tmp.path(), "feature-branch", "develop"));
    }

    #[test]
    fn identical_to_base_does_not_diverge() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        git(tmp.path(), &["checkout", "-q", "-b", "feature-branch"]);
        assert!(!branch_differs_from_base_in(tmp.path(), "feature-branch", "develop"));
    }

    #[test]
    fn behind_base_does_not_diverge() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        git(tmp.path(), &["checkout", "-q", "-b", "feature-branch"]);
        git(tmp.path(), &["checkout", "-q", "develop"]);
        commit_file(tmp.path(), "develop-feature.txt");
        assert!(!branch_differs_from_base_in(tmp.path(), "feature-branch", "develop"));
    }

    #[test]
    fn nonexistent_branch_returns_false() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        assert!(!branch_differs_from_base_in(tmp.path(), "does-not-exist", "develop"));
    }

    #[test]
    fn nonexistent_base_returns_false() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        git(tmp.path(), &["checkout", "-q", "-b", "feature-branch"]);
        commit_file(tmp.path(), "feature.txt");
        assert!(!branch_differs_from_base_in(tmp.path(), "feature-branch", "does-not-exist"));
    }

    #[test]
    fn multiple_commits_still_diverge() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        git(tmp.path(), &["checkout", "-q", "-b", "feature-branch"]);
        commit_file(tmp.path(), "feature1.txt");
        commit_file(tmp.path(), "feature2.txt");
        assert!(branch_differs_from_base_in(tmp.path(), "feature-branch", "develop"));
    }
}
