use std::path::Path;
use std::process::Command;

use cfit_core::git::Git;
use cfit_core::worktree::{
    branch_name, cleanup_worktrees, list_worktrees, worktree_path, Removal, RemovalMethod,
};
use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) {
    let out = Command::new("git")
        .args(["-c", "user.name=cfit-test", "-c", "user.email=cfit@test.invalid"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("spawn git");
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}

fn init_repo(root: &Path, name: &str, with_commit: bool) -> std::path::PathBuf {
    let repo = root.join(name);
    std::fs::create_dir_all(&repo).unwrap();
    git(&repo, &["init", "-q"]);
    if with_commit {
        git(&repo, &["commit", "-q", "--allow-empty", "-m", "init"]);
    }
    repo
}

fn add_worktree(repo: &Path, task_id: &str) -> std::path::PathBuf {
    let wt = repo.join(".worktrees").join(format!("cfit-{task_id}"));
    std::fs::create_dir_all(wt.parent().unwrap()).unwrap();
    git(repo, &["worktree", "add", wt.to_str().unwrap(), "-b", &branch_name(task_id)]);
    assert!(wt.exists());
    wt
}

fn repos(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_cleanup_removes_worktree_and_branch() {
    let tmp = TempDir::new().unwrap();
    let repo = init_repo(tmp.path(), "myrepo", true);
    let wt = add_worktree(&repo, "123");

    let results = cleanup_worktrees(tmp.path(), "123", &repos(&["myrepo"]));

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].removal, Removal::Removed(RemovalMethod::Git));
    assert_eq!(results[0].path, wt);
    assert!(!wt.exists());
    assert!(!Git::new(&repo).branch_exists("fix/cfit-123").unwrap());
}

#[test]
fn test_cleanup_missing_worktree_is_noop() {
    let tmp = TempDir::new().unwrap();
    init_repo(tmp.path(), "myrepo", false);

    let results = cleanup_worktrees(tmp.path(), "999", &repos(&["myrepo"]));
    assert_eq!(results[0].removal, Removal::AlreadyAbsent);
    assert!(!results[0].is_failure());
}

#[test]
fn test_cleanup_falls_back_to_directory_removal() {
    let tmp = TempDir::new().unwrap();
    let repo = init_repo(tmp.path(), "myrepo", false);

    // A plain directory where the worktree should be: git refuses it.
    let wt = worktree_path(tmp.path(), "myrepo", "45678");
    std::fs::create_dir_all(&wt).unwrap();
    std::fs::write(wt.join("somefile.txt"), "dirty").unwrap();

    let results = cleanup_worktrees(tmp.path(), "45678", &repos(&["myrepo"]));
    assert_eq!(results[0].removal, Removal::Removed(RemovalMethod::Fallback));
    assert!(!wt.exists());
    assert!(repo.join(".worktrees").exists());
}

#[test]
fn test_cleanup_continues_after_fallback_failure() {
    let tmp = TempDir::new().unwrap();
    init_repo(tmp.path(), "a", false);
    init_repo(tmp.path(), "b", false);

    // A regular file can be removed by neither git nor remove_dir_all.
    let stuck = worktree_path(tmp.path(), "a", "12345");
    std::fs::create_dir_all(stuck.parent().unwrap()).unwrap();
    std::fs::write(&stuck, "not a directory").unwrap();
    let other = worktree_path(tmp.path(), "b", "12345");
    std::fs::create_dir_all(&other).unwrap();

    let results = cleanup_worktrees(tmp.path(), "12345", &repos(&["a", "b"]));

    assert_eq!(results.len(), 2);
    assert!(matches!(results[0].removal, Removal::Failed(ref e) if e.contains("remove_dir_all")));
    assert!(stuck.exists());
    assert_eq!(results[1].removal, Removal::Removed(RemovalMethod::Fallback));
    assert!(!other.exists());
}

#[test]
fn test_cleanup_dirty_worktree_is_forced() {
    let tmp = TempDir::new().unwrap();
    let repo = init_repo(tmp.path(), "myrepo", true);
    let wt = add_worktree(&repo, "24680");
    std::fs::write(wt.join("uncommitted.rs"), "fn main() {}").unwrap();

    let results = cleanup_worktrees(tmp.path(), "24680", &repos(&["myrepo"]));
    assert!(matches!(results[0].removal, Removal::Removed(_)));
    assert!(!wt.exists());
}

#[test]
fn test_cleanup_multiple_repos_independently() {
    let tmp = TempDir::new().unwrap();
    let repo_a = init_repo(tmp.path(), "repo_a", true);
    init_repo(tmp.path(), "repo_b", false);
    let wt = add_worktree(&repo_a, "55555");

    let results = cleanup_worktrees(tmp.path(), "55555", &repos(&["repo_a", "repo_b"]));
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].repo, "repo_a");
    assert!(matches!(results[0].removal, Removal::Removed(_)));
    assert_eq!(results[1].repo, "repo_b");
    assert_eq!(results[1].removal, Removal::AlreadyAbsent);
    assert!(!wt.exists());
}

#[test]
fn test_cleanup_only_touches_own_ticket() {
    let tmp = TempDir::new().unwrap();
    let repo = init_repo(tmp.path(), "myrepo", true);
    let mine = add_worktree(&repo, "11111");
    let other = add_worktree(&repo, "22222");

    cleanup_worktrees(tmp.path(), "11111", &repos(&["myrepo"]));
    assert!(!mine.exists());
    assert!(other.exists());
    assert!(Git::new(&repo).branch_exists("fix/cfit-22222").unwrap());
}

#[test]
fn test_cleanup_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let repo = init_repo(tmp.path(), "myrepo", true);
    add_worktree(&repo, "13579");

    let first = cleanup_worktrees(tmp.path(), "13579", &repos(&["myrepo"]));
    let second = cleanup_worktrees(tmp.path(), "13579", &repos(&["myrepo"]));
    assert!(matches!(first[0].removal, Removal::Removed(_)));
    assert_eq!(second[0].removal, Removal::AlreadyAbsent);
}

#[test]
fn test_cleanup_workspace_root_as_repo() {
    let tmp = TempDir::new().unwrap();
    git(tmp.path(), &["init", "-q"]);
    git(tmp.path(), &["commit", "-q", "--allow-empty", "-m", "init"]);
    let wt = add_worktree(tmp.path(), "31415");

    let results = cleanup_worktrees(tmp.path(), "31415", &repos(&["."]));
    assert!(matches!(results[0].removal, Removal::Removed(_)));
    assert!(!wt.exists());
}

#[test]
fn test_cleanup_nonexistent_workspace() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope");
    let results = cleanup_worktrees(&missing, "12345", &repos(&["a", "b"]));
    assert!(results.iter().all(|r| r.removal == Removal::AlreadyAbsent));
}

#[test]
fn test_cleanup_refuses_unsafe_identifier() {
    let tmp = TempDir::new().unwrap();
    let victim = tmp.path().join("myrepo").join("keep");
    std::fs::create_dir_all(&victim).unwrap();

    let results = cleanup_worktrees(tmp.path(), "../../myrepo", &repos(&["myrepo"]));
    assert!(results[0].is_failure());
    assert!(victim.exists());
}

#[test]
fn test_list_worktrees_shows_active() {
    let tmp = TempDir::new().unwrap();
    let repo = init_repo(tmp.path(), "myrepo", true);
    let b = add_worktree(&repo, "78901");
    let a = add_worktree(&repo, "12345");
    // Not ours.
    std::fs::create_dir_all(repo.join(".worktrees").join("task-1")).unwrap();

    let found = list_worktrees(tmp.path(), &repos(&["myrepo"]));
    assert_eq!(found, vec![a, b]);
}

#[test]
fn test_list_worktrees_empty() {
    let tmp = TempDir::new().unwrap();
    init_repo(tmp.path(), "myrepo", false);
    assert!(list_worktrees(tmp.path(), &repos(&["myrepo", "missing"])).is_empty());
}
