//! Clone tests against local fixture repositories.

use std::path::Path;
use std::process::Command;

fn git(args: &[&str], dir: &Path) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "test")
        .env("GIT_AUTHOR_EMAIL", "test@example.io")
        .env("GIT_COMMITTER_NAME", "test")
        .env("GIT_COMMITTER_EMAIL", "test@example.io")
        .status()
        .expect("git runs");
    assert!(status.success(), "git {args:?}");
}

fn seed_repository(dir: &Path) {
    git(&["init", "--initial-branch=main", "."], dir);
    std::fs::create_dir_all(dir.join("modules/vpc")).unwrap();
    std::fs::write(dir.join("main.tf"), "# root\n").unwrap();
    std::fs::write(dir.join("modules/vpc/main.tf"), "# vpc\n").unwrap();
    git(&["add", "."], dir);
    git(&["commit", "-m", "seed"], dir);
}

fn file_url(dir: &Path) -> String {
    format!("file://{}", dir.display())
}

#[tokio::test]
async fn test_workspace_clone_captures_commit() {
    let repo = tempfile::tempdir().unwrap();
    seed_repository(repo.path());

    let checkout = terrakube_git::clone_workspace(
        &file_url(repo.path()),
        "main",
        "PUBLIC",
        "",
        "",
        "",
        1,
    )
    .await
    .unwrap();

    assert!(checkout.path.join("main.tf").exists());
    assert_eq!(checkout.commit_id.len(), 40);

    std::fs::remove_dir_all(&checkout.root).unwrap();
}

#[tokio::test]
async fn test_workspace_clone_narrows_to_folder() {
    let repo = tempfile::tempdir().unwrap();
    seed_repository(repo.path());

    let checkout = terrakube_git::clone_workspace(
        &file_url(repo.path()),
        "main",
        "PUBLIC",
        "",
        "",
        "modules/vpc",
        2,
    )
    .await
    .unwrap();

    assert!(checkout.path.ends_with("modules/vpc"));
    assert!(checkout.path.join("main.tf").exists());
    assert_ne!(checkout.path, checkout.root);

    std::fs::remove_dir_all(&checkout.root).unwrap();
}

#[tokio::test]
async fn test_module_clone_prefers_v_tag() {
    let repo = tempfile::tempdir().unwrap();
    seed_repository(repo.path());
    git(&["tag", "v1.2.3"], repo.path());

    let checkout =
        terrakube_git::clone_module(&file_url(repo.path()), "1.2.3", "PUBLIC", "", "", "")
            .await
            .unwrap();

    assert!(checkout.path.join("main.tf").exists());
    std::fs::remove_dir_all(&checkout.root).unwrap();
}

#[tokio::test]
async fn test_module_clone_falls_back_to_bare_tag() {
    let repo = tempfile::tempdir().unwrap();
    seed_repository(repo.path());
    // Only the un-prefixed tag exists; the first attempt must fail and the
    // retry must land on it.
    git(&["tag", "1.2.3"], repo.path());

    let checkout = terrakube_git::clone_module(
        &file_url(repo.path()),
        "1.2.3",
        "PUBLIC",
        "",
        "",
        "modules/vpc",
    )
    .await
    .unwrap();

    assert!(checkout.path.ends_with("modules/vpc"));
    std::fs::remove_dir_all(&checkout.root).unwrap();
}

#[tokio::test]
async fn test_module_clone_unknown_version_fails() {
    let repo = tempfile::tempdir().unwrap();
    seed_repository(repo.path());
    git(&["tag", "v1.0.0"], repo.path());

    let err = terrakube_git::clone_module(&file_url(repo.path()), "9.9.9", "PUBLIC", "", "", "")
        .await
        .unwrap_err();
    assert!(matches!(err, terrakube_git::Error::CloneFailed { .. }));
}
