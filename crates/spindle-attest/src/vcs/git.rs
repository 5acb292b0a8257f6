//! Git path checking.
//!
//! Uses `gix` for repository discovery and object access, and shells out
//! to `git status --porcelain` / `git log` for worktree status and path
//! history, which the pure-Rust stack does not expose cheaply.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::digest::Sha256Digest;
use crate::error::AttestError;
use crate::summary::{
    GitObject, GitReference, GitSignature, GitSummary, GitTag, PathCheckSummary,
};
use crate::vcs::PathChecker;

pub const PROVIDER_NAME: &str = "git";

const PRIMARY_REMOTE_NAME: &str = "origin";

const PGP_BEGIN: &str = "-----BEGIN PGP SIGNATURE-----";
const PGP_END: &str = "-----END PGP SIGNATURE-----";

pub fn new_path_checker(path: PathBuf, digest: Sha256Digest) -> Box<dyn PathChecker> {
    Box::new(GitPathChecker::new(path, digest))
}

pub struct GitPathChecker {
    path: PathBuf,
    digest: Sha256Digest,
    cache: Option<Cache>,
}

#[derive(Clone, Copy, PartialEq)]
enum ObjectKind {
    Blob,
    Tree,
}

struct Cache {
    repo: gix::Repository,
    abs_path: PathBuf,
    repo_path: String,
    kind: Option<ObjectKind>,
    entry_id: Option<gix::ObjectId>,
    blob_hash: Option<String>,
    checked: bool,
    unmodified: bool,
}

impl GitPathChecker {
    pub fn new(path: PathBuf, digest: Sha256Digest) -> Self {
        Self {
            path,
            digest,
            cache: None,
        }
    }

    fn git_err(context: &str, err: impl std::fmt::Display) -> AttestError {
        AttestError::Git(format!("{context}: {err}"))
    }

    fn is_tree(&self) -> bool {
        matches!(
            self.cache.as_ref().and_then(|c| c.kind),
            Some(ObjectKind::Tree)
        )
    }

    fn ensure_checked(&mut self) -> Result<(), AttestError> {
        let checked = self.cache.as_ref().is_some_and(|c| c.checked);
        if !checked {
            let (checked, _) = self.check()?;
            if !checked {
                return Err(AttestError::NotChecked(self.path.display().to_string()));
            }
        }
        Ok(())
    }
}

impl PathChecker for GitPathChecker {
    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn detect_repo(&mut self) -> Result<bool, AttestError> {
        let abs_path = std::path::absolute(&self.path)?;
        let start = if abs_path.is_dir() {
            abs_path.clone()
        } else {
            abs_path.parent().unwrap_or(&abs_path).to_path_buf()
        };
        match gix::discover(&start) {
            Ok(repo) => {
                self.cache = Some(Cache {
                    repo,
                    abs_path,
                    repo_path: String::new(),
                    kind: None,
                    entry_id: None,
                    blob_hash: None,
                    checked: false,
                    unmodified: false,
                });
                Ok(true)
            }
            Err(_) => {
                self.cache = None;
                Ok(false)
            }
        }
    }

    fn check(&mut self) -> Result<(bool, bool), AttestError> {
        if self.cache.is_none() && !self.detect_repo()? {
            return Ok((false, false));
        }
        // take the cache out so the tree walk below does not pin `self`
        let Some(mut cache) = self.cache.take() else {
            return Ok((false, false));
        };

        let workdir = cache
            .repo
            .worktree()
            .map(|worktree| worktree.base().to_path_buf())
            .ok_or_else(|| AttestError::Git("bare repository has no worktree".to_owned()))?;
        let repo_path = match cache.abs_path.strip_prefix(&workdir) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_owned(),
            Ok(rel) => slash_path(rel),
            Err(_) => return Ok((false, false)),
        };
        cache.repo_path = repo_path.clone();

        let resolved = {
            use gix::objs::tree::EntryKind;
            let head_commit = cache
                .repo
                .head_commit()
                .map_err(|e| Self::git_err("failed to read HEAD commit", e))?;
            let tree = head_commit
                .tree()
                .map_err(|e| Self::git_err("failed to read HEAD tree", e))?;
            if repo_path == "." {
                Some((ObjectKind::Tree, tree.id))
            } else {
                match tree
                    .lookup_entry_by_path(&repo_path, &mut Vec::new())
                    .map_err(|e| Self::git_err("failed to look up path in HEAD tree", e))?
                {
                    None => None,
                    Some(entry) => {
                        let kind = match entry.mode().kind() {
                            EntryKind::Blob | EntryKind::BlobExecutable => ObjectKind::Blob,
                            EntryKind::Tree => ObjectKind::Tree,
                            other => {
                                return Err(AttestError::UnsupportedObject {
                                    path: repo_path,
                                    mode: format!("{other:?}"),
                                });
                            }
                        };
                        Some((kind, entry.oid().to_owned()))
                    }
                }
            }
        };

        let Some((kind, entry_id)) = resolved else {
            return Ok((false, false));
        };
        cache.kind = Some(kind);
        cache.entry_id = Some(entry_id);
        cache.checked = true;

        match kind {
            ObjectKind::Blob => {
                // compare the working-tree contents, not the staged or
                // committed blob
                let data = std::fs::read(&cache.abs_path)?;
                let committed = cache
                    .repo
                    .find_object(entry_id)
                    .map_err(|e| Self::git_err("failed to read committed blob", e))?;
                cache.unmodified = committed.data == data;
                cache.blob_hash = if cache.unmodified {
                    Some(entry_id.to_hex().to_string())
                } else {
                    Some(worktree_blob_hash(&workdir, &cache.abs_path)?)
                };
            }
            ObjectKind::Tree => {
                let output = Command::new("git")
                    .args(["status", "--porcelain", "--"])
                    .arg(&cache.repo_path)
                    .current_dir(&workdir)
                    .output()?;
                if !output.status.success() {
                    return Err(AttestError::Git(format!(
                        "git status failed: {}",
                        String::from_utf8_lossy(&output.stderr).trim()
                    )));
                }
                cache.unmodified = output.stdout.is_empty();
            }
        }

        let result = (cache.checked, cache.unmodified);
        self.cache = Some(cache);
        Ok(result)
    }

    fn make_summary(&mut self) -> Result<PathCheckSummary, AttestError> {
        self.ensure_checked()?;
        let is_dir = self.is_tree();
        let cache = self.cache.as_ref().ok_or_else(|| {
            AttestError::Git("repository cache unexpectedly empty".to_owned())
        })?;
        let repo = &cache.repo;

        let head_id = repo
            .head_commit()
            .map_err(|e| Self::git_err("failed to read HEAD commit", e))?
            .id;

        let mut reference = match repo
            .head_ref()
            .map_err(|e| Self::git_err("failed to read HEAD reference", e))?
        {
            Some(head_ref) => GitReference {
                name: head_ref.name().as_bstr().to_string(),
                hash: head_id.to_hex().to_string(),
                ref_type: "symbolic".to_owned(),
                target: head_ref.name().shorten().to_string(),
                tags: Vec::new(),
                signature: None,
            },
            None => GitReference {
                name: "HEAD".to_owned(),
                hash: head_id.to_hex().to_string(),
                ref_type: "detached".to_owned(),
                target: String::new(),
                tags: Vec::new(),
                signature: None,
            },
        };

        if let Ok(commit_obj) = repo.find_object(head_id) {
            if let Some(pgp) = extract_pgp_signature(&commit_obj.data) {
                reference.signature = Some(GitSignature {
                    pgp,
                    validated: false,
                });
            }
        }

        reference.tags = tags_pointing_at(repo, head_id)?;

        let mut object = GitObject::default();
        if cache.unmodified {
            object.tree_hash = cache
                .entry_id
                .map(|id| id.to_string())
                .unwrap_or_default();
            object.commit_hash = last_commit_for_path(repo, &cache.repo_path)?;
        } else if cache.kind == Some(ObjectKind::Blob) {
            // no committed hash matches the worktree, record what is there
            object.tree_hash = cache.blob_hash.clone().unwrap_or_default();
        }

        let mut remotes = BTreeMap::new();
        for name in repo.remote_names() {
            let name = name.to_string();
            if let Ok(remote) = repo.find_remote(name.as_str()) {
                if let Some(url) = remote.url(gix::remote::Direction::Fetch) {
                    remotes.insert(name, vec![url.to_bstring().to_string()]);
                }
            }
        }
        let uri = remotes
            .get(PRIMARY_REMOTE_NAME)
            .or_else(|| remotes.values().next())
            .and_then(|urls| urls.first())
            .cloned();

        Ok(PathCheckSummary {
            unmodified: cache.unmodified,
            path: cache.repo_path.clone(),
            uri,
            is_dir,
            digest: self.digest.clone(),
            git: Some(GitSummary {
                object,
                remotes,
                reference,
            }),
        })
    }
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn extract_pgp_signature(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let start = text.find(PGP_BEGIN)?;
    let end = text[start..].find(PGP_END)? + start + PGP_END.len();
    Some(text[start..end].to_owned())
}

fn tags_pointing_at(
    repo: &gix::Repository,
    head_id: gix::ObjectId,
) -> Result<Vec<GitTag>, AttestError> {
    let mut tags = Vec::new();
    let references = repo
        .references()
        .map_err(|e| GitPathChecker::git_err("failed to iterate references", e))?;
    let tag_refs = references
        .tags()
        .map_err(|e| GitPathChecker::git_err("failed to iterate tags", e))?;
    for tag_ref in tag_refs {
        let mut tag_ref =
            tag_ref.map_err(|e| GitPathChecker::git_err("failed to read tag", e))?;
        let direct = tag_ref.target().try_id().map(|id| id.to_owned());
        let peeled = tag_ref
            .peel_to_id_in_place()
            .map_err(|e| GitPathChecker::git_err("failed to peel tag", e))?
            .detach();
        if peeled != head_id {
            continue;
        }
        let mut tag = GitTag {
            name: tag_ref.name().shorten().to_string(),
            hash: direct.map(|id| id.to_string()).unwrap_or_default(),
            target: peeled.to_string(),
            signature: None,
        };
        if tag.hash != tag.target {
            // annotated tags have their own object, which may be signed
            if let Some(tag_id) = direct {
                if let Ok(tag_obj) = repo.find_object(tag_id) {
                    if let Some(pgp) = extract_pgp_signature(&tag_obj.data) {
                        tag.signature = Some(GitSignature {
                            pgp,
                            validated: false,
                        });
                    }
                }
            }
        }
        tags.push(tag);
    }
    Ok(tags)
}

/// Git object hash of a file's current working-tree contents.
fn worktree_blob_hash(workdir: &Path, path: &Path) -> Result<String, AttestError> {
    let output = Command::new("git")
        .args(["hash-object", "--"])
        .arg(path)
        .current_dir(workdir)
        .output()?;
    if !output.status.success() {
        return Err(AttestError::Git(format!(
            "git hash-object failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
}

/// Hash of the most recent commit touching `repo_path`, in committer-time
/// order from `HEAD`.
fn last_commit_for_path(
    repo: &gix::Repository,
    repo_path: &str,
) -> Result<String, AttestError> {
    let Some(workdir) = repo.worktree().map(|worktree| worktree.base().to_path_buf()) else {
        return Ok(String::new());
    };
    let output = Command::new("git")
        .args(["log", "-1", "--format=%H", "--"])
        .arg(repo_path)
        .current_dir(&workdir)
        .output()?;
    if !output.status.success() {
        return Err(AttestError::Git(format!(
            "git log failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git(dir: &Path, args: &[&str]) {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .expect("git invocation failed");
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    /// Create a temporary git repo with a committed manifest file.
    fn init_test_repo(dir: &Path) {
        git(dir, &["init"]);
        git(dir, &["config", "user.email", "test@test.com"]);
        git(dir, &["config", "user.name", "Test"]);
        std::fs::create_dir_all(dir.join("manifests")).expect("mkdir");
        std::fs::write(
            dir.join("manifests/app.yaml"),
            "kind: Deployment\nmetadata:\n  name: app\n",
        )
        .expect("write");
        git(dir, &["add", "."]);
        git(dir, &["commit", "-m", "initial"]);
    }

    #[test]
    fn unmodified_tracked_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        init_test_repo(tmp.path());

        let mut checker = GitPathChecker::new(
            tmp.path().join("manifests/app.yaml"),
            Sha256Digest::default(),
        );
        let (checked, unmodified) = checker.check().expect("check should succeed");
        assert!(checked, "committed file should be checked");
        assert!(unmodified, "untouched file should be unmodified");
    }

    #[test]
    fn modified_tracked_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        init_test_repo(tmp.path());

        let path = tmp.path().join("manifests/app.yaml");
        let mut contents = std::fs::read(&path).expect("read");
        contents.extend_from_slice(b"# trailing\n");
        std::fs::write(&path, contents).expect("write");

        let mut checker = GitPathChecker::new(path, Sha256Digest::default());
        let (checked, unmodified) = checker.check().expect("check should succeed");
        assert!(checked);
        assert!(!unmodified, "appended bytes should mark the file modified");
    }

    #[test]
    fn untracked_file_is_not_checked() {
        let tmp = tempfile::tempdir().expect("tempdir");
        init_test_repo(tmp.path());

        let path = tmp.path().join("manifests/new.yaml");
        std::fs::write(&path, "kind: Service\n").expect("write");

        let mut checker = GitPathChecker::new(path, Sha256Digest::default());
        let (checked, _) = checker.check().expect("check should succeed");
        assert!(!checked, "untracked file should not be checked");
    }

    #[test]
    fn directory_with_modified_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        init_test_repo(tmp.path());

        std::fs::write(
            tmp.path().join("manifests/app.yaml"),
            "kind: Deployment\nmetadata:\n  name: renamed\n",
        )
        .expect("write");

        let mut checker =
            GitPathChecker::new(tmp.path().join("manifests"), Sha256Digest::default());
        let (checked, unmodified) = checker.check().expect("check should succeed");
        assert!(checked, "committed directory should be checked");
        assert!(!unmodified, "directory containing a modified file");
    }

    #[test]
    fn outside_a_repository() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::write(tmp.path().join("app.yaml"), "kind: Pod\n").expect("write");

        let mut checker =
            GitPathChecker::new(tmp.path().join("app.yaml"), Sha256Digest::default());
        // /tmp may itself sit under a repository in exotic setups; only
        // assert that detection does not error
        let _ = checker.detect_repo().expect("detection should not fail");
    }

    #[test]
    fn summary_for_tracked_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        init_test_repo(tmp.path());
        git(
            tmp.path(),
            &["remote", "add", "origin", "https://example.com/repo.git"],
        );
        git(tmp.path(), &["tag", "v0.1.0"]);

        let digest = Sha256Digest::of_bytes(b"irrelevant");
        let mut checker = GitPathChecker::new(
            tmp.path().join("manifests/app.yaml"),
            digest.clone(),
        );
        let summary = checker.make_summary().expect("summary should succeed");

        assert!(summary.unmodified);
        assert_eq!(summary.path, "manifests/app.yaml");
        assert!(!summary.is_dir);
        assert_eq!(summary.digest, digest);
        assert_eq!(summary.uri.as_deref(), Some("https://example.com/repo.git"));

        let git_summary = summary.git.expect("git detail");
        assert_eq!(git_summary.reference.hash.len(), 40);
        assert_eq!(git_summary.object.commit_hash, git_summary.reference.hash);
        assert_eq!(git_summary.remotes.len(), 1);
        assert_eq!(git_summary.reference.tags.len(), 1);
        assert_eq!(git_summary.reference.tags[0].name, "v0.1.0");
    }
}
