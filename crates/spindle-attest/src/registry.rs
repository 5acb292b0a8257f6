//! The path-checker registry.
//!
//! Files are registered as they are scanned; statements are associated
//! only when every subject maps to a registered (path, digest) pair, so
//! an attestation can never name a file the pipeline did not touch.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::digest::Sha256Digest;
use crate::error::AttestError;
use crate::predicates::{Predicate, SourceDirectory};
use crate::statement::Statement;
use crate::summary::{PathCheckSummary, PathCheckSummaryCollection};
use crate::vcs::{NewPathChecker, PathChecker};

/// Key for registered and mutated paths: repo-root-relative path plus
/// the file digest observed at registration time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RegistryKey {
    pub path: String,
    pub digest: Sha256Digest,
}

/// Post-update bookkeeping: (path, post-update digest) → pre-update digest.
pub type Mutations = BTreeMap<RegistryKey, Sha256Digest>;

struct BaseDir {
    checker: Box<dyn PathChecker>,
    summary: PathCheckSummary,
    from_repo_root: String,
}

/// Registers scanned files, binds statements to them, and renders the
/// whole run as a sorted statement stream.
pub struct PathCheckerRegistry {
    new_path_checker: NewPathChecker,
    registry: BTreeMap<RegistryKey, Box<dyn PathChecker>>,
    mutated_paths: Mutations,
    statements: Vec<Statement>,
    base: Option<BaseDir>,
    from_work_dir: PathBuf,
}

impl PathCheckerRegistry {
    pub fn new(dir: &Path, new_path_checker: NewPathChecker) -> Self {
        Self {
            new_path_checker,
            registry: BTreeMap::new(),
            mutated_paths: Mutations::new(),
            statements: Vec::new(),
            base: None,
            from_work_dir: dir.to_path_buf(),
        }
    }

    /// Summarise the base directory itself; its repo-relative path
    /// anchors every subsequently registered file.
    pub fn init(&mut self) -> Result<(), AttestError> {
        let mut checker =
            (self.new_path_checker)(self.from_work_dir.clone(), Sha256Digest::default());
        let summary = checker.make_summary()?;
        self.base = Some(BaseDir {
            from_repo_root: summary.path.clone(),
            summary,
            checker,
        });
        Ok(())
    }

    pub fn base_dir_summary(&self) -> Option<&PathCheckSummary> {
        self.base.as_ref().map(|b| &b.summary)
    }

    fn dir(&self) -> String {
        if let Some(base) = &self.base {
            if !base.from_repo_root.is_empty() {
                return base.from_repo_root.clone();
            }
        }
        let work_dir = self.from_work_dir.to_string_lossy();
        if work_dir.is_empty() {
            ".".to_owned()
        } else {
            work_dir.into_owned()
        }
    }

    fn path_from_repo_root(&self, path: &str) -> String {
        let base = self.base.as_ref().map(|b| b.from_repo_root.as_str()).unwrap_or("");
        join_slash(base, path)
    }

    fn path_from_work_dir(&self, path: &str) -> PathBuf {
        self.from_work_dir.join(path)
    }

    /// Register a scanned file under its work-dir-relative path.
    pub fn register(&mut self, path: &str, digest: Sha256Digest) -> Result<(), AttestError> {
        let key = RegistryKey {
            path: self.path_from_repo_root(path),
            digest,
        };
        if self.registry.contains_key(&key) {
            return Err(AttestError::AlreadyRegistered {
                path: key.path,
                digest: key.digest.to_string(),
            });
        }
        let checker = (self.new_path_checker)(
            self.path_from_work_dir(path),
            key.digest.clone(),
        );
        self.registry.insert(key, checker);
        Ok(())
    }

    /// Replace the mutated-path map, rewriting keys to be
    /// repo-root-relative. Called once after an update round.
    pub fn register_mutated(&mut self, mutations: Mutations) {
        self.mutated_paths = mutations
            .into_iter()
            .map(|(key, old_digest)| {
                (
                    RegistryKey {
                        path: self.path_from_repo_root(&key.path),
                        digest: key.digest,
                    },
                    old_digest,
                )
            })
            .collect();
    }

    /// Rewrite every subject to repo-root-relative form and verify it
    /// names a registered (or mutated) path.
    pub fn associate_statements(
        &mut self,
        statements: Vec<Statement>,
    ) -> Result<(), AttestError> {
        for mut statement in statements {
            statement.visit_subjects(|subject| {
                let path = self.path_from_repo_root(&subject.name);
                let key = RegistryKey {
                    path: path.clone(),
                    digest: subject.digest.clone(),
                };
                if !self.registry.contains_key(&key)
                    && (self.mutated_paths.is_empty()
                        || !self.mutated_paths.contains_key(&key))
                {
                    return Err(AttestError::IrrelevantSubject {
                        name: subject.name.clone(),
                        digest: subject.digest.to_string(),
                        resolved: path,
                    });
                }
                subject.name = path;
                Ok(())
            })?;
            self.statements.push(statement);
        }
        Ok(())
    }

    /// Summarise the base directory together with every registered file.
    pub fn make_summary_collection(
        &mut self,
    ) -> Result<PathCheckSummaryCollection, AttestError> {
        let mut summaries = Vec::with_capacity(self.registry.len() + 1);
        if let Some(base) = self.base.as_mut() {
            summaries.push(base.checker.make_summary()?);
        }
        for checker in self.registry.values_mut() {
            summaries.push(checker.make_summary()?);
        }
        Ok(PathCheckSummaryCollection::from_summaries(summaries))
    }

    /// Build the `ManifestDir` statement over the whole collection.
    /// Unlike [`Self::associate_statements`] no subject rewriting runs;
    /// collection paths are already repo-root-relative.
    pub fn associate_core_statements(&mut self) -> Result<(), AttestError> {
        let collection = self.make_summary_collection()?;
        let statement = Statement::new(
            Predicate::ManifestDir(SourceDirectory {
                path: self.dir(),
                vcs_entries: Some(collection.clone()),
            }),
            collection.subjects(),
        );
        for subject in statement.subjects() {
            let key = RegistryKey {
                path: subject.name.clone(),
                digest: subject.digest.clone(),
            };
            if !self.registry.contains_key(&key) {
                return Err(AttestError::IrrelevantSubject {
                    name: subject.name.clone(),
                    digest: subject.digest.to_string(),
                    resolved: subject.name.clone(),
                });
            }
        }
        self.statements.push(statement);
        Ok(())
    }

    /// Statements in their total order; emission order never matters
    /// because every consumer goes through here.
    pub fn get_statements(&mut self) -> &[Statement] {
        self.statements.sort_by(|a, b| a.compare(b));
        &self.statements
    }

    /// Write each statement as one line of in-toto JSON.
    pub fn encode_all(&mut self, writer: &mut dyn Write) -> Result<(), AttestError> {
        self.get_statements();
        crate::statement::encode_statements(&self.statements, writer)
    }
}

fn join_slash(base: &str, path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in base.split('/').chain(path.split('/')) {
        if part.is_empty() || part == "." {
            continue;
        }
        parts.push(part);
    }
    if parts.is_empty() {
        ".".to_owned()
    } else {
        parts.join("/")
    }
}
