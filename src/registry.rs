//! File-backed project registry.
//!
//! One JSON record per project, named `<id>.json` inside the projects
//! directory. The registry is the single source of truth for which projects
//! exist; backends and the quota engine only ever hold transient views of
//! its contents.
//!
//! Writes go through a temp file + rename so a crash mid-write never leaves
//! a partially-written record observable.

use crate::error::{Error, Result};
use crate::project::{Project, ProjectId};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Durable store of per-project configuration, keyed by [`ProjectId`].
pub struct ProjectRegistry {
    dir: PathBuf,
}

impl ProjectRegistry {
    /// Opens the registry at `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The directory project records live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_file(&self, id: &ProjectId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Lists all registered project IDs, sorted ascending.
    ///
    /// The stable ordering is a contract: callers rely on it for display
    /// and for deterministic quota aggregation.
    pub fn list(&self) -> Result<Vec<ProjectId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            match ProjectId::new(stem) {
                Ok(id) => ids.push(id),
                Err(_) => warn!("ignoring stray registry file {name}"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Whether a record for `id` exists.
    pub fn exists(&self, id: &ProjectId) -> bool {
        self.record_file(id).exists()
    }

    /// Loads the project record, failing with [`Error::NoSuchProject`] if
    /// absent.
    pub fn get(&self, id: &ProjectId) -> Result<Project> {
        let file = self.record_file(id);
        let text = match fs::read_to_string(&file) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NoSuchProject(id.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        let project: Project = serde_json::from_str(&text)?;
        Ok(project)
    }

    /// Loads every registered project, sorted by ID.
    pub fn all(&self) -> Result<Vec<Project>> {
        self.list()?.iter().map(|id| self.get(id)).collect()
    }

    /// Loads every registered project except `id`, sorted by ID.
    pub fn all_except(&self, id: &ProjectId) -> Result<Vec<Project>> {
        Ok(self.all()?.into_iter().filter(|p| &p.id != id).collect())
    }

    /// Fails with [`Error::AlreadyExists`] when a record for `id` exists.
    /// Used as the create precondition.
    pub fn require_absent(&self, id: &ProjectId) -> Result<()> {
        if self.exists(id) {
            return Err(Error::AlreadyExists(id.clone()));
        }
        Ok(())
    }

    /// Fails with [`Error::NoSuchProject`] when no record for `id` exists.
    pub fn require_exists(&self, id: &ProjectId) -> Result<()> {
        if !self.exists(id) {
            return Err(Error::NoSuchProject(id.clone()));
        }
        Ok(())
    }

    /// Creates or overwrites the record for `project.id`.
    ///
    /// The record is validated, written to a temp file and renamed into
    /// place, so readers never observe a partial record.
    pub fn put(&self, project: &Project) -> Result<()> {
        project.validate()?;
        let file = self.record_file(&project.id);
        info!("writing project record {}", file.display());
        let json = project.to_json()?;
        let tmp = file.with_extension("json.tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &file)?;
        Ok(())
    }

    /// Deletes the record for `id`. Idempotent: absence is logged, not an
    /// error, because delete is also used for best-effort cleanup.
    pub fn delete(&self, id: &ProjectId) -> Result<()> {
        let file = self.record_file(id);
        match fs::remove_file(&file) {
            Ok(()) => {
                info!("deleted project record {}", file.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("{} doesn't exist, nothing deleted", file.display());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
