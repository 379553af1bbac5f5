use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use maple_evolution_types::{ImplementationRecord, ModificationId, ModificationType, SelfModification};
use tracing::debug;

use super::{CapabilityOutcome, ModificationCapability};

struct FileSnapshot {
    path: PathBuf,
    /// `None` when the file did not exist before the edit.
    previous: Option<String>,
}

/// Writes `change` to the file `target`, relative to a workspace root.
///
/// Targets must stay inside the root: absolute paths and `..` components are
/// refused.
pub struct CodeEditCapability {
    root: PathBuf,
    snapshots: Mutex<HashMap<ModificationId, FileSnapshot>>,
}

impl CodeEditCapability {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, target: &str) -> Result<PathBuf, String> {
        let relative = Path::new(target);
        if target.trim().is_empty() {
            return Err("empty target path".to_string());
        }
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir => {
                    return Err(format!("target '{target}' escapes the workspace"));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(format!("target '{target}' must be relative"));
                }
            }
        }
        Ok(self.root.join(relative))
    }

    fn has_snapshot(&self, id: &ModificationId) -> Result<bool, String> {
        self.snapshots
            .lock()
            .map(|s| s.contains_key(id))
            .map_err(|_| "snapshot lock poisoned".to_string())
    }

    async fn write(&self, modification: &SelfModification) -> Result<PathBuf, String> {
        let path = self.resolve(&modification.target)?;
        if self.has_snapshot(&modification.id)? {
            return Err(format!("modification {} already applied", modification.id));
        }

        let previous = match tokio::fs::read_to_string(&path).await {
            Ok(text) => Some(text),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(format!("cannot read {}: {e}", path.display())),
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("cannot create {}: {e}", parent.display()))?;
        }
        tokio::fs::write(&path, &modification.change)
            .await
            .map_err(|e| format!("cannot write {}: {e}", path.display()))?;

        self.snapshots
            .lock()
            .map_err(|_| "snapshot lock poisoned".to_string())?
            .insert(
                modification.id.clone(),
                FileSnapshot {
                    path: path.clone(),
                    previous,
                },
            );
        Ok(path)
    }

    async fn restore(&self, modification_id: &ModificationId) -> Result<PathBuf, String> {
        let snapshot = self
            .snapshots
            .lock()
            .map_err(|_| "snapshot lock poisoned".to_string())?
            .remove(modification_id)
            .ok_or_else(|| format!("no snapshot for modification {modification_id}"))?;

        let result = match &snapshot.previous {
            Some(text) => tokio::fs::write(&snapshot.path, text).await,
            None => match tokio::fs::remove_file(&snapshot.path).await {
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        match result {
            Ok(()) => Ok(snapshot.path),
            Err(e) => {
                let message = format!("cannot restore {}: {e}", snapshot.path.display());
                // keep the snapshot so a later revert can retry
                if let Ok(mut snapshots) = self.snapshots.lock() {
                    snapshots.insert(modification_id.clone(), snapshot);
                }
                Err(message)
            }
        }
    }
}

#[async_trait]
impl ModificationCapability for CodeEditCapability {
    fn modification_type(&self) -> ModificationType {
        ModificationType::CodeEdit
    }

    async fn apply(&self, modification: &SelfModification) -> CapabilityOutcome {
        match self.write(modification).await {
            Ok(path) => {
                debug!(path = %path.display(), "code edit written");
                CapabilityOutcome::ok(format!("wrote {}", modification.target))
            }
            Err(e) => CapabilityOutcome::failed(e),
        }
    }

    async fn revert(&self, record: &ImplementationRecord) -> CapabilityOutcome {
        match self.restore(&record.modification_id).await {
            Ok(path) => {
                debug!(path = %path.display(), "code edit reverted");
                CapabilityOutcome::ok(format!("restored {}", record.target))
            }
            Err(e) => CapabilityOutcome::failed(e),
        }
    }
}
