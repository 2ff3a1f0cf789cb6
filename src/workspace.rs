//! Per-request workspace.
//!
//! Each request gets its own uniquely-named temporary directory holding the
//! source file and, for compiled languages, the build artifact. The workspace
//! is released when dropped, so every exit path of the pipeline cleans up.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::WorkspaceError;
use crate::toolchain::{CompileStrategy, TemplateVars, ToolchainDescriptor};

/// Ephemeral filesystem scope for a single request. Never shared.
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    guard: Option<TempDir>,
    source: PathBuf,
    name: String,
    artifact: Option<PathBuf>,
}

impl Workspace {
    /// Create the workspace under `root` and write `code` into the source file.
    ///
    /// For compiled toolchains the artifact path is derived here but the file
    /// does not exist until the compiler produces it.
    pub fn acquire(
        root: &Path,
        descriptor: &ToolchainDescriptor,
        code: &str,
    ) -> Result<Self, WorkspaceError> {
        let guard = tempfile::Builder::new()
            .prefix("polyexec-")
            .tempdir_in(root)
            .map_err(|source| WorkspaceError::Create {
                root: root.to_path_buf(),
                source,
            })?;
        let dir = guard.path().to_path_buf();

        // Alphanumeric suffix keeps the stem a valid module/crate identifier.
        let mut file = tempfile::Builder::new()
            .prefix("guest_")
            .rand_bytes(8)
            .suffix(&format!(".{}", descriptor.extension))
            .tempfile_in(&dir)
            .map_err(|source| WorkspaceError::Write {
                path: dir.clone(),
                source,
            })?;
        if let Err(source) = file.write_all(code.as_bytes()) {
            return Err(WorkspaceError::Write {
                path: file.path().to_path_buf(),
                source,
            });
        }
        let (_, source) = file.keep().map_err(|e| WorkspaceError::Write {
            path: e.file.path().to_path_buf(),
            source: e.error,
        })?;

        let name = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let artifact = descriptor.compile.as_ref().map(|strategy| match strategy {
            CompileStrategy::SingleArtifact { .. } => source.with_extension(""),
            CompileStrategy::ProjectBuild { artifact, .. } => {
                let vars = TemplateVars {
                    source: &source,
                    artifact: None,
                    name: &name,
                    dir: &dir,
                };
                dir.join(vars.expand(artifact))
            }
        });

        debug!(
            dir = %dir.display(),
            source = %source.display(),
            code_len = code.len(),
            "Workspace created"
        );

        Ok(Self {
            dir,
            guard: Some(guard),
            source,
            name,
            artifact,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn source_path(&self) -> &Path {
        &self.source
    }

    /// Source file base name without extension.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    /// Template values for this workspace.
    pub fn vars(&self) -> TemplateVars<'_> {
        TemplateVars {
            source: &self.source,
            artifact: self.artifact.as_deref(),
            name: &self.name,
            dir: &self.dir,
        }
    }

    /// Write an auxiliary file (e.g. a build manifest) into the workspace.
    pub fn write_file(&self, file_name: &str, contents: &str) -> Result<PathBuf, WorkspaceError> {
        let path = self.dir.join(file_name);
        std::fs::write(&path, contents).map_err(|source| WorkspaceError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Delete the source, the artifact and the directory. Idempotent; errors
    /// are logged and swallowed.
    pub fn release(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };

        remove_quietly(&self.source);
        if let Some(artifact) = &self.artifact {
            remove_quietly(artifact);
        }
        if let Err(e) = guard.close() {
            debug!(dir = %self.dir.display(), error = %e, "Failed to remove workspace directory");
        }

        debug!(dir = %self.dir.display(), "Workspace released");
    }

    /// Release on the blocking pool. Project builds can leave large trees
    /// behind, and removing them should not stall an async worker.
    pub async fn close(mut self) {
        let dir = self.dir.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || self.release()).await {
            warn!(dir = %dir.display(), error = %e, "Workspace release task failed");
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.release();
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::LanguageRegistry;

    #[test]
    fn acquire_writes_source() {
        let root = tempfile::tempdir().unwrap();
        let registry = LanguageRegistry::builtin();
        let ws = Workspace::acquire(root.path(), registry.get("python").unwrap(), "print(1)\n")
            .unwrap();

        assert!(ws.dir().starts_with(root.path()));
        assert_eq!(ws.source_path().parent(), Some(ws.dir()));
        assert_eq!(ws.source_path().extension().unwrap(), "py");
        assert!(ws.name().starts_with("guest_"));
        assert_eq!(std::fs::read_to_string(ws.source_path()).unwrap(), "print(1)\n");
        assert!(ws.artifact_path().is_none());
    }

    #[test]
    fn single_artifact_path_strips_extension() {
        let root = tempfile::tempdir().unwrap();
        let registry = LanguageRegistry::builtin();
        let ws = Workspace::acquire(root.path(), registry.get("rust").unwrap(), "fn main() {}")
            .unwrap();

        let artifact = ws.artifact_path().unwrap();
        assert_eq!(artifact, ws.source_path().with_extension(""));
        assert_eq!(artifact.file_name().unwrap().to_string_lossy(), ws.name());
        assert!(!artifact.exists());
    }

    #[test]
    fn project_build_artifact_uses_fixed_location() {
        let root = tempfile::tempdir().unwrap();
        let registry = LanguageRegistry::builtin();
        let ws = Workspace::acquire(root.path(), registry.get("lean4").unwrap(), "").unwrap();

        let expected = ws.dir().join(".lake/build/bin").join(ws.name());
        assert_eq!(ws.artifact_path(), Some(expected.as_path()));
    }

    #[test]
    fn names_are_unique() {
        let root = tempfile::tempdir().unwrap();
        let desc = ToolchainDescriptor::interpreted("sh", "sh", &["sh", "{source}"]);
        let a = Workspace::acquire(root.path(), &desc, "").unwrap();
        let b = Workspace::acquire(root.path(), &desc, "").unwrap();
        assert_ne!(a.dir(), b.dir());
        assert_ne!(a.source_path(), b.source_path());
    }

    #[test]
    fn drop_removes_everything() {
        let root = tempfile::tempdir().unwrap();
        let registry = LanguageRegistry::builtin();
        let ws = Workspace::acquire(root.path(), registry.get("cpp").unwrap(), "int main(){}")
            .unwrap();

        let dir = ws.dir().to_path_buf();
        let source = ws.source_path().to_path_buf();
        let artifact = ws.artifact_path().unwrap().to_path_buf();
        std::fs::write(&artifact, b"binary").unwrap();
        ws.write_file("extra.o", "obj").unwrap();

        drop(ws);
        assert!(!source.exists());
        assert!(!artifact.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn release_tolerates_missing_files() {
        let root = tempfile::tempdir().unwrap();
        let registry = LanguageRegistry::builtin();
        let mut ws = Workspace::acquire(root.path(), registry.get("haskell").unwrap(), "")
            .unwrap();

        std::fs::remove_file(ws.source_path()).unwrap();
        ws.release();
        ws.release();
        assert!(!ws.dir().exists());
    }

    #[tokio::test]
    async fn close_removes_build_tree() {
        let root = tempfile::tempdir().unwrap();
        let registry = LanguageRegistry::builtin();
        let ws = Workspace::acquire(root.path(), registry.get("lean4").unwrap(), "").unwrap();

        let dir = ws.dir().to_path_buf();
        let build = dir.join(".lake/build/bin");
        std::fs::create_dir_all(&build).unwrap();
        std::fs::write(build.join(ws.name()), b"binary").unwrap();

        ws.close().await;
        assert!(!dir.exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn acquire_fails_for_missing_root() {
        let desc = ToolchainDescriptor::interpreted("sh", "sh", &["sh", "{source}"]);
        let err = Workspace::acquire(Path::new("/nonexistent/polyexec-root"), &desc, "")
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::Create { .. }));
    }
}
