//! `readdir` / `readfile`: read-only access to a workspace directory.
//!
//! Paths are always relative to the workspace root; absolute paths and
//! `..` components are refused, and so is any symlink whose target lies
//! outside the root.

use std::io::Read;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use longform_shared::{LongformError, Result, Tool, required_str};
use serde_json::json;
use tracing::debug;

/// Entries never listed in a directory tree.
pub const DEFAULT_IGNORED: &[&str] = &[".git", "target", "node_modules", ".DS_Store"];

/// Bytes of a file returned by `readfile`.
const MAX_FILE_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    ignored: Vec<String>,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ignored: DEFAULT_IGNORED.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join a relative path onto the root, refusing escapes.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let relative = Path::new(relative.trim());
        let escape = || {
            LongformError::Tool(format!(
                "path '{}' escapes the workspace",
                relative.display()
            ))
        };

        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(escape());
                }
            }
        }

        // Symlinks: the deepest existing ancestor must stay under the real root.
        if let Ok(root) = self.root.canonicalize() {
            let existing = resolved
                .ancestors()
                .take_while(|p| p.starts_with(&self.root))
                .find(|p| p.symlink_metadata().is_ok());
            if let Some(existing) = existing {
                let real = existing.canonicalize().map_err(|_| escape())?;
                if !real.starts_with(&root) {
                    return Err(escape());
                }
            }
        }
        Ok(resolved)
    }

    /// Render the tree under `relative` as an indented list.
    pub fn directory_tree(&self, relative: &str) -> Result<String> {
        let start = self.resolve(relative)?;
        let mut out = String::new();
        self.walk(&start, 0, &mut out)?;
        Ok(out)
    }

    fn walk(&self, dir: &Path, depth: usize, out: &mut String) -> Result<()> {
        let entries = std::fs::read_dir(dir).map_err(|e| LongformError::io(dir, e))?;
        let mut entries: Vec<_> = entries
            .filter_map(|e| e.ok())
            .filter(|e| !self.ignored.iter().any(|i| e.file_name() == i.as_str()))
            .collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = entry.path();
            // Symlinked directories are listed but never followed.
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            out.push_str(&"  ".repeat(depth));
            out.push_str("|- ");
            out.push_str(&entry.file_name().to_string_lossy());
            out.push_str(if is_dir { " (directory)\n" } else { " (file)\n" });
            if is_dir {
                self.walk(&path, depth + 1, out)?;
            }
        }
        Ok(())
    }
}

/// Whole-workspace tree for a prompt, or `None` if the root is unreadable.
pub fn directory_tree(root: &Path) -> Option<String> {
    Workspace::new(root).directory_tree(".").ok()
}

pub struct ReadDirTool {
    workspace: Workspace,
}

impl ReadDirTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ReadDirTool {
    fn name(&self) -> &str {
        "readdir"
    }

    fn description(&self) -> &str {
        "List files in the given workspace directory"
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "directory path relative to the workspace root"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let path = required_str(&params, "path")?.to_string();
        let workspace = self.workspace.clone();
        debug!(%path, "listing workspace directory");

        let tree = tokio::task::spawn_blocking(move || workspace.directory_tree(&path))
            .await
            .map_err(|e| LongformError::Tool(format!("readdir task failed: {e}")))??;
        Ok(format!("**Directory Tree**:\n\n{tree}"))
    }
}

pub struct ReadFileTool {
    workspace: Workspace,
}

impl ReadFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "readfile"
    }

    fn description(&self) -> &str {
        "Read a text file from the workspace"
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "file path relative to the workspace root"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let path = self.workspace.resolve(required_str(&params, "path")?)?;
        debug!(path = %path.display(), "reading workspace file");

        let (bytes, truncated) = tokio::task::spawn_blocking(move || read_capped(&path))
            .await
            .map_err(|e| LongformError::Tool(format!("readfile task failed: {e}")))??;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        if truncated {
            Ok(format!("{text}\n\n[... truncated]"))
        } else {
            Ok(text)
        }
    }
}

/// Read at most `MAX_FILE_BYTES`, reporting whether more remained.
fn read_capped(path: &Path) -> Result<(Vec<u8>, bool)> {
    let file = std::fs::File::open(path).map_err(|e| LongformError::io(path, e))?;
    let mut bytes = Vec::new();
    file.take(MAX_FILE_BYTES + 1)
        .read_to_end(&mut bytes)
        .map_err(|e| LongformError::io(path, e))?;
    let truncated = bytes.len() as u64 > MAX_FILE_BYTES;
    bytes.truncate(MAX_FILE_BYTES as usize);
    Ok((bytes, truncated))
}
