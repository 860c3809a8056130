//! Sandboxed access to the generated project's workspace directory.
//!
//! Every operation resolves its path argument through [`Workspace::resolve`]
//! before touching storage. Resolution rejects anything that lands outside the
//! canonical root: `..` traversal, absolute paths elsewhere on disk, and
//! symlinks (including dangling ones) that point out of the tree.

use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::io::process::run_command_with_timeout;

pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 100_000;

/// Failures of a single workspace operation. None of them poison the workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("path escapes workspace root: {path}")]
    PathEscape { path: String },
    #[error("not a directory: {path}")]
    NotADirectory { path: String },
    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Process(#[from] anyhow::Error),
}

impl WorkspaceError {
    fn escape(path: &str) -> Self {
        WorkspaceError::PathEscape {
            path: path.to_string(),
        }
    }

    fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        WorkspaceError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result of a shell command run inside the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// File-backed store confined to a single root directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    output_limit_bytes: usize,
}

impl Workspace {
    /// Open (creating if needed) the workspace rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, WorkspaceError> {
        let root = root.as_ref();
        fs::create_dir_all(root).map_err(|e| WorkspaceError::io("create root", root, e))?;
        let root = fs::canonicalize(root).map_err(|e| WorkspaceError::io("resolve root", root, e))?;
        debug!(root = %root.display(), "workspace opened");
        Ok(Self {
            root,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        })
    }

    pub fn with_output_limit(mut self, output_limit_bytes: usize) -> Self {
        self.output_limit_bytes = output_limit_bytes;
        self
    }

    /// Canonical absolute root of the workspace.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn current_directory(&self) -> String {
        self.root.display().to_string()
    }

    /// Map `path` to an absolute location inside the root.
    ///
    /// Relative paths are joined onto the root; absolute paths are accepted only
    /// when they already point inside it.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, WorkspaceError> {
        let raw = Path::new(path);
        let joined = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.root.join(raw)
        };
        let normalized = normalize_lexically(&joined).ok_or_else(|| WorkspaceError::escape(path))?;
        if !normalized.starts_with(&self.root) {
            return Err(WorkspaceError::escape(path));
        }
        let resolved = resolve_symlinks(&normalized, path)?;
        if !resolved.starts_with(&self.root) {
            return Err(WorkspaceError::escape(path));
        }
        Ok(resolved)
    }

    /// Write `content` to `path`, creating parent directories and replacing any
    /// existing file.
    #[instrument(skip(self, content), fields(bytes = content.len()))]
    pub fn write(&self, path: &str, content: &str) -> Result<PathBuf, WorkspaceError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| WorkspaceError::io("create directory", parent, e))?;
        }
        fs::write(&target, content).map_err(|e| WorkspaceError::io("write", &target, e))?;
        Ok(target)
    }

    /// Read `path` as UTF-8. A missing file reads as empty content.
    #[instrument(skip(self))]
    pub fn read(&self, path: &str) -> Result<String, WorkspaceError> {
        let target = self.resolve(path)?;
        match fs::read_to_string(&target) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(WorkspaceError::io("read", &target, e)),
        }
    }

    /// Recursively list regular files under `directory`, as sorted
    /// root-relative `/`-separated paths.
    #[instrument(skip(self))]
    pub fn list(&self, directory: &str) -> Result<Vec<String>, WorkspaceError> {
        let target = self.resolve(directory)?;
        if !target.is_dir() {
            return Err(WorkspaceError::NotADirectory {
                path: directory.to_string(),
            });
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&target).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&target).to_path_buf();
                WorkspaceError::io("list", &path, std::io::Error::other(e))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                files.push(to_slash(relative));
            }
        }
        Ok(files)
    }

    /// Run `command` through `sh -c` with `cwd` (default: the root) as working
    /// directory. A timeout is reported in the result, never as an error.
    #[instrument(skip(self), fields(timeout_ms = timeout.as_millis() as u64))]
    pub fn run(
        &self,
        command: &str,
        cwd: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandResult, WorkspaceError> {
        let workdir = match cwd {
            Some(dir) => self.resolve(dir)?,
            None => self.root.clone(),
        };
        if !workdir.is_dir() {
            return Err(WorkspaceError::NotADirectory {
                path: cwd.unwrap_or(".").to_string(),
            });
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&workdir);
        let output = run_command_with_timeout(cmd, None, timeout, self.output_limit_bytes)?;

        let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        stdout.push_str(&output.stdout_truncated_notice("command"));
        let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        stderr.push_str(&output.stderr_truncated_notice("command"));
        if output.timed_out {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!(
                "command timed out after {:.1}s and was killed\n",
                timeout.as_secs_f64()
            ));
        }

        Ok(CommandResult {
            exit_code: output.exit_code(),
            stdout,
            stderr,
            timed_out: output.timed_out,
        })
    }
}

/// Collapse `.` and `..` without touching the filesystem.
///
/// Returns `None` when `..` would climb above the filesystem root.
fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(name) => out.push(name),
        }
    }
    Some(out)
}

/// Canonicalize the longest existing prefix of `path` and re-append the rest.
fn resolve_symlinks(path: &Path, original: &str) -> Result<PathBuf, WorkspaceError> {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<OsString> = Vec::new();
    loop {
        match fs::symlink_metadata(&existing) {
            Ok(_) => break,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let Some(name) = existing.file_name() else {
                    return Err(WorkspaceError::escape(original));
                };
                tail.push(name.to_os_string());
                existing.pop();
            }
            Err(e) => return Err(WorkspaceError::io("inspect", &existing, e)),
        }
    }

    // A dangling symlink cannot be canonicalized; refuse it rather than let a
    // later write follow it somewhere unknown.
    let mut resolved = fs::canonicalize(&existing).map_err(|_| WorkspaceError::escape(original))?;
    for name in tail.iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::open(temp.path().join("project")).expect("open");
        (temp, ws)
    }

    #[test]
    fn resolve_rejects_traversal_and_foreign_absolute_paths() {
        let (_temp, ws) = workspace();
        for path in [
            "..",
            "../secret.txt",
            "src/../../secret.txt",
            "./a/b/../../../x",
            "/etc/passwd",
            "/",
        ] {
            let err = ws.resolve(path).unwrap_err();
            assert!(
                matches!(err, WorkspaceError::PathEscape { .. }),
                "{path} should escape, got {err}"
            );
        }
    }

    #[test]
    fn resolve_accepts_paths_inside_root() {
        let (_temp, ws) = workspace();
        assert_eq!(ws.resolve(".").expect("dot"), ws.root());
        assert_eq!(ws.resolve("").expect("empty"), ws.root());
        assert_eq!(
            ws.resolve("src/../main.py").expect("inner traversal"),
            ws.root().join("main.py")
        );
        let nested = ws.resolve("a/b/c.txt").expect("nested");
        assert!(nested.is_absolute());
        assert!(nested.starts_with(ws.root()));

        let absolute = ws.root().join("docs/readme.md");
        assert_eq!(
            ws.resolve(absolute.to_str().expect("utf8")).expect("absolute inside"),
            absolute
        );
    }

    #[cfg(unix)]
    #[test]
    fn resolve_rejects_symlinks_leaving_root() {
        let (temp, ws) = workspace();
        let outside = temp.path().join("outside");
        fs::create_dir_all(&outside).expect("outside dir");
        std::os::unix::fs::symlink(&outside, ws.root().join("link")).expect("symlink");
        std::os::unix::fs::symlink(temp.path().join("nowhere"), ws.root().join("dangling"))
            .expect("dangling symlink");

        assert!(matches!(
            ws.resolve("link/file.txt"),
            Err(WorkspaceError::PathEscape { .. })
        ));
        assert!(matches!(
            ws.write("link/file.txt", "x"),
            Err(WorkspaceError::PathEscape { .. })
        ));
        assert!(matches!(
            ws.write("dangling", "x"),
            Err(WorkspaceError::PathEscape { .. })
        ));
        assert!(!outside.join("file.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn resolve_follows_symlinks_within_root() {
        let (_temp, ws) = workspace();
        fs::create_dir_all(ws.root().join("real")).expect("dir");
        std::os::unix::fs::symlink(ws.root().join("real"), ws.root().join("alias"))
            .expect("symlink");
        assert_eq!(
            ws.resolve("alias/x.txt").expect("inside"),
            ws.root().join("real/x.txt")
        );
    }

    #[test]
    fn read_missing_file_is_empty() {
        let (_temp, ws) = workspace();
        assert_eq!(ws.read("does/not/exist.py").expect("read"), "");
    }

    #[test]
    fn write_then_read_returns_exact_content() {
        let (_temp, ws) = workspace();
        for (path, content) in [
            ("empty.txt", ""),
            ("nested/dir/multi.py", "line one\n\tline two\r\nline three"),
            ("unicode.md", "héllo – wörld\n"),
        ] {
            ws.write(path, content).expect("write");
            assert_eq!(ws.read(path).expect("read"), content);
        }
    }

    #[test]
    fn write_overwrites_existing_content() {
        let (_temp, ws) = workspace();
        ws.write("main.py", "a long first version").expect("write");
        ws.write("main.py", "short").expect("overwrite");
        assert_eq!(ws.read("main.py").expect("read"), "short");
    }

    #[test]
    fn list_is_recursive_sorted_and_relative() {
        let (_temp, ws) = workspace();
        ws.write("b.py", "").expect("write");
        ws.write("a/z.py", "").expect("write");
        ws.write("a/b/c.py", "").expect("write");

        assert_eq!(
            ws.list(".").expect("list"),
            vec!["a/b/c.py", "a/z.py", "b.py"]
        );
        assert_eq!(ws.list("a/b").expect("list sub"), vec!["a/b/c.py"]);
    }

    #[test]
    fn list_rejects_files_and_escapes() {
        let (_temp, ws) = workspace();
        ws.write("main.py", "").expect("write");
        assert!(matches!(
            ws.list("main.py"),
            Err(WorkspaceError::NotADirectory { .. })
        ));
        assert!(matches!(
            ws.list("missing"),
            Err(WorkspaceError::NotADirectory { .. })
        ));
        assert!(matches!(
            ws.list(".."),
            Err(WorkspaceError::PathEscape { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn run_uses_sandboxed_cwd() {
        let (_temp, ws) = workspace();
        ws.write("sub/marker.txt", "m").expect("write");

        let result = ws
            .run("ls", Some("sub"), Duration::from_secs(10))
            .expect("run");
        assert!(result.success());
        assert_eq!(result.stdout, "marker.txt\n");

        assert!(matches!(
            ws.run("ls", Some("../"), Duration::from_secs(10)),
            Err(WorkspaceError::PathEscape { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn run_timeout_is_a_failed_result_not_an_error() {
        let (_temp, ws) = workspace();
        let start = std::time::Instant::now();
        let result = ws
            .run("sleep 5", None, Duration::from_secs(1))
            .expect("run");
        assert!(result.timed_out);
        assert!(!result.success());
        assert_ne!(result.exit_code, 0);
        assert!(result.stderr.contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn run_returns_promptly_when_command_backgrounds_a_job() {
        let (_temp, ws) = workspace();
        let start = std::time::Instant::now();
        let result = ws
            .run("sleep 30 &", None, Duration::from_secs(1))
            .expect("run");
        assert!(result.success());
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
