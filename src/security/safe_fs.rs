//! Sandboxed file operations.
//!
//! Every operation resolves its path through [`PathSandbox`] first. A
//! rejected path is reported to the [`SecurityLog`] as a
//! `sandbox_violation` and returned as an error value; nothing here panics
//! on malformed input.
//!
//! Writes are atomic: content is staged in a uniquely named temporary file
//! next to the target, flushed to disk, then renamed over the target. A
//! [`StagedWrite`] that is dropped without [`StagedWrite::commit`] removes
//! its temporary file and leaves the target untouched.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::debug;

use super::audit::{AuditAction, SecurityLog};
use super::error::{Result, SecurityError};
use super::sandbox::{PathSandbox, ResolveOptions};

/// Default read limit: 10 MiB.
pub const DEFAULT_MAX_READ_BYTES: u64 = 10 * 1024 * 1024;

/// Default mode for written files: no group/other write.
pub const DEFAULT_FILE_MODE: u32 = 0o644;
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Modes for secret stores (credential record, audit log).
pub const PRIVATE_FILE_MODE: u32 = 0o600;
pub const PRIVATE_DIR_MODE: u32 = 0o700;

const MAX_LIST_DEPTH: usize = 32;

#[derive(Debug, Clone)]
pub struct SafeFs {
    sandbox: PathSandbox,
    log: Arc<SecurityLog>,
    max_read_bytes: u64,
    file_mode: u32,
    dir_mode: u32,
}

/// Options for [`SafeFs::list`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub recursive: bool,
    /// Include and descend into entries reached via a symlink. Only takes
    /// effect when the sandbox itself allows symlinks.
    pub follow_symlinks: bool,
    /// Glob matched against file names (e.g. `*.json`). Directories are
    /// omitted from the result when a pattern is set.
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

#[derive(Debug, Clone)]
pub struct ListedEntry {
    /// Path relative to the sandbox boundary.
    pub path: PathBuf,
    pub kind: EntryKind,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct FileStat {
    pub path: PathBuf,
    pub size: u64,
    pub is_dir: bool,
    pub is_file: bool,
    pub readonly: bool,
    pub modified: Option<DateTime<Utc>>,
}

/// A write in progress: a flushed temporary file plus its rename target.
#[derive(Debug)]
pub struct StagedWrite {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Rename the staged file over the target.
    pub fn commit(self) -> Result<PathBuf> {
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|e| SecurityError::io(&target, e.error))?;
        Ok(target)
    }
}

impl SafeFs {
    pub fn new(sandbox: PathSandbox, log: Arc<SecurityLog>) -> Self {
        Self {
            sandbox,
            log,
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
            file_mode: DEFAULT_FILE_MODE,
            dir_mode: DEFAULT_DIR_MODE,
        }
    }

    /// Sandbox rooted at an existing directory, default options.
    pub fn open(root: impl AsRef<Path>, log: Arc<SecurityLog>) -> Result<Self> {
        Ok(Self::new(PathSandbox::new(root)?, log))
    }

    pub fn open_with_options(
        root: impl AsRef<Path>,
        options: ResolveOptions,
        log: Arc<SecurityLog>,
    ) -> Result<Self> {
        Ok(Self::new(PathSandbox::with_options(root, options)?, log))
    }

    pub fn with_max_read_bytes(mut self, limit: u64) -> Self {
        self.max_read_bytes = limit;
        self
    }

    pub fn with_file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }

    pub fn with_dir_mode(mut self, mode: u32) -> Self {
        self.dir_mode = mode;
        self
    }

    pub fn root(&self) -> &Path {
        self.sandbox.root()
    }

    pub fn sandbox(&self) -> &PathSandbox {
        &self.sandbox
    }

    pub fn max_read_bytes(&self) -> u64 {
        self.max_read_bytes
    }

    /// Resolve a path, recording a security event on rejection.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        self.sandbox.resolve(path).inspect_err(|e| {
            if let SecurityError::SandboxViolation { reason, .. } = e {
                self.log.record(
                    AuditAction::SandboxViolation,
                    "safe_fs",
                    Some(&path.display().to_string()),
                    Some(reason),
                );
            }
        })
    }

    /// Read a whole file, refusing anything larger than the read limit.
    pub fn read(&self, path: impl AsRef<Path>) -> Result<Vec<u8>> {
        let resolved = self.resolve(path)?;
        let meta = fs::metadata(&resolved).map_err(|e| self.map_io(&resolved, e))?;
        if meta.is_dir() {
            return Err(SecurityError::Validation(format!(
                "{} is a directory",
                self.display(&resolved)
            )));
        }
        if meta.len() > self.max_read_bytes {
            return Err(self.too_large(&resolved, meta.len()));
        }

        let file = File::open(&resolved).map_err(|e| self.map_io(&resolved, e))?;
        let mut buf = Vec::with_capacity(meta.len() as usize);
        // The file may grow between stat and read.
        file.take(self.max_read_bytes + 1)
            .read_to_end(&mut buf)
            .map_err(|e| SecurityError::io(&resolved, e))?;
        if buf.len() as u64 > self.max_read_bytes {
            return Err(self.too_large(&resolved, buf.len() as u64));
        }

        debug!("Read {} bytes from {}", buf.len(), self.display(&resolved));
        Ok(buf)
    }

    /// Read at most the last `max_bytes` of a file. The read limit does not
    /// apply; the result is bounded by `max_bytes` instead.
    pub fn read_tail(&self, path: impl AsRef<Path>, max_bytes: u64) -> Result<Vec<u8>> {
        let resolved = self.resolve(path)?;
        let mut file = File::open(&resolved).map_err(|e| self.map_io(&resolved, e))?;
        let meta = file.metadata().map_err(|e| SecurityError::io(&resolved, e))?;
        if meta.is_dir() {
            return Err(SecurityError::Validation(format!(
                "{} is a directory",
                self.display(&resolved)
            )));
        }

        let start = meta.len().saturating_sub(max_bytes);
        file.seek(SeekFrom::Start(start))
            .map_err(|e| SecurityError::io(&resolved, e))?;
        let mut buf = Vec::new();
        file.take(max_bytes)
            .read_to_end(&mut buf)
            .map_err(|e| SecurityError::io(&resolved, e))?;
        Ok(buf)
    }

    pub fn read_to_string(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|_| {
            SecurityError::Validation(format!("{} is not valid UTF-8", path.display()))
        })
    }

    /// Atomically replace `path` with `contents`.
    pub fn write(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<PathBuf> {
        let staged = self.stage(path, contents)?;
        let target = staged.commit()?;
        debug!("Wrote {}", self.display(&target));
        Ok(target)
    }

    /// First half of an atomic write: stage and flush the content next to
    /// the target without touching the target itself.
    pub fn stage(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<StagedWrite> {
        let path = path.as_ref();
        let target = self.resolve(path)?;
        if target == self.sandbox.root() {
            return Err(self.reject(path, "cannot write to the sandbox boundary itself"));
        }
        if target.is_dir() {
            return Err(SecurityError::Validation(format!(
                "{} is a directory",
                self.display(&target)
            )));
        }

        let parent = target
            .parent()
            .ok_or_else(|| self.reject(path, "target has no parent directory"))?
            .to_path_buf();
        self.create_dirs(&parent)?;

        let mut temp = tempfile::Builder::new()
            .prefix(".i18ntk-")
            .suffix(".tmp")
            .tempfile_in(&parent)
            .map_err(|e| SecurityError::io(&parent, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            temp.as_file()
                .set_permissions(fs::Permissions::from_mode(self.file_mode))
                .map_err(|e| SecurityError::io(temp.path(), e))?;
        }

        temp.write_all(contents.as_ref())
            .map_err(|e| SecurityError::io(&target, e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| SecurityError::io(&target, e))?;

        Ok(StagedWrite { temp, target })
    }

    /// Append one line to a file, creating it with the configured mode.
    pub fn append_line(&self, path: impl AsRef<Path>, line: &str) -> Result<()> {
        let target = self.resolve(path)?;
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(self.file_mode);
        }
        let mut file = options
            .open(&target)
            .map_err(|e| SecurityError::io(&target, e))?;
        writeln!(file, "{}", line).map_err(|e| SecurityError::io(&target, e))?;
        Ok(())
    }

    /// List a directory. Entries reached via symlinks are skipped unless
    /// both the sandbox and `options` allow them.
    pub fn list(&self, path: impl AsRef<Path>, options: &ListOptions) -> Result<Vec<ListedEntry>> {
        let dir = self.resolve(path)?;
        if !dir.is_dir() {
            return Err(SecurityError::NotFound(format!(
                "{} is not a directory",
                self.display(&dir)
            )));
        }

        let pattern = match options.pattern {
            Some(ref p) => Some(glob::Pattern::new(p).map_err(|e| {
                SecurityError::Validation(format!("invalid pattern '{}': {}", p, e))
            })?),
            None => None,
        };

        let mut out = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(dir.clone());
        let shown = self.sandbox.relative(&dir).to_path_buf();
        self.walk(&dir, &shown, options, pattern.as_ref(), 0, &mut visited, &mut out)?;
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    /// `dir` is the real directory; `shown` is the boundary-relative path
    /// it was reached by, which differs from `dir` below a followed symlink.
    #[allow(clippy::too_many_arguments)]
    fn walk(
        &self,
        dir: &Path,
        shown: &Path,
        options: &ListOptions,
        pattern: Option<&glob::Pattern>,
        depth: usize,
        visited: &mut HashSet<PathBuf>,
        out: &mut Vec<ListedEntry>,
    ) -> Result<()> {
        let entries = fs::read_dir(dir).map_err(|e| self.map_io(dir, e))?;

        for entry in entries {
            let entry = entry.map_err(|e| SecurityError::io(dir, e))?;
            let entry_path = entry.path();
            let entry_shown = shown.join(entry.file_name());
            let file_type = entry
                .file_type()
                .map_err(|e| SecurityError::io(&entry_path, e))?;

            let (real_path, is_dir, size, kind) = if file_type.is_symlink() {
                if !(options.follow_symlinks && self.sandbox.allows_symlinks()) {
                    debug!("Skipping symlink {}", self.display(&entry_path));
                    continue;
                }
                // The link target must itself pass the sandbox.
                let Ok(target) = self.sandbox.resolve(&entry_path) else {
                    debug!("Skipping symlink leaving the sandbox: {}", entry_path.display());
                    continue;
                };
                let Ok(meta) = fs::metadata(&target) else {
                    continue;
                };
                (target, meta.is_dir(), meta.len(), EntryKind::Symlink)
            } else {
                let meta = entry
                    .metadata()
                    .map_err(|e| SecurityError::io(&entry_path, e))?;
                let kind = if meta.is_dir() {
                    EntryKind::Dir
                } else {
                    EntryKind::File
                };
                (entry_path.clone(), meta.is_dir(), meta.len(), kind)
            };

            let include = match pattern {
                Some(p) => !is_dir && p.matches(&entry.file_name().to_string_lossy()),
                None => true,
            };
            if include {
                out.push(ListedEntry {
                    path: entry_shown.clone(),
                    kind,
                    size: if is_dir { 0 } else { size },
                });
            }

            if is_dir
                && options.recursive
                && depth + 1 < MAX_LIST_DEPTH
                && visited.insert(real_path.clone())
            {
                self.walk(
                    &real_path,
                    &entry_shown,
                    options,
                    pattern,
                    depth + 1,
                    visited,
                    out,
                )?;
            }
        }

        Ok(())
    }

    /// Create a directory (and parents) inside the sandbox.
    pub fn mkdir(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let resolved = self.resolve(path)?;
        self.create_dirs(&resolved)?;
        Ok(resolved)
    }

    /// Delete a file or directory tree. Returns `Ok(false)` if nothing
    /// existed at `path`.
    pub fn delete(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        let resolved = self.resolve(path)?;
        if resolved == self.sandbox.root() {
            return Err(self.reject(path, "cannot delete the sandbox boundary itself"));
        }

        let meta = match fs::symlink_metadata(&resolved) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(SecurityError::io(&resolved, e)),
        };

        let result = if meta.is_dir() {
            fs::remove_dir_all(&resolved)
        } else {
            fs::remove_file(&resolved)
        };
        match result {
            Ok(()) => {
                debug!("Deleted {}", self.display(&resolved));
                Ok(true)
            }
            // Lost a race with another deleter.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SecurityError::io(&resolved, e)),
        }
    }

    pub fn stat(&self, path: impl AsRef<Path>) -> Result<FileStat> {
        let resolved = self.resolve(path)?;
        let meta = fs::metadata(&resolved).map_err(|e| self.map_io(&resolved, e))?;
        Ok(FileStat {
            size: meta.len(),
            is_dir: meta.is_dir(),
            is_file: meta.is_file(),
            readonly: meta.permissions().readonly(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            path: resolved,
        })
    }

    /// `false` for rejected and missing paths alike.
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        match self.resolve(path) {
            Ok(resolved) => fs::symlink_metadata(resolved).is_ok(),
            Err(_) => false,
        }
    }

    fn create_dirs(&self, dir: &Path) -> Result<()> {
        if dir.is_dir() {
            return Ok(());
        }
        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(self.dir_mode);
        }
        builder.create(dir).map_err(|e| SecurityError::io(dir, e))
    }

    fn reject(&self, path: &Path, reason: &str) -> SecurityError {
        self.log.record(
            AuditAction::SandboxViolation,
            "safe_fs",
            Some(&path.display().to_string()),
            Some(reason),
        );
        SecurityError::violation(path, reason)
    }

    fn too_large(&self, path: &Path, size: u64) -> SecurityError {
        let shown = self.display(path);
        self.log.record(
            AuditAction::FileTooLarge,
            "safe_fs",
            Some(&shown),
            Some(&format!("{} bytes, limit {}", size, self.max_read_bytes)),
        );
        SecurityError::TooLarge {
            path: shown,
            size,
            limit: self.max_read_bytes,
        }
    }

    fn map_io(&self, path: &Path, e: io::Error) -> SecurityError {
        if e.kind() == io::ErrorKind::NotFound {
            SecurityError::NotFound(self.display(path))
        } else {
            SecurityError::io(path, e)
        }
    }

    fn display(&self, path: &Path) -> String {
        self.sandbox.relative(path).display().to_string()
    }
}

/// Create a directory readable only by its owner (0700 on Unix).
///
/// Used to bootstrap the boundaries of secret stores before a sandbox can
/// be rooted there.
pub fn ensure_private_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| SecurityError::io(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(PRIVATE_DIR_MODE))
            .map_err(|e| SecurityError::io(path, e))?;
    }

    Ok(())
}

fn default_fs(boundary: &Path) -> Result<SafeFs> {
    SafeFs::open(boundary, Arc::new(SecurityLog::disabled()))
}

/// Read `path` inside `boundary`.
pub fn sandboxed_read(path: impl AsRef<Path>, boundary: impl AsRef<Path>) -> Result<Vec<u8>> {
    default_fs(boundary.as_ref())?.read(path)
}

/// Atomically write `contents` to `path` inside `boundary`.
pub fn sandboxed_write(
    path: impl AsRef<Path>,
    contents: impl AsRef<[u8]>,
    boundary: impl AsRef<Path>,
) -> Result<PathBuf> {
    default_fs(boundary.as_ref())?.write(path, contents)
}

/// List the directory `path` inside `boundary` (non-recursive, no symlinks).
pub fn sandboxed_list(
    path: impl AsRef<Path>,
    boundary: impl AsRef<Path>,
) -> Result<Vec<ListedEntry>> {
    default_fs(boundary.as_ref())?.list(path, &ListOptions::default())
}

/// Delete `path` inside `boundary`; a missing path is success.
pub fn sandboxed_delete(path: impl AsRef<Path>, boundary: impl AsRef<Path>) -> Result<bool> {
    default_fs(boundary.as_ref())?.delete(path)
}
