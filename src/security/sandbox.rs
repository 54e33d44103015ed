//! Path sandbox: confines every path the tool touches to a boundary directory.
//!
//! # Resolution
//!
//! 1. Reject empty input and embedded NUL bytes.
//! 2. Join relative input onto the boundary. Absolute input is taken as-is,
//!    but if it is spelled with the boundary's non-canonical form (e.g.
//!    `/tmp/x` when the boundary canonicalizes to `/private/tmp/x`) it is
//!    re-rooted onto the canonical boundary.
//! 3. Normalize lexically (`.` dropped, `..` pops). The normalized path must
//!    be the boundary or a descendant of it.
//! 4. Walk each component below the boundary. A symlink is rejected outright
//!    unless symlinks are allowed. The link itself is distrusted, even when
//!    its target would land inside the boundary.
//! 5. Canonicalize the deepest existing ancestor and re-append the missing
//!    tail. The canonical result must still lie inside the boundary, whether
//!    or not symlinks are allowed.
//! 6. If an allowlist is configured, the canonical path must fall under one
//!    of its entries.
//!
//! Rejections are [`SecurityError::SandboxViolation`] values. Low-level I/O
//! errors from probing the filesystem never escape this module.

use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

use super::error::{Result, SecurityError};

/// Options applied on top of the boundary check.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Traverse symlinks whose canonical target stays inside the boundary.
    pub allow_symlinks: bool,
    /// Sub-paths (relative to the boundary, or absolute inside it) that
    /// accepted paths must additionally fall under.
    pub allowlist: Option<Vec<PathBuf>>,
}

/// An immutable, canonical boundary directory plus resolution options.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    /// Canonical boundary.
    root: PathBuf,
    /// Boundary as the caller spelled it (made absolute). Used to re-root
    /// absolute inputs that do not use the canonical spelling.
    declared_root: PathBuf,
    allow_symlinks: bool,
    allowlist: Option<Vec<PathBuf>>,
}

impl PathSandbox {
    /// Create a sandbox rooted at an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(root, ResolveOptions::default())
    }

    pub fn with_options(root: impl AsRef<Path>, options: ResolveOptions) -> Result<Self> {
        let root = root.as_ref();
        let declared_root = if root.is_absolute() {
            normalize(root).ok_or_else(|| SecurityError::violation(root, "invalid boundary"))?
        } else {
            let cwd = std::env::current_dir().map_err(|e| SecurityError::io(root, e))?;
            normalize(&cwd.join(root))
                .ok_or_else(|| SecurityError::violation(root, "invalid boundary"))?
        };

        let canonical = fs::canonicalize(&declared_root).map_err(|_| {
            SecurityError::Validation(format!(
                "sandbox boundary does not exist: {}",
                declared_root.display()
            ))
        })?;
        if !canonical.is_dir() {
            return Err(SecurityError::Validation(format!(
                "sandbox boundary is not a directory: {}",
                canonical.display()
            )));
        }

        let mut sandbox = Self {
            root: canonical,
            declared_root,
            allow_symlinks: options.allow_symlinks,
            allowlist: None,
        };

        if let Some(entries) = options.allowlist {
            let mut resolved = Vec::with_capacity(entries.len());
            for entry in entries {
                // Allowlist entries are themselves confined to the boundary.
                resolved.push(sandbox.resolve_unrestricted(&entry)?);
            }
            sandbox.allowlist = Some(resolved);
        }

        Ok(sandbox)
    }

    /// The canonical boundary directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn allows_symlinks(&self) -> bool {
        self.allow_symlinks
    }

    /// Resolve `input` to a canonical path inside the boundary.
    pub fn resolve(&self, input: impl AsRef<Path>) -> Result<PathBuf> {
        let resolved = self.resolve_unrestricted(input.as_ref())?;

        if let Some(ref allowlist) = self.allowlist
            && !allowlist.iter().any(|allowed| resolved.starts_with(allowed))
        {
            return Err(SecurityError::violation(
                input.as_ref(),
                "outside the allowed sub-paths",
            ));
        }

        Ok(resolved)
    }

    /// Express a resolved path relative to the boundary (for display).
    pub fn relative<'a>(&self, resolved: &'a Path) -> &'a Path {
        resolved.strip_prefix(&self.root).unwrap_or(resolved)
    }

    fn resolve_unrestricted(&self, input: &Path) -> Result<PathBuf> {
        if input.as_os_str().is_empty() {
            return Err(SecurityError::violation(input, "empty path"));
        }
        if input.as_os_str().to_string_lossy().contains('\0') {
            return Err(SecurityError::violation(input, "path contains NUL byte"));
        }

        let joined = if input.is_absolute() {
            match input.strip_prefix(&self.declared_root) {
                Ok(rest) if self.declared_root != self.root => self.root.join(rest),
                _ => input.to_path_buf(),
            }
        } else {
            self.root.join(input)
        };

        let normalized = normalize(&joined).ok_or_else(|| {
            SecurityError::violation(input, "parent traversal above filesystem root")
        })?;

        let relative = match normalized.strip_prefix(&self.root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => {
                return Err(SecurityError::violation(input, "escapes the sandbox boundary"));
            }
        };

        // Walk the path below the boundary, looking for symlinks.
        let mut cursor = self.root.clone();
        let mut existing = self.root.clone();
        let mut missing: Vec<OsString> = Vec::new();
        for component in relative.components() {
            let Component::Normal(part) = component else {
                return Err(SecurityError::violation(input, "unexpected path component"));
            };
            cursor.push(part);

            if !missing.is_empty() {
                missing.push(part.to_os_string());
                continue;
            }

            match fs::symlink_metadata(&cursor) {
                Ok(meta) => {
                    if meta.file_type().is_symlink() && !self.allow_symlinks {
                        return Err(SecurityError::violation(
                            input,
                            format!("symlink not allowed: {}", self.relative(&cursor).display()),
                        ));
                    }
                    existing = cursor.clone();
                }
                Err(_) => missing.push(part.to_os_string()),
            }
        }

        let mut canonical = fs::canonicalize(&existing)
            .map_err(|_| SecurityError::violation(input, "cannot resolve real path"))?;
        for part in missing {
            canonical.push(part);
        }

        match canonical.strip_prefix(&self.root) {
            Ok(rel) if !rel.components().any(|c| matches!(c, Component::ParentDir)) => {
                Ok(canonical)
            }
            _ => Err(SecurityError::violation(
                input,
                "resolves outside the sandbox boundary",
            )),
        }
    }
}

/// Lexically normalize an absolute path.
///
/// Returns `None` if a `..` segment would climb above the filesystem root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() || out.as_os_str().is_empty() {
                    return None;
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    Some(out)
}

/// Resolve `input` against `boundary` with explicit options.
///
/// One-shot form of [`PathSandbox::resolve`] for callers that do not keep a
/// sandbox around.
pub fn resolve(
    input: impl AsRef<Path>,
    boundary: impl AsRef<Path>,
    options: ResolveOptions,
) -> Result<PathBuf> {
    PathSandbox::with_options(boundary, options)?.resolve(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> (tempfile::TempDir, PathSandbox) {
        let tmp = tempfile::tempdir().unwrap();
        let sb = PathSandbox::new(tmp.path()).unwrap();
        (tmp, sb)
    }

    #[test]
    fn parent_traversal_rejected_whether_or_not_target_exists() {
        let (_tmp, sb) = sandbox();
        let err = sb.resolve("../../etc/passwd").unwrap_err();
        assert!(err.is_violation());

        let err = sb.resolve("../../definitely/not/here").unwrap_err();
        assert!(err.is_violation());
    }

    #[test]
    fn traversal_within_boundary_is_normalized() {
        let (_tmp, sb) = sandbox();
        let resolved = sb.resolve("a/b/../../c").unwrap();
        assert_eq!(resolved, sb.root().join("c"));
    }

    #[test]
    fn dot_segments_collapse() {
        let (_tmp, sb) = sandbox();
        let resolved = sb.resolve("./locales/./en.json").unwrap();
        assert_eq!(resolved, sb.root().join("locales").join("en.json"));
    }

    #[test]
    fn boundary_itself_is_accepted() {
        let (_tmp, sb) = sandbox();
        assert_eq!(sb.resolve(".").unwrap(), sb.root());
        assert_eq!(sb.resolve("a/..").unwrap(), sb.root());
    }

    #[test]
    fn empty_and_nul_rejected() {
        let (_tmp, sb) = sandbox();
        assert!(sb.resolve("").unwrap_err().is_violation());
        assert!(sb.resolve("bad\0name").unwrap_err().is_violation());
    }

    #[test]
    fn absolute_path_inside_accepted_outside_rejected() {
        let (tmp, sb) = sandbox();
        let inside = tmp.path().join("report.json");
        assert_eq!(sb.resolve(&inside).unwrap(), sb.root().join("report.json"));

        assert!(sb.resolve("/etc/passwd").unwrap_err().is_violation());
    }

    #[test]
    fn sibling_with_common_prefix_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("proj");
        let sibling = tmp.path().join("proj-evil");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&sibling).unwrap();

        let sb = PathSandbox::new(&root).unwrap();
        assert!(sb.resolve("../proj-evil/x").unwrap_err().is_violation());
        assert!(sb.resolve(sibling.join("x")).unwrap_err().is_violation());
    }

    #[test]
    fn missing_boundary_is_validation_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = PathSandbox::new(tmp.path().join("nope")).unwrap_err();
        assert!(matches!(err, SecurityError::Validation(_)));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_rejected() {
        let outside = tempfile::tempdir().unwrap();
        let (tmp, sb) = sandbox();
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("link")).unwrap();

        assert!(sb.resolve("link/secret").unwrap_err().is_violation());
    }

    #[cfg(unix)]
    #[test]
    fn internal_symlink_distrusted_by_default() {
        let (tmp, sb) = sandbox();
        fs::create_dir_all(tmp.path().join("real")).unwrap();
        fs::write(tmp.path().join("real/en.json"), "{}").unwrap();
        std::os::unix::fs::symlink(tmp.path().join("real"), tmp.path().join("alias")).unwrap();

        assert!(sb.resolve("alias/en.json").unwrap_err().is_violation());
        assert!(sb.resolve("real/en.json").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn allowed_symlinks_still_cannot_escape() {
        let outside = tempfile::tempdir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("real")).unwrap();
        std::os::unix::fs::symlink(tmp.path().join("real"), tmp.path().join("alias")).unwrap();
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("escape")).unwrap();

        let sb = PathSandbox::with_options(
            tmp.path(),
            ResolveOptions {
                allow_symlinks: true,
                allowlist: None,
            },
        )
        .unwrap();

        let resolved = sb.resolve("alias/new.json").unwrap();
        assert_eq!(resolved, sb.root().join("real").join("new.json"));
        assert!(sb.resolve("escape/x").unwrap_err().is_violation());
    }

    #[test]
    fn allowlist_restricts_sub_paths() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("locales")).unwrap();

        let sb = PathSandbox::with_options(
            tmp.path(),
            ResolveOptions {
                allow_symlinks: false,
                allowlist: Some(vec![PathBuf::from("locales"), PathBuf::from("reports")]),
            },
        )
        .unwrap();

        assert!(sb.resolve("locales/en.json").is_ok());
        assert!(sb.resolve("reports/summary.txt").is_ok());
        assert!(sb.resolve("src/main.rs").unwrap_err().is_violation());
    }

    #[test]
    fn allowlist_entries_cannot_escape() {
        let tmp = tempfile::tempdir().unwrap();
        let err = PathSandbox::with_options(
            tmp.path(),
            ResolveOptions {
                allow_symlinks: false,
                allowlist: Some(vec![PathBuf::from("../elsewhere")]),
            },
        )
        .unwrap_err();
        assert!(err.is_violation());
    }

    #[test]
    fn one_shot_resolve() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(resolve("x/y.json", tmp.path(), ResolveOptions::default()).is_ok());
        assert!(resolve("../y.json", tmp.path(), ResolveOptions::default()).is_err());
    }
}
