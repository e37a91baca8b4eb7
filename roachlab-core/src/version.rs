//! Resolution of a requested version to an installed database binary.
//!
//! Versioned builds are installed next to the default binary as
//! `<name>-<major>.<minor>` (e.g. `cockroach-22.1`). The resolved executable
//! path is embedded verbatim in every node command line, which is what lets
//! discovery tell versions apart later.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use crate::error::{StageError, StageResult};

/// A concrete database executable chosen for this invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBinary {
    /// Absolute path of the executable.
    pub executable: PathBuf,
    /// `major.minor` version if known.
    pub version: Option<String>,
    /// Whether this is the unsuffixed default binary.
    pub is_default: bool,
}

impl ResolvedBinary {
    /// Identifier embedded in node command lines and matched by discovery.
    #[must_use]
    pub fn identifier(&self) -> String {
        self.executable.display().to_string()
    }

    /// Short human label: the version, or `default`.
    #[must_use]
    pub fn label(&self) -> String {
        self.version.clone().unwrap_or_else(|| "default".to_string())
    }
}

impl fmt::Display for ResolvedBinary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.executable.display(), self.label())
    }
}

/// Looks binaries up on a search path.
#[derive(Debug, Clone)]
pub struct VersionResolver {
    binary: String,
    search_path: Vec<PathBuf>,
}

impl VersionResolver {
    /// Resolver over the process `PATH`.
    #[must_use]
    pub fn from_env(binary: impl Into<String>) -> Self {
        let path = std::env::var_os("PATH").unwrap_or_else(OsString::new);
        Self::new(binary, std::env::split_paths(&path).collect())
    }

    /// Resolver over an explicit search path.
    #[must_use]
    pub fn new(binary: impl Into<String>, search_path: Vec<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            search_path,
        }
    }

    /// Unsuffixed binary name.
    #[must_use]
    pub fn binary_name(&self) -> &str {
        &self.binary
    }

    /// Resolve `requested` (or the default binary when `None`).
    pub fn resolve(&self, requested: Option<&str>) -> StageResult<ResolvedBinary> {
        let Some(requested) = requested else {
            let executable = self.find(&self.binary).ok_or_else(|| {
                StageError::Config(format!("`{}` was not found on PATH", self.binary))
            })?;
            let version = reported_version(&executable);
            return Ok(ResolvedBinary {
                executable,
                version,
                is_default: true,
            });
        };

        validate_version(requested)?;

        if let Some(default) = self.find(&self.binary)
            && reported_version(&default).as_deref() == Some(requested)
        {
            debug!(version = requested, "requested version is the default binary");
            return Ok(ResolvedBinary {
                executable: default,
                version: Some(requested.to_string()),
                is_default: true,
            });
        }

        let suffixed = format!("{}-{requested}", self.binary);
        let executable = self.find(&suffixed).ok_or_else(|| StageError::Resolution {
            version: requested.to_string(),
            binary: suffixed.clone(),
        })?;
        Ok(ResolvedBinary {
            executable,
            version: Some(requested.to_string()),
            is_default: false,
        })
    }

    /// First executable file named `name` on the search path.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<PathBuf> {
        self.search_path
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate))
    }
}

/// Accept exactly `<1-2 digits>.<1 digit>`.
pub fn validate_version(version: &str) -> StageResult<()> {
    let valid = version.split_once('.').is_some_and(|(major, minor)| {
        (1..=2).contains(&major.len())
            && minor.len() == 1
            && major.chars().chain(minor.chars()).all(|c| c.is_ascii_digit())
    });
    if valid {
        Ok(())
    } else {
        Err(StageError::Validation(format!(
            "version must look like 22.1, got `{version}`"
        )))
    }
}

/// `major.minor` from a build tag such as `v23.1.4` or `Build Tag: v23.1.4-rc.1`.
#[must_use]
pub fn parse_build_tag(output: &str) -> Option<String> {
    output.split_whitespace().find_map(|token| {
        let mut parts = token.strip_prefix('v')?.split('.');
        let major = parts.next()?;
        let minor = parts.next()?;
        let minor = minor.split(|c: char| !c.is_ascii_digit()).next()?;
        let numeric = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
        (numeric(major) && numeric(minor)).then(|| format!("{major}.{minor}"))
    })
}

/// Version suffix of a versioned executable (`cockroach-22.1` → `22.1`).
#[must_use]
pub fn suffix_version(binary: &str, executable: &Path) -> Option<String> {
    let name = executable.file_name()?.to_str()?;
    let version = name.strip_prefix(binary)?.strip_prefix('-')?;
    validate_version(version).ok()?;
    Some(version.to_string())
}

/// Ask a binary for its build tag.
#[must_use]
pub fn reported_version(executable: &Path) -> Option<String> {
    let output = Command::new(executable)
        .args(["version", "--build-tag"])
        .output();
    match output {
        Ok(output) if output.status.success() => {
            parse_build_tag(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(output) => {
            warn!(executable = %executable.display(), status = %output.status, "version query failed");
            None
        }
        Err(err) => {
            warn!(executable = %executable.display(), error = %err, "could not run version query");
            None
        }
    }
}

fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = path.metadata() else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn version_format_is_strict() {
        for ok in ["22.1", "9.2", "23.2"] {
            assert!(validate_version(ok).is_ok(), "{ok}");
        }
        for bad in ["7", "22", "22.10", "123.1", "v22.1", "22.1.0", "a.b", ".1", "22."] {
            assert!(
                matches!(validate_version(bad), Err(StageError::Validation(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn build_tags_reduce_to_major_minor() {
        assert_eq!(parse_build_tag("v23.1.4\n").as_deref(), Some("23.1"));
        assert_eq!(
            parse_build_tag("Build Tag:        v22.2.0-rc.1").as_deref(),
            Some("22.2")
        );
        assert_eq!(parse_build_tag("unknown"), None);
    }

    #[test]
    fn suffix_version_requires_the_binary_prefix() {
        assert_eq!(
            suffix_version("cockroach", Path::new("/opt/bin/cockroach-22.1")).as_deref(),
            Some("22.1")
        );
        assert_eq!(suffix_version("cockroach", Path::new("/opt/bin/cockroach")), None);
        assert_eq!(suffix_version("cockroach", Path::new("/opt/bin/other-22.1")), None);
    }

    #[cfg(unix)]
    mod path_lookup {
        use std::os::unix::fs::PermissionsExt;

        use super::*;

        fn install(dir: &Path, name: &str, tag: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\necho {tag}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[test]
        fn missing_default_binary_is_a_config_error() {
            let dir = tempfile::tempdir().unwrap();
            let resolver = VersionResolver::new("cockroach", vec![dir.path().to_path_buf()]);
            assert!(matches!(resolver.resolve(None), Err(StageError::Config(_))));
        }

        #[test]
        fn default_binary_reports_its_version() {
            let dir = tempfile::tempdir().unwrap();
            let default = install(dir.path(), "cockroach", "v23.1.4");
            let resolver = VersionResolver::new("cockroach", vec![dir.path().to_path_buf()]);

            let resolved = resolver.resolve(None).unwrap();
            assert_eq!(resolved.executable, default);
            assert_eq!(resolved.version.as_deref(), Some("23.1"));
            assert!(resolved.is_default);
        }

        #[test]
        fn suffixed_binary_is_used_for_other_versions() {
            let dir = tempfile::tempdir().unwrap();
            install(dir.path(), "cockroach", "v23.1.4");
            let older = install(dir.path(), "cockroach-22.1", "v22.1.9");
            let resolver = VersionResolver::new("cockroach", vec![dir.path().to_path_buf()]);

            let resolved = resolver.resolve(Some("22.1")).unwrap();
            assert_eq!(resolved.executable, older);
            assert!(!resolved.is_default);
        }

        #[test]
        fn default_version_prefers_unsuffixed_binary() {
            let dir = tempfile::tempdir().unwrap();
            let default = install(dir.path(), "cockroach", "v23.1.4");
            install(dir.path(), "cockroach-23.1", "v23.1.4");
            let resolver = VersionResolver::new("cockroach", vec![dir.path().to_path_buf()]);

            let resolved = resolver.resolve(Some("23.1")).unwrap();
            assert_eq!(resolved.executable, default);
            assert!(resolved.is_default);
        }

        #[test]
        fn unknown_version_is_a_resolution_error() {
            let dir = tempfile::tempdir().unwrap();
            install(dir.path(), "cockroach", "v23.1.4");
            let resolver = VersionResolver::new("cockroach", vec![dir.path().to_path_buf()]);

            let err = resolver.resolve(Some("99.9")).unwrap_err();
            assert!(matches!(err, StageError::Resolution { ref version, .. } if version == "99.9"));
        }

        #[test]
        fn non_executable_files_are_ignored() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("cockroach"), "not a program").unwrap();
            let resolver = VersionResolver::new("cockroach", vec![dir.path().to_path_buf()]);
            assert_eq!(resolver.find("cockroach"), None);
        }
    }
}
