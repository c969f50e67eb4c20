use crate::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// Executable names looked up on `PATH` after the fixed install locations
const PATH_CANDIDATES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
];

/// One place Chrome may live
#[derive(Debug, Clone, PartialEq, Eq)]
enum Candidate {
    Install(PathBuf),
    OnPath(&'static str),
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Candidate::Install(path) => write!(f, "{}", path.display()),
            Candidate::OnPath(name) => write!(f, "{} on PATH", name),
        }
    }
}

/// Locates the Chrome binary that drives the report session
pub struct ChromeFinder {
    custom_path: Option<PathBuf>,
}

impl ChromeFinder {
    pub fn new(custom_path: Option<PathBuf>) -> Self {
        Self { custom_path }
    }

    /// An explicit path is used as is and never falls back to a search.
    pub fn find(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.custom_path {
            return executable(path);
        }

        let candidates = Self::candidates();
        for candidate in &candidates {
            let path = match candidate {
                Candidate::Install(path) => path.clone(),
                Candidate::OnPath(name) => match which::which(name) {
                    Ok(path) => path,
                    Err(_) => continue,
                },
            };

            match executable(&path) {
                Ok(path) => {
                    tracing::debug!("Chrome found via {}", candidate);
                    return Ok(path);
                }
                Err(e) => tracing::debug!("Skipping {}: {}", candidate, e),
            }
        }

        Err(Error::Browser(format!(
            "Chrome not found. Checked: {}. Use --chrome-path to specify location.",
            candidates
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    /// Install locations for this platform, then `PATH` names
    fn candidates() -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = install_paths()
            .into_iter()
            .map(Candidate::Install)
            .collect();
        candidates.extend(PATH_CANDIDATES.iter().copied().map(Candidate::OnPath));
        candidates
    }
}

fn install_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    return vec![
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
        PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
    ];

    #[cfg(target_os = "linux")]
    return vec![
        PathBuf::from("/usr/bin/google-chrome"),
        PathBuf::from("/usr/bin/chromium"),
        PathBuf::from("/usr/bin/chromium-browser"),
    ];

    #[cfg(target_os = "windows")]
    return vec![
        PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
        PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
    ];

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    return vec![];
}

fn executable(path: &Path) -> Result<PathBuf> {
    if !path.is_file() {
        return Err(Error::Browser(format!(
            "Chrome not found at: {}",
            path.display()
        )));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::metadata(path)?;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(Error::Browser(format!(
                "Chrome binary not executable: {}",
                path.display()
            )));
        }
    }

    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn fake_chrome(dir: &Path, mode: u32) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("chrome");
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_explicit_path_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let chrome = fake_chrome(dir.path(), 0o755);

        let found = ChromeFinder::new(Some(chrome.clone())).find().unwrap();

        assert_eq!(found, chrome);
    }

    #[cfg(unix)]
    #[test]
    fn test_explicit_path_must_be_executable() {
        let dir = tempfile::tempdir().unwrap();
        let chrome = fake_chrome(dir.path(), 0o644);

        let err = ChromeFinder::new(Some(chrome)).find().unwrap_err();

        assert!(err.to_string().contains("not executable"));
    }

    #[test]
    fn test_explicit_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();

        let err = ChromeFinder::new(Some(dir.path().to_path_buf()))
            .find()
            .unwrap_err();

        assert!(err.to_string().contains("Chrome not found at"));
    }

    #[test]
    fn test_candidates_end_with_path_lookups() {
        let candidates = ChromeFinder::candidates();
        let tail: Vec<String> = candidates[candidates.len() - PATH_CANDIDATES.len()..]
            .iter()
            .map(|c| c.to_string())
            .collect();

        assert_eq!(tail[0], "google-chrome on PATH");
        assert_eq!(tail.last().unwrap(), "chromium-browser on PATH");
    }
}
