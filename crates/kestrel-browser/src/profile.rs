use crate::{Error, Result};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

/// Chrome user data directory for one run.
///
/// Temporary profiles are removed on drop. Named profiles live under
/// `~/.kestrel/profiles/<name>` and keep the application's session cookies
/// between runs.
pub struct ProfileManager {
    path: PathBuf,
    is_temporary: bool,
}

impl ProfileManager {
    pub fn temporary() -> Result<Self> {
        let temp_dir = tempfile::Builder::new()
            .prefix("kestrel-profile-")
            .tempdir()?;

        Ok(Self {
            path: temp_dir.keep(),
            is_temporary: true,
        })
    }

    pub fn named(name: &str) -> Result<Self> {
        validate_name(name)?;
        Self::at(Self::profiles_dir()?.join(name))
    }

    fn at(path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&path)?;
        Ok(Self {
            path,
            is_temporary: false,
        })
    }

    pub fn profiles_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".kestrel").join("profiles"))
            .ok_or_else(|| Error::Browser("Could not determine home directory".to_string()))
    }

    /// Make Chrome save downloads to `dir` without asking.
    ///
    /// Merges into `Default/Preferences` so a named profile keeps the rest of
    /// its settings.
    pub fn with_download_dir(self, dir: &Path) -> Result<Self> {
        let default_dir = self.path.join("Default");
        std::fs::create_dir_all(&default_dir)?;
        let preferences_path = default_dir.join("Preferences");

        let mut preferences = match std::fs::read_to_string(&preferences_path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable Chrome preferences: {}", e);
                json!({})
            }),
            Err(_) => json!({}),
        };
        merge(&mut preferences, download_preferences(dir));

        let text = serde_json::to_string_pretty(&preferences)
            .map_err(|e| Error::Browser(format!("Could not encode preferences: {}", e)))?;
        std::fs::write(&preferences_path, text)?;
        tracing::debug!("Profile downloads go to {}", dir.display());
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self.is_temporary
    }
}

impl Drop for ProfileManager {
    fn drop(&mut self) {
        if self.is_temporary && self.path.exists() {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

/// Profile names become a single directory component
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\']);
    if valid {
        Ok(())
    } else {
        Err(Error::Browser(format!("Invalid profile name: {:?}", name)))
    }
}

fn download_preferences(dir: &Path) -> Value {
    json!({
        "download": {
            "default_directory": dir.display().to_string(),
            "prompt_for_download": false,
            "directory_upgrade": true
        },
        "profile": {
            "default_content_setting_values": {
                "automatic_downloads": 1
            }
        }
    })
}

/// Recursively copy `patch` into `target`, keeping keys `patch` does not name
fn merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                merge(target.entry(key).or_insert(Value::Null), value);
            }
        }
        (target, patch) => *target = patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_preferences(profile: &ProfileManager) -> Value {
        let text = std::fs::read_to_string(profile.path().join("Default/Preferences")).unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn test_temp_profile_is_removed_on_drop() {
        let profile = ProfileManager::temporary().unwrap();
        let path = profile.path().to_path_buf();
        assert!(path.is_dir());
        assert!(profile.is_temporary());

        drop(profile);

        assert!(!path.exists());
    }

    #[test]
    fn test_download_dir_written_to_preferences() {
        let downloads = tempfile::tempdir().unwrap();

        let profile = ProfileManager::temporary()
            .unwrap()
            .with_download_dir(downloads.path())
            .unwrap();

        let prefs = read_preferences(&profile);
        assert_eq!(
            prefs["download"]["default_directory"],
            downloads.path().display().to_string()
        );
        assert_eq!(prefs["download"]["prompt_for_download"], false);
        assert_eq!(
            prefs["profile"]["default_content_setting_values"]["automatic_downloads"],
            1
        );
    }

    #[test]
    fn test_existing_preferences_are_kept() {
        let root = tempfile::tempdir().unwrap();
        let profile = ProfileManager::at(root.path().join("ana")).unwrap();
        std::fs::create_dir_all(profile.path().join("Default")).unwrap();
        std::fs::write(
            profile.path().join("Default/Preferences"),
            r#"{"intl": {"accept_languages": "es-ES"}, "download": {"prompt_for_download": true}}"#,
        )
        .unwrap();

        let profile = profile.with_download_dir(Path::new("/srv/informes")).unwrap();

        let prefs = read_preferences(&profile);
        assert_eq!(prefs["intl"]["accept_languages"], "es-ES");
        assert_eq!(prefs["download"]["prompt_for_download"], false);
        assert_eq!(prefs["download"]["default_directory"], "/srv/informes");

        drop(profile);
        assert!(root.path().join("ana").is_dir());
    }

    #[test]
    fn test_profile_names_are_single_components() {
        assert!(validate_name("secretaria").is_ok());
        for bad in ["", ".", "..", "../escape", "a/b", r"a\b"] {
            assert!(validate_name(bad).is_err(), "{:?} accepted", bad);
        }
        assert!(ProfileManager::named("../escape").is_err());
    }
}
