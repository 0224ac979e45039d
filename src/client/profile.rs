use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tempfile::Builder;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Fixed key the user id is stored under.
pub const USER_ID_KEY: &str = "hello-world-user-id";

const PROFILE_DIR_VAR: &str = "SNAPP_PROFILE_DIR";
const PROFILE_FILE: &str = "profile.json";

/// Client-side persisted state: a single user id that survives restarts.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
    file: PathBuf,
}

impl ProfileStore {
    pub fn new_default() -> Result<Self> {
        let dir = match std::env::var_os(PROFILE_DIR_VAR) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .ok_or_else(|| anyhow!("unable to resolve config directory"))?
                .join("snapp-bridge"),
        };
        Ok(Self::with_dir(dir))
    }

    pub fn with_dir(dir: PathBuf) -> Self {
        let file = dir.join(PROFILE_FILE);
        Self { dir, file }
    }

    pub fn path(&self) -> &Path {
        &self.file
    }

    pub fn load_user_id(&self) -> Result<Option<String>> {
        let entries = self.load_entries()?;
        Ok(entries
            .get(USER_ID_KEY)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()))
    }

    pub fn save_user_id(&self, user_id: &str) -> Result<()> {
        let mut entries = self.load_entries()?;
        entries.insert(USER_ID_KEY.to_string(), user_id.to_string());
        self.write_entries(&entries)
    }

    pub fn clear_user_id(&self) -> Result<()> {
        let mut entries = self.load_entries()?;
        if entries.remove(USER_ID_KEY).is_none() {
            return Ok(());
        }
        self.write_entries(&entries)
    }

    fn load_entries(&self) -> Result<BTreeMap<String, String>> {
        let raw = match fs::read_to_string(&self.file) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", self.file.display()));
            }
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid profile JSON in {}", self.file.display()))
    }

    fn write_entries(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        #[cfg(unix)]
        fs::set_permissions(&self.dir, fs::Permissions::from_mode(0o700))
            .with_context(|| format!("failed to set permissions on {}", self.dir.display()))?;

        let mut temp = Builder::new()
            .prefix(".snapp-profile-")
            .tempfile_in(&self.dir)
            .with_context(|| format!("failed to create temp file in {}", self.dir.display()))?;

        #[cfg(unix)]
        temp.as_file_mut()
            .set_permissions(fs::Permissions::from_mode(0o600))?;

        serde_json::to_writer_pretty(temp.as_file_mut(), entries)
            .with_context(|| format!("failed to serialize {}", self.file.display()))?;
        temp.as_file_mut().write_all(b"\n")?;
        temp.as_file_mut().sync_data()?;

        temp.persist(&self.file)
            .map_err(|err| err.error)
            .with_context(|| format!("failed to persist {}", self.file.display()))?;
        Ok(())
    }
}
