//! ru-fns mobile API session persisted in the data folder

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SESSION_FILE_NAME: &str = "ru_fns_session.json";

/// Sessions older than this are refreshed before use
pub const SESSION_MAX_AGE_MINUTES: i64 = 10;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session file I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("session file format: {0}")]
    Format(#[from] serde_json::Error),
}

/// Credentials of the mobile app account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub refresh_token: String,
    pub client_secret: String,
    /// Spelling kept for compatibility with existing session files
    #[serde(rename = "sesson_id", default)]
    pub session_id: String,
    #[serde(default = "epoch")]
    pub updated_at: DateTime<Utc>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

impl Session {
    /// Fresh credentials that still need a first refresh
    pub fn new(refresh_token: &str, client_secret: &str) -> Self {
        Self {
            refresh_token: refresh_token.to_string(),
            client_secret: client_secret.to_string(),
            session_id: String::new(),
            updated_at: epoch(),
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.updated_at > Duration::minutes(SESSION_MAX_AGE_MINUTES)
    }
}

/// JSON file holding the current [`Session`]
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn in_folder(data_folder: &Path) -> Self {
        Self {
            path: data_folder.join(SESSION_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when no session was initialised yet
    pub fn load(&self) -> Result<Option<Session>, SessionError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replaces the file atomically, readable by the owner only
    pub fn save(&self, session: &Session) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(session)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::in_folder(dir.path());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::in_folder(dir.path());

        let session = Session {
            session_id: "sid".to_string(),
            updated_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            ..Session::new("refresh", "secret")
        };
        store.save(&session).unwrap();

        assert_eq!(store.load().unwrap(), Some(session));
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"sesson_id\": \"sid\""));
    }

    #[test]
    fn test_reads_legacy_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SESSION_FILE_NAME),
            "{\n\t\"refresh_token\": \"r\",\n\t\"client_secret\": \"c\",\n\t\"sesson_id\": \"s\",\n\t\"updated_at\": \"2024-05-01T11:00:00.123456+03:00\"\n}\n    ",
        )
        .unwrap();

        let session = SessionStore::in_folder(dir.path()).load().unwrap().unwrap();
        assert_eq!(session.session_id, "s");
        assert_eq!(
            session.updated_at,
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
                + Duration::microseconds(123_456)
        );
    }

    #[test]
    fn test_staleness() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let session = Session {
            updated_at: now - Duration::minutes(5),
            ..Session::new("r", "c")
        };
        assert!(!session.is_stale(now));
        assert!(session.is_stale(now + Duration::minutes(6)));
        assert!(Session::new("r", "c").is_stale(now));
    }
}
