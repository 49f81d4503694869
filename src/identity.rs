use std::fmt;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::activity;
use crate::config::Config;

pub const HEADER_USER_ID: &str = "X-User-Id";
pub const HEADER_USER_ROLES: &str = "X-User-Roles";
pub const HEADER_USER_EMAIL: &str = "X-User-Email";

const SELECTED_IDENTITY_KEY: &str = "selected-identity";

/// Simulated caller context attached to every outgoing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub roles: Vec<String>,
    pub display_name: String,
}

impl Identity {
    /// Header triple carried on every server call. Roles are comma-joined.
    pub fn header_triple(&self) -> [(&'static str, String); 3] {
        [
            (HEADER_USER_ID, self.id.clone()),
            (HEADER_USER_ROLES, self.roles.join(",")),
            (HEADER_USER_EMAIL, self.email.clone()),
        ]
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.roles.is_empty() {
            write!(f, "{}", self.display_name)
        } else {
            write!(f, "{} ({})", self.display_name, self.roles.join(", "))
        }
    }
}

static SIMULATED_IDENTITIES: Lazy<Vec<Identity>> = Lazy::new(|| {
    vec![
        Identity {
            id: "test-user-001".into(),
            email: "user@example.com".into(),
            roles: vec!["ROLE_USER".into()],
            display_name: "Regular User".into(),
        },
        Identity {
            id: "test-user-002".into(),
            email: "admin@example.com".into(),
            roles: vec!["ROLE_USER".into(), "ROLE_ADMIN".into()],
            display_name: "Administrator".into(),
        },
        Identity {
            id: "test-user-003".into(),
            email: "hr@example.com".into(),
            roles: vec!["ROLE_USER".into(), "ROLE_HR".into()],
            display_name: "HR Manager".into(),
        },
        Identity {
            id: "test-user-004".into(),
            email: "manager@example.com".into(),
            roles: vec!["ROLE_USER".into(), "ROLE_MANAGER".into()],
            display_name: "Project Manager".into(),
        },
        Identity {
            id: "anonymous-user".into(),
            email: String::new(),
            roles: Vec::new(),
            display_name: "Anonymous User".into(),
        },
    ]
});

pub fn all() -> &'static [Identity] {
    &SIMULATED_IDENTITIES
}

/// The fallback identity when nothing (usable) is persisted.
pub fn anonymous() -> Identity {
    SIMULATED_IDENTITIES
        .last()
        .cloned()
        .expect("simulated identity set is non-empty")
}

/// Persistence seam for the single active identity. One fixed key holding
/// a serialized record; the store itself knows nothing about identities.
pub trait IdentityStore {
    fn load(&self) -> anyhow::Result<Option<String>>;
    fn save(&self, value: &str) -> anyhow::Result<()>;
}

/// Active identity, resolved once per caller. Missing, corrupt, or unknown
/// stored values all fall back to the anonymous identity.
pub fn current(store: &dyn IdentityStore) -> Identity {
    let raw = match store.load() {
        Ok(Some(raw)) => raw,
        Ok(None) => return anonymous(),
        Err(e) => {
            activity::log(format!("Could not read stored identity: {e}"));
            return anonymous();
        }
    };
    match serde_json::from_str::<Identity>(&raw) {
        Ok(saved) => all()
            .iter()
            .find(|i| i.id == saved.id)
            .cloned()
            .unwrap_or_else(anonymous),
        Err(e) => {
            activity::log(format!("Stored identity unreadable: {e}"));
            anonymous()
        }
    }
}

pub fn select(store: &dyn IdentityStore, identity: &Identity) -> anyhow::Result<()> {
    store.save(&serde_json::to_string(identity)?)
}

/// Sqlite-backed key-value store under the config directory.
pub struct SqliteIdentityStore {
    path: PathBuf,
}

impl SqliteIdentityStore {
    pub fn open_default() -> Self {
        Self {
            path: Config::get_config_dir().join("settings.sqlite"),
        }
    }

    #[allow(dead_code)]
    pub fn at_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn init(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn connection(&self) -> anyhow::Result<Connection> {
        Ok(Connection::open(&self.path)?)
    }
}

impl IdentityStore for SqliteIdentityStore {
    fn load(&self) -> anyhow::Result<Option<String>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        let mut rows = stmt.query([SELECTED_IDENTITY_KEY])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    fn save(&self, value: &str) -> anyhow::Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![SELECTED_IDENTITY_KEY, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MemoryStore(Mutex<Option<String>>);

    impl MemoryStore {
        fn empty() -> Self {
            MemoryStore(Mutex::new(None))
        }

        fn holding(value: &str) -> Self {
            MemoryStore(Mutex::new(Some(value.to_string())))
        }
    }

    impl IdentityStore for MemoryStore {
        fn load(&self) -> anyhow::Result<Option<String>> {
            Ok(self.0.lock().unwrap().clone())
        }

        fn save(&self, value: &str) -> anyhow::Result<()> {
            *self.0.lock().unwrap() = Some(value.to_string());
            Ok(())
        }
    }

    #[test]
    fn header_triple_joins_roles_with_commas() {
        let admin = all()[1].clone();
        let headers = admin.header_triple();
        assert_eq!(headers[0], (HEADER_USER_ID, "test-user-002".to_string()));
        assert_eq!(
            headers[1],
            (HEADER_USER_ROLES, "ROLE_USER,ROLE_ADMIN".to_string())
        );
        assert_eq!(
            headers[2],
            (HEADER_USER_EMAIL, "admin@example.com".to_string())
        );
    }

    #[test]
    fn anonymous_has_no_roles_or_email() {
        let anon = anonymous();
        assert_eq!(anon.id, "anonymous-user");
        assert!(anon.roles.is_empty());
        assert!(anon.email.is_empty());
        assert_eq!(anon.header_triple()[1].1, "");
    }

    #[test]
    fn empty_store_falls_back_to_anonymous() {
        assert_eq!(current(&MemoryStore::empty()), anonymous());
    }

    #[test]
    fn corrupt_store_falls_back_to_anonymous() {
        let store = MemoryStore::holding("{not json");
        assert_eq!(current(&store), anonymous());
    }

    #[test]
    fn unknown_identity_falls_back_to_anonymous() {
        let stranger = Identity {
            id: "nobody-we-know".into(),
            email: "x@example.com".into(),
            roles: vec!["ROLE_USER".into()],
            display_name: "Stranger".into(),
        };
        let store = MemoryStore::holding(&serde_json::to_string(&stranger).unwrap());
        assert_eq!(current(&store), anonymous());
    }

    #[test]
    fn select_then_current_round_trips() {
        let store = MemoryStore::empty();
        let hr = all()[2].clone();
        select(&store, &hr).unwrap();
        assert_eq!(current(&store), hr);
    }

    #[test]
    fn sqlite_store_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.sqlite");

        let store = SqliteIdentityStore::at_path(path.clone());
        store.init().unwrap();
        select(&store, &all()[0]).unwrap();

        let reopened = SqliteIdentityStore::at_path(path);
        assert_eq!(current(&reopened), all()[0]);
    }

    #[test]
    fn display_includes_roles() {
        assert_eq!(
            all()[1].to_string(),
            "Administrator (ROLE_USER, ROLE_ADMIN)"
        );
        assert_eq!(anonymous().to_string(), "Anonymous User");
    }
}
