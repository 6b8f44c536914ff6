//! Password storage keyed by login. Passwords never go into the settings file.

use std::{collections::HashMap, sync::Mutex};

use anyhow::{Result, anyhow};

/// Keyring-style secret store.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialStore: Send + Sync {
    fn get(&self, login: &str) -> Result<Option<String>>;
    fn set(&self, login: &str, password: &str) -> Result<()>;
}

/// Process-local store. Forgets everything on exit.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(login: &str, password: &str) -> Self {
        let store = Self::new();
        if let Ok(mut secrets) = store.secrets.lock() {
            secrets.insert(login.to_string(), password.to_string());
        }
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, login: &str) -> Result<Option<String>> {
        let secrets = self
            .secrets
            .lock()
            .map_err(|e| anyhow!("Credential store poisoned: {e}"))?;
        Ok(secrets.get(login).cloned())
    }

    fn set(&self, login: &str, password: &str) -> Result<()> {
        if login.is_empty() {
            return Ok(());
        }
        self.secrets
            .lock()
            .map_err(|e| anyhow!("Credential store poisoned: {e}"))?
            .insert(login.to_string(), password.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_returns_secret() {
        let store = MemoryCredentialStore::new();
        store.set("jane", "hunter2").unwrap();
        assert_eq!(store.get("jane").unwrap().as_deref(), Some("hunter2"));
        assert_eq!(store.get("john").unwrap(), None);
    }

    #[test]
    fn empty_login_is_not_stored() {
        let store = MemoryCredentialStore::new();
        store.set("", "secret").unwrap();
        assert_eq!(store.get("").unwrap(), None);
    }

    #[test]
    fn seeded_store() {
        let store = MemoryCredentialStore::with_secret("jane", "pw");
        assert_eq!(store.get("jane").unwrap().as_deref(), Some("pw"));
    }
}
