use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use once_cell::sync::Lazy;
use tracing::{info, warn};

use crate::error::CredentialError;

// Verified against when the user is unknown so both paths cost one Argon2 run.
static DUMMY_HASH: Lazy<Option<String>> = Lazy::new(|| hash_password("dummy-password").ok());

/// Dashboard users loaded from a `username:phc-hash` file.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    users: RwLock<HashMap<String, String>>,
}

impl CredentialStore {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, CredentialError> {
        let path = path.into();
        let users = read_table(&path)?;
        info!(path = %path.display(), users = users.len(), "credentials loaded");
        Ok(Self {
            path,
            users: RwLock::new(users),
        })
    }

    /// A store that rejects everyone, for hosts without a credentials file.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            users: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_entries<I, U, H>(entries: I) -> Self
    where
        I: IntoIterator<Item = (U, H)>,
        U: Into<String>,
        H: Into<String>,
    {
        Self {
            path: PathBuf::new(),
            users: RwLock::new(
                entries
                    .into_iter()
                    .map(|(user, hash)| (user.into(), hash.into()))
                    .collect(),
            ),
        }
    }

    /// Re-reads the file; the previous table stays in place if that fails.
    pub fn reload(&self) -> Result<usize, CredentialError> {
        let users = read_table(&self.path)?;
        let count = users.len();
        match self.users.write() {
            Ok(mut guard) => *guard = users,
            Err(poisoned) => *poisoned.into_inner() = users,
        }
        info!(path = %self.path.display(), users = count, "credentials reloaded");
        Ok(count)
    }

    pub fn user_count(&self) -> usize {
        match self.users.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn verify(&self, username: &str, password: &str) -> bool {
        let stored = match self.users.read() {
            Ok(guard) => guard.get(username).cloned(),
            Err(poisoned) => poisoned.into_inner().get(username).cloned(),
        };

        match stored {
            Some(hash) => check(&hash, password),
            None => {
                if let Some(dummy) = DUMMY_HASH.as_deref() {
                    check(dummy, password);
                }
                false
            }
        }
    }
}

fn check(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(err) => {
            warn!("stored credential hash is not a valid PHC string: {err}");
            false
        }
    }
}

fn read_table(path: &Path) -> Result<HashMap<String, String>, CredentialError> {
    let data = fs::read_to_string(path).map_err(|source| CredentialError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let mut users = HashMap::new();
    for (index, line) in data.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (user, hash) = line
            .split_once(':')
            .filter(|(user, hash)| !user.is_empty() && !hash.is_empty())
            .ok_or(CredentialError::MalformedLine(index + 1))?;
        users.insert(user.to_string(), hash.to_string());
    }
    Ok(users)
}

/// Argon2id PHC string with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, CredentialError> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}
