// Login against the configured user list and the per-login session.
//
// Passwords are compared as plain text with no throttling; the user list is
// expected to live in a config file only operators can read.
use crate::error::AuthError;
use crate::types::LevelSelection;
use std::collections::BTreeMap;

pub struct Credentials<'a> {
    users: &'a BTreeMap<String, String>,
}

impl<'a> Credentials<'a> {
    pub fn new(users: &'a BTreeMap<String, String>) -> Self {
        Self { users }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn login(&self, user: &str, password: &str) -> Result<Session, AuthError> {
        match self.users.get(user) {
            Some(expected) if expected == password => {
                log::info!("User {} logged in", user);
                Ok(Session::new(user))
            }
            _ => {
                log::warn!("Failed login for {:?}", user);
                Err(AuthError::InvalidCredentials)
            }
        }
    }
}

/// State of one logged-in user. Dropped on logout, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user: String,
    pub selection: LevelSelection,
}

impl Session {
    pub fn new(user: &str) -> Self {
        Self {
            user: user.to_string(),
            selection: LevelSelection::All,
        }
    }
}
