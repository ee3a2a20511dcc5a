//! Sled-based local storage for state shared across sessions.
//!
//! Entries are JSON values under fixed keys. Writes are last-writer-wins.

use crate::workflow::{GeneratedWorkflow, UserProfile};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    DbError(#[from] sled::Error),
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Keys persisted in the local store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKey {
    Jwt,
    RefreshToken,
    User,
    PendingWorkflow,
    PendingSelection,
    PendingContent,
    Settings,
}

impl StorageKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKey::Jwt => "jwt_token",
            StorageKey::RefreshToken => "refresh_token",
            StorageKey::User => "user_data",
            StorageKey::PendingWorkflow => "pending_workflow",
            StorageKey::PendingSelection => "pending_selection",
            StorageKey::PendingContent => "pending_content",
            StorageKey::Settings => "extension_settings",
        }
    }
}

/// Runtime settings written through the `setConfig` message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtensionSettings {
    #[serde(default)]
    pub api_base_url: Option<String>,
}

/// Local key/value store for tokens, the user profile and pending work.
#[derive(Clone)]
pub struct Store {
    db: sled::Db,
}

impl Store {
    /// Open or create storage at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Open a store that is removed when dropped
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    pub fn get<T: DeserializeOwned>(&self, key: StorageKey) -> Result<Option<T>, StorageError> {
        match self.db.get(key.as_str())? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    pub fn set<T: Serialize>(&self, key: StorageKey, value: &T) -> Result<(), StorageError> {
        let data = serde_json::to_vec(value)?;
        self.db.insert(key.as_str(), data)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn remove(&self, keys: &[StorageKey]) -> Result<(), StorageError> {
        for key in keys {
            self.db.remove(key.as_str())?;
        }
        self.db.flush()?;
        Ok(())
    }

    pub fn jwt(&self) -> Result<Option<String>, StorageError> {
        self.get(StorageKey::Jwt)
    }

    pub fn is_authenticated(&self) -> Result<bool, StorageError> {
        Ok(self.jwt()?.is_some())
    }

    /// Persist a fresh session
    pub fn set_session(
        &self,
        token: &str,
        refresh_token: Option<&str>,
        user: &UserProfile,
    ) -> Result<(), StorageError> {
        self.set(StorageKey::Jwt, &token)?;
        if let Some(refresh) = refresh_token {
            self.set(StorageKey::RefreshToken, &refresh)?;
        }
        self.set(StorageKey::User, user)
    }

    pub fn user(&self) -> Result<Option<UserProfile>, StorageError> {
        self.get(StorageKey::User)
    }

    /// Drop credentials after the backend rejected them
    pub fn clear_credentials(&self) -> Result<(), StorageError> {
        self.remove(&[StorageKey::Jwt, StorageKey::User])
    }

    pub fn pending_workflow(&self) -> Result<Option<GeneratedWorkflow>, StorageError> {
        self.get(StorageKey::PendingWorkflow)
    }

    pub fn set_pending_workflow(&self, workflow: &GeneratedWorkflow) -> Result<(), StorageError> {
        self.set(StorageKey::PendingWorkflow, workflow)
    }

    pub fn clear_pending_workflow(&self) -> Result<(), StorageError> {
        self.remove(&[StorageKey::PendingWorkflow])
    }

    pub fn pending_content(&self) -> Result<Option<String>, StorageError> {
        self.get(StorageKey::PendingContent)
    }

    pub fn set_pending_content(&self, content: &str) -> Result<(), StorageError> {
        self.set(StorageKey::PendingContent, &content)
    }

    pub fn pending_selection(&self) -> Result<Option<String>, StorageError> {
        self.get(StorageKey::PendingSelection)
    }

    pub fn set_pending_selection(&self, selection: &str) -> Result<(), StorageError> {
        self.set(StorageKey::PendingSelection, &selection)
    }

    pub fn settings(&self) -> Result<ExtensionSettings, StorageError> {
        Ok(self.get(StorageKey::Settings)?.unwrap_or_default())
    }

    pub fn set_settings(&self, settings: &ExtensionSettings) -> Result<(), StorageError> {
        self.set(StorageKey::Settings, settings)
    }

    /// Logout - clear all auth data and the pending workflow
    pub fn logout(&self) -> Result<(), StorageError> {
        self.remove(&[
            StorageKey::Jwt,
            StorageKey::RefreshToken,
            StorageKey::User,
            StorageKey::PendingWorkflow,
        ])
    }
}
