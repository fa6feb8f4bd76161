//! Signed-in session
//!
//! One [`SessionController`] owns the current [`Session`]. Other components
//! read it with [`SessionController::current`] or watch it through
//! [`SessionController::subscribe`]; nobody reads shared storage behind its back.
//!
//! When a path is configured, the session is kept there as a JSON blob so the
//! next run starts signed in. Last write wins.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::watch;

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to access session file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to encode session: {0}")]
    EncodeError(#[from] serde_json::Error),

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Signed in as {actual}, but this action needs a {expected} session")]
    WrongRole {
        expected: &'static str,
        actual: &'static str,
    },
}

/// A talent profile owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSession {
    pub model_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// A marketplace administrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminSession {
    pub admin_id: String,
    pub username: String,
}

/// Who is signed in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Session {
    Model(ModelSession),
    Admin(AdminSession),
}

impl Session {
    pub fn role(&self) -> &'static str {
        match self {
            Session::Model(_) => "model",
            Session::Admin(_) => "admin",
        }
    }
}

/// Owner of the current session
pub struct SessionController {
    tx: watch::Sender<Option<Session>>,
    path: Option<PathBuf>,
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionController {
    /// In-memory controller, signed out
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx, path: None }
    }

    /// Controller backed by a JSON file, restoring any session already there.
    ///
    /// An unreadable blob is logged and treated as signed out.
    pub fn persistent(path: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let path = path.into();
        let restored = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Session>(&bytes) {
                Ok(session) => Some(session),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable session file");
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let (tx, _) = watch::channel(restored);
        Ok(Self {
            tx,
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn current(&self) -> Option<Session> {
        self.tx.borrow().clone()
    }

    /// Receive every change to the session
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.tx.subscribe()
    }

    /// Replace the current session
    pub fn sign_in(&self, session: Session) -> Result<(), SessionError> {
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_vec_pretty(&session)?)?;
        }
        tracing::info!(role = session.role(), "signed in");
        self.tx.send_replace(Some(session));
        Ok(())
    }

    pub fn sign_out(&self) -> Result<(), SessionError> {
        if let Some(path) = &self.path {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if self.tx.send_replace(None).is_some() {
            tracing::info!("signed out");
        }
        Ok(())
    }

    /// The current session, which must belong to a model
    pub fn require_model(&self) -> Result<ModelSession, SessionError> {
        match self.current() {
            Some(Session::Model(model)) => Ok(model),
            Some(other) => Err(SessionError::WrongRole {
                expected: "model",
                actual: other.role(),
            }),
            None => Err(SessionError::NotSignedIn),
        }
    }
}
