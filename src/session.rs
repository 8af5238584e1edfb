//! Per-user interactive session state.
//!
//! A session carries the uploaded image and the latest result of each
//! pipeline stage between requests. Sessions are created and ended
//! explicitly; idle ones are purged whenever a new session starts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ErrorKind, StageResult};
use crate::intake::UploadedImage;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    last_active: Instant,
    pub image: Option<UploadedImage>,
    pub extracted: Option<StageResult>,
    pub corrected: Option<StageResult>,
    pub execution: Option<StageResult>,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            last_active: Instant::now(),
            image: None,
            extracted: None,
            corrected: None,
            execution: None,
        }
    }

    /// Text eligible for correction: present, not an error, not blank.
    pub fn correctable_text(&self) -> Option<&str> {
        match &self.extracted {
            Some(Ok(text)) if !text.trim().is_empty() => Some(text),
            _ => None,
        }
    }

    /// Code eligible for execution: present, not an error, not blank.
    pub fn executable_code(&self) -> Option<&str> {
        match &self.corrected {
            Some(Ok(code)) if !code.trim().is_empty() => Some(code),
            _ => None,
        }
    }

    /// Replace the image and its OCR result. The corrected code is kept
    /// until the next correction overwrites it.
    pub fn set_upload(&mut self, image: UploadedImage, extracted: StageResult) {
        self.image = Some(image);
        self.extracted = Some(extracted);
    }

    /// Store a new correction; any previous run output no longer matches it.
    pub fn set_correction(&mut self, corrected: StageResult) {
        self.corrected = Some(corrected);
        self.execution = None;
    }

    pub fn set_execution(&mut self, output: StageResult) {
        self.execution = Some(output);
    }

    pub fn view(&self, code_language: &str) -> SessionView {
        SessionView {
            id: self.id,
            created_at: self.created_at,
            image: self.image.as_ref().map(|img| ImageInfo {
                filename: img.filename.clone(),
                mime: img.mime,
                size: img.size(),
            }),
            extracted_text: self.extracted.as_ref().map(Panel::from),
            corrected_code: self.corrected.as_ref().map(Panel::from),
            execution_output: self.execution.as_ref().map(Panel::from),
            can_enhance: self.correctable_text().is_some(),
            can_execute: self.executable_code().is_some(),
            code_language: code_language.to_string(),
        }
    }
}

/// Render-ready snapshot of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub image: Option<ImageInfo>,
    pub extracted_text: Option<Panel>,
    pub corrected_code: Option<Panel>,
    pub execution_output: Option<Panel>,
    pub can_enhance: bool,
    pub can_execute: bool,
    pub code_language: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageInfo {
    pub filename: String,
    pub mime: &'static str,
    pub size: usize,
}

/// One text region of the UI: either the stage output or its error.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Panel {
    Ok { text: String },
    Error { kind: ErrorKind, message: String },
}

impl From<&StageResult> for Panel {
    fn from(result: &StageResult) -> Self {
        match result {
            Ok(text) => Panel::Ok { text: text.clone() },
            Err(e) => Panel::Error {
                kind: e.kind(),
                message: e.to_string(),
            },
        }
    }
}

/// In-memory session store.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<Uuid, Session>>>,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            idle_timeout,
        }
    }

    /// Start a new session, purging idle ones first.
    pub fn create(&self) -> Session {
        let session = Session::new();
        let mut sessions = self.inner.write().unwrap();
        let before = sessions.len();
        let idle_timeout = self.idle_timeout;
        sessions.retain(|_, s| s.last_active.elapsed() < idle_timeout);
        if sessions.len() < before {
            info!("SessionStore: purged {} idle sessions", before - sessions.len());
        }
        sessions.insert(session.id, session.clone());
        debug!("SessionStore: created {}", session.id);
        session
    }

    /// Read a session under the lock without copying it; marks it active.
    pub fn with<T>(&self, id: &Uuid, f: impl FnOnce(&Session) -> T) -> Option<T> {
        let mut sessions = self.inner.write().unwrap();
        let session = sessions.get_mut(id)?;
        session.last_active = Instant::now();
        Some(f(session))
    }

    /// Apply `f` to a session if it still exists and return the result.
    pub fn update<T>(&self, id: &Uuid, f: impl FnOnce(&mut Session) -> T) -> Option<T> {
        let mut sessions = self.inner.write().unwrap();
        let session = sessions.get_mut(id)?;
        session.last_active = Instant::now();
        Some(f(session))
    }

    /// End a session. Returns true if it existed.
    pub fn remove(&self, id: &Uuid) -> bool {
        let removed = self.inner.write().unwrap().remove(id).is_some();
        if removed {
            debug!("SessionStore: ended {}", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }
}
