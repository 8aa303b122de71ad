//! Client metadata
//!
//! `ClientMetadata` identifies one logical Redis connection: who asked for it
//! (session), which database it targets, in which context it is used, and
//! optionally which logical db index it is bound to. Two metadata values that
//! normalize to the same tuple share one pooled client.

use crate::{RedscopeError, Result};
use ring::digest::{SHA256, digest};
use serde::{Deserialize, Serialize};

/// Logical area of the application a client is used by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientContext {
    Common,
    Browser,
    Cli,
    Workbench,
    Profiler,
}

impl ClientContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientContext::Common => "common",
            ClientContext::Browser => "browser",
            ClientContext::Cli => "cli",
            ClientContext::Workbench => "workbench",
            ClientContext::Profiler => "profiler",
        }
    }
}

impl std::fmt::Display for ClientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Session the client belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    #[serde(default)]
    pub user_id: Option<String>,
    pub session_id: String,
}

impl SessionMetadata {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            user_id: None,
            session_id: session_id.into(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Identity of a logical Redis connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMetadata {
    pub session_metadata: SessionMetadata,
    pub database_id: String,
    pub context: ClientContext,
    /// Distinguishes several clients of the same context (e.g. CLI tabs)
    #[serde(default)]
    pub unique_id: Option<String>,
    /// Logical database index the client is bound to
    #[serde(default)]
    pub db: Option<u32>,
}

impl ClientMetadata {
    pub fn new(
        session_metadata: SessionMetadata,
        database_id: impl Into<String>,
        context: ClientContext,
    ) -> Self {
        Self {
            session_metadata,
            database_id: database_id.into(),
            context,
            unique_id: None,
            db: None,
        }
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    pub fn with_db(mut self, db: u32) -> Self {
        self.db = Some(db);
        self
    }

    /// Check that the fields required to address a client are present
    pub fn validate(&self) -> Result<()> {
        if self.database_id.trim().is_empty() {
            return Err(RedscopeError::InvalidClientMetadata(
                "database id must not be empty".to_string(),
            ));
        }

        if self.session_metadata.session_id.trim().is_empty() {
            return Err(RedscopeError::InvalidClientMetadata(
                "session id must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Metadata reduced to the fields that take part in client identity.
    ///
    /// CLI clients switch databases themselves with `SELECT`, so the db index
    /// is not part of their identity.
    pub fn normalized(&self) -> Self {
        let mut normalized = self.clone();
        if normalized.context == ClientContext::Cli {
            normalized.db = None;
        }
        normalized
    }

    /// Deterministic client id derived from the normalized metadata
    pub fn client_id(&self) -> String {
        let normalized = self.normalized();
        let parts = [
            normalized.database_id.as_str(),
            normalized.context.as_str(),
            normalized.session_metadata.session_id.as_str(),
            normalized.session_metadata.user_id.as_deref().unwrap_or(""),
            normalized.unique_id.as_deref().unwrap_or(""),
            &normalized.db.map(|db| db.to_string()).unwrap_or_default(),
        ];

        // Unit separator keeps ("a", "bc") and ("ab", "c") apart
        let joined = parts.join("\u{1f}");
        hex::encode(digest(&SHA256, joined.as_bytes()).as_ref())
    }

    /// Validate, then derive the client id
    pub fn validated_client_id(&self) -> Result<String> {
        self.validate()?;
        Ok(self.client_id())
    }
}

/// Partial metadata used to select many pooled clients at once.
///
/// Every field that is set must match; unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMetadataFilter {
    pub database_id: Option<String>,
    pub context: Option<ClientContext>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub unique_id: Option<String>,
    pub db: Option<u32>,
}

impl ClientMetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database(database_id: impl Into<String>) -> Self {
        Self {
            database_id: Some(database_id.into()),
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: ClientContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    pub fn with_db(mut self, db: u32) -> Self {
        self.db = Some(db);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn matches(&self, metadata: &ClientMetadata) -> bool {
        fn field_matches<T: PartialEq + ?Sized>(expected: Option<&T>, actual: Option<&T>) -> bool {
            match expected {
                Some(expected) => actual == Some(expected),
                None => true,
            }
        }

        field_matches(self.database_id.as_deref(), Some(metadata.database_id.as_str()))
            && field_matches(self.context.as_ref(), Some(&metadata.context))
            && field_matches(
                self.session_id.as_deref(),
                Some(metadata.session_metadata.session_id.as_str()),
            )
            && field_matches(
                self.user_id.as_deref(),
                metadata.session_metadata.user_id.as_deref(),
            )
            && field_matches(self.unique_id.as_deref(), metadata.unique_id.as_deref())
            && field_matches(self.db.as_ref(), metadata.db.as_ref())
    }
}
