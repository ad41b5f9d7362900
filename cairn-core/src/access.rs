//! Access levels and the interceptor that enforces them.
//!
//! Each operation exposed by a cairn service is tagged with an
//! [`AccessLevel`]. The tag lives in an [`AccessPolicy`] table rather than on
//! the function itself, and [`AccessPolicy::check`] runs before the operation
//! is dispatched.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Capability required to invoke an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    /// Anyone, including anonymous callers.
    Public,
    /// Any valid token. Scope checks are left to the handler.
    TokenOnly,
    /// A logged-in user.
    AuthenticatedUser,
    /// A logged-in administrator.
    Admin,
}

/// An authenticated user as seen by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub login: String,
    pub admin: bool,
}

impl Principal {
    pub fn user<S: Into<String>>(id: S, login: S) -> Self {
        Self {
            id: id.into(),
            login: login.into(),
            admin: false,
        }
    }

    pub fn admin<S: Into<String>>(id: S, login: S) -> Self {
        Self {
            id: id.into(),
            login: login.into(),
            admin: true,
        }
    }
}

/// An opaque API token presented by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub value: String,
    pub scopes: Vec<String>,
}

impl Token {
    pub fn new<S: Into<String>>(value: S) -> Self {
        Self {
            value: value.into(),
            scopes: Vec::new(),
        }
    }

    pub fn with_scope<S: Into<String>>(mut self, scope: S) -> Self {
        self.scopes.push(scope.into());
        self
    }
}

/// Who is calling. Built by the transport layer after authentication.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub principal: Option<Principal>,
    pub token: Option<Token>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_principal(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
            token: None,
        }
    }

    pub fn with_token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("Invalid or missing token")]
    MissingToken,

    #[error("You must be logged in")]
    NotAuthenticated,

    #[error("Administrator access required")]
    AdminRequired,

    #[error("No access level registered for operation: {0}")]
    UnknownOperation(String),
}

/// Operation name → required level.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    levels: HashMap<String, AccessLevel>,
}

impl AccessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<S: Into<String>>(mut self, operation: S, level: AccessLevel) -> Self {
        self.levels.insert(operation.into(), level);
        self
    }

    pub fn set<S: Into<String>>(&mut self, operation: S, level: AccessLevel) {
        self.levels.insert(operation.into(), level);
    }

    pub fn level(&self, operation: &str) -> Option<AccessLevel> {
        self.levels.get(operation).copied()
    }

    /// Run the interceptor for `operation`.
    ///
    /// Operations missing from the table are refused.
    pub fn check(&self, operation: &str, ctx: &RequestContext) -> Result<(), AccessError> {
        let level = self
            .level(operation)
            .ok_or_else(|| AccessError::UnknownOperation(operation.to_string()))?;

        let outcome = level.permits(ctx);
        if let Err(ref err) = outcome {
            tracing::debug!(operation, ?level, error = %err, "access denied");
        }
        outcome
    }
}

impl AccessLevel {
    /// Whether `ctx` satisfies this level.
    pub fn permits(self, ctx: &RequestContext) -> Result<(), AccessError> {
        match self {
            AccessLevel::Public => Ok(()),
            AccessLevel::TokenOnly => match ctx.token {
                Some(_) => Ok(()),
                None => Err(AccessError::MissingToken),
            },
            AccessLevel::AuthenticatedUser => match ctx.principal {
                Some(_) => Ok(()),
                None => Err(AccessError::NotAuthenticated),
            },
            AccessLevel::Admin => match &ctx.principal {
                Some(p) if p.admin => Ok(()),
                Some(_) => Err(AccessError::AdminRequired),
                None => Err(AccessError::NotAuthenticated),
            },
        }
    }
}
