//! Authorization context and policies
//!
//! The caller identity travels explicitly with every request as an
//! [`AuthContext`]. Policies are plain values, parsed from configuration
//! strings, and checked against that context.

use crate::core::error::StaResult;
use async_trait::async_trait;
use axum::http::HeaderMap;

/// Who is calling
#[derive(Debug, Clone, PartialEq)]
pub enum AuthContext {
    /// Authenticated user
    User { user_id: String, roles: Vec<String> },

    /// Service-to-service communication
    Service { service_name: String },

    /// System administrator
    Admin { admin_id: String },

    /// No credentials
    Anonymous,
}

impl AuthContext {
    pub fn user(user_id: impl Into<String>, roles: &[&str]) -> Self {
        AuthContext::User {
            user_id: user_id.into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, AuthContext::Anonymous)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, AuthContext::Admin { .. })
    }

    pub fn is_service(&self) -> bool {
        matches!(self, AuthContext::Service { .. })
    }

    /// Name used in logs
    pub fn principal(&self) -> &str {
        match self {
            AuthContext::User { user_id, .. } => user_id,
            AuthContext::Service { service_name } => service_name,
            AuthContext::Admin { admin_id } => admin_id,
            AuthContext::Anonymous => "anonymous",
        }
    }
}

impl Default for AuthContext {
    fn default() -> Self {
        AuthContext::Anonymous
    }
}

/// Authorization policy for one kind of operation
#[derive(Debug, Clone, PartialEq)]
pub enum AuthPolicy {
    /// No credentials needed
    Public,

    /// Any authenticated caller
    Authenticated,

    /// User with one of these roles
    HasRole(Vec<String>),

    ServiceOnly,

    AdminOnly,

    /// All must pass
    And(Vec<AuthPolicy>),

    /// One must pass
    Or(Vec<AuthPolicy>),
}

impl AuthPolicy {
    /// Check if auth context satisfies this policy
    pub fn check(&self, context: &AuthContext) -> bool {
        match self {
            AuthPolicy::Public => true,

            AuthPolicy::Authenticated => !context.is_anonymous(),

            AuthPolicy::HasRole(required) => match context {
                AuthContext::User { roles, .. } => required.iter().any(|r| roles.contains(r)),
                AuthContext::Admin { .. } => true,
                _ => false,
            },

            AuthPolicy::ServiceOnly => context.is_service(),

            AuthPolicy::AdminOnly => context.is_admin(),

            AuthPolicy::And(policies) => policies.iter().all(|p| p.check(context)),

            AuthPolicy::Or(policies) => policies.iter().any(|p| p.check(context)),
        }
    }

    /// Parse policy from string (for YAML config)
    ///
    /// `public`, `authenticated`, `service_only`, `admin_only`,
    /// `role:<name>` and `role_or_service:<name>`; anything else requires
    /// authentication.
    pub fn parse_policy(s: &str) -> Self {
        match s {
            "public" => AuthPolicy::Public,
            "authenticated" => AuthPolicy::Authenticated,
            "service_only" => AuthPolicy::ServiceOnly,
            "admin_only" => AuthPolicy::AdminOnly,
            s => {
                if let Some(role) = s.strip_prefix("role:") {
                    AuthPolicy::HasRole(vec![role.to_string()])
                } else if let Some(role) = s.strip_prefix("role_or_service:") {
                    AuthPolicy::Or(vec![
                        AuthPolicy::ServiceOnly,
                        AuthPolicy::HasRole(vec![role.to_string()]),
                    ])
                } else {
                    AuthPolicy::Authenticated
                }
            }
        }
    }
}

/// Turns transport credentials into an [`AuthContext`]
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn extract_context(&self, headers: &HeaderMap) -> StaResult<AuthContext>;
}

/// Treats every caller as anonymous
pub struct NoAuthProvider;

#[async_trait]
impl AuthProvider for NoAuthProvider {
    async fn extract_context(&self, _headers: &HeaderMap) -> StaResult<AuthContext> {
        Ok(AuthContext::Anonymous)
    }
}
