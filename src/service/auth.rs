//! Per-operation authorization decisions

use super::RequestType;
use crate::config::AuthSettings;
use crate::core::auth::{AuthContext, AuthPolicy};
use crate::core::error::{RequestError, StaResult};

/// Maps each request kind to a policy
#[derive(Debug, Clone)]
pub struct PolicyAuthorizer {
    read: AuthPolicy,
    create: AuthPolicy,
    update: AuthPolicy,
    delete: AuthPolicy,
}

impl PolicyAuthorizer {
    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self {
            read: AuthPolicy::parse_policy(&settings.read),
            create: AuthPolicy::parse_policy(&settings.create),
            update: AuthPolicy::parse_policy(&settings.update),
            delete: AuthPolicy::parse_policy(&settings.delete),
        }
    }

    pub fn allow_all() -> Self {
        Self {
            read: AuthPolicy::Public,
            create: AuthPolicy::Public,
            update: AuthPolicy::Public,
            delete: AuthPolicy::Public,
        }
    }

    pub fn policy_for(&self, request_type: RequestType) -> &AuthPolicy {
        match request_type {
            RequestType::GetCapabilities | RequestType::Read => &self.read,
            RequestType::Create => &self.create,
            RequestType::UpdateAll | RequestType::UpdateChanges | RequestType::UpdateChangeset => {
                &self.update
            }
            RequestType::Delete => &self.delete,
        }
    }

    /// Unauthorized for anonymous callers, forbidden for everyone else
    pub fn authorize(&self, request_type: RequestType, context: &AuthContext) -> StaResult<()> {
        if self.policy_for(request_type).check(context) {
            return Ok(());
        }
        let message = format!("{request_type} is not permitted for {}", context.principal());
        Err(if context.is_anonymous() {
            RequestError::Unauthorized { message }.into()
        } else {
            RequestError::Forbidden { message }.into()
        })
    }
}

impl Default for PolicyAuthorizer {
    fn default() -> Self {
        Self::allow_all()
    }
}
