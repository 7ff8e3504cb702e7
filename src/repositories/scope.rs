//! Access scopes for the registries.
//!
//! Every registry is opened either for an acting user, which restricts reads
//! and writes to rows owned by `(tenant_id, user_id)`, or with the service
//! scope, which sees every row. The service scope exists for workers and for
//! privileged ownership lookups; it cannot create user data.

use sea_orm::{ColumnTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// The user on whose behalf an operation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct ActingUser {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
}

impl ActingUser {
    pub fn new(tenant_id: Uuid, user_id: Uuid) -> Self {
        Self { tenant_id, user_id }
    }

    /// True when the row identified by `(tenant_id, user_id)` belongs to this user.
    pub fn owns(&self, tenant_id: Uuid, user_id: Uuid) -> bool {
        self.tenant_id == tenant_id && self.user_id == user_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    User(ActingUser),
    Service,
}

impl Scope {
    pub fn actor(&self) -> Option<ActingUser> {
        match self {
            Scope::User(actor) => Some(*actor),
            Scope::Service => None,
        }
    }

    pub fn is_service(&self) -> bool {
        matches!(self, Scope::Service)
    }

    /// Adds the ownership filter for user scopes; service scope is unfiltered.
    pub(crate) fn restrict<Q, C>(&self, query: Q, tenant_column: C, user_column: C) -> Q
    where
        Q: QueryFilter,
        C: ColumnTrait,
    {
        match self {
            Scope::User(actor) => query
                .filter(tenant_column.eq(actor.tenant_id))
                .filter(user_column.eq(actor.user_id)),
            Scope::Service => query,
        }
    }
}
