//! # Security Validator
//!
//! Guards entity linking during restores. A file read from an archive may
//! point at any entity id; before a link is written the validator checks the
//! relationship whitelist, then the ids created in the current run, and only
//! then the owner of the target through a privileged lookup. Denials are
//! reported to an [`AttemptLogger`] exactly once each.

mod lookup;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::file::{FileCategory, LinkedEntityKind};
use crate::repositories::ActingUser;

pub use lookup::{EntityOwner, OwnershipLookup, RegistryOwnershipLookup};

const OPERATION_OWNERSHIP: &str = "validate_ownership";
const OPERATION_FILE_LINK: &str = "link_file";

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("entity not found or access denied")]
    Unauthorized { entity_id: Uuid },

    #[error("entity not found or access denied")]
    NotFound { entity_id: Uuid },

    #[error("a {child} cannot be linked to a {parent}")]
    InvalidRelationship { child: String, parent: String },

    #[error("unknown file type: {0}")]
    UnknownFileType(String),

    #[error("ownership lookup failed: {0}")]
    Lookup(String),
}

/// Audit record for a denied access
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnauthorizedAttempt {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub target_id: Uuid,
    pub operation: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Sink for audit records
pub trait AttemptLogger: Send + Sync {
    fn log(&self, attempt: &UnauthorizedAttempt);
}

/// Writes audit records as warnings on the `security_audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAttemptLogger;

impl AttemptLogger for TracingAttemptLogger {
    fn log(&self, attempt: &UnauthorizedAttempt) {
        tracing::warn!(
            target: "security_audit",
            user_id = %attempt.user_id,
            tenant_id = %attempt.tenant_id,
            target_id = %attempt.target_id,
            operation = %attempt.operation,
            reason = %attempt.reason,
            timestamp = %attempt.timestamp.to_rfc3339(),
            "Unauthorized access attempt"
        );
    }
}

/// Entities created during one restore run, with their kind
#[derive(Debug, Default, Clone)]
pub struct ImportSession {
    created: HashMap<Uuid, LinkedEntityKind>,
}

impl ImportSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, id: Uuid, kind: LinkedEntityKind) {
        self.created.insert(id, kind);
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.created.contains_key(&id)
    }

    pub fn kind_of(&self, id: Uuid) -> Option<LinkedEntityKind> {
        self.created.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.created.len()
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
    }
}

#[derive(Clone)]
pub struct SecurityValidator {
    lookup: Arc<dyn OwnershipLookup>,
    logger: Arc<dyn AttemptLogger>,
}

impl SecurityValidator {
    /// Validator backed by the service-scope registries.
    pub fn new(db: DatabaseConnection) -> Self {
        Self::with_parts(
            Arc::new(RegistryOwnershipLookup::new(db)),
            Arc::new(TracingAttemptLogger),
        )
    }

    pub fn with_parts(lookup: Arc<dyn OwnershipLookup>, logger: Arc<dyn AttemptLogger>) -> Self {
        Self { lookup, logger }
    }

    pub async fn validate_ownership(
        &self,
        entity_id: Uuid,
        actor: ActingUser,
    ) -> Result<(), SecurityError> {
        self.check_owner(entity_id, actor, OPERATION_OWNERSHIP)
            .await
            .map(|_| ())
    }

    /// Maps a `(child, parent)` kind pair onto the stored file category and
    /// link kind, rejecting anything off the whitelist.
    pub fn validate_relationship_integrity(
        &self,
        child_kind: &str,
        parent_kind: &str,
    ) -> Result<(FileCategory, LinkedEntityKind), SecurityError> {
        let (category, allowed_parent) = match child_kind {
            "image" => (FileCategory::Images, LinkedEntityKind::Commodity),
            "invoice" => (FileCategory::Invoices, LinkedEntityKind::Commodity),
            "manual" => (FileCategory::Manuals, LinkedEntityKind::Commodity),
            "export" => (FileCategory::Exports, LinkedEntityKind::Export),
            other => return Err(SecurityError::UnknownFileType(other.to_string())),
        };

        if LinkedEntityKind::parse(parent_kind) != Some(allowed_parent) {
            return Err(SecurityError::InvalidRelationship {
                child: child_kind.to_string(),
                parent: parent_kind.to_string(),
            });
        }

        Ok((category, allowed_parent))
    }

    pub async fn validate_import_scope(
        &self,
        entity_id: Uuid,
        actor: ActingUser,
        session: &ImportSession,
    ) -> Result<(), SecurityError> {
        if session.contains(entity_id) {
            return Ok(());
        }
        self.validate_ownership(entity_id, actor).await
    }

    pub fn log_unauthorized_attempt(&self, attempt: UnauthorizedAttempt) {
        metrics::counter!(
            "stockpile_security_denials_total",
            "operation" => attempt.operation.clone()
        )
        .increment(1);
        self.logger.log(&attempt);
    }

    /// Whitelist, then session, then ownership. The target must also be of
    /// the kind the whitelist allows, whatever kind the archive declared.
    pub async fn validate_file_link(
        &self,
        child_kind: &str,
        parent_kind: &str,
        parent_id: Uuid,
        actor: ActingUser,
        session: &ImportSession,
    ) -> Result<(FileCategory, LinkedEntityKind), SecurityError> {
        let link = match self.validate_relationship_integrity(child_kind, parent_kind) {
            Ok(link) => link,
            Err(error) => {
                self.record_denial(actor, parent_id, OPERATION_FILE_LINK, &error);
                return Err(error);
            }
        };

        let actual = match session.kind_of(parent_id) {
            Some(kind) => kind,
            None => {
                self.check_owner(parent_id, actor, OPERATION_FILE_LINK)
                    .await?
                    .kind
            }
        };

        if actual != link.1 {
            let error = SecurityError::InvalidRelationship {
                child: child_kind.to_string(),
                parent: actual.as_str().to_string(),
            };
            self.record_denial(actor, parent_id, OPERATION_FILE_LINK, &error);
            return Err(error);
        }
        Ok(link)
    }

    async fn check_owner(
        &self,
        entity_id: Uuid,
        actor: ActingUser,
        operation: &str,
    ) -> Result<EntityOwner, SecurityError> {
        let denial = match self.lookup.owner_of(entity_id).await? {
            Some(owner) if actor.owns(owner.tenant_id, owner.user_id) => return Ok(owner),
            Some(_) => SecurityError::Unauthorized { entity_id },
            None => SecurityError::NotFound { entity_id },
        };
        self.record_denial(actor, entity_id, operation, &denial);
        Err(denial)
    }

    fn record_denial(
        &self,
        actor: ActingUser,
        target_id: Uuid,
        operation: &str,
        error: &SecurityError,
    ) {
        let reason = match error {
            SecurityError::Unauthorized { .. } => "owned by another user".to_string(),
            SecurityError::NotFound { .. } => "entity does not exist".to_string(),
            other => other.to_string(),
        };
        self.log_unauthorized_attempt(UnauthorizedAttempt {
            user_id: actor.user_id,
            tenant_id: actor.tenant_id,
            target_id,
            operation: operation.to_string(),
            reason,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingLookup {
        owners: HashMap<Uuid, EntityOwner>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OwnershipLookup for CountingLookup {
        async fn owner_of(&self, entity_id: Uuid) -> Result<Option<EntityOwner>, SecurityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.owners.get(&entity_id).copied())
        }
    }

    #[derive(Default)]
    struct RecordingLogger {
        attempts: Mutex<Vec<UnauthorizedAttempt>>,
    }

    impl AttemptLogger for RecordingLogger {
        fn log(&self, attempt: &UnauthorizedAttempt) {
            self.attempts.lock().unwrap().push(attempt.clone());
        }
    }

    struct Fixture {
        validator: SecurityValidator,
        lookup: Arc<CountingLookup>,
        logger: Arc<RecordingLogger>,
        actor: ActingUser,
        own_commodity: Uuid,
        foreign_commodity: Uuid,
        own_location: Uuid,
    }

    fn fixture() -> Fixture {
        let actor = ActingUser::new(Uuid::new_v4(), Uuid::new_v4());
        let own_commodity = Uuid::new_v4();
        let foreign_commodity = Uuid::new_v4();
        let own_location = Uuid::new_v4();

        let mut owners = HashMap::new();
        owners.insert(
            own_location,
            EntityOwner {
                kind: LinkedEntityKind::Location,
                tenant_id: actor.tenant_id,
                user_id: actor.user_id,
            },
        );
        owners.insert(
            own_commodity,
            EntityOwner {
                kind: LinkedEntityKind::Commodity,
                tenant_id: actor.tenant_id,
                user_id: actor.user_id,
            },
        );
        owners.insert(
            foreign_commodity,
            EntityOwner {
                kind: LinkedEntityKind::Commodity,
                tenant_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
            },
        );

        let lookup = Arc::new(CountingLookup {
            owners,
            calls: AtomicUsize::new(0),
        });
        let logger = Arc::new(RecordingLogger::default());
        let validator = SecurityValidator::with_parts(lookup.clone(), logger.clone());

        Fixture {
            validator,
            lookup,
            logger,
            actor,
            own_commodity,
            foreign_commodity,
            own_location,
        }
    }

    #[tokio::test]
    async fn owner_passes_without_audit() {
        let f = fixture();
        f.validator
            .validate_ownership(f.own_commodity, f.actor)
            .await
            .unwrap();
        assert!(f.logger.attempts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cross_tenant_access_is_denied_and_logged_once() {
        let f = fixture();
        let result = f
            .validator
            .validate_ownership(f.foreign_commodity, f.actor)
            .await;

        assert!(matches!(result, Err(SecurityError::Unauthorized { .. })));
        let attempts = f.logger.attempts.lock().unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].target_id, f.foreign_commodity);
        assert_eq!(attempts[0].user_id, f.actor.user_id);
    }

    #[tokio::test]
    async fn missing_entity_is_not_found_and_logged() {
        let f = fixture();
        let missing = Uuid::new_v4();
        let result = f.validator.validate_ownership(missing, f.actor).await;

        assert!(matches!(result, Err(SecurityError::NotFound { entity_id }) if entity_id == missing));
        assert_eq!(f.logger.attempts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn session_ids_skip_the_lookup() {
        let f = fixture();
        let created = Uuid::new_v4();
        let mut session = ImportSession::new();
        session.record(created, LinkedEntityKind::Commodity);

        for _ in 0..5 {
            f.validator
                .validate_import_scope(created, f.actor, &session)
                .await
                .unwrap();
        }
        assert_eq!(f.lookup.calls.load(Ordering::SeqCst), 0);

        f.validator
            .validate_import_scope(f.own_commodity, f.actor, &session)
            .await
            .unwrap();
        assert_eq!(f.lookup.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn relationship_whitelist() {
        let f = fixture();
        let v = &f.validator;

        assert_eq!(
            v.validate_relationship_integrity("image", "commodity").unwrap(),
            (FileCategory::Images, LinkedEntityKind::Commodity)
        );
        assert_eq!(
            v.validate_relationship_integrity("invoice", "commodity").unwrap().0,
            FileCategory::Invoices
        );
        assert_eq!(
            v.validate_relationship_integrity("manual", "commodity").unwrap().0,
            FileCategory::Manuals
        );
        assert_eq!(
            v.validate_relationship_integrity("export", "export").unwrap(),
            (FileCategory::Exports, LinkedEntityKind::Export)
        );

        assert!(matches!(
            v.validate_relationship_integrity("image", "location"),
            Err(SecurityError::InvalidRelationship { .. })
        ));
        assert!(matches!(
            v.validate_relationship_integrity("export", "commodity"),
            Err(SecurityError::InvalidRelationship { .. })
        ));
        assert!(matches!(
            v.validate_relationship_integrity("video", "commodity"),
            Err(SecurityError::UnknownFileType(kind)) if kind == "video"
        ));
    }

    #[tokio::test]
    async fn file_link_checks_whitelist_before_lookup() {
        let f = fixture();
        let session = ImportSession::new();

        let result = f
            .validator
            .validate_file_link("image", "area", f.own_commodity, f.actor, &session)
            .await;

        assert!(matches!(result, Err(SecurityError::InvalidRelationship { .. })));
        assert_eq!(f.lookup.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.logger.attempts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_link_to_foreign_commodity_is_denied() {
        let f = fixture();
        let session = ImportSession::new();

        let allowed = f
            .validator
            .validate_file_link("manual", "commodity", f.own_commodity, f.actor, &session)
            .await
            .unwrap();
        assert_eq!(allowed.0, FileCategory::Manuals);

        let denied = f
            .validator
            .validate_file_link("image", "commodity", f.foreign_commodity, f.actor, &session)
            .await;
        assert!(matches!(denied, Err(SecurityError::Unauthorized { .. })));

        let attempts = f.logger.attempts.lock().unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].operation, "link_file");
    }

    #[tokio::test]
    async fn file_link_to_an_entity_of_another_kind_is_rejected() {
        let f = fixture();

        let result = f
            .validator
            .validate_file_link("image", "commodity", f.own_location, f.actor, &ImportSession::new())
            .await;
        assert!(matches!(
            result,
            Err(SecurityError::InvalidRelationship { ref parent, .. }) if parent == "location"
        ));

        let mut session = ImportSession::new();
        let created_area = Uuid::new_v4();
        session.record(created_area, LinkedEntityKind::Area);
        let result = f
            .validator
            .validate_file_link("invoice", "commodity", created_area, f.actor, &session)
            .await;
        assert!(matches!(result, Err(SecurityError::InvalidRelationship { .. })));

        assert_eq!(f.logger.attempts.lock().unwrap().len(), 2);
        assert_eq!(f.lookup.calls.load(Ordering::SeqCst), 1);
    }
}
