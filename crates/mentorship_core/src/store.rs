//! crates/mentorship_core/src/store.rs
//!
//! The typed, tenant-scoped client over the [`EntityStore`] port.
//!
//! Every write of a tenant-scoped record takes the organization it is performed
//! for. The client refuses any record, patch or reference that points outside
//! that organization before the store is touched.

use futures::future::try_join_all;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::domain::{
    BlogPost, CalendarEvent, ChatMessage, Content, ContentKind, Goal, Invitation, Match,
    Notification, Organization, Rating, User,
};
use crate::ports::{Collection, EntityStore, Filter, PageRequest, PortError, PortResult};

/// Field names that can never be changed through `update`.
const IMMUTABLE_FIELDS: [&str; 3] = ["id", "organizationId", "isPlatform"];

//=========================================================================================
// Entity Mapping
//=========================================================================================

/// A record type stored in one collection.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: Collection;
    /// Document fields holding user ids (a string or an array of strings).
    const USER_REFS: &'static [&'static str] = &[];

    fn id(&self) -> &str;
    /// `None` marks a platform-wide record.
    fn organization_id(&self) -> Option<&str>;
}

macro_rules! tenant_entity {
    ($ty:ty, $collection:expr, [$($field:literal),*]) => {
        impl Entity for $ty {
            const COLLECTION: Collection = $collection;
            const USER_REFS: &'static [&'static str] = &[$($field),*];

            fn id(&self) -> &str {
                &self.id
            }

            fn organization_id(&self) -> Option<&str> {
                Some(&self.organization_id)
            }
        }
    };
}

tenant_entity!(User, Collection::Users, []);
tenant_entity!(Match, Collection::Matches, ["mentorId", "menteeId"]);
tenant_entity!(Goal, Collection::Goals, ["userId"]);
tenant_entity!(Rating, Collection::Ratings, ["fromUserId", "toUserId"]);
tenant_entity!(CalendarEvent, Collection::CalendarEvents, ["mentorId", "participantIds", "createdBy"]);
tenant_entity!(Notification, Collection::Notifications, ["userId"]);
tenant_entity!(Invitation, Collection::Invitations, ["invitedBy"]);
tenant_entity!(ChatMessage, Collection::ChatMessages, ["senderId"]);

impl Entity for Organization {
    const COLLECTION: Collection = Collection::Organizations;

    fn id(&self) -> &str {
        &self.id
    }

    // An organization is the tenant itself.
    fn organization_id(&self) -> Option<&str> {
        Some(&self.id)
    }
}

/// Maps each content kind to its collection.
pub trait ContentCollection: ContentKind {
    const COLLECTION: Collection;
}

impl ContentCollection for crate::domain::ResourceKind {
    const COLLECTION: Collection = Collection::Resources;
}
impl ContentCollection for crate::domain::DiscussionGuideKind {
    const COLLECTION: Collection = Collection::DiscussionGuides;
}
impl ContentCollection for crate::domain::CareerTemplateKind {
    const COLLECTION: Collection = Collection::CareerTemplates;
}
impl ContentCollection for crate::domain::TrainingVideoKind {
    const COLLECTION: Collection = Collection::TrainingVideos;
}

impl<K: ContentCollection> Entity for Content<K> {
    const COLLECTION: Collection = K::COLLECTION;

    fn id(&self) -> &str {
        &self.id
    }

    fn organization_id(&self) -> Option<&str> {
        self.organization_id.as_deref()
    }
}

impl Entity for BlogPost {
    const COLLECTION: Collection = Collection::BlogPosts;

    fn id(&self) -> &str {
        &self.id
    }

    fn organization_id(&self) -> Option<&str> {
        self.organization_id.as_deref()
    }
}

/// A page of typed records plus the cursor for the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

//=========================================================================================
// The Client
//=========================================================================================

#[derive(Clone)]
pub struct StoreClient {
    store: Arc<dyn EntityStore>,
}

impl StoreClient {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// The underlying port, for change subscriptions.
    pub fn port(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Writes a new tenant-scoped record after checking its organization and references.
    pub async fn create<E: Entity>(&self, organization_id: &str, entity: E) -> PortResult<E> {
        require_scope(organization_id)?;
        if entity.id().is_empty() {
            return Err(PortError::Validation(format!(
                "{} record is missing an id",
                E::COLLECTION
            )));
        }
        match entity.organization_id() {
            Some(owner) if owner == organization_id => {}
            Some(_) => {
                return Err(PortError::tenant_mismatch(
                    E::COLLECTION.as_str(),
                    entity.id(),
                    organization_id,
                ))
            }
            None => {
                return Err(PortError::Validation(format!(
                    "{} {} has no organization; use create_platform",
                    E::COLLECTION,
                    entity.id()
                )))
            }
        }

        let document = to_document(&entity)?;
        self.check_user_refs::<E>(organization_id, &document).await?;
        self.store
            .insert(E::COLLECTION, entity.id(), document)
            .await?;
        debug!(collection = %E::COLLECTION, id = entity.id(), organization_id, "record created");
        Ok(entity)
    }

    /// Writes a platform-wide record (no organization, visible to every tenant).
    pub async fn create_platform<E: Entity>(&self, entity: E) -> PortResult<E> {
        if !E::COLLECTION.allows_platform_items() {
            return Err(PortError::Validation(format!(
                "{} cannot hold platform records",
                E::COLLECTION
            )));
        }
        if entity.organization_id().is_some() {
            return Err(PortError::Validation(
                "platform records cannot carry an organization".to_string(),
            ));
        }
        let mut document = to_document(&entity)?;
        if let Some(fields) = document.as_object_mut() {
            fields.insert("isPlatform".to_string(), Value::Bool(true));
        }
        self.store
            .insert(E::COLLECTION, entity.id(), document)
            .await?;
        debug!(collection = %E::COLLECTION, id = entity.id(), "platform record created");
        Ok(entity)
    }

    /// Unscoped point read.
    pub async fn get<E: Entity>(&self, id: &str) -> PortResult<Option<E>> {
        match self.store.get(E::COLLECTION, id).await? {
            Some(document) => from_document(document).map(Some),
            None => Ok(None),
        }
    }

    /// Reads a record that must be visible to the organization.
    /// Platform records are visible to every organization.
    pub async fn get_scoped<E: Entity>(&self, organization_id: &str, id: &str) -> PortResult<E> {
        require_scope(organization_id)?;
        let entity: E = self
            .get(id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("{} {}", E::COLLECTION, id)))?;
        match entity.organization_id() {
            Some(owner) if owner != organization_id => Err(PortError::tenant_mismatch(
                E::COLLECTION.as_str(),
                id,
                organization_id,
            )),
            _ => Ok(entity),
        }
    }

    /// Applies a partial update to a record owned by the organization.
    pub async fn update<E: Entity>(
        &self,
        organization_id: &str,
        id: &str,
        fields: Value,
    ) -> PortResult<()> {
        let fields = self.checked_patch::<E>(organization_id, id, fields).await?;
        self.store.patch(E::COLLECTION, id, fields).await?;
        debug!(collection = %E::COLLECTION, id, organization_id, "record updated");
        Ok(())
    }

    /// Like `update`, but only writes while every `expected` filter still matches
    /// the stored record. Returns whether the update was applied.
    pub async fn update_if<E: Entity>(
        &self,
        organization_id: &str,
        id: &str,
        expected: &[Filter],
        fields: Value,
    ) -> PortResult<bool> {
        let fields = self.checked_patch::<E>(organization_id, id, fields).await?;
        let applied = self
            .store
            .patch_if(E::COLLECTION, id, expected, fields)
            .await?;
        debug!(collection = %E::COLLECTION, id, organization_id, applied, "conditional update");
        Ok(applied)
    }

    async fn checked_patch<E: Entity>(
        &self,
        organization_id: &str,
        id: &str,
        fields: Value,
    ) -> PortResult<Map<String, Value>> {
        require_scope(organization_id)?;
        let fields = patch_fields(fields)?;
        let existing: E = self.get_scoped(organization_id, id).await?;
        if existing.organization_id().is_none() {
            return Err(PortError::PermissionDenied(format!(
                "platform {} {} cannot be changed from an organization",
                E::COLLECTION,
                id
            )));
        }
        self.check_user_refs::<E>(organization_id, &Value::Object(fields.clone()))
            .await?;
        Ok(fields)
    }

    /// Deletes a record owned by the organization.
    pub async fn delete<E: Entity>(&self, organization_id: &str, id: &str) -> PortResult<()> {
        let existing: E = self.get_scoped(organization_id, id).await?;
        if existing.organization_id().is_none() {
            return Err(PortError::PermissionDenied(format!(
                "platform {} {} cannot be deleted from an organization",
                E::COLLECTION,
                id
            )));
        }
        self.store.delete(E::COLLECTION, id).await?;
        debug!(collection = %E::COLLECTION, id, organization_id, "record deleted");
        Ok(())
    }

    pub async fn update_platform<E: Entity>(&self, id: &str, fields: Value) -> PortResult<()> {
        let fields = patch_fields(fields)?;
        self.require_platform_record::<E>(id).await?;
        self.store.patch(E::COLLECTION, id, fields).await
    }

    pub async fn delete_platform<E: Entity>(&self, id: &str) -> PortResult<()> {
        self.require_platform_record::<E>(id).await?;
        self.store.delete(E::COLLECTION, id).await
    }

    /// Lists the organization's records. The organization filter is always applied.
    pub async fn list_by_organization<E: Entity>(
        &self,
        organization_id: &str,
        filters: &[Filter],
    ) -> PortResult<Vec<E>> {
        require_scope(organization_id)?;
        let mut scoped = Vec::with_capacity(filters.len() + 1);
        scoped.push(Filter::eq("organizationId", organization_id));
        scoped.extend(filters.iter().filter(|f| f.field != "organizationId").cloned());
        self.store
            .query(E::COLLECTION, &scoped)
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }

    /// Lists platform-wide records of a collection that allows them.
    pub async fn list_platform<E: Entity>(&self, filters: &[Filter]) -> PortResult<Vec<E>> {
        if !E::COLLECTION.allows_platform_items() {
            return Ok(Vec::new());
        }
        let mut platform = vec![Filter::eq("isPlatform", true)];
        platform.extend(filters.iter().cloned());
        self.store
            .query(E::COLLECTION, &platform)
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }

    /// Single-record lookup by a unique key (invitation token, join code) ahead of
    /// any session existing. Returns the first match.
    pub async fn find_one_by<E: Entity>(&self, field: &str, value: &str) -> PortResult<Option<E>> {
        if value.trim().is_empty() {
            return Err(PortError::Validation(format!("{} is required", field)));
        }
        let found = self
            .store
            .query(E::COLLECTION, &[Filter::eq(field, value)])
            .await?;
        found.into_iter().next().map(from_document).transpose()
    }

    /// Cursor-based page of the organization's records.
    pub async fn page<E: Entity>(
        &self,
        organization_id: &str,
        request: &PageRequest,
    ) -> PortResult<Page<E>> {
        require_scope(organization_id)?;
        if request.page_size == 0 {
            return Err(PortError::Validation("page size must be positive".to_string()));
        }
        let page = self
            .store
            .page(
                E::COLLECTION,
                &[Filter::eq("organizationId", organization_id)],
                request,
            )
            .await?;
        Ok(Page {
            data: page
                .documents
                .into_iter()
                .map(from_document)
                .collect::<PortResult<_>>()?,
            next_cursor: page.next_cursor,
            has_more: page.has_more,
        })
    }

    /// Atomic add-by-delta on an integer field of a record owned by the organization.
    pub async fn adjust_counter<E: Entity>(
        &self,
        organization_id: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> PortResult<()> {
        if IMMUTABLE_FIELDS.contains(&field) {
            return Err(PortError::Validation(format!("{} is not a counter", field)));
        }
        let _owner: E = self.get_scoped(organization_id, id).await?;
        self.store.increment(E::COLLECTION, id, field, delta).await?;
        debug!(collection = %E::COLLECTION, id, field, delta, "counter adjusted");
        Ok(())
    }

    async fn require_platform_record<E: Entity>(&self, id: &str) -> PortResult<()> {
        let existing: E = self
            .get(id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("{} {}", E::COLLECTION, id)))?;
        if existing.organization_id().is_some() {
            return Err(PortError::PermissionDenied(format!(
                "{} {} is not a platform record",
                E::COLLECTION,
                id
            )));
        }
        Ok(())
    }

    /// Every user id referenced by the document must resolve to a user of the organization.
    async fn check_user_refs<E: Entity>(
        &self,
        organization_id: &str,
        document: &Value,
    ) -> PortResult<()> {
        let mut referenced = BTreeSet::new();
        for field in E::USER_REFS {
            match document.get(*field) {
                Some(Value::String(id)) => {
                    referenced.insert(id.clone());
                }
                Some(Value::Array(ids)) => {
                    for id in ids {
                        let id = id.as_str().ok_or_else(|| {
                            PortError::Validation(format!("{} must hold user ids", field))
                        })?;
                        referenced.insert(id.to_string());
                    }
                }
                Some(Value::Null) | None => {}
                Some(_) => {
                    return Err(PortError::Validation(format!(
                        "{} must hold a user id",
                        field
                    )))
                }
            }
        }
        if referenced.iter().any(|id| id.is_empty()) {
            return Err(PortError::Validation("referenced user id is empty".to_string()));
        }

        try_join_all(referenced.iter().map(|user_id| async move {
            let user: User = self
                .get(user_id)
                .await?
                .ok_or_else(|| PortError::NotFound(format!("users {}", user_id)))?;
            if user.organization_id != organization_id {
                return Err(PortError::tenant_mismatch("users", user_id, organization_id));
            }
            Ok(())
        }))
        .await?;
        Ok(())
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

fn require_scope(organization_id: &str) -> PortResult<()> {
    if organization_id.trim().is_empty() {
        return Err(PortError::Validation("organization id is required".to_string()));
    }
    Ok(())
}

fn patch_fields(fields: Value) -> PortResult<Map<String, Value>> {
    let Value::Object(fields) = fields else {
        return Err(PortError::Validation("update must be a JSON object".to_string()));
    };
    if fields.is_empty() {
        return Err(PortError::Validation("update has no fields".to_string()));
    }
    if let Some(field) = IMMUTABLE_FIELDS.iter().find(|f| fields.contains_key(**f)) {
        return Err(PortError::Validation(format!("{} cannot be changed", field)));
    }
    Ok(fields)
}

pub(crate) fn to_document<T: Serialize>(value: &T) -> PortResult<Value> {
    serde_json::to_value(value).map_err(|e| PortError::Unexpected(e.to_string()))
}

pub(crate) fn from_document<E: DeserializeOwned>(document: Value) -> PortResult<E> {
    serde_json::from_value(document).map_err(|e| PortError::Unexpected(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn patches_cannot_move_records_between_tenants() {
        let err = patch_fields(json!({ "organizationId": "org2" })).unwrap_err();
        assert!(matches!(err, PortError::Validation(_)));
        assert!(patch_fields(json!({})).is_err());
        assert!(patch_fields(json!(["title"])).is_err());
        assert!(patch_fields(json!({ "title": "New" })).is_ok());
    }
}
