//! Owner-scoped photo mutations.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use doku_core::calendar_week::is_valid_week_label;
use doku_core::{
    Error, Photo, PhotoRepository, Result, TenantScope, UpdatePhotoRequest,
};

/// Validates requests and delegates to the photo repository, which applies
/// each mutation and its audit entries in one transaction.
#[derive(Clone)]
pub struct PhotoService {
    photos: Arc<dyn PhotoRepository>,
}

impl PhotoService {
    pub fn new(photos: Arc<dyn PhotoRepository>) -> Self {
        Self { photos }
    }

    /// Fetch a photo visible to `tenant`, including tombstoned ones.
    pub async fn get(&self, tenant: TenantScope<'_>, id: Uuid) -> Result<Photo> {
        self.photos
            .get(id)
            .await?
            .filter(|p| tenant.is_none() || p.tenant_id.as_deref() == tenant)
            .ok_or(Error::PhotoNotFound(id))
    }

    /// Attach photos to an order, all or nothing.
    ///
    /// Without `week_override` each photo keeps its own calendar week; with it,
    /// every photo gets the override. Repeated ids are applied once.
    pub async fn assign_to_order(
        &self,
        tenant: TenantScope<'_>,
        photo_ids: &[Uuid],
        order_id: Uuid,
        week_override: Option<&str>,
        actor: &str,
    ) -> Result<Vec<Photo>> {
        if photo_ids.is_empty() {
            return Err(Error::InvalidInput("photo_ids must not be empty".to_string()));
        }
        if let Some(week) = week_override {
            if !is_valid_week_label(week) {
                return Err(Error::InvalidInput(format!(
                    "invalid calendar week: {} (expected YYYY-Www)",
                    week
                )));
            }
        }

        let mut seen = HashSet::with_capacity(photo_ids.len());
        let ids: Vec<Uuid> = photo_ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        let photos = self
            .photos
            .assign_to_order(tenant, &ids, order_id, week_override, actor)
            .await?;

        info!(
            subsystem = "ingest",
            component = "photo_service",
            op = "assign_to_order",
            order_id = %order_id,
            result_count = photos.len(),
            week_override = week_override.unwrap_or(""),
            "Photos assigned to order"
        );
        Ok(photos)
    }

    /// Set the quality flag and/or note.
    pub async fn update_annotations(
        &self,
        tenant: TenantScope<'_>,
        id: Uuid,
        req: UpdatePhotoRequest,
        actor: &str,
    ) -> Result<Photo> {
        if req.quality_flag.is_none() && req.note.is_none() {
            return Err(Error::InvalidInput("nothing to update".to_string()));
        }
        self.photos.update_annotations(tenant, id, req, actor).await
    }

    /// Tombstone a photo. Repeating the call keeps the first `deleted_at`.
    pub async fn soft_delete(&self, tenant: TenantScope<'_>, id: Uuid, actor: &str) -> Result<Photo> {
        let photo = self.photos.soft_delete(tenant, id, actor).await?;
        info!(
            subsystem = "ingest",
            component = "photo_service",
            op = "soft_delete",
            photo_id = %id,
            "Photo deleted"
        );
        Ok(photo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use doku_core::mock::MemoryStore;
    use doku_core::{AcquisitionMode, AuditAction, NewOrder, NewPhoto, OrderRepository};

    async fn seed(store: &MemoryStore, week: &str) -> Photo {
        store
            .insert_deduplicated(NewPhoto {
                object_key: format!("uploads/{}.jpg", Uuid::new_v4()),
                taken_at: Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap(),
                mode: AcquisitionMode::FixedSite,
                tenant_id: Some("c1".to_string()),
                uploader_id: "u1".to_string(),
                device_id: "d1".to_string(),
                site_id: None,
                location_id: None,
                point: None,
                address: None,
                content_hash: Uuid::new_v4().simple().to_string(),
                perceptual_hash: None,
                calendar_week: week.to_string(),
            })
            .await
            .unwrap()
    }

    async fn order(store: &MemoryStore) -> Uuid {
        store
            .insert(NewOrder {
                tenant_id: Some("c1".to_string()),
                name: "Order 1".to_string(),
                status: "open".to_string(),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_assign_keeps_each_week_without_override() {
        let store = MemoryStore::new();
        let service = PhotoService::new(Arc::new(store.clone()));
        let a = seed(&store, "2024-W10").await;
        let b = seed(&store, "2024-W11").await;
        let order_id = order(&store).await;

        let photos = service
            .assign_to_order(Some("c1"), &[a.id, b.id], order_id, None, "u1")
            .await
            .unwrap();

        let weeks: Vec<_> = photos.iter().map(|p| p.calendar_week.as_str()).collect();
        assert_eq!(weeks, vec!["2024-W10", "2024-W11"]);
        assert!(photos.iter().all(|p| p.order_id == Some(order_id)));
    }

    #[tokio::test]
    async fn test_assign_applies_override_to_all() {
        let store = MemoryStore::new();
        let service = PhotoService::new(Arc::new(store.clone()));
        let a = seed(&store, "2024-W10").await;
        let b = seed(&store, "2024-W11").await;
        let order_id = order(&store).await;

        let photos = service
            .assign_to_order(Some("c1"), &[a.id, b.id, a.id], order_id, Some("2024-W20"), "u1")
            .await
            .unwrap();

        assert_eq!(photos.len(), 2);
        assert!(photos.iter().all(|p| p.calendar_week == "2024-W20"));

        let updates = store
            .audit_entries()
            .into_iter()
            .filter(|e| e.action == AuditAction::Update)
            .count();
        assert_eq!(updates, 2);
    }

    #[tokio::test]
    async fn test_assign_with_unknown_id_changes_nothing() {
        let store = MemoryStore::new();
        let service = PhotoService::new(Arc::new(store.clone()));
        let a = seed(&store, "2024-W10").await;
        let order_id = order(&store).await;
        let missing = Uuid::new_v4();

        let err = service
            .assign_to_order(Some("c1"), &[a.id, missing], order_id, None, "u1")
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let unchanged = service.get(Some("c1"), a.id).await.unwrap();
        assert_eq!(unchanged.order_id, None);
        assert!(store.audit_entries().is_empty());
    }

    #[tokio::test]
    async fn test_assign_rejects_malformed_override() {
        let store = MemoryStore::new();
        let service = PhotoService::new(Arc::new(store.clone()));
        let a = seed(&store, "2024-W10").await;
        let order_id = order(&store).await;

        let err = service
            .assign_to_order(Some("c1"), &[a.id], order_id, Some("week 20"), "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_assign_rejects_empty_selection() {
        let service = PhotoService::new(Arc::new(MemoryStore::new()));
        let err = service
            .assign_to_order(None, &[], Uuid::new_v4(), None, "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_soft_delete_is_idempotent() {
        let store = MemoryStore::new();
        let service = PhotoService::new(Arc::new(store.clone()));
        let a = seed(&store, "2024-W10").await;

        let first = service.soft_delete(Some("c1"), a.id, "u1").await.unwrap();
        let second = service.soft_delete(Some("c1"), a.id, "u1").await.unwrap();

        assert_eq!(first.deleted_at, second.deleted_at);
        assert!(first.updated_at >= a.updated_at);
    }

    #[tokio::test]
    async fn test_soft_delete_missing_is_not_found() {
        let service = PhotoService::new(Arc::new(MemoryStore::new()));
        let err = service
            .soft_delete(None, Uuid::new_v4(), "u1")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_get_hides_other_tenants() {
        let store = MemoryStore::new();
        let service = PhotoService::new(Arc::new(store.clone()));
        let a = seed(&store, "2024-W10").await;

        assert!(service.get(Some("c1"), a.id).await.is_ok());
        assert!(service.get(None, a.id).await.is_ok());
        assert!(service.get(Some("c2"), a.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_empty_annotation_update_rejected() {
        let store = MemoryStore::new();
        let service = PhotoService::new(Arc::new(store.clone()));
        let a = seed(&store, "2024-W10").await;

        let err = service
            .update_annotations(Some("c1"), a.id, UpdatePhotoRequest::default(), "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let updated = service
            .update_annotations(
                Some("c1"),
                a.id,
                UpdatePhotoRequest {
                    quality_flag: Some(true),
                    note: None,
                },
                "u1",
            )
            .await
            .unwrap();
        assert!(updated.quality_flag);
    }
}
