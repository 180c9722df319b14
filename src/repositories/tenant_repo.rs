use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;
use validator::Validate;

use crate::models::tenant::{NewTenant, Tenant};
use crate::services::ingest_error::{IngestError, Result};

/// Registry of storefront tenants. Tenants are created and managed outside
/// the ingestion pipeline; the pipeline only reads them.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Tenant>>;

    async fn find_by_shop_domain(&self, shop_domain: &str) -> Result<Option<Tenant>>;

    /// Tenants with an access token, i.e. those eligible for scheduled sync.
    async fn list_syncable(&self) -> Result<Vec<Tenant>>;

    async fn create(&self, tenant: &NewTenant) -> Result<Tenant>;

    async fn update_access_token(&self, id: Uuid, access_token: Option<&str>) -> Result<bool>;
}

fn validate_new_tenant(tenant: &NewTenant) -> Result<()> {
    tenant
        .validate()
        .map_err(|e| IngestError::validation(format!("invalid tenant: {}", e)))
}

const TENANT_COLUMNS: &str = "id, shop_domain, access_token, email, created_at, updated_at";

pub struct PgTenantStore {
    pool: PgPool,
}

impl PgTenantStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {} FROM tenants WHERE id = $1",
            TENANT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tenant)
    }

    async fn find_by_shop_domain(&self, shop_domain: &str) -> Result<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {} FROM tenants WHERE LOWER(shop_domain) = LOWER($1)",
            TENANT_COLUMNS
        ))
        .bind(shop_domain)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tenant)
    }

    async fn list_syncable(&self) -> Result<Vec<Tenant>> {
        let tenants = sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {} FROM tenants WHERE access_token IS NOT NULL ORDER BY created_at",
            TENANT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(tenants)
    }

    async fn create(&self, tenant: &NewTenant) -> Result<Tenant> {
        validate_new_tenant(tenant)?;

        let created = sqlx::query_as::<_, Tenant>(&format!(
            r#"
            INSERT INTO tenants (id, shop_domain, access_token, email)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            TENANT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&tenant.shop_domain)
        .bind(&tenant.access_token)
        .bind(&tenant.email)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn update_access_token(&self, id: Uuid, access_token: Option<&str>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tenants SET access_token = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(access_token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(Default)]
pub struct MemoryTenantStore {
    tenants: RwLock<HashMap<Uuid, Tenant>>,
}

impl MemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Tenant>> {
        Ok(self.tenants.read().await.get(&id).cloned())
    }

    async fn find_by_shop_domain(&self, shop_domain: &str) -> Result<Option<Tenant>> {
        Ok(self
            .tenants
            .read()
            .await
            .values()
            .find(|t| t.shop_domain.eq_ignore_ascii_case(shop_domain))
            .cloned())
    }

    async fn list_syncable(&self) -> Result<Vec<Tenant>> {
        let mut tenants: Vec<Tenant> = self
            .tenants
            .read()
            .await
            .values()
            .filter(|t| t.sync_enabled())
            .cloned()
            .collect();
        tenants.sort_by_key(|t| t.created_at);
        Ok(tenants)
    }

    async fn create(&self, tenant: &NewTenant) -> Result<Tenant> {
        validate_new_tenant(tenant)?;

        let now = Utc::now();
        let created = Tenant {
            id: Uuid::new_v4(),
            shop_domain: tenant.shop_domain.clone(),
            access_token: tenant.access_token.clone(),
            email: tenant.email.clone(),
            created_at: now,
            updated_at: now,
        };
        self.tenants.write().await.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_access_token(&self, id: Uuid, access_token: Option<&str>) -> Result<bool> {
        let mut tenants = self.tenants.write().await;
        match tenants.get_mut(&id) {
            Some(tenant) => {
                tenant.access_token = access_token.map(str::to_string);
                tenant.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_tenant(domain: &str, token: Option<&str>) -> NewTenant {
        NewTenant {
            shop_domain: domain.to_string(),
            email: "owner@example.com".to_string(),
            access_token: token.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_only_tenants_with_tokens_are_syncable() {
        let store = MemoryTenantStore::new();
        store.create(&new_tenant("a.myshopify.com", Some("shpat_a"))).await.unwrap();
        let b = store.create(&new_tenant("b.myshopify.com", None)).await.unwrap();

        let syncable = store.list_syncable().await.unwrap();
        assert_eq!(syncable.len(), 1);
        assert_eq!(syncable[0].shop_domain, "a.myshopify.com");

        store.update_access_token(b.id, Some("shpat_b")).await.unwrap();
        assert_eq!(store.list_syncable().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_shop_domain_lookup_is_case_insensitive() {
        let store = MemoryTenantStore::new();
        let created = store.create(&new_tenant("acme.myshopify.com", None)).await.unwrap();

        let found = store.find_by_shop_domain("ACME.myshopify.com").await.unwrap();
        assert_eq!(found.map(|t| t.id), Some(created.id));
    }

    #[tokio::test]
    async fn test_invalid_tenant_is_rejected() {
        let store = MemoryTenantStore::new();
        let err = store
            .create(&NewTenant {
                shop_domain: "acme.myshopify.com".to_string(),
                email: "not-an-email".to_string(),
                access_token: None,
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "validation");
        assert!(store.find_by_shop_domain("acme.myshopify.com").await.unwrap().is_none());
    }
}
