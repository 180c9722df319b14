use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;
use validator::Validate;

use crate::utils::log_sanitizer::mask_token;

#[derive(Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub shop_domain: String,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Access tokens must never reach the logs.
impl fmt::Debug for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tenant")
            .field("id", &self.id)
            .field("shop_domain", &self.shop_domain)
            .field("access_token", &self.access_token.as_deref().map(mask_token))
            .field("email", &self.email)
            .finish()
    }
}

impl Tenant {
    /// Credentials for the storefront pull API, or `None` when sync is disabled.
    pub fn credentials(&self) -> Option<StorefrontCredentials> {
        self.access_token.as_ref().map(|token| StorefrontCredentials {
            shop_domain: self.shop_domain.clone(),
            access_token: token.clone(),
        })
    }

    pub fn sync_enabled(&self) -> bool {
        self.access_token.is_some()
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct NewTenant {
    #[validate(length(min = 4, max = 255, message = "Shop domain must be 4-255 characters"))]
    pub shop_domain: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    pub access_token: Option<String>,
}

/// Body of `POST /api/tenant/shopify-token`.
#[derive(Deserialize, Validate)]
pub struct UpdateAccessTokenRequest {
    #[validate(length(min = 1, max = 255, message = "Access token is required"))]
    pub access_token: String,
}

impl fmt::Debug for UpdateAccessTokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateAccessTokenRequest")
            .field("access_token", &mask_token(&self.access_token))
            .finish()
    }
}

#[derive(Debug, Serialize)]
pub struct StorefrontStatusResponse {
    pub configured: bool,
    pub shop_domain: String,
}

impl From<&Tenant> for StorefrontStatusResponse {
    fn from(tenant: &Tenant) -> Self {
        Self {
            configured: tenant.sync_enabled(),
            shop_domain: tenant.shop_domain.clone(),
        }
    }
}

/// Snapshot of a tenant's storefront credential, carried in sync jobs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorefrontCredentials {
    pub shop_domain: String,
    pub access_token: String,
}

impl fmt::Debug for StorefrontCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorefrontCredentials")
            .field("shop_domain", &self.shop_domain)
            .field("access_token", &mask_token(&self.access_token))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(token: Option<&str>) -> Tenant {
        Tenant {
            id: Uuid::new_v4(),
            shop_domain: "acme.myshopify.com".to_string(),
            access_token: token.map(str::to_string),
            email: "owner@acme.test".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_debug_masks_access_token() {
        let rendered = format!("{:?}", tenant(Some("shpat_1234567890abcdef")));
        assert!(!rendered.contains("shpat_1234567890abcdef"));
        assert!(rendered.contains("acme.myshopify.com"));
    }

    #[test]
    fn test_credentials_require_token() {
        assert!(tenant(None).credentials().is_none());
        assert!(!tenant(None).sync_enabled());

        let creds = tenant(Some("shpat_abc")).credentials().unwrap();
        assert_eq!(creds.shop_domain, "acme.myshopify.com");
        assert_eq!(creds.access_token, "shpat_abc");
    }

    #[test]
    fn test_new_tenant_validation() {
        let bad = NewTenant {
            shop_domain: "acme.myshopify.com".to_string(),
            email: "not-an-email".to_string(),
            access_token: None,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_token_request_rejects_blank_token() {
        let empty = UpdateAccessTokenRequest {
            access_token: String::new(),
        };
        assert!(empty.validate().is_err());
        assert!(!format!("{:?}", UpdateAccessTokenRequest {
            access_token: "shpat_1234567890abcdef".to_string(),
        })
        .contains("shpat_1234567890abcdef"));
    }
}
