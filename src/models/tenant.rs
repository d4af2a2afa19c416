//! 租户模型

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// 租户状态
pub const TENANT_STATUS_ACTIVE: &str = "active";
pub const TENANT_STATUS_SUSPENDED: &str = "suspended";

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    pub fn is_active(&self) -> bool {
        self.status == TENANT_STATUS_ACTIVE
    }
}
