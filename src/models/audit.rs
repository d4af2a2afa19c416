//! 审计与事件模型
//! 审计记录是事实来源，事件是从它确定性派生的只读投影

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// 操作主体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    User,
    Admin,
    System,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::User => "user",
            ActorType::Admin => "admin",
            ActorType::System => "system",
        }
    }
}

/// 审计记录（仅追加；UPDATE/DELETE 在数据库层被策略拒绝）
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub realm: String,
    pub tenant_id: Option<Uuid>,
    pub actor_type: String,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub entity: String,
    pub entity_id: Option<Uuid>,
    pub before_json: Option<serde_json::Value>,
    pub after_json: Option<serde_json::Value>,
    pub metadata_json: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// 审计写入参数
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub realm: String,
    pub tenant_id: Option<Uuid>,
    pub actor_type: ActorType,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub entity: String,
    pub entity_id: Option<Uuid>,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
}

/// 派生事件记录。id 与来源审计记录相同，重放天然幂等。
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub version: i16,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub tenant_id: Option<Uuid>,
    pub realm: String,
    pub actor_type: String,
    pub actor_id: Option<Uuid>,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
    pub audit_record_id: Uuid,
}

/// 事件查询过滤条件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilters {
    pub tenant_id: Option<Uuid>,
    pub name: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// 事件查询响应页
#[derive(Debug, Serialize)]
pub struct EventPage {
    pub events: Vec<EventRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// 键集分页游标：按 (occurred_at, id) 降序
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCursor {
    pub occurred_at: DateTime<Utc>,
    pub id: Uuid,
}

impl EventCursor {
    pub fn new(occurred_at: DateTime<Utc>, id: Uuid) -> Self {
        Self { occurred_at, id }
    }

    pub fn encode(&self) -> String {
        let raw = format!("{}|{}", self.occurred_at.to_rfc3339(), self.id);
        URL_SAFE_NO_PAD.encode(raw.as_bytes())
    }

    pub fn decode(token: &str) -> Result<Self, crate::error::AppError> {
        let invalid = || crate::error::AppError::Validation("invalid cursor".to_string());

        let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
        let raw = String::from_utf8(bytes).map_err(|_| invalid())?;

        let mut parts = raw.splitn(2, '|');
        let occurred_at_s = parts.next().ok_or_else(invalid)?;
        let id_s = parts.next().ok_or_else(invalid)?;

        let occurred_at = DateTime::parse_from_rfc3339(occurred_at_s)
            .map_err(|_| invalid())?
            .with_timezone(&Utc);
        let id = Uuid::parse_str(id_s).map_err(|_| invalid())?;

        Ok(Self::new(occurred_at, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_type_strings() {
        assert_eq!(ActorType::User.as_str(), "user");
        assert_eq!(ActorType::Admin.as_str(), "admin");
        assert_eq!(ActorType::System.as_str(), "system");
    }

    #[test]
    fn test_event_cursor_roundtrip() {
        let cursor = EventCursor::new(Utc::now(), Uuid::new_v4());
        let encoded = cursor.encode();
        let decoded = EventCursor::decode(&encoded).unwrap();

        assert_eq!(decoded.id, cursor.id);
        assert_eq!(
            decoded.occurred_at.timestamp_micros(),
            cursor.occurred_at.timestamp_micros()
        );
    }

    #[test]
    fn test_event_cursor_rejects_garbage() {
        assert!(EventCursor::decode("not-base64!!!").is_err());

        let bad = URL_SAFE_NO_PAD.encode(b"missing-separator");
        assert!(EventCursor::decode(&bad).is_err());

        let bad_id = URL_SAFE_NO_PAD.encode(b"2024-01-01T00:00:00Z|not-a-uuid");
        assert!(EventCursor::decode(&bad_id).is_err());
    }
}
