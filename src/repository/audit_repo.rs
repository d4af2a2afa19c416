//! 审计与事件数据访问
//!
//! 审计插入与业务变更在同一事务内（上下文作用域的事务），
//! 事件插入发生在提交之后、由派生任务通过连接池执行。
//! 两张表都是仅追加：UPDATE/DELETE 在数据库层无对应策略，直接被拒。

use crate::{
    error::AppError,
    models::audit::{AuditEntry, AuditRecord, EventCursor, EventFilters, EventRecord},
};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};

pub struct AuditRepository;

impl AuditRepository {
    /// 在上下文作用域的事务内写入审计记录。
    /// 作用域回滚时审计记录一并消失，失败的操作不留下成功的审计。
    pub async fn insert(
        tx: &mut Transaction<'static, Postgres>,
        entry: &AuditEntry,
    ) -> Result<AuditRecord, AppError> {
        let record = sqlx::query_as::<_, AuditRecord>(
            r#"
            INSERT INTO audit_logs (
                realm, tenant_id, actor_type, actor_id, action,
                entity, entity_id, before_json, after_json, metadata_json
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(&entry.realm)
        .bind(entry.tenant_id)
        .bind(entry.actor_type.as_str())
        .bind(entry.actor_id)
        .bind(&entry.action)
        .bind(&entry.entity)
        .bind(entry.entity_id)
        .bind(&entry.before)
        .bind(&entry.after)
        .bind(&entry.metadata)
        .fetch_one(&mut **tx)
        .await?;

        Ok(record)
    }

    /// 通过连接池写入审计记录（分离路径：登录失败等不在上下文
    /// 作用域内发生的审计）。INSERT 策略不依赖会话变量。
    pub async fn insert_detached(pool: &PgPool, entry: &AuditEntry) -> Result<AuditRecord, AppError> {
        let record = sqlx::query_as::<_, AuditRecord>(
            r#"
            INSERT INTO audit_logs (
                realm, tenant_id, actor_type, actor_id, action,
                entity, entity_id, before_json, after_json, metadata_json
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(&entry.realm)
        .bind(entry.tenant_id)
        .bind(entry.actor_type.as_str())
        .bind(entry.actor_id)
        .bind(&entry.action)
        .bind(&entry.entity)
        .bind(entry.entity_id)
        .bind(&entry.before)
        .bind(&entry.after)
        .bind(&entry.metadata)
        .fetch_one(pool)
        .await?;

        Ok(record)
    }

    /// 插入派生事件。事件 id 等于来源审计记录 id，
    /// ON CONFLICT DO NOTHING 使重复派生天然幂等。
    pub async fn insert_event(pool: &PgPool, event: &EventRecord) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO events (
                id, version, name, occurred_at, tenant_id, realm,
                actor_type, actor_id, entity_type, entity_id,
                payload, metadata, audit_record_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(event.version)
        .bind(&event.name)
        .bind(event.occurred_at)
        .bind(event.tenant_id)
        .bind(&event.realm)
        .bind(&event.actor_type)
        .bind(event.actor_id)
        .bind(&event.entity_type)
        .bind(event.entity_id)
        .bind(&event.payload)
        .bind(&event.metadata)
        .bind(event.audit_record_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 键集分页查询事件，按 (occurred_at, id) 降序。
    /// events 的读取被行隔离策略限制在管理域，调用方必须在
    /// 管理域上下文作用域内。返回至多 limit + 1 行，多出的一行
    /// 供调用方判断是否还有下一页。
    pub async fn list_events(
        tx: &mut Transaction<'static, Postgres>,
        filters: &EventFilters,
        cursor: Option<&EventCursor>,
        limit: i64,
    ) -> Result<Vec<EventRecord>, AppError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM events WHERE TRUE");

        if let Some(tenant_id) = filters.tenant_id {
            builder.push(" AND tenant_id = ");
            builder.push_bind(tenant_id);
        }
        if let Some(name) = &filters.name {
            builder.push(" AND name = ");
            builder.push_bind(name);
        }
        if let Some(from) = filters.from {
            builder.push(" AND occurred_at >= ");
            builder.push_bind(from);
        }
        if let Some(to) = filters.to {
            builder.push(" AND occurred_at <= ");
            builder.push_bind(to);
        }
        if let Some(cursor) = cursor {
            builder.push(" AND (occurred_at, id) < (");
            builder.push_bind(cursor.occurred_at);
            builder.push(", ");
            builder.push_bind(cursor.id);
            builder.push(")");
        }

        builder.push(" ORDER BY occurred_at DESC, id DESC LIMIT ");
        builder.push_bind(limit + 1);

        let events = builder
            .build_query_as::<EventRecord>()
            .fetch_all(&mut **tx)
            .await?;

        Ok(events)
    }
}
