//! 购物车服务（租户隔离与审计管线的业务载体）
//!
//! 每个操作恰好打开一个上下文作用域：读写与审计在同一事务内
//! 提交，派生事件在提交之后分离派发。

use crate::{
    context::{run_with_context, Realm, SecurityContext},
    error::AppError,
    models::{
        audit::{ActorType, AuditEntry, AuditRecord},
        cart::{AddItemRequest, CartView},
    },
    repository::{audit_repo::AuditRepository, cart_repo::CartRepository},
    services::audit_service::{AuditAction, AuditService},
};
use futures::FutureExt;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

pub struct CartService {
    db: PgPool,
    audit_service: Arc<AuditService>,
}

impl CartService {
    pub fn new(db: PgPool, audit_service: Arc<AuditService>) -> Self {
        Self { db, audit_service }
    }

    fn scope_ids(ctx: &SecurityContext) -> Result<(Uuid, Uuid), AppError> {
        match (ctx.tenant_id, ctx.actor_id) {
            (Some(tenant_id), Some(user_id)) => Ok((tenant_id, user_id)),
            _ => Err(AppError::Forbidden),
        }
    }

    /// 查看购物车（只读，不创建）
    pub async fn view(&self, ctx: &SecurityContext) -> Result<CartView, AppError> {
        let (_, user_id) = Self::scope_ids(ctx)?;

        run_with_context(&self.db, ctx, move |tx| {
            async move {
                let cart = CartRepository::find_for_user(tx, user_id).await?;
                let items = match &cart {
                    Some(cart) => CartRepository::list_items(tx, cart.id).await?,
                    None => Vec::new(),
                };
                Ok(CartView { cart, items })
            }
            .boxed()
        })
        .await
    }

    /// 添加行项。购物车不存在时顺带创建（一并审计）。
    pub async fn add_item(
        &self,
        ctx: &SecurityContext,
        req: AddItemRequest,
    ) -> Result<CartView, AppError> {
        let (tenant_id, user_id) = Self::scope_ids(ctx)?;
        let product_id = req.product_id;
        let quantity = req.quantity;

        let (view, records) = run_with_context(&self.db, ctx, move |tx| {
            async move {
                let mut records: Vec<AuditRecord> = Vec::new();

                let cart = match CartRepository::find_for_user(tx, user_id).await? {
                    Some(cart) => cart,
                    None => {
                        let cart = CartRepository::find_or_create(tx, tenant_id, user_id).await?;
                        let record = AuditRepository::insert(
                            tx,
                            &AuditEntry {
                                realm: Realm::Tenant.as_str().to_string(),
                                tenant_id: Some(tenant_id),
                                actor_type: ActorType::User,
                                actor_id: Some(user_id),
                                action: AuditAction::CartCreate.as_str().to_string(),
                                entity: "cart".to_string(),
                                entity_id: Some(cart.id),
                                before: None,
                                after: Some(serde_json::to_value(&cart)?),
                                metadata: None,
                            },
                        )
                        .await?;
                        records.push(record);
                        cart
                    }
                };

                // 跨租户的商品 id 被策略过滤成"不存在"
                let product = CartRepository::find_product(tx, product_id)
                    .await?
                    .ok_or(AppError::NotFound)?;

                let item = CartRepository::upsert_item(tx, cart.id, product.id, quantity).await?;

                let record = AuditRepository::insert(
                    tx,
                    &AuditEntry {
                        realm: Realm::Tenant.as_str().to_string(),
                        tenant_id: Some(tenant_id),
                        actor_type: ActorType::User,
                        actor_id: Some(user_id),
                        action: AuditAction::CartItemAdd.as_str().to_string(),
                        entity: "cart_item".to_string(),
                        entity_id: Some(item.id),
                        before: None,
                        after: Some(serde_json::to_value(&item)?),
                        metadata: None,
                    },
                )
                .await?;
                records.push(record);

                let items = CartRepository::list_items(tx, cart.id).await?;
                Ok((
                    CartView {
                        cart: Some(cart),
                        items,
                    },
                    records,
                ))
            }
            .boxed()
        })
        .await?;

        // 作用域已提交，事件派生分离执行
        for record in records {
            self.audit_service.publish_event(record);
        }

        Ok(view)
    }

    /// 删除行项
    pub async fn remove_item(
        &self,
        ctx: &SecurityContext,
        item_id: Uuid,
    ) -> Result<CartView, AppError> {
        let (tenant_id, user_id) = Self::scope_ids(ctx)?;

        let (view, record) = run_with_context(&self.db, ctx, move |tx| {
            async move {
                let cart = CartRepository::find_for_user(tx, user_id)
                    .await?
                    .ok_or(AppError::NotFound)?;

                let item = CartRepository::find_item(tx, cart.id, item_id)
                    .await?
                    .ok_or(AppError::NotFound)?;

                CartRepository::remove_item(tx, cart.id, item.id).await?;

                let record = AuditRepository::insert(
                    tx,
                    &AuditEntry {
                        realm: Realm::Tenant.as_str().to_string(),
                        tenant_id: Some(tenant_id),
                        actor_type: ActorType::User,
                        actor_id: Some(user_id),
                        action: AuditAction::CartItemRemove.as_str().to_string(),
                        entity: "cart_item".to_string(),
                        entity_id: Some(item.id),
                        before: Some(serde_json::to_value(&item)?),
                        after: None,
                        metadata: None,
                    },
                )
                .await?;

                let items = CartRepository::list_items(tx, cart.id).await?;
                Ok((
                    CartView {
                        cart: Some(cart),
                        items,
                    },
                    record,
                ))
            }
            .boxed()
        })
        .await?;

        self.audit_service.publish_event(record);

        Ok(view)
    }
}
