//! 购物车数据访问
//!
//! 所有查询都不写 tenant_id 过滤条件：租户边界由数据库的
//! 行隔离策略强制，这里只在已投影上下文的事务内操作。

use crate::{
    error::AppError,
    models::cart::{Cart, CartItem, Product},
};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

pub struct CartRepository;

impl CartRepository {
    /// 查找或创建当前用户在当前租户下的购物车。
    /// tenant_id 显式写入 INSERT（策略的 WITH CHECK 会校验它与
    /// 会话变量一致），读取则完全依赖策略过滤。
    pub async fn find_or_create(
        tx: &mut Transaction<'static, Postgres>,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Cart, AppError> {
        if let Some(cart) =
            sqlx::query_as::<_, Cart>("SELECT * FROM carts WHERE user_id = $1 AND status = 'open'")
                .bind(user_id)
                .fetch_optional(&mut **tx)
                .await?
        {
            return Ok(cart);
        }

        let cart = sqlx::query_as::<_, Cart>(
            r#"
            INSERT INTO carts (tenant_id, user_id)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(cart)
    }

    pub async fn find_for_user(
        tx: &mut Transaction<'static, Postgres>,
        user_id: Uuid,
    ) -> Result<Option<Cart>, AppError> {
        let cart =
            sqlx::query_as::<_, Cart>("SELECT * FROM carts WHERE user_id = $1 AND status = 'open'")
                .bind(user_id)
                .fetch_optional(&mut **tx)
                .await?;

        Ok(cart)
    }

    /// 商品查找同样只按 id：跨租户的商品 id 在策略下不可见，
    /// 表现为"不存在"而不是"无权限"。
    pub async fn find_product(
        tx: &mut Transaction<'static, Postgres>,
        product_id: Uuid,
    ) -> Result<Option<Product>, AppError> {
        let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(&mut **tx)
            .await?;

        Ok(product)
    }

    /// 添加或累加行项
    pub async fn upsert_item(
        tx: &mut Transaction<'static, Postgres>,
        cart_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartItem, AppError> {
        let item = sqlx::query_as::<_, CartItem>(
            r#"
            INSERT INTO cart_items (cart_id, product_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (cart_id, product_id)
            DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity,
                          updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(cart_id)
        .bind(product_id)
        .bind(quantity)
        .fetch_one(&mut **tx)
        .await?;

        Ok(item)
    }

    pub async fn list_items(
        tx: &mut Transaction<'static, Postgres>,
        cart_id: Uuid,
    ) -> Result<Vec<CartItem>, AppError> {
        let items = sqlx::query_as::<_, CartItem>(
            "SELECT * FROM cart_items WHERE cart_id = $1 ORDER BY created_at",
        )
        .bind(cart_id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(items)
    }

    pub async fn find_item(
        tx: &mut Transaction<'static, Postgres>,
        cart_id: Uuid,
        item_id: Uuid,
    ) -> Result<Option<CartItem>, AppError> {
        let item = sqlx::query_as::<_, CartItem>(
            "SELECT * FROM cart_items WHERE id = $1 AND cart_id = $2",
        )
        .bind(item_id)
        .bind(cart_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(item)
    }

    pub async fn remove_item(
        tx: &mut Transaction<'static, Postgres>,
        cart_id: Uuid,
        item_id: Uuid,
    ) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM cart_items WHERE id = $1 AND cart_id = $2")
            .bind(item_id)
            .bind(cart_id)
            .execute(&mut **tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
