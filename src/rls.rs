//! 行级隔离策略模型（Row Isolation Policy Model）
//! 策略 DDL 安装在 migrations/ 中，这里维护权威的表清单、
//! 期望的策略矩阵，以及启动时的策略校验。
//!
//! 每张租户表的策略矩阵：
//! - 每个 CRUD 动词一条 PERMISSIVE 租户策略（上下文租户匹配且非旁路）
//! - 每个 CRUD 动词一条 PERMISSIVE 旁路策略（仅 app.bypass_rls = 'on'）
//! - 一条覆盖所有动词的 RESTRICTIVE 守卫策略（有租户上下文或旁路）
//!
//! RESTRICTIVE 守卫不可省略：PERMISSIVE 策略之间是 OR 语义，单独的
//! 旁路策略在没有 AND 门的情况下会放行全部行。

use crate::error::AppError;
use sqlx::{PgPool, Row};

/// 直接携带 tenant_id 的租户表
pub const TENANT_TABLES: &[&str] = &["tenant_memberships", "products", "carts"];

/// 通过父表 join 继承租户归属的关系表（自身不冗余 tenant_id）
pub const PARENT_SCOPED_TABLES: &[&str] = &["cart_items"];

/// 仅允许追加的表：UPDATE/DELETE 无策略即被拒绝
pub const APPEND_ONLY_TABLES: &[&str] = &["audit_logs", "events"];

const CRUD_VERBS: &[&str] = &["select", "insert", "update", "delete"];

/// 一条期望的策略：表名、策略名、是否 RESTRICTIVE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedPolicy {
    pub table: &'static str,
    pub name: String,
    pub restrictive: bool,
}

/// 生成某张租户隔离表的完整期望策略集
pub fn expected_policies_for(table: &'static str) -> Vec<ExpectedPolicy> {
    let mut policies = Vec::with_capacity(CRUD_VERBS.len() * 2 + 1);

    for verb in CRUD_VERBS {
        policies.push(ExpectedPolicy {
            table,
            name: format!("{table}_tenant_{verb}"),
            restrictive: false,
        });
        policies.push(ExpectedPolicy {
            table,
            name: format!("{table}_bypass_{verb}"),
            restrictive: false,
        });
    }

    policies.push(ExpectedPolicy {
        table,
        name: format!("{table}_guard"),
        restrictive: true,
    });

    policies
}

/// 追加表的期望策略集：只有 INSERT 与 SELECT
pub fn expected_append_only_policies_for(table: &'static str) -> Vec<ExpectedPolicy> {
    vec![
        ExpectedPolicy {
            table,
            name: format!("{table}_append"),
            restrictive: false,
        },
        ExpectedPolicy {
            table,
            name: format!("{table}_read"),
            restrictive: false,
        },
    ]
}

/// 策略校验报告
#[derive(Debug, Default)]
pub struct PolicyReport {
    /// 缺失的策略（表名.策略名）
    pub missing: Vec<String>,
    /// 追加表上意外出现的 UPDATE/DELETE 策略
    pub unexpected: Vec<String>,
    /// 未开启/未强制 RLS 的表
    pub rls_not_forced: Vec<String>,
}

impl PolicyReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.rls_not_forced.is_empty()
    }
}

/// 校验数据库中实际安装的策略是否与期望矩阵一致。
/// 启动时调用：不一致说明迁移被篡改或漏装，立即以错误日志暴露。
pub async fn verify_policies(pool: &PgPool) -> Result<PolicyReport, AppError> {
    let mut report = PolicyReport::default();

    // 实际安装的策略
    let rows = sqlx::query(
        r#"
        SELECT tablename, policyname, permissive, cmd
        FROM pg_policies
        WHERE schemaname = current_schema()
        "#,
    )
    .fetch_all(pool)
    .await?;

    let installed: Vec<(String, String, String, String)> = rows
        .iter()
        .map(|r| {
            (
                r.get::<String, _>("tablename"),
                r.get::<String, _>("policyname"),
                r.get::<String, _>("permissive"),
                r.get::<String, _>("cmd"),
            )
        })
        .collect();

    let mut check = |expected: &ExpectedPolicy| {
        let mode = if expected.restrictive {
            "RESTRICTIVE"
        } else {
            "PERMISSIVE"
        };
        let found = installed
            .iter()
            .any(|(t, p, m, _)| t == expected.table && p == &expected.name && m == mode);
        if !found {
            report
                .missing
                .push(format!("{}.{}", expected.table, expected.name));
        }
    };

    for table in TENANT_TABLES.iter().chain(PARENT_SCOPED_TABLES) {
        for expected in expected_policies_for(table) {
            check(&expected);
        }
    }

    for table in APPEND_ONLY_TABLES {
        for expected in expected_append_only_policies_for(table) {
            check(&expected);
        }

        // 追加表不允许存在 UPDATE/DELETE 策略
        for (t, p, _, cmd) in &installed {
            if t == table && (cmd == "UPDATE" || cmd == "DELETE" || cmd == "ALL") {
                report.unexpected.push(format!("{t}.{p} ({cmd})"));
            }
        }
    }

    // RLS 必须启用且强制（表属主也不能绕过）
    let all_tables: Vec<&&str> = TENANT_TABLES
        .iter()
        .chain(PARENT_SCOPED_TABLES)
        .chain(APPEND_ONLY_TABLES)
        .collect();

    for table in all_tables {
        let row = sqlx::query(
            r#"
            SELECT relrowsecurity, relforcerowsecurity
            FROM pg_class
            WHERE relname = $1 AND relnamespace = current_schema()::regnamespace
            "#,
        )
        .bind(table)
        .fetch_optional(pool)
        .await?;

        match row {
            Some(r) => {
                let enabled: bool = r.get("relrowsecurity");
                let forced: bool = r.get("relforcerowsecurity");
                if !enabled || !forced {
                    report.rls_not_forced.push((*table).to_string());
                }
            }
            None => report.rls_not_forced.push(format!("{table} (missing)")),
        }
    }

    if !report.is_clean() {
        tracing::error!(
            missing = ?report.missing,
            unexpected = ?report.unexpected,
            rls_not_forced = ?report.rls_not_forced,
            "Row isolation policy verification failed"
        );
    } else {
        tracing::info!(
            tables = TENANT_TABLES.len() + PARENT_SCOPED_TABLES.len() + APPEND_ONLY_TABLES.len(),
            "Row isolation policies verified"
        );
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_policy_matrix_shape() {
        // 每表 4 动词 x (租户 + 旁路) + 1 守卫 = 9 条
        let policies = expected_policies_for("carts");
        assert_eq!(policies.len(), 9);

        let restrictive: Vec<_> = policies.iter().filter(|p| p.restrictive).collect();
        assert_eq!(restrictive.len(), 1);
        assert_eq!(restrictive[0].name, "carts_guard");
    }

    #[test]
    fn test_expected_policy_names() {
        let policies = expected_policies_for("products");
        let names: Vec<&str> = policies.iter().map(|p| p.name.as_str()).collect();

        assert!(names.contains(&"products_tenant_select"));
        assert!(names.contains(&"products_tenant_insert"));
        assert!(names.contains(&"products_tenant_update"));
        assert!(names.contains(&"products_tenant_delete"));
        assert!(names.contains(&"products_bypass_select"));
        assert!(names.contains(&"products_bypass_delete"));
        assert!(names.contains(&"products_guard"));
    }

    #[test]
    fn test_append_only_tables_have_no_mutation_policies() {
        for table in APPEND_ONLY_TABLES {
            let policies = expected_append_only_policies_for(table);
            assert_eq!(policies.len(), 2);
            assert!(policies.iter().all(|p| !p.restrictive));
            assert!(policies
                .iter()
                .all(|p| !p.name.contains("update") && !p.name.contains("delete")));
        }
    }

    #[test]
    fn test_relationship_tables_not_in_tenant_list() {
        // cart_items 通过父表继承租户归属，不应重复出现在直接隔离清单里
        for table in PARENT_SCOPED_TABLES {
            assert!(!TENANT_TABLES.contains(table));
        }
    }
}
