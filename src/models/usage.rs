use chrono::Utc;
use sqlx::PgPool;

use crate::models::Error;

/// What a usage increment is counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageKind {
    Verification,
    WebSearch,
}

pub fn current_period() -> String {
    Utc::now().format("%Y-%m").to_string()
}

/// Per-(workspace, month) counters consumed by the plan/quota surface.
#[derive(Debug, Clone)]
pub struct UsageRepository {
    pool: PgPool,
}

impl UsageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Atomic insert-if-absent-then-increment, safe under concurrent workers.
    pub async fn increment(
        &self,
        workspace_id: i64,
        period: &str,
        kind: UsageKind,
    ) -> Result<(), Error> {
        let query = match kind {
            UsageKind::Verification => {
                r#"
                INSERT INTO usage (workspace_id, period, verifications_count, web_searches_count)
                VALUES ($1, $2, 1, 0)
                ON CONFLICT (workspace_id, period)
                DO UPDATE SET verifications_count = usage.verifications_count + 1,
                              updated_at = now()
                "#
            }
            UsageKind::WebSearch => {
                r#"
                INSERT INTO usage (workspace_id, period, verifications_count, web_searches_count)
                VALUES ($1, $2, 0, 1)
                ON CONFLICT (workspace_id, period)
                DO UPDATE SET web_searches_count = usage.web_searches_count + 1,
                              updated_at = now()
                "#
            }
        };
        sqlx::query(query)
            .bind(workspace_id)
            .bind(period)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_is_year_month() {
        let period = current_period();
        assert_eq!(period.len(), 7);
        assert_eq!(period.as_bytes()[4], b'-');
    }
}
