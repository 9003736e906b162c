use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

stored_object!(Evaluation, "evaluation", {
    query_id: String,
    evaluator: String,
    rating: u8,
    comment: Option<String>
});

/// Filters accepted by the evaluation listing endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EvaluationQuery {
    pub query_id: Option<String>,
    pub evaluator: Option<String>,
    pub min_rating: Option<u8>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

const DEFAULT_PAGE_SIZE: usize = 50;

impl Evaluation {
    pub fn new(query_id: String, evaluator: String, rating: u8, comment: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            query_id,
            evaluator,
            rating,
            comment,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.query_id.trim().is_empty() {
            return Err(AppError::Validation("query_id must be non-empty".into()));
        }
        if self.evaluator.trim().is_empty() {
            return Err(AppError::Validation("evaluator must be non-empty".into()));
        }
        if !(1..=5).contains(&self.rating) {
            return Err(AppError::Validation(format!(
                "rating {} out of range 1-5",
                self.rating
            )));
        }
        Ok(())
    }

    pub async fn list(
        filters: &EvaluationQuery,
        db: &SurrealDbClient,
    ) -> Result<Vec<Evaluation>, AppError> {
        let mut sql = String::from("SELECT * FROM type::table($table) WHERE rating >= $min_rating");
        if filters.query_id.is_some() {
            sql.push_str(" AND query_id = $query_id");
        }
        if filters.evaluator.is_some() {
            sql.push_str(" AND evaluator = $evaluator");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT $limit START $offset");

        let limit = filters.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(500) as i64;
        let offset = filters.offset.unwrap_or(0) as i64;

        let mut response = db
            .query(&sql)
            .bind(("table", Self::table_name()))
            .bind(("min_rating", i64::from(filters.min_rating.unwrap_or(1))))
            .bind(("query_id", filters.query_id.clone().unwrap_or_default()))
            .bind(("evaluator", filters.evaluator.clone().unwrap_or_default()))
            .bind(("limit", limit))
            .bind(("offset", offset))
            .await?;

        Ok(response.take(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_db() -> SurrealDbClient {
        let namespace = "eval_test_ns";
        let database = &Uuid::new_v4().to_string();
        SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[test]
    fn rating_bounds_are_enforced() {
        let ok = Evaluation::new("q1".into(), "clinician_a".into(), 4, None);
        assert!(ok.validate().is_ok());

        let too_high = Evaluation::new("q1".into(), "clinician_a".into(), 6, None);
        assert!(too_high.validate().is_err());

        let zero = Evaluation::new("q1".into(), "clinician_a".into(), 0, None);
        assert!(zero.validate().is_err());
    }

    #[tokio::test]
    async fn list_filters_by_query_and_rating() {
        let db = setup_test_db().await;

        for (query_id, rating) in [("q1", 5), ("q1", 2), ("q2", 4)] {
            let eval = Evaluation::new(
                query_id.into(),
                "clinician_a".into(),
                rating,
                Some("useful".into()),
            );
            db.store_item(eval).await.expect("store evaluation");
        }

        let q1_only = Evaluation::list(
            &EvaluationQuery {
                query_id: Some("q1".into()),
                ..Default::default()
            },
            &db,
        )
        .await
        .expect("list");
        assert_eq!(q1_only.len(), 2);

        let high_rated = Evaluation::list(
            &EvaluationQuery {
                min_rating: Some(4),
                ..Default::default()
            },
            &db,
        )
        .await
        .expect("list");
        assert_eq!(high_rated.len(), 2);
        assert!(high_rated.iter().all(|e| e.rating >= 4));
    }
}
