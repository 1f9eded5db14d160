//! Explicit commit/rollback for the workflow services.
//!
//! Services open a transaction with `begin()`, run their body against it and
//! hand the outcome to [`finish`], which commits on success and rolls back on
//! any error so no operation applies partially.

use crate::errors::ServiceError;
use metrics::counter;
use sea_orm::DatabaseTransaction;
use tracing::{debug, warn};

pub async fn finish<T>(
    txn: DatabaseTransaction,
    outcome: Result<T, ServiceError>,
) -> Result<T, ServiceError> {
    match outcome {
        Ok(value) => {
            txn.commit().await?;
            counter!("hardware_store_db.transaction.committed", 1);
            debug!("Transaction committed");
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                warn!(error = %rollback_err, "Transaction rollback failed");
            }
            counter!("hardware_store_db.transaction.rolled_back", 1);
            debug!(error = %err, "Transaction rolled back");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use crate::entities::supplier;
    use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set, TransactionTrait};

    async fn pool() -> crate::db::DbPool {
        let cfg = DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let pool = establish_connection_with_config(&cfg).await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    fn supplier(number: &str) -> supplier::ActiveModel {
        supplier::ActiveModel {
            number: Set(number.to_string()),
            name: Set(format!("Supplier {}", number)),
            is_archived: Set(false),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn commits_on_success() {
        let db = pool().await;
        let txn = db.begin().await.unwrap();
        let outcome = supplier("S-1").insert(&txn).await.map_err(ServiceError::from);
        finish(txn, outcome).await.unwrap();

        assert_eq!(supplier::Entity::find().count(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rolls_back_on_error() {
        let db = pool().await;
        let txn = db.begin().await.unwrap();
        let outcome = async {
            supplier("S-2").insert(&txn).await?;
            Err::<(), _>(ServiceError::business_rule("abort"))
        }
        .await;
        let result = finish(txn, outcome).await;

        assert!(matches!(result, Err(ServiceError::BusinessRule { .. })));
        assert_eq!(supplier::Entity::find().count(&db).await.unwrap(), 0);
    }
}
