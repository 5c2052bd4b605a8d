//! Mapping migration for a live index.
//!
//! Documents are parked in a backup index while the primary is recreated with
//! the new mapping. If they cannot be copied back, the primary is rebuilt with
//! its original mapping from the backup.

use std::fmt;

use osint_core::{Error, Result, SearchEngine};
use serde_json::Value;
use tracing::{error, info, info_span, warn, Instrument};

/// Name of the index that holds documents while `index` is being rebuilt.
pub fn backup_name(index: &str) -> String {
    format!("{}_backup", index)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReindexStage {
    DropStaleBackup,
    SnapshotMapping,
    Backup,
    Recreate,
    Restore,
}

impl fmt::Display for ReindexStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReindexStage::DropStaleBackup => "drop stale backup",
            ReindexStage::SnapshotMapping => "snapshot mapping",
            ReindexStage::Backup => "backup",
            ReindexStage::Recreate => "recreate",
            ReindexStage::Restore => "restore",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReindexReport {
    pub index: String,
    pub backup: String,
    pub documents: u64,
}

/// Moves every document of `index` under `new_mapping`.
///
/// A failure before the primary is touched leaves it as it was. A failure
/// while recreating or refilling it triggers a rollback to the original
/// mapping; `ReindexRolledBack` is returned when that works and
/// `ReindexUnrecoverable` when it does not, in which case the backup index is
/// the only complete copy of the data.
pub async fn reindex(engine: &dyn SearchEngine, index: &str, new_mapping: &Value) -> Result<ReindexReport> {
    let backup = backup_name(index);
    let span = info_span!("reindex", index = %index, backup = %backup);

    async move {
        info!(stage = %ReindexStage::DropStaleBackup, "starting");
        if engine.delete_index(&backup).await? {
            info!("removed stale backup index");
        }

        info!(stage = %ReindexStage::SnapshotMapping, "starting");
        let original_mapping = engine.get_mapping(index).await?;

        info!(stage = %ReindexStage::Backup, "starting");
        engine.create_index(&backup, &original_mapping).await?;
        let backed_up = engine.copy_index(index, &backup).await?;
        info!(documents = backed_up, "documents backed up");

        match migrate(engine, index, &backup, new_mapping).await {
            Ok(documents) => {
                info!(documents, "reindex finished");
                Ok(ReindexReport {
                    index: index.to_string(),
                    backup,
                    documents,
                })
            }
            Err((stage, e)) => {
                warn!(stage = %stage, error = %e, "reindex failed, restoring original mapping");
                match migrate(engine, index, &backup, &original_mapping).await {
                    Ok(restored) => {
                        info!(documents = restored, "original mapping restored");
                        Err(Error::ReindexRolledBack {
                            index: index.to_string(),
                            reason: format!("{} failed: {}", stage, e),
                        })
                    }
                    Err((rollback_stage, rollback_error)) => {
                        error!(
                            stage = %rollback_stage,
                            error = %rollback_error,
                            "rollback failed, manual recovery required"
                        );
                        Err(Error::ReindexUnrecoverable {
                            index: index.to_string(),
                            backup: backup.clone(),
                            reason: format!(
                                "{} failed: {}; rollback {} failed: {}",
                                stage, e, rollback_stage, rollback_error
                            ),
                        })
                    }
                }
            }
        }
    }
    .instrument(span)
    .await
}

async fn migrate(
    engine: &dyn SearchEngine,
    index: &str,
    backup: &str,
    mapping: &Value,
) -> std::result::Result<u64, (ReindexStage, Error)> {
    info!(stage = %ReindexStage::Recreate, "starting");
    engine
        .delete_index(index)
        .await
        .map_err(|e| (ReindexStage::Recreate, e))?;
    engine
        .create_index(index, mapping)
        .await
        .map_err(|e| (ReindexStage::Recreate, e))?;

    info!(stage = %ReindexStage::Restore, "starting");
    engine
        .copy_index(backup, index)
        .await
        .map_err(|e| (ReindexStage::Restore, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::{Fault, MemoryEngine};
    use serde_json::json;

    fn mapping(fields: &[&str]) -> Value {
        let properties: serde_json::Map<String, Value> = fields
            .iter()
            .map(|f| (f.to_string(), json!({ "type": "keyword" })))
            .collect();
        json!({ "dynamic": "strict", "properties": properties })
    }

    async fn seeded() -> MemoryEngine {
        let engine = MemoryEngine::new();
        engine
            .create_index("articles", &mapping(&["id", "url", "author"]))
            .await
            .unwrap();
        engine
            .bulk_index(
                "articles",
                vec![
                    ("1".into(), json!({ "id": "1", "url": "https://a.example/1", "author": "Jane" })),
                    ("2".into(), json!({ "id": "2", "url": "https://a.example/2" })),
                ],
            )
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_reindex_applies_new_mapping() {
        let engine = seeded().await;
        let new_mapping = mapping(&["id", "url", "author", "source"]);
        let report = reindex(&engine, "articles", &new_mapping).await.unwrap();

        assert_eq!(report.documents, 2);
        assert_eq!(report.backup, "articles_backup");
        assert_eq!(engine.get_mapping("articles").await.unwrap(), new_mapping);
        assert_eq!(engine.count("articles").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_restore_rolls_back_to_original_mapping() {
        let engine = seeded().await;
        let original = engine.get_mapping("articles").await.unwrap();
        // Dropping `author` makes the strict mapping reject document 1.
        let err = reindex(&engine, "articles", &mapping(&["id", "url"]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ReindexRolledBack { .. }));
        assert_eq!(engine.get_mapping("articles").await.unwrap(), original);
        assert_eq!(engine.count("articles").await.unwrap(), 2);
        assert!(engine.index_exists("articles_backup").await.unwrap());
        assert_eq!(engine.count("articles_backup").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_rollback_names_backup() {
        let engine = seeded().await;
        engine.fail_next(Fault::CopyInto("articles".into()));
        engine.fail_next(Fault::CopyInto("articles".into()));
        let err = reindex(&engine, "articles", &mapping(&["id", "url", "author"]))
            .await
            .unwrap_err();

        match &err {
            Error::ReindexUnrecoverable { backup, .. } => assert_eq!(backup, "articles_backup"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("manually recover"));
        assert_eq!(engine.count("articles_backup").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_backup_failure_leaves_primary_untouched() {
        let engine = seeded().await;
        engine.fail_next(Fault::CopyInto("articles_backup".into()));
        let original = engine.get_mapping("articles").await.unwrap();

        let err = reindex(&engine, "articles", &mapping(&["id"])).await.unwrap_err();
        assert!(matches!(err, Error::Engine(_)));
        assert_eq!(engine.get_mapping("articles").await.unwrap(), original);
        assert_eq!(engine.count("articles").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stale_backup_is_replaced() {
        let engine = seeded().await;
        engine.create_index("articles_backup", &json!({})).await.unwrap();
        engine
            .bulk_index("articles_backup", vec![("old".into(), json!({ "id": "old" }))])
            .await
            .unwrap();

        reindex(&engine, "articles", &mapping(&["id", "url", "author"])).await.unwrap();
        assert_eq!(engine.count("articles_backup").await.unwrap(), 2);
    }
}
