//! Corpus-wide jobs run outside the ingestion pipeline.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use osint_core::{article_id, Article, Error, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::keywords::{KeywordError, KeywordFile};
use crate::manager::{manual_tags, ScraperManager};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub read: usize,
    pub skipped: usize,
    pub imported: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdMigrationReport {
    pub checked: usize,
    pub resaved: usize,
    pub deleted: usize,
}

impl ScraperManager {
    /// Recomputes the tags of every stored article on at most `workers`
    /// blocking tasks and writes back only the `tags` field.
    pub async fn regenerate_tags(&self) -> Result<usize> {
        let result = self.store.query_all().await?;
        for invalid in &result.invalid {
            warn!(id = %invalid.id, error = %invalid.error, "skipping unreadable article");
        }
        info!(count = result.documents.len(), workers = self.workers, "regenerating tags");

        let permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        for mut article in result.documents {
            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::External(e.into()))?;
            let analyzer = self.analyzer.clone();
            let keywords = self.keywords.clone();
            tasks.spawn_blocking(move || {
                article.tags = analyzer.analyze(&article.content);
                article.tags.manual = manual_tags(&keywords, &article.content);
                drop(permit);
                article
            });
        }

        let mut updated = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(article) => updated.push(article),
                Err(e) => warn!(error = %e, "tag worker failed"),
            }
        }
        if updated.is_empty() {
            return Ok(0);
        }
        let count = self.store.update_batch(&updated, &["tags"]).await?;
        info!(count, "tags regenerated");
        Ok(count)
    }

    /// Re-saves every article whose stored id no longer matches its URL and
    /// removes the stale copy.
    pub async fn update_ids(&self) -> Result<IdMigrationReport> {
        let result = self.store.query_all().await?;
        let mut report = IdMigrationReport {
            checked: result.documents.len(),
            ..Default::default()
        };

        let (stale_ids, migrated): (Vec<String>, Vec<Article>) = result
            .documents
            .into_iter()
            .filter(Article::has_stale_id)
            .map(|mut article| {
                let stale = std::mem::replace(&mut article.id, article_id(&article.url));
                (stale, article)
            })
            .unzip();
        if migrated.is_empty() {
            info!(checked = report.checked, "all ids up to date");
            return Ok(report);
        }

        report.resaved = self.store.save_batch(&migrated).await?;
        if report.resaved < migrated.len() {
            return Err(Error::Storage(format!(
                "only {} of {} articles were re-saved, keeping the old ids",
                report.resaved,
                migrated.len()
            )));
        }
        report.deleted = self.store.delete(&stale_ids).await?;
        info!(resaved = report.resaved, deleted = report.deleted, "ids updated");
        Ok(report)
    }

    /// Writes every stored article to `path` as a JSON array.
    pub async fn export_json(&self, path: &Path) -> Result<usize> {
        let result = self.store.query_all().await?;
        if !result.invalid.is_empty() {
            warn!(count = result.invalid.len(), "unreadable articles left out of export");
        }
        fs::write(path, serde_json::to_string_pretty(&result.documents)?)?;
        info!(count = result.documents.len(), file = %path.display(), "articles exported");
        Ok(result.documents.len())
    }

    /// Loads a JSON array of articles, skipping URLs that are already stored.
    /// Ids are derived again from the URLs.
    pub async fn import_json(&self, path: &Path) -> Result<ImportReport> {
        let mut articles: Vec<Article> = serde_json::from_str(&fs::read_to_string(path)?)?;
        let mut report = ImportReport {
            read: articles.len(),
            ..Default::default()
        };

        let urls: Vec<String> = articles.iter().map(|a| a.url.clone()).collect();
        // Deduplicated, so the file may list one URL more than once.
        let mut unseen: HashSet<String> = self.store.filter_unseen(&urls).await?.into_iter().collect();
        articles.retain(|a| unseen.remove(&a.url));
        report.skipped = report.read - articles.len();

        for article in &mut articles {
            article.id = article_id(&article.url);
        }
        report.imported = self.store.save_batch(&articles).await?;
        info!(imported = report.imported, skipped = report.skipped, "articles imported");
        Ok(report)
    }

    pub fn keyword_files(&self) -> &[KeywordFile] {
        &self.keywords
    }

    /// Malformed records of every loaded keyword file, keyed by file name.
    pub fn verify_keyword_files(&self) -> Vec<(String, Vec<KeywordError>)> {
        self.keywords
            .iter()
            .filter(|file| {
                debug!(file = %file.name, collections = file.collections.len(), "checked keyword file");
                !file.is_valid()
            })
            .map(|file| (file.name.clone(), file.errors.clone()))
            .collect()
    }
}
