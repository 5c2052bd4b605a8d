use std::sync::Arc;

use osint_core::{Config, Result, SearchEngine};
use tracing::info;

pub mod backends;
pub mod mappings;
pub mod reindex;
pub mod store;

pub use backends::*;
pub use mappings::{article_mapping, IndexKind};
pub use reindex::{backup_name, reindex, ReindexReport, ReindexStage};
pub use store::{DocumentStore, InvalidDocument, QueryResult};

/// Builds the engine selected by the configuration. `memory` swaps in the
/// in-process engine, which forgets everything on exit.
pub fn create_engine(config: &Config, memory: bool) -> Result<Arc<dyn SearchEngine>> {
    if memory {
        info!("using in-memory search engine");
        return Ok(Arc::new(MemoryEngine::new()));
    }
    info!(url = %config.engine.url, "using Elasticsearch");
    let engine = ElasticEngine::new(ElasticConfig::from(&config.engine))?;
    Ok(Arc::new(engine))
}

pub mod prelude {
    pub use super::backends::*;
    pub use super::store::DocumentStore;
}
