pub mod browser;
pub mod discovery;
pub mod extract;
pub mod fetch;
pub mod indicators;
pub mod keywords;
pub mod logging;
pub mod maintenance;
pub mod manager;
pub mod markdown;
pub mod text;

pub use discovery::{discover, DiscoveryStrategy};
pub use fetch::{PageFetcher, WebFetcher};
pub use keywords::{load_keyword_dir, KeywordCollection, KeywordFile};
pub use logging::init_logging;
pub use maintenance::{IdMigrationReport, ImportReport};
pub use manager::{PipelineReport, ProfileReport, ScraperManager};
pub use text::{CommonWords, TextAnalyzer};

pub mod prelude {
    pub use super::fetch::PageFetcher;
    pub use super::manager::ScraperManager;
    pub use osint_core::{Article, Error, Result};
}
