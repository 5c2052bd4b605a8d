pub mod config;
pub mod error;
pub mod profile;
pub mod query;
pub mod storage;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use profile::{Profile, ProfileRegistry, RetrievalMethod};
pub use query::{SearchQuery, SortOrder};
pub use storage::{Document, SearchEngine};
pub use types::{article_id, Article, ArticleTags, TagsOfInterest};
