use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Profile error in {profile}: {reason}")]
    Profile { profile: String, reason: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Fetch error for {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Discovery error for {profile}: {reason}")]
    Discovery { profile: String, reason: String },

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Search engine error: {0}")]
    Engine(String),

    #[error("Reindexing \"{index}\" failed and was rolled back to the original mapping: {reason}")]
    ReindexRolledBack { index: String, reason: String },

    #[error(
        "Reindexing \"{index}\" failed and recovery failed as well ({reason}); \
         please manually recover \"{index}\" from the backup \"{backup}\""
    )]
    ReindexUnrecoverable {
        index: String,
        backup: String,
        reason: String,
    },

    #[error("External error: {0}")]
    External(#[from] anyhow::Error),
}

impl Error {
    /// Errors that only invalidate the article being processed. Anything else
    /// escaping article processing aborts the enclosing run.
    pub fn is_article_scoped(&self) -> bool {
        matches!(
            self,
            Error::Extraction(_)
                | Error::Fetch { .. }
                | Error::Browser(_)
                | Error::Http(_)
                | Error::InvalidUrl(_)
                | Error::Serialization(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_article_scope() {
        assert!(Error::Extraction("no title".into()).is_article_scoped());
        assert!(Error::Fetch {
            url: "https://example.com".into(),
            reason: "status 404".into()
        }
        .is_article_scoped());
        assert!(!Error::Storage("engine unreachable".into()).is_article_scoped());
        assert!(!Error::Config("missing".into()).is_article_scoped());
    }

    #[test]
    fn test_unrecoverable_message_names_backup() {
        let err = Error::ReindexUnrecoverable {
            index: "articles".into(),
            backup: "articles_backup".into(),
            reason: "boom".into(),
        };
        let message = err.to_string();
        assert!(message.contains("manually recover \"articles\""));
        assert!(message.contains("\"articles_backup\""));
    }
}
