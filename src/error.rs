// Error types for profile-card.
// Splits API failures into fatal ones (auth, rate limit) and ones a heavy scan can skip.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Network error talking to GitHub: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Authentication failed: invalid or missing token")]
    Unauthorized,

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("GitHub API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("{tag}: GraphQL errors: {messages}")]
    GraphQl { tag: &'static str, messages: String },

    #[error("GitHub user not found: {0}")]
    UserNotFound(String),

    #[error("Unexpected response shape for {0}")]
    MissingData(&'static str),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProfileError {
    /// Errors that must abort the whole run, even in the middle of a heavy scan.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProfileError::Unauthorized | ProfileError::RateLimited(_) | ProfileError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ProfileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ProfileError::Unauthorized.is_fatal());
        assert!(ProfileError::RateLimited("API rate limit exceeded".into()).is_fatal());
        assert!(ProfileError::Config("no user".into()).is_fatal());

        assert!(!ProfileError::MissingData("loc_repo_scan").is_fatal());
        assert!(
            !ProfileError::Http {
                status: 502,
                body: "Bad Gateway".into()
            }
            .is_fatal()
        );
        assert!(
            !ProfileError::GraphQl {
                tag: "loc_repo_scan",
                messages: "Could not resolve to a Repository".into()
            }
            .is_fatal()
        );
    }
}
