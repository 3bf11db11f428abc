use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Request(#[from] reqwest::Error),

    /// A request failed after the retry middleware gave up.
    #[error(transparent)]
    Middleware(#[from] reqwest_middleware::Error),

    #[error("Received unexpected JSON from `{url}`")]
    BadJson {
        url: Url,
        #[source]
        err: serde_json::Error,
    },

    #[error("`{0}` does not point to a local file")]
    NotALocalPath(Url),

    #[error("Failed to read `{url}`")]
    FileRead {
        url: Url,
        #[source]
        err: std::io::Error,
    },
}
