use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("missing OPENAI_API_KEY; set it in the environment or .env")]
    MissingApiKey,
    #[error("request to {endpoint} failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("failed to decode {endpoint} response: {message}")]
    Decode { endpoint: String, message: String },
    #[error("{0}")]
    EmptyResponse(String),
}

/// Failure axes of the retrieval step.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("vector index '{0}' not found; run `ingest --rebuild` first")]
    IndexNotFound(String),
    /// The index exists but the search kept no hits.
    #[error("no relevant documents matched the query")]
    EmptyResult,
    #[error("vector index error: {0}")]
    Backend(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}
