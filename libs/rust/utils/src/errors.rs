//env
pub const DATABASE_URL_NOT_SET: &str = "DATABASE_URL not set!";

//db
pub const DATABASE_CONNECTION_FAILED: &str = "Failed to connect to database";
pub const DATABASE_FETCH_DOCUMENTS_FAILED: &str = "Failed to fetch documents from database";
pub const DATABASE_FETCH_DOCUMENT_FAILED: &str = "Failed to fetch document by id";
pub const DATABASE_COUNT_DOCUMENTS_FAILED: &str = "Failed to count documents";

//embeddings
pub const EMBEDDING_REQUEST_FAILED: &str = "Failed to generate embeddings";
pub const EMBEDDING_RESPONSE_INVALID: &str = "Embedding provider returned an invalid response";

//live view
pub const LIVE_OUTPUT_OPEN_FAILED: &str = "Failed to open live view output";
pub const LIVE_OUTPUT_WRITE_FAILED: &str = "Failed to write live view row";
