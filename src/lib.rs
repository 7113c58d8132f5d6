//! Incremental synchronization of a relational movie catalog into an
//! Elasticsearch index.
//!
//! The pipeline polls Postgres for works whose own row, or any associated
//! person or genre, changed after a persisted watermark; streams the
//! denormalizing join rows for those works in bounded pages; folds them into
//! one nested document per work; bulk-upserts the documents by id; and only
//! then advances the watermark. Writes are idempotent, so every external
//! call sits behind a retry-forever wrapper with exponential backoff and the
//! whole process is resumable after a crash or connection loss.

pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod retry;
pub mod sink;
pub mod source;
pub mod state;

pub use config::Config;
pub use error::SyncError;
pub use model::{Filmwork, FilmworkSet, Genre, Person, RawJoinRow, Role};
pub use pipeline::SyncPipeline;
pub use retry::{retry_forever, Backoff};
pub use sink::{DocumentSink, ElasticSink, WriteReport};
pub use source::{ChangeSource, PostgresSource};
pub use state::{JsonFileStorage, State, StateStorage};
