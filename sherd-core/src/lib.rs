pub mod config;
pub mod db;
pub mod error;
pub mod inference;
pub mod models;
pub mod store;

pub use config::SherdConfig;
pub use error::SherdError;
pub use inference::{
    Analysis, ApiKeySource, Classification, HttpInferenceClient, InferenceBackend,
    InferenceError, InferenceReply, INSTRUCTION,
};
pub use models::{NewObservation, Observation};
pub use store::{ObservationStore, RECENT_LIMIT};
