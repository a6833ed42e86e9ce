// src/lib.rs
pub mod config;
pub mod models;
pub mod identity;
pub mod detect;
pub mod store;
pub mod vector;
pub mod scan;
pub mod extract;
pub mod ai;
pub mod query;
pub mod api;
pub mod engine;

pub use config::AppConfig;
pub use models::*;
pub use detect::{ChangeDetector, ChangeKind, ChangeRecord, ChangeSet};
pub use store::{MetadataStore, StoreError, StoreResult};
pub use vector::VectorIndex;
pub use scan::{ScanCheckpoint, ScanMode, ScanPhase, ScanStats};
pub use extract::{DecodeError, Decoder, FileDecoder};
pub use ai::{AnnotateError, Annotator, BertAnnotator};
pub use query::{MediaQuery, QueryParser};
pub use api::*;
pub use engine::{EngineError, EngineResult, MediaLibrary, MediaLibraryBuilder};
