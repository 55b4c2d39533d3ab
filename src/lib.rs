//! Broadcast equipment risk inventory.
//!
//! Turns one photograph of broadcast equipment into an inventory of
//! equipment items, each with a location, a name, a safety tier and a short
//! explanation.
//!
//! # Architecture
//!
//! Two perception sources are fused:
//!
//! 1. An **object detector** supplies precise boxes and calibrated
//!    confidence, but generic labels.
//! 2. A **vision-language model** supplies domain meaning and risk
//!    judgement, but unreliable geometry and free-form text output.
//!
//! Geometry is trusted to the detector, semantics to the model. Output is
//! validated defensively and every ambiguity resolves toward caution:
//! an unrecognised tier becomes `UNKNOWN`, never `SAFE`.
//!
//! # Module Structure
//!
//! - `prompt`: instruction text built from detector output
//! - `validate`: tolerant parsing of the model reply
//! - `fuse`: merging detections with validated claims
//! - `pipeline`: call order over injected collaborators
//! - `ingest`, `detect`, `model`, `storage`: collaborator boundaries
//! - `handler`, `api`: invocation surfaces

use anyhow::Result;
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod api;
pub mod config;
pub mod detect;
pub mod equipment;
pub mod error;
pub mod fuse;
pub mod handler;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod prompt;
pub mod storage;
pub mod validate;

pub use config::AnalyzerConfig;
pub use detect::{DetectedObject, NoneDetector, ObjectDetector, StubDetector};
pub use equipment::{
    AnalysisResult, BoundingBox, CandidateEquipment, EquipmentRecord, Provenance, RiskLevel,
};
pub use error::{Collaborator, CollaboratorError, FailureKind, PipelineError};
pub use fuse::{fuse, Fusion, FusionWarning, DEFAULT_FREEFORM_CONFIDENCE};
pub use handler::{handle_event, handle_key, HandlerResponse};
pub use ingest::{FileImageSource, HttpImageSource, ImageSource, SourceImage};
pub use model::{StubVisionModel, VisionModel};
pub use pipeline::{analyze_reply, AnalysisSummary, Pipeline, PipelineSettings, ReplyAnalysis};
pub use prompt::build_prompt;
pub use storage::{InMemoryResultStore, ResultStore, SqliteResultStore, StoredAnalysis};
pub use validate::{validate_reply, Validation, ValidationWarning};

/// URI for a private shared-cache in-memory database.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:equipment_risk_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

pub fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}
