//! Invocation boundary.
//!
//! Turns an object-created upload notification into a pipeline run and the
//! pipeline outcome into a status code plus JSON body.

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::pipeline::Pipeline;

pub const SUCCESS_MESSAGE: &str = "分析完了";
pub const MALFORMED_EVENT_MESSAGE: &str = "アップロードイベントの形式が不正です";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UploadEvent {
    records: Vec<UploadRecord>,
}

#[derive(Debug, Deserialize)]
struct UploadRecord {
    s3: StorageEntity,
}

#[derive(Debug, Deserialize)]
struct StorageEntity {
    bucket: BucketEntity,
    object: ObjectEntity,
}

#[derive(Debug, Deserialize)]
struct BucketEntity {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ObjectEntity {
    key: String,
}

/// Uploaded object named by an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedObject {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("malformed upload event: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("upload event has no records")]
    NoRecords,
    #[error("upload event has an empty object key")]
    EmptyKey,
}

/// Extract the first uploaded object from an event.
pub fn parse_upload_event(raw: &[u8]) -> Result<UploadedObject, EventError> {
    let event: UploadEvent = serde_json::from_slice(raw)?;
    let record = event.records.into_iter().next().ok_or(EventError::NoRecords)?;
    if record.s3.object.key.trim().is_empty() {
        return Err(EventError::EmptyKey);
    }
    Ok(UploadedObject {
        bucket: record.s3.bucket.name,
        key: record.s3.object.key,
    })
}

#[derive(Clone, Debug, PartialEq)]
pub struct HandlerResponse {
    pub status_code: u16,
    pub body: Value,
}

impl HandlerResponse {
    fn error(status_code: u16, message: &str) -> Self {
        Self {
            status_code,
            body: json!({ "error": message }),
        }
    }
}

/// Handle one upload event end to end.
pub fn handle_event(pipeline: &Pipeline, raw: &[u8]) -> HandlerResponse {
    let object = match parse_upload_event(raw) {
        Ok(object) => object,
        Err(err) => {
            log::warn!("{}", err);
            return HandlerResponse::error(400, MALFORMED_EVENT_MESSAGE);
        }
    };
    log::info!("upload event: bucket={} key={}", object.bucket, object.key);
    handle_key(pipeline, &object.key)
}

/// Analyse one image key and shape the outcome for the caller.
pub fn handle_key(pipeline: &Pipeline, image_key: &str) -> HandlerResponse {
    match pipeline.analyze(image_key) {
        Ok(summary) => HandlerResponse {
            status_code: 200,
            body: json!({
                "message": SUCCESS_MESSAGE,
                "imageKey": summary.image_key,
                "equipmentCount": summary.equipment_count,
            }),
        },
        Err(err) => {
            log::error!("analysis of {} failed: {}", image_key, err);
            let kind = err.kind();
            HandlerResponse::error(kind.status_code(), kind.user_message())
        }
    }
}
