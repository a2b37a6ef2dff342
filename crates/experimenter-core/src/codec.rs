//! JSON encoding of experiment records into tag annotations.

use experiment_state::TagRecord;

use crate::domain::{ExperimentError, ExperimentRecord, Result};

/// Converts [`ExperimentRecord`]s to and from tag annotation bodies.
pub struct MetadataCodec;

impl MetadataCodec {
    /// Encode a record as a compact JSON object.
    pub fn encode(record: &ExperimentRecord) -> Result<String> {
        Ok(serde_json::to_string(record)?)
    }

    /// Decode the annotation of `tag`.
    ///
    /// Records written before `commit_sha` was stored get it back-filled from
    /// the tag's target.
    pub fn decode(tag: &TagRecord) -> Result<ExperimentRecord> {
        let mut record: ExperimentRecord =
            serde_json::from_str(tag.message.trim()).map_err(|source| ExperimentError::Codec {
                tag: tag.name.clone(),
                source,
            })?;
        if record.commit_sha.is_empty() {
            record.commit_sha = tag.target.to_string();
        }
        Ok(record)
    }
}
