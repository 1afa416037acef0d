//! Versioned binary wire format.
//!
//! Profiles serialize to protobuf messages (see [`messages`]) written as
//! length-delimited frames: a varint byte count followed by exactly that many
//! bytes. Two forms exist:
//!
//! - the single-message form, one [`messages::DatasetProfileMessage`] frame,
//!   produced by [`DatasetProfile::to_bytes`] and [`DatasetProfile::write_to`]
//!   and read back by [`DatasetProfile::parse`];
//! - the chunked form, a metadata frame followed by bounded column-chunk frames,
//!   produced and reassembled by [`chunk`].
//!
//! Every form carries a `major.minor` schema version. Readers reject unknown
//! major versions and accept any minor version.

pub mod chunk;
pub mod ids;
pub mod messages;

use std::collections::BTreeMap;
use std::io::{ErrorKind, Read, Write};

use chrono::{DateTime, Utc};
use prost::Message;
use tracing::{debug, instrument};

use crate::column::ColumnAccumulator;
use crate::error::{ProfileError, ProfileResult};
use crate::metrics::ModelMetrics;
use crate::profile::DatasetProfile;
use messages::{DatasetProfileMessage, DatasetProperties, ModelMetricsMessage};

pub use chunk::{
    read_segments, ChunkConfig, ChunkedWriter, ProfileReassembler, ProfileSegments, WriteStats,
};
pub use ids::{IdGenerator, SequentialGenerator, UuidGenerator};

pub const SCHEMA_MAJOR_VERSION: u32 = 1;
pub const SCHEMA_MINOR_VERSION: u32 = 2;

/// Encoded `data_timestamp` of a profile without a data time.
const NO_DATA_TIMESTAMP: i64 = -1;

/// Upper bound on a single frame, to fail fast on a corrupt length prefix.
const MAX_FRAME_BYTES: u64 = 1 << 30;

/// Fails unless `major` is the supported major version.
pub fn validate_schema(major: u32, minor: u32) -> ProfileResult<()> {
    if major != SCHEMA_MAJOR_VERSION {
        return Err(ProfileError::UnsupportedSchema {
            major,
            minor,
            supported: SCHEMA_MAJOR_VERSION,
        });
    }
    if minor != SCHEMA_MINOR_VERSION {
        debug!(minor, "Reading profile written with a different minor schema version");
    }
    Ok(())
}

impl<C: ColumnAccumulator> DatasetProfile<C> {
    /// Builds the single-message form.
    pub fn to_message(&self) -> ProfileResult<DatasetProfileMessage> {
        self.validate()?;
        let columns = self
            .read_columns()
            .iter()
            .map(|(name, column)| Ok((name.clone(), column.to_wire()?)))
            .collect::<ProfileResult<BTreeMap<_, _>>>()?;

        Ok(DatasetProfileMessage {
            properties: Some(properties_of(self)),
            columns,
            model_profile: self.model_metrics().map(|m| m.to_message()),
        })
    }

    /// Rebuilds a profile from the single-message form.
    pub fn from_message(msg: DatasetProfileMessage) -> ProfileResult<Self> {
        let properties = msg
            .properties
            .ok_or_else(|| ProfileError::wire("Profile message has no properties"))?;
        let columns = msg
            .columns
            .into_iter()
            .map(|(name, bytes)| {
                let column = decode_column(&name, &bytes)?;
                Ok((name, column))
            })
            .collect::<ProfileResult<BTreeMap<_, _>>>()?;
        assemble(properties, columns, msg.model_profile)
    }

    /// Serializes to one length-delimited frame.
    pub fn to_bytes(&self) -> ProfileResult<Vec<u8>> {
        Ok(self.to_message()?.encode_length_delimited_to_vec())
    }

    /// Writes one length-delimited frame to `sink`.
    pub fn write_to<W: Write>(&self, sink: &mut W) -> ProfileResult<()> {
        sink.write_all(&self.to_bytes()?)?;
        Ok(())
    }

    /// Reads the next length-delimited profile frame from `source`.
    ///
    /// Consecutive calls read consecutive profiles from one stream.
    #[instrument(skip_all)]
    pub fn parse<R: Read>(source: &mut R) -> ProfileResult<Self> {
        let frame = read_frame(source)?
            .ok_or_else(|| ProfileError::wire("Unexpected end of input before profile frame"))?;
        Self::from_message(DatasetProfileMessage::decode(frame.as_slice())?)
    }

    /// Parses the output of [`DatasetProfile::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> ProfileResult<Self> {
        let mut source = bytes;
        Self::parse(&mut source)
    }
}

pub(crate) fn properties_of<C: ColumnAccumulator>(profile: &DatasetProfile<C>) -> DatasetProperties {
    DatasetProperties {
        schema_major_version: SCHEMA_MAJOR_VERSION,
        schema_minor_version: SCHEMA_MINOR_VERSION,
        session_id: profile.session_id().to_string(),
        session_timestamp: profile.session_timestamp().timestamp_millis(),
        data_timestamp: profile
            .data_timestamp()
            .map_or(NO_DATA_TIMESTAMP, |ts| ts.timestamp_millis()),
        tags: profile.tags().clone(),
        metadata: profile.metadata().clone(),
    }
}

/// Decodes one column entry, rejecting an entry keyed under another column's name.
pub(crate) fn decode_column<C: ColumnAccumulator>(name: &str, bytes: &[u8]) -> ProfileResult<C> {
    let column = C::from_wire(bytes)?;
    if column.column_name() != name {
        return Err(ProfileError::wire(format!(
            "Column entry '{name}' holds data for column '{}'",
            column.column_name()
        )));
    }
    Ok(column)
}

/// Rebuilds and validates a profile from decoded parts.
pub(crate) fn assemble<C: ColumnAccumulator>(
    properties: DatasetProperties,
    columns: BTreeMap<String, C>,
    model: Option<ModelMetricsMessage>,
) -> ProfileResult<DatasetProfile<C>> {
    validate_schema(
        properties.schema_major_version,
        properties.schema_minor_version,
    )?;

    let session_timestamp = from_millis("session_timestamp", properties.session_timestamp)?;
    let data_timestamp = if properties.data_timestamp < 0 {
        None
    } else {
        Some(from_millis("data_timestamp", properties.data_timestamp)?)
    };

    let mut profile = DatasetProfile::scoped(
        properties.session_id,
        session_timestamp,
        data_timestamp,
        properties.tags,
        columns,
    )
    .with_all_metadata(properties.metadata);
    if let Some(model) = model {
        profile = profile.with_model(ModelMetrics::from_message(model)?);
    }

    profile.validate()?;
    Ok(profile)
}

fn from_millis(field: &str, millis: i64) -> ProfileResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| ProfileError::wire(format!("{field} {millis} is out of range")))
}

/// Writes `msg` as one length-delimited frame and returns the bytes written.
pub(crate) fn write_frame<W: Write, M: Message>(sink: &mut W, msg: &M) -> ProfileResult<usize> {
    let frame = msg.encode_length_delimited_to_vec();
    sink.write_all(&frame)?;
    Ok(frame.len())
}

/// Reads one length-delimited frame. Returns `None` on a clean end of input.
pub(crate) fn read_frame<R: Read>(source: &mut R) -> ProfileResult<Option<Vec<u8>>> {
    let mut len: u64 = 0;
    let mut shift = 0;
    let mut byte = [0u8; 1];
    loop {
        match source.read(&mut byte) {
            Ok(0) if shift == 0 => return Ok(None),
            Ok(0) => return Err(ProfileError::wire("Truncated frame length")),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
        if shift >= 64 {
            return Err(ProfileError::wire("Frame length varint is too long"));
        }
        len |= u64::from(byte[0] & 0x7f) << shift;
        if byte[0] & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    if len > MAX_FRAME_BYTES {
        return Err(ProfileError::wire(format!(
            "Frame of {len} bytes exceeds the {MAX_FRAME_BYTES} byte limit"
        )));
    }
    // The buffer grows with the bytes actually present, not with the declared length.
    let mut frame = Vec::new();
    source.take(len).read_to_end(&mut frame)?;
    if (frame.len() as u64) < len {
        return Err(ProfileError::wire(format!(
            "Truncated frame: expected {len} bytes, got {}",
            frame.len()
        )));
    }
    Ok(Some(frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use chrono::TimeZone;

    type Profile = DatasetProfile;

    fn sample() -> Profile {
        let session = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let data = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let tags = [("name".to_string(), "orders".to_string())].into();
        let profile = DatasetProfile::scoped("orders", session, Some(data), tags, BTreeMap::new())
            .with_metadata("owner", "ml")
            .with_regression_model("pred", "target");
        profile
            .track_record(
                &Record::new()
                    .with("pred", 2.0)
                    .with("target", 1.5)
                    .with("city", "Lyon"),
            )
            .unwrap();
        profile
    }

    #[test]
    fn test_bytes_round_trip() {
        let profile = sample();
        let restored = Profile::from_bytes(&profile.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, profile);
    }

    #[test]
    fn test_absent_data_timestamp_is_encoded_as_sentinel() {
        let profile = Profile::new("test", Utc::now());
        profile.track("col1", 1).unwrap();
        let msg = profile.to_message().unwrap();
        assert_eq!(msg.properties.unwrap().data_timestamp, -1);

        let restored = Profile::from_bytes(&profile.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.data_timestamp(), None);
    }

    #[test]
    fn test_parse_reads_consecutive_frames() {
        let first = sample();
        let second = sample().with_session_id("other");
        let mut buffer = Vec::new();
        first.write_to(&mut buffer).unwrap();
        second.write_to(&mut buffer).unwrap();

        let mut source = buffer.as_slice();
        assert_eq!(Profile::parse(&mut source).unwrap(), first);
        assert_eq!(Profile::parse(&mut source).unwrap(), second);
        assert!(matches!(
            Profile::parse(&mut source),
            Err(ProfileError::Wire(_))
        ));
    }

    #[test]
    fn test_unsupported_major_version_is_rejected() {
        let mut msg = sample().to_message().unwrap();
        if let Some(props) = msg.properties.as_mut() {
            props.schema_major_version = 2;
        }
        let err = Profile::from_message(msg).unwrap_err();
        assert!(matches!(
            err,
            ProfileError::UnsupportedSchema { major: 2, supported: 1, .. }
        ));
    }

    #[test]
    fn test_other_minor_version_is_accepted() {
        let mut msg = sample().to_message().unwrap();
        if let Some(props) = msg.properties.as_mut() {
            props.schema_minor_version = 9;
        }
        assert!(Profile::from_message(msg).is_ok());
    }

    #[test]
    fn test_truncated_frame_is_rejected() {
        let bytes = sample().to_bytes().unwrap();
        let err = Profile::from_bytes(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, ProfileError::Wire(_)));
    }

    #[test]
    fn test_empty_session_id_is_not_serialized() {
        let profile = Profile::new("", Utc::now());
        assert!(matches!(
            profile.to_bytes(),
            Err(ProfileError::Integrity(_))
        ));
    }
}
