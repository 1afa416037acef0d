//! Chunked, streamable form of a profile.
//!
//! A profile with an unbounded number of columns is written as a sequence of
//! length-delimited [`MessageSegment`] frames sharing one marker:
//!
//! 1. one metadata segment (properties, schema version, model metrics), always first;
//! 2. zero or more column-chunk segments, each a batch of serialized columns whose
//!    encoded size stays under [`ChunkConfig::max_chunk_bytes`].
//!
//! The marker is the session id followed by a fresh identifier, so frames of
//! several profiles can share one stream. There is no end frame: a reader
//! decides when a marker is complete, typically at end of input.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::sync::Arc;

use prost::Message;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::ids::{IdGenerator, UuidGenerator};
use super::messages::{
    ColumnsChunkSegment, DatasetMetadataSegment, DatasetProperties, MessageSegment,
    ModelMetricsMessage, Segment,
};
use super::{assemble, decode_column, properties_of, read_frame, validate_schema, write_frame};
use crate::column::ColumnAccumulator;
use crate::error::{ProfileError, ProfileResult};
use crate::profile::DatasetProfile;

pub const DEFAULT_MAX_CHUNK_BYTES: usize = 1024 * 1024;

/// Chunk packing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Upper bound on the encoded column payload of one chunk. A single column
    /// larger than this is emitted alone.
    pub max_chunk_bytes: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
        }
    }
}

impl ChunkConfig {
    pub fn with_max_chunk_bytes(mut self, max_chunk_bytes: usize) -> Self {
        self.max_chunk_bytes = max_chunk_bytes;
        self
    }
}

/// Encoded size of one `name -> bytes` entry inside a chunk's column map.
fn entry_len(name: &str, bytes: &[u8]) -> usize {
    let body = 1
        + prost::length_delimiter_len(name.len())
        + name.len()
        + 1
        + prost::length_delimiter_len(bytes.len())
        + bytes.len();
    1 + prost::length_delimiter_len(body) + body
}

/// Lazily groups serialized columns into size-bounded chunks.
///
/// Grouping depends only on the encoded sizes and the input order.
#[derive(Debug)]
pub struct ColumnChunks<I> {
    columns: I,
    pending: Option<(String, Vec<u8>)>,
    max_chunk_bytes: usize,
}

impl<I> ColumnChunks<I>
where
    I: Iterator<Item = ProfileResult<(String, Vec<u8>)>>,
{
    pub fn new(columns: I, max_chunk_bytes: usize) -> Self {
        Self {
            columns,
            pending: None,
            max_chunk_bytes,
        }
    }
}

impl<I> Iterator for ColumnChunks<I>
where
    I: Iterator<Item = ProfileResult<(String, Vec<u8>)>>,
{
    type Item = ProfileResult<BTreeMap<String, Vec<u8>>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut chunk = BTreeMap::new();
        let mut size = 0;
        loop {
            let (name, bytes) = match self.pending.take() {
                Some(entry) => entry,
                None => match self.columns.next() {
                    Some(Ok(entry)) => entry,
                    Some(Err(e)) => return Some(Err(e)),
                    None => break,
                },
            };
            let len = entry_len(&name, &bytes);
            if !chunk.is_empty() && size + len > self.max_chunk_bytes {
                self.pending = Some((name, bytes));
                break;
            }
            size += len;
            chunk.insert(name, bytes);
        }
        (!chunk.is_empty()).then_some(Ok(chunk))
    }
}

/// Serializes a profile's columns one at a time, in name order.
#[derive(Debug)]
struct EncodedColumns<'a, C: ColumnAccumulator> {
    profile: &'a DatasetProfile<C>,
    names: std::vec::IntoIter<String>,
}

impl<C: ColumnAccumulator> Iterator for EncodedColumns<'_, C> {
    type Item = ProfileResult<(String, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let name = self.names.next()?;
        let encoded = self
            .profile
            .read_columns()
            .get(&name)
            .map(ColumnAccumulator::to_wire)
            .unwrap_or_else(|| Err(ProfileError::Internal(format!("Column '{name}' disappeared"))));
        Some(encoded.map(|bytes| (name, bytes)))
    }
}

/// The segments of one profile: metadata first, then column chunks.
///
/// Columns are serialized one at a time from the profile's storage as the
/// iterator advances; no copy of the column map is taken. The set of column
/// names is fixed when segmentation starts, and each column is read under a
/// short shared lock when its turn comes.
#[derive(Debug)]
pub struct ProfileSegments<'a, C: ColumnAccumulator> {
    marker: String,
    metadata: Option<DatasetMetadataSegment>,
    chunks: ColumnChunks<EncodedColumns<'a, C>>,
}

impl<C: ColumnAccumulator> ProfileSegments<'_, C> {
    pub fn marker(&self) -> &str {
        &self.marker
    }
}

impl<C: ColumnAccumulator> Iterator for ProfileSegments<'_, C> {
    type Item = ProfileResult<MessageSegment>;

    fn next(&mut self) -> Option<Self::Item> {
        let segment = match self.metadata.take() {
            Some(metadata) => Segment::Metadata(metadata),
            None => match self.chunks.next()? {
                Ok(columns) => Segment::Columns(ColumnsChunkSegment { columns }),
                Err(e) => return Some(Err(e)),
            },
        };
        Some(Ok(MessageSegment {
            marker: self.marker.clone(),
            segment: Some(segment),
        }))
    }
}

impl<C: ColumnAccumulator> DatasetProfile<C> {
    /// Splits the profile into segments with a random marker and default chunk size.
    pub fn to_segments(&self) -> ProfileResult<ProfileSegments<'_, C>> {
        self.to_segments_with(&UuidGenerator, ChunkConfig::default())
    }

    pub fn to_segments_with(
        &self,
        ids: &dyn IdGenerator,
        config: ChunkConfig,
    ) -> ProfileResult<ProfileSegments<'_, C>> {
        self.validate()?;
        let columns = EncodedColumns {
            profile: self,
            names: self.column_names().into_iter(),
        };
        Ok(ProfileSegments {
            marker: format!("{}{}", self.session_id(), ids.next_id()),
            metadata: Some(DatasetMetadataSegment {
                properties: Some(properties_of(self)),
                model_profile: self.model_metrics().map(|m| m.to_message()),
            }),
            chunks: ColumnChunks::new(columns, config.max_chunk_bytes),
        })
    }
}

/// What a [`ChunkedWriter`] emitted for one profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteStats {
    pub marker: String,
    /// Metadata segment included.
    pub segments: usize,
    pub bytes: usize,
}

/// Writes profiles to a sink in the chunked form.
#[derive(Debug)]
pub struct ChunkedWriter<W: Write> {
    sink: W,
    ids: Arc<dyn IdGenerator>,
    config: ChunkConfig,
}

impl<W: Write> ChunkedWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            ids: Arc::new(UuidGenerator),
            config: ChunkConfig::default(),
        }
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_config(mut self, config: ChunkConfig) -> Self {
        self.config = config;
        self
    }

    #[instrument(skip_all, fields(session_id = %profile.session_id()))]
    pub fn write_profile<C: ColumnAccumulator>(
        &mut self,
        profile: &DatasetProfile<C>,
    ) -> ProfileResult<WriteStats> {
        let segments = profile.to_segments_with(self.ids.as_ref(), self.config)?;
        let marker = segments.marker().to_string();
        let mut stats = WriteStats {
            marker,
            segments: 0,
            bytes: 0,
        };
        for segment in segments {
            let segment = segment?;
            stats.bytes += write_frame(&mut self.sink, &segment)?;
            stats.segments += 1;
            debug!(
                marker = %stats.marker,
                segment = stats.segments,
                bytes = stats.bytes,
                "Wrote profile segment"
            );
        }
        Ok(stats)
    }

    pub fn flush(&mut self) -> ProfileResult<()> {
        self.sink.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

#[derive(Debug)]
struct PartialProfile<C> {
    properties: DatasetProperties,
    model: Option<ModelMetricsMessage>,
    columns: BTreeMap<String, C>,
}

/// Collects segments by marker and rebuilds whole profiles.
///
/// A column chunk must arrive after the metadata segment of its marker.
#[derive(Debug)]
pub struct ProfileReassembler<C: ColumnAccumulator> {
    pending: HashMap<String, PartialProfile<C>>,
    /// Markers in order of first appearance.
    order: Vec<String>,
}

impl<C: ColumnAccumulator> Default for ProfileReassembler<C> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<C: ColumnAccumulator> ProfileReassembler<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Markers with a metadata segment and no completed profile yet.
    pub fn markers(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Feeds one decoded segment.
    pub fn push(&mut self, segment: MessageSegment) -> ProfileResult<()> {
        let MessageSegment { marker, segment } = segment;
        match segment {
            Some(Segment::Metadata(metadata)) => {
                if self.pending.contains_key(&marker) {
                    return Err(ProfileError::wire(format!(
                        "Duplicate metadata segment for marker '{marker}'"
                    )));
                }
                let properties = metadata.properties.ok_or_else(|| {
                    ProfileError::wire(format!("Metadata segment '{marker}' has no properties"))
                })?;
                validate_schema(
                    properties.schema_major_version,
                    properties.schema_minor_version,
                )?;
                debug!(%marker, "Started profile reassembly");
                self.order.push(marker.clone());
                self.pending.insert(
                    marker,
                    PartialProfile {
                        properties,
                        model: metadata.model_profile,
                        columns: BTreeMap::new(),
                    },
                );
            }
            Some(Segment::Columns(chunk)) => {
                let partial = self.pending.get_mut(&marker).ok_or_else(|| {
                    ProfileError::wire(format!(
                        "Column chunk for marker '{marker}' arrived before its metadata segment"
                    ))
                })?;
                for (name, bytes) in chunk.columns {
                    if partial.columns.contains_key(&name) {
                        return Err(ProfileError::wire(format!(
                            "Column '{name}' appears twice under marker '{marker}'"
                        )));
                    }
                    let column = decode_column(&name, &bytes)?;
                    partial.columns.insert(name, column);
                }
            }
            None => {
                return Err(ProfileError::wire(format!(
                    "Segment for marker '{marker}' has no payload"
                )))
            }
        }
        Ok(())
    }

    /// Decodes and feeds one frame body.
    pub fn push_frame(&mut self, frame: &[u8]) -> ProfileResult<()> {
        self.push(MessageSegment::decode(frame)?)
    }

    /// Completes the profile for `marker`, removing it from the reassembler.
    pub fn complete(&mut self, marker: &str) -> ProfileResult<DatasetProfile<C>> {
        let partial = self
            .pending
            .remove(marker)
            .ok_or_else(|| ProfileError::wire(format!("Unknown marker '{marker}'")))?;
        self.order.retain(|m| m != marker);
        assemble(partial.properties, partial.columns, partial.model)
    }

    /// Completes every pending profile in order of first appearance.
    pub fn finish(mut self) -> ProfileResult<Vec<DatasetProfile<C>>> {
        std::mem::take(&mut self.order)
            .into_iter()
            .map(|marker| self.complete(&marker))
            .collect()
    }
}

/// Reads a chunked stream to end of input and rebuilds every profile in it.
///
/// A corrupt frame aborts the whole read.
#[instrument(skip_all)]
pub fn read_segments<C: ColumnAccumulator, R: Read>(
    source: &mut R,
) -> ProfileResult<Vec<DatasetProfile<C>>> {
    let mut reassembler = ProfileReassembler::new();
    let mut frames = 0usize;
    while let Some(frame) = read_frame(source)? {
        reassembler.push_frame(&frame)?;
        frames += 1;
    }
    debug!(frames, profiles = reassembler.len(), "Read chunked profile stream");
    reassembler.finish()
}
