//! Prelude for commonly used types and traits in term-profile.

pub use crate::column::{ColumnAccumulator, ColumnProfile};
pub use crate::error::{ErrorContext, ProfileError, ProfileResult};
pub use crate::fold::{FoldCombine, FoldConfig, LocalFoldRunner, ModelConfig, ProfileFold};
pub use crate::metrics::{ModelMetrics, ModelType};
pub use crate::profile::DatasetProfile;
pub use crate::record::{Record, Value};
pub use crate::wire::{ChunkConfig, ChunkedWriter, ProfileReassembler};
