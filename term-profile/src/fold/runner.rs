//! In-process driver for the fold/combine contract.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info, instrument};

use super::GroupedFold;
use crate::error::{ProfileError, ProfileResult};

/// Configuration for [`LocalFoldRunner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Number of partitions each group is split into and reduced concurrently.
    pub partitions: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            partitions: num_cpus::get().max(1),
        }
    }
}

impl RunnerConfig {
    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions.max(1);
        self
    }
}

/// Finished output of one group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupOutput<K, O> {
    pub key: K,
    pub records: usize,
    pub output: O,
}

/// Runs a [`GroupedFold`] over an in-memory set of inputs.
///
/// Inputs are grouped by key, each group is split into contiguous partitions
/// reduced on the blocking pool, and partial accumulators are tree-merged
/// before `finish`.
#[derive(Debug)]
pub struct LocalFoldRunner<F> {
    fold: Arc<F>,
    config: RunnerConfig,
}

impl<F> LocalFoldRunner<F>
where
    F: GroupedFold + 'static,
    F::Input: Send + Sync + 'static,
    F::Accumulator: 'static,
{
    pub fn new(fold: F) -> Self {
        Self::with_config(fold, RunnerConfig::default())
    }

    pub fn with_config(fold: F, config: RunnerConfig) -> Self {
        Self {
            fold: Arc::new(fold),
            config,
        }
    }

    pub fn fold(&self) -> &F {
        &self.fold
    }

    /// Folds every input and returns one output per group, ordered by key.
    #[instrument(skip_all, fields(inputs = inputs.len(), partitions = self.config.partitions))]
    pub async fn run(&self, inputs: Vec<F::Input>) -> ProfileResult<Vec<GroupOutput<F::Key, F::Output>>> {
        let mut groups: BTreeMap<F::Key, Vec<F::Input>> = BTreeMap::new();
        for input in inputs {
            let key = self.fold.group_key(&input)?;
            groups.entry(key).or_default().push(input);
        }
        info!(groups = groups.len(), "Grouped inputs");

        let mut outputs = Vec::with_capacity(groups.len());
        for (key, group) in groups {
            let records = group.len();
            let acc = self.reduce_group(group).await?;
            outputs.push(GroupOutput {
                key,
                records,
                output: self.fold.finish(acc)?,
            });
        }
        Ok(outputs)
    }

    async fn reduce_group(&self, group: Vec<F::Input>) -> ProfileResult<F::Accumulator> {
        // A zero partition count set through the public field runs as one partition.
        let partition_size = group.len().div_ceil(self.config.partitions.max(1)).max(1);
        let group = Arc::new(group);

        let mut tasks = JoinSet::new();
        for start in (0..group.len()).step_by(partition_size) {
            let fold = Arc::clone(&self.fold);
            let group = Arc::clone(&group);
            let end = (start + partition_size).min(group.len());
            tasks.spawn_blocking(move || {
                group[start..end]
                    .iter()
                    .try_fold(fold.zero(), |acc, input| fold.reduce(acc, input))
            });
        }

        let mut partials = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            let partial = joined
                .map_err(|e| ProfileError::Internal(format!("Partition task failed: {e}")))??;
            partials.push(partial);
        }
        debug!(partials = partials.len(), "Reduced partitions");

        self.tree_merge(partials)
    }

    /// Pairwise merge until one accumulator remains.
    fn tree_merge(&self, mut level: Vec<F::Accumulator>) -> ProfileResult<F::Accumulator> {
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            let mut drain = level.into_iter();
            while let Some(left) = drain.next() {
                match drain.next() {
                    Some(right) => next.push(self.fold.merge(left, right)?),
                    None => next.push(left),
                }
            }
            level = next;
        }
        Ok(level.pop().unwrap_or_else(|| self.fold.zero()))
    }
}
