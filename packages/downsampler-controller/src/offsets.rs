//! Replay window for preview jobs
//!
//! A preview consumes only the most recent slice of its source topic. The
//! slice is sized from the shallowest partition so every partition replays the
//! same number of messages.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{ControllerError, Result};

/// Share of the shared retained depth a preview replays, in percent.
pub const REPLAY_PERCENT: i64 = 15;

/// Which end of a partition log to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetMarker {
    Oldest,
    Newest,
}

/// Message-log metadata port
#[async_trait]
pub trait TopicMetadata: Send + Sync {
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>>;

    async fn offset_at(&self, topic: &str, partition: i32, marker: OffsetMarker) -> Result<i64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionOffsetWindow {
    pub partition: i32,
    pub oldest: i64,
    pub newest: i64,
    /// Where the preview job starts consuming
    pub desired: i64,
}

impl PartitionOffsetWindow {
    pub fn depth(&self) -> i64 {
        self.newest - self.oldest
    }
}

pub struct OffsetWindowCalculator<'a> {
    metadata: &'a dyn TopicMetadata,
}

impl<'a> OffsetWindowCalculator<'a> {
    pub fn new(metadata: &'a dyn TopicMetadata) -> Self {
        Self { metadata }
    }

    /// Per-partition start offsets for a preview of `topic`.
    ///
    /// All-or-nothing: any failed metadata call aborts the whole computation.
    pub async fn compute_desired_offsets(&self, topic: &str) -> Result<Vec<PartitionOffsetWindow>> {
        let partitions = self.metadata.partitions(topic).await?;
        if partitions.is_empty() {
            return Err(ControllerError::NoPartitions {
                topic: topic.to_string(),
            });
        }

        let mut bounds = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let oldest = self
                .metadata
                .offset_at(topic, partition, OffsetMarker::Oldest)
                .await?;
            let newest = self
                .metadata
                .offset_at(topic, partition, OffsetMarker::Newest)
                .await?;
            debug!(topic, partition, oldest, newest, "Partition bounds");
            bounds.push((partition, oldest, newest));
        }

        let windows = desired_offsets(&bounds);
        info!(
            topic,
            partitions = windows.len(),
            offsets = %encode_offsets(&windows),
            "Computed preview replay offsets"
        );
        Ok(windows)
    }
}

/// Apply the replay rule to `(partition, oldest, newest)` bounds.
///
/// A non-positive shared depth replays nothing: every partition starts at its
/// newest offset.
pub fn desired_offsets(bounds: &[(i32, i64, i64)]) -> Vec<PartitionOffsetWindow> {
    let retained = bounds
        .iter()
        .map(|(_, oldest, newest)| newest - oldest)
        .min()
        .unwrap_or(0);
    let trimmed = trimmed_depth(retained);

    bounds
        .iter()
        .map(|&(partition, oldest, newest)| PartitionOffsetWindow {
            partition,
            oldest,
            newest,
            desired: newest - trimmed,
        })
        .collect()
}

/// `floor(depth * 0.15)`, zero for non-positive depths.
pub fn trimmed_depth(retained_depth: i64) -> i64 {
    if retained_depth <= 0 {
        return 0;
    }
    // i128 keeps the multiplication exact for offsets near i64::MAX
    (retained_depth as i128 * REPLAY_PERCENT as i128 / 100) as i64
}

/// `partition:offset` pairs joined by commas, the form the job entry point reads.
pub fn encode_offsets(windows: &[PartitionOffsetWindow]) -> String {
    windows
        .iter()
        .map(|w| format!("{}:{}", w.partition, w.desired))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    struct StaticTopic {
        bounds: BTreeMap<i32, (i64, i64)>,
        fail_partition: Option<i32>,
    }

    #[async_trait]
    impl TopicMetadata for StaticTopic {
        async fn partitions(&self, _topic: &str) -> Result<Vec<i32>> {
            Ok(self.bounds.keys().copied().collect())
        }

        async fn offset_at(&self, _topic: &str, partition: i32, marker: OffsetMarker) -> Result<i64> {
            if self.fail_partition == Some(partition) {
                return Err(ControllerError::ClusterResponse {
                    status: 503,
                    body: "broker unavailable".into(),
                });
            }
            let (oldest, newest) = self.bounds[&partition];
            Ok(match marker {
                OffsetMarker::Oldest => oldest,
                OffsetMarker::Newest => newest,
            })
        }
    }

    fn production_topic() -> StaticTopic {
        let newest = [
            29699366, 29699296, 29709419, 29700971, 29697439, 29702429, 29702036, 29701840,
        ];
        let oldest = [
            27722971, 27740352, 27731954, 27724846, 27735642, 27727105, 27725023, 27741339,
        ];
        StaticTopic {
            bounds: (0..8).map(|p| (p, (oldest[p as usize], newest[p as usize]))).collect(),
            fail_partition: None,
        }
    }

    #[tokio::test]
    async fn test_desired_offsets_from_production_sample() {
        let topic = production_topic();
        let windows = OffsetWindowCalculator::new(&topic)
            .compute_desired_offsets("omni-influx-metrics")
            .await
            .unwrap();

        // partition 1 is the shallowest: 29699296 - 27740352 = 1958944
        let trimmed = 1958944 * 15 / 100;
        assert_eq!(trimmed, 293841);

        let expected = [
            29405525, 29405455, 29415578, 29407130, 29403598, 29408588, 29408195, 29407999,
        ];
        let desired: Vec<i64> = windows.iter().map(|w| w.desired).collect();
        assert_eq!(desired, expected);
        for w in &windows {
            assert_eq!(w.newest - w.desired, trimmed);
        }
    }

    #[tokio::test]
    async fn test_no_partitions_is_an_error() {
        let topic = StaticTopic {
            bounds: BTreeMap::new(),
            fail_partition: None,
        };
        let err = OffsetWindowCalculator::new(&topic)
            .compute_desired_offsets("missing-topic")
            .await
            .unwrap_err();

        assert!(matches!(err, ControllerError::NoPartitions { ref topic } if topic == "missing-topic"));
    }

    #[tokio::test]
    async fn test_partition_failure_aborts_everything() {
        let mut topic = production_topic();
        topic.fail_partition = Some(5);

        let result = OffsetWindowCalculator::new(&topic)
            .compute_desired_offsets("omni-influx-metrics")
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_partitions_replay_nothing() {
        let windows = desired_offsets(&[(0, 100, 100), (1, 50, 400)]);
        assert_eq!(windows[0].desired, 100);
        assert_eq!(windows[1].desired, 400);
    }

    #[test]
    fn test_sparse_partition_ids_are_kept() {
        let windows = desired_offsets(&[(3, 0, 1000), (7, 0, 2000)]);
        assert_eq!(encode_offsets(&windows), "3:850,7:1850");
    }

    proptest! {
        #[test]
        fn desired_offset_matches_replay_rule(
            bounds in prop::collection::vec((0i64..1_000_000_000, 0i64..1_000_000_000), 1..16)
        ) {
            let bounds: Vec<(i32, i64, i64)> = bounds
                .into_iter()
                .enumerate()
                .map(|(p, (a, b))| (p as i32, a.min(b), a.max(b)))
                .collect();
            let min_depth = bounds.iter().map(|(_, o, n)| n - o).min().unwrap();
            let trimmed = min_depth * 15 / 100;

            let windows = desired_offsets(&bounds);

            prop_assert_eq!(windows.len(), bounds.len());
            for (w, (p, o, n)) in windows.iter().zip(&bounds) {
                prop_assert_eq!(w.partition, *p);
                prop_assert_eq!(w.desired, n - trimmed);
                prop_assert!(w.desired >= *o);
            }
        }
    }
}
