use async_trait::async_trait;

/// Receives step/percentage updates over the lifetime of one publish.
/// Percentages are non-decreasing by construction; observation is lossy, so
/// sinks must not assume they see every intermediate value.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn update(&self, step: &str, percentage: u8);
}

/// Sink for callers that do not track progress.
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn update(&self, _step: &str, _percentage: u8) {}
}

/// The blob-upload phase advances linearly from a fixed floor to a fixed
/// ceiling as blobs complete.
pub(crate) fn blob_phase_percentage(completed: usize, total: usize) -> u8 {
    const FLOOR: u64 = 20;
    const CEILING: u64 = 70;
    if total == 0 {
        return CEILING as u8;
    }
    (FLOOR + (completed.min(total) as u64 * (CEILING - FLOOR)) / total as u64) as u8
}
