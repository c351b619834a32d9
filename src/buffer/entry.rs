//! Buffer identity and metadata.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::checksum::Checksum;
use super::clock::{deadline, elapsed_between};
use super::error::UnknownBufferKind;

pub const MAX_PRIORITY: u8 = 10;

/// Opaque buffer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BufferId(Uuid);

impl BufferId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for BufferId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for BufferId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Payload family a buffer belongs to. Each kind has its own typed store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BufferKind {
    AiProcessing,
    MemoryIntegration,
    ChapterProcessing,
    Generic,
}

impl BufferKind {
    pub const ALL: [BufferKind; 4] = [
        BufferKind::AiProcessing,
        BufferKind::MemoryIntegration,
        BufferKind::ChapterProcessing,
        BufferKind::Generic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BufferKind::AiProcessing => "ai-processing",
            BufferKind::MemoryIntegration => "memory-integration",
            BufferKind::ChapterProcessing => "chapter-processing",
            BufferKind::Generic => "generic",
        }
    }
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BufferKind {
    type Err = UnknownBufferKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        BufferKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| UnknownBufferKind(value.to_string()))
    }
}

/// Bookkeeping recorded alongside every payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferMetadata {
    pub size_bytes: u64,
    pub created_at: OffsetDateTime,
    pub ttl_ms: u64,
    pub access_count: u64,
    pub last_accessed: OffsetDateTime,
    pub priority: u8,
}

impl BufferMetadata {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn expires_at(&self) -> OffsetDateTime {
        deadline(self.created_at, self.ttl())
    }

    /// An entry is expired once its age reaches the TTL.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        elapsed_between(self.created_at, now) >= self.ttl()
    }

    pub fn remaining(&self, now: OffsetDateTime) -> Duration {
        self.ttl()
            .saturating_sub(elapsed_between(self.created_at, now))
    }
}

/// A stored payload with its metadata and integrity tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferEntry<T> {
    pub id: BufferId,
    pub kind: BufferKind,
    pub payload: T,
    pub metadata: BufferMetadata,
    /// Informational links to other buffers; never enforced.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<BufferId>,
    pub checksum: Checksum,
}

/// Optional attributes for a new buffer.
#[derive(Debug, Clone, Default)]
pub struct BufferOptions {
    /// Overrides the per-kind default TTL.
    pub ttl: Option<Duration>,
    pub priority: u8,
    pub dependencies: Vec<BufferId>,
}

impl BufferOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Default::default()
        }
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(MAX_PRIORITY);
        self
    }

    pub fn depends_on(mut self, id: BufferId) -> Self {
        self.dependencies.push(id);
        self
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn metadata(ttl_ms: u64) -> BufferMetadata {
        let created_at = datetime!(2024-05-01 12:00 UTC);
        BufferMetadata {
            size_bytes: 0,
            created_at,
            ttl_ms,
            access_count: 0,
            last_accessed: created_at,
            priority: 0,
        }
    }

    #[test]
    fn expiry_is_inclusive_of_the_ttl_boundary() {
        let meta = metadata(1_000);
        assert!(!meta.is_expired(datetime!(2024-05-01 12:00:00.999 UTC)));
        assert!(meta.is_expired(datetime!(2024-05-01 12:00:01 UTC)));
    }

    #[test]
    fn remaining_ttl_saturates() {
        let meta = metadata(1_000);
        assert_eq!(
            meta.remaining(datetime!(2024-05-01 12:00:00.25 UTC)),
            Duration::from_millis(750)
        );
        assert_eq!(
            meta.remaining(datetime!(2024-05-01 13:00 UTC)),
            Duration::ZERO
        );
    }

    #[test]
    fn expiry_instant_saturates_for_huge_ttls() {
        let meta = metadata(u64::MAX);
        assert!(meta.expires_at() > meta.created_at);
        assert!(!meta.is_expired(datetime!(2999-01-01 0:00 UTC)));
    }

    #[test]
    fn kind_tags_round_trip_through_strings() {
        for kind in BufferKind::ALL {
            assert_eq!(kind.as_str().parse::<BufferKind>(), Ok(kind));
        }
        assert_eq!(
            "episodic".parse::<BufferKind>(),
            Err(UnknownBufferKind("episodic".to_string()))
        );
    }

    #[test]
    fn options_clamp_priority() {
        assert_eq!(BufferOptions::default().priority(42).priority, MAX_PRIORITY);
    }
}
