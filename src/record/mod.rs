//! Typed access to the shared session record, as specified by the
//! synchronization protocol: point reads, conditional partial writes, a
//! store-provided atomic score increment, and a push subscription that
//! delivers every committed snapshot in commit order.

pub mod memory;
mod storage;

use std::pin::Pin;

use futures::Stream;
use futures::future::BoxFuture;

use crate::session::{ParticipantId, RecordPatch, SessionId, SessionRecord, WriteRejected};

pub use self::storage::{StoreError, StoreResult};

/// Stream of committed session snapshots, delivered at-least-once in the
/// store's commit order until dropped.
pub type SnapshotFeed = Pin<Box<dyn Stream<Item = SessionRecord> + Send>>;

/// Outcome of a conditional write.
///
/// Rejection is not an error: it is the protocol's silent no-op for writes
/// whose record-level precondition no longer holds (a duplicate answer, a
/// stale advance, any write against a terminal record).
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    /// The write committed; carries the resulting snapshot.
    Applied(SessionRecord),
    /// The write violated a record-level precondition and changed nothing.
    Rejected(WriteRejected),
}

impl WriteOutcome {
    /// Whether the write committed.
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied(_))
    }
}

/// Abstraction over the shared record service for one-session documents.
///
/// No ordering is guaranteed between independent writes issued by different
/// peers beyond what the store serializes; the protocol built on top is
/// designed to tolerate arbitrary interleaving of the two peers' writes.
pub trait RecordStore: Send + Sync {
    /// Insert a freshly created session record.
    fn create(&self, record: SessionRecord) -> BoxFuture<'static, StoreResult<()>>;

    /// Point read of the latest committed snapshot.
    fn fetch(&self, id: SessionId) -> BoxFuture<'static, StoreResult<Option<SessionRecord>>>;

    /// Apply a conditional partial update.
    fn apply(
        &self,
        id: SessionId,
        patch: RecordPatch,
    ) -> BoxFuture<'static, StoreResult<WriteOutcome>>;

    /// Apply a commutative score delta that composes correctly even when
    /// both peers increment concurrently.
    fn increment_score(
        &self,
        id: SessionId,
        participant: ParticipantId,
        delta: u32,
    ) -> BoxFuture<'static, StoreResult<WriteOutcome>>;

    /// Subscribe to the record's change feed. The feed yields the current
    /// snapshot immediately, then every subsequent commit.
    fn subscribe(&self, id: SessionId) -> BoxFuture<'static, StoreResult<SnapshotFeed>>;
}
