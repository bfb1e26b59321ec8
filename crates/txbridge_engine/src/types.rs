//! Types shared across the engine boundary.

use std::fmt;

/// Opaque handle of a native transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a transaction handle from its raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw handle value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tr:{}", self.0)
    }
}

/// Opaque handle of a native pending result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FutureId(pub u64);

impl FutureId {
    /// Creates a future handle from its raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw handle value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FutureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fut:{}", self.0)
    }
}

/// A key-value pair returned by a range read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyValue {
    /// The key.
    pub key: Vec<u8>,
    /// The value.
    pub value: Vec<u8>,
}

impl KeyValue {
    /// Creates a new pair.
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Bytes counted against a range read's byte target.
    pub fn byte_size(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

/// Fetch-size hint for range reads.
///
/// Only batching changes with the mode; the set of returned pairs does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamingMode {
    /// Fetch the whole range in as few batches as possible.
    WantAll,
    /// Batches grow with the iteration counter.
    #[default]
    Iterator,
    /// Return exactly `limit` rows; requires a limit.
    Exact,
    /// Small batches.
    Small,
    /// Medium batches.
    Medium,
    /// Large batches.
    Large,
    /// Large batches tuned for a single serial consumer.
    Serial,
}

impl StreamingMode {
    /// Returns the wire code of the mode.
    pub fn code(self) -> i32 {
        match self {
            StreamingMode::WantAll => -2,
            StreamingMode::Iterator => -1,
            StreamingMode::Exact => 0,
            StreamingMode::Small => 1,
            StreamingMode::Medium => 2,
            StreamingMode::Large => 3,
            StreamingMode::Serial => 4,
        }
    }

    /// Parses a wire code.
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -2 => StreamingMode::WantAll,
            -1 => StreamingMode::Iterator,
            0 => StreamingMode::Exact,
            1 => StreamingMode::Small,
            2 => StreamingMode::Medium,
            3 => StreamingMode::Large,
            4 => StreamingMode::Serial,
            _ => return None,
        })
    }
}

/// Server-side merge applied to a key at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationType {
    /// Little-endian integer addition.
    Add,
    /// Bitwise and.
    BitAnd,
    /// Bitwise or.
    BitOr,
    /// Bitwise xor.
    BitXor,
    /// Append the operand if the result fits the value size limit.
    AppendIfFits,
    /// Little-endian unsigned maximum.
    Max,
    /// Little-endian unsigned minimum.
    Min,
    /// Lexicographic minimum.
    ByteMin,
    /// Lexicographic maximum.
    ByteMax,
    /// Clear the key if its value equals the operand.
    CompareAndClear,
}

impl MutationType {
    /// Returns the wire code of the mutation.
    pub fn code(self) -> i32 {
        match self {
            MutationType::Add => 2,
            MutationType::BitAnd => 6,
            MutationType::BitOr => 7,
            MutationType::BitXor => 8,
            MutationType::AppendIfFits => 9,
            MutationType::Max => 12,
            MutationType::Min => 13,
            MutationType::ByteMin => 16,
            MutationType::ByteMax => 17,
            MutationType::CompareAndClear => 20,
        }
    }

    /// Parses a wire code.
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            2 => MutationType::Add,
            6 => MutationType::BitAnd,
            7 => MutationType::BitOr,
            8 => MutationType::BitXor,
            9 => MutationType::AppendIfFits,
            12 => MutationType::Max,
            13 => MutationType::Min,
            16 => MutationType::ByteMin,
            17 => MutationType::ByteMax,
            20 => MutationType::CompareAndClear,
            _ => return None,
        })
    }
}

/// Kind of conflict range added explicitly to a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictRangeType {
    /// Treat the range as read by the transaction.
    Read,
    /// Treat the range as written by the transaction.
    Write,
}

/// Shape of the result held by a native future.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKind {
    /// No payload; only success or an error.
    Void,
    /// Optional value.
    Value,
    /// A key.
    Key,
    /// Key-value pairs plus a `more` flag.
    KeyValues,
    /// List of strings.
    StringArray,
    /// A 64-bit version.
    Version,
}

/// A key selector flattened for the call table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorArgs<'a> {
    /// Reference key.
    pub key: &'a [u8],
    /// Whether the base position includes the reference key itself.
    pub or_equal: bool,
    /// Positions to move from the base position.
    pub offset: i32,
}

/// Arguments of a range read, flattened for the call table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeArgs<'a> {
    /// Inclusive begin position.
    pub begin: SelectorArgs<'a>,
    /// Exclusive end position.
    pub end: SelectorArgs<'a>,
    /// Row limit; 0 means unbounded.
    pub limit: i32,
    /// Byte target; 0 means unbounded.
    pub target_bytes: i32,
    /// Batching hint.
    pub mode: StreamingMode,
    /// Batch counter of the logical scan.
    pub iteration: i32,
    /// Snapshot read (no read conflict range).
    pub snapshot: bool,
    /// Return pairs in descending key order.
    pub reverse: bool,
}
