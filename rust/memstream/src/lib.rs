//! A reference-counted, in-memory, random-access unit stream behind a
//! fixed capability contract:
//! - [`ObjectControl`]: the base shared-lifetime surface (`add_ref` /
//!   `release`).
//! - [`UnitStream`]: the stream surface (read, write, seek, resize, copy,
//!   plus the always-successful commit/revert/lock/stat/clone members the
//!   contract requires).
//!
//! Holders obtain a typed view of an object through
//! [`UnitStream::query_capability`] with one of the closed [`Capability`]
//! tags, and balance every granted view with a [`ObjectControl::release`].
//!
//! The one provided implementation is [`MemoryStream`]: a single
//! contiguous, growable memory buffer, never a backing store.

use bitflags::bitflags;

use memstream_common::Result;

pub mod memory;

pub use memory::MemoryStream;
pub use memstream_arena::Unit;

/// Capability tags a holder can request through
/// [`UnitStream::query_capability`].
///
/// The set is closed. Memory streams grant `Object` and `Stream`;
/// `Storage` belongs to the wider contract and is always rejected by
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// The base reference-counted object surface.
    Object,
    /// The full sequential/random stream surface.
    Stream,
    /// The structured-storage surface.
    Storage,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Object => "object",
            Capability::Stream => "stream",
            Capability::Storage => "storage",
        }
    }
}

/// Reference point for [`UnitStream::seek`] offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    /// Offset from the beginning of the stream (must be non-negative).
    Start,
    /// Offset from the current cursor position.
    Current,
    /// Offset from the end of the stream (must be non-positive).
    End,
}

/// Outcome of [`UnitStream::copy_to`].
///
/// A missing destination is a soft "not performed" result, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// `units_read` units were taken from the head of the source, of
    /// which the destination accepted `units_written`.
    Copied { units_read: u64, units_written: u64 },
    /// No destination stream was supplied; nothing happened.
    NotPerformed,
}

bitflags! {
    /// Commit behavior flags. Memory streams accept any combination and
    /// ignore it: there is no backing store to commit to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CommitFlags: u32 {
        const OVERWRITE = 0x1;
        const ONLY_IF_CURRENT = 0x2;
        const DANGEROUSLY_COMMIT_MERELY_TO_DISK_CACHE = 0x4;
        const CONSOLIDATE = 0x8;
    }
}

/// Region lock kinds accepted by [`UnitStream::lock_region`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Write,
    Exclusive,
    OnlyOnce,
}

/// Status snapshot returned by [`UnitStream::stat`].
///
/// Memory streams report success without populating any field, so every
/// field stays at its default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStat {
    pub name: Option<String>,
    pub size: u64,
    pub unit_width: u32,
}

/// The base reference-counted object surface.
///
/// Ownership of an object is shared among however many holders have taken
/// a reference; the object is destroyed exactly when the count drops from
/// one to zero.
pub trait ObjectControl {
    /// Takes one more reference and returns the new count.
    fn add_ref(&self) -> u32;

    /// Drops one reference and returns the new count. Reaching zero
    /// destroys the object's contents.
    fn release(&self) -> u32;
}

/// A granted view of an object under a requested [`Capability`].
pub enum CapabilityRef<'a, U: Unit> {
    Object(&'a dyn ObjectControl),
    Stream(&'a dyn UnitStream<U>),
}

impl<U: Unit> core::fmt::Debug for CapabilityRef<'_, U> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CapabilityRef::Object(_) => f.write_str("Object"),
            CapabilityRef::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl<'a, U: Unit> CapabilityRef<'a, U> {
    /// Views the grant under the base lifetime surface, which every
    /// capability includes.
    pub fn object(&self) -> &'a dyn ObjectControl {
        match self {
            CapabilityRef::Object(object) => *object,
            CapabilityRef::Stream(stream) => *stream as &dyn ObjectControl,
        }
    }

    /// Returns the stream surface if that is what was granted.
    pub fn stream(&self) -> Option<&'a dyn UnitStream<U>> {
        match self {
            CapabilityRef::Stream(stream) => Some(*stream),
            CapabilityRef::Object(_) => None,
        }
    }
}

/// The sequential/random stream capability contract, generic over the
/// fixed unit width `U` selected at instantiation.
///
/// Short reads and short writes are not errors: both report the count of
/// units actually transferred, and a count smaller than requested is the
/// end-of-stream (resp. write-truncation) signal.
pub trait UnitStream<U: Unit>: ObjectControl {
    /// Asks the object for a view under `capability`. On success the
    /// reference count is incremented and the caller must balance the
    /// grant with a [`release`](ObjectControl::release); on failure the
    /// count is untouched.
    fn query_capability(&self, capability: Capability) -> Result<CapabilityRef<'_, U>>;

    /// Copies at most `dest.len()` units from the cursor position into
    /// `dest`, returning the count actually copied.
    ///
    /// The cursor does NOT advance: repeated reads observe the same
    /// units until an explicit [`seek`](UnitStream::seek) moves the
    /// position.
    fn read(&self, dest: &mut [U]) -> u64;

    /// Writes units from `src` at the cursor position, returning the
    /// count actually written and advancing the cursor by that count.
    ///
    /// A stream that has never held content adopts `src` wholesale
    /// (allocating its buffer) and takes the implicit owner reference;
    /// see [`MemoryStream`] for the full state transition. Otherwise the
    /// write never grows the buffer: units past the current size are
    /// silently dropped, and callers that need room must call
    /// [`set_size`](UnitStream::set_size) first.
    fn write(&self, src: &[U]) -> u64;

    /// Moves the cursor to `offset` relative to `origin`, returning the
    /// new position.
    ///
    /// A target outside `[0, size]` fails with an invalid-argument error.
    /// On failure the cursor is left unchanged for [`SeekOrigin::Start`],
    /// but RESET TO ZERO for [`SeekOrigin::Current`] and
    /// [`SeekOrigin::End`] — callers must not assume the position
    /// survived a failed relative seek.
    fn seek(&self, offset: i64, origin: SeekOrigin) -> Result<u64>;

    /// Resizes the stream to `new_size` units. Always succeeds.
    ///
    /// Growth zero-fills the new tail; shrinking stamps a terminator
    /// unit at the new size and clamps the cursor into `[0, new_size]`.
    fn set_size(&self, new_size: u64);

    /// Copies `min(amount, size)` units from the BEGINNING of this
    /// stream (not from the cursor) into `dest` through the
    /// destination's own [`write`](UnitStream::write), reporting both
    /// the count read and the count the destination accepted.
    fn copy_to(&self, dest: Option<&dyn UnitStream<U>>, amount: u64) -> CopyOutcome;

    /// Accepted and ignored; memory streams have nothing to commit.
    fn commit(&self, flags: CommitFlags) -> Result<()>;

    /// Accepted and ignored; memory streams have nothing to revert.
    fn revert(&self) -> Result<()>;

    /// Accepted and ignored; regions of a memory stream cannot be locked.
    fn lock_region(&self, offset: u64, len: u64, kind: LockKind) -> Result<()>;

    /// Accepted and ignored; see [`lock_region`](UnitStream::lock_region).
    fn unlock_region(&self, offset: u64, len: u64, kind: LockKind) -> Result<()>;

    /// Reports success without populating any status field.
    fn stat(&self) -> Result<StreamStat>;

    /// Accepted without producing a clone (`Ok(None)`).
    fn clone_stream(&self) -> Result<Option<Box<dyn UnitStream<U>>>>;
}
