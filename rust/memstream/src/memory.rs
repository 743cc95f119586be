//! The in-memory stream implementation.

use std::cell::{Cell, RefCell};

use memstream_arena::{Unit, UnitArena};
use memstream_common::{Result, error::Error, verify_arg};

use crate::{
    Capability, CapabilityRef, CommitFlags, CopyOutcome, LockKind, ObjectControl, SeekOrigin,
    StreamStat, UnitStream,
};

/// A reference-counted stream over a single contiguous memory buffer of
/// fixed-width units.
///
/// The stream tracks three things: its buffer (through the lifecycle
/// states below), a cursor with the `0 <= cursor <= size` invariant, and
/// an explicit reference count. It is single-threaded by design — the
/// count and the buffer/cursor pair are interiorly mutable without
/// synchronization, so the type is not `Sync`; holders share it through
/// `Rc` and balance every `add_ref` / granted `query_capability` with a
/// `release`.
///
/// # Buffer lifecycle
///
/// A stream constructed empty starts *vacant*: it has no buffer and no
/// owner reference. The first [`write`](UnitStream::write) adopts it —
/// the buffer becomes an exact copy of the written units AND the stream
/// takes one implicit owner reference, exactly as if the writer had
/// called [`add_ref`](ObjectControl::add_ref). This surprising side
/// effect is part of the compatibility contract and is pinned by tests;
/// it happens once, on the vacant-to-occupied transition only. Sizing a
/// vacant stream with [`set_size`](UnitStream::set_size) also
/// materializes a buffer, but takes no reference.
///
/// When the reference count drops to zero the buffer is dropped, exactly
/// once, and the stream enters a terminal released state in which it
/// behaves as permanently empty.
pub struct MemoryStream<U: Unit> {
    contents: RefCell<Contents<U>>,
    cursor: Cell<u64>,
    refs: Cell<u32>,
}

/// Lifecycle states of the stream's buffer.
enum Contents<U: Unit> {
    /// Freshly constructed empty stream; the first write adopts it.
    Vacant,
    /// The stream owns a buffer (possibly of size zero after a shrink —
    /// that does not revert to `Vacant`).
    Occupied(UnitArena<U>),
    /// The last owner released its reference and the buffer was dropped.
    /// Terminal: the stream stays empty and is never re-adopted.
    Released,
}

impl<U: Unit> MemoryStream<U> {
    /// Creates a vacant stream: no buffer, cursor 0, reference count 0.
    ///
    /// The constructing context is expected to hand the stream to a
    /// holder (which takes the first reference through
    /// [`query_capability`](UnitStream::query_capability)) or to let the
    /// first write adopt it.
    pub fn new() -> MemoryStream<U> {
        MemoryStream {
            contents: RefCell::new(Contents::Vacant),
            cursor: Cell::new(0),
            refs: Cell::new(0),
        }
    }

    /// Creates a stream pre-seeded with a copy of `units`; the
    /// constructing context holds the first reference (count 1).
    pub fn from_units(units: &[U]) -> MemoryStream<U> {
        MemoryStream {
            contents: RefCell::new(Contents::Occupied(UnitArena::from_units(units))),
            cursor: Cell::new(0),
            refs: Cell::new(1),
        }
    }

    /// Current count of valid units.
    pub fn size(&self) -> u64 {
        match &*self.contents.borrow() {
            Contents::Occupied(arena) => arena.len() as u64,
            Contents::Vacant | Contents::Released => 0,
        }
    }

    /// Current read/write offset; `0 <= cursor() <= size()` at rest.
    pub fn cursor(&self) -> u64 {
        self.cursor.get()
    }

    /// Current count of outstanding owner references.
    pub fn ref_count(&self) -> u32 {
        self.refs.get()
    }
}

impl MemoryStream<u8> {
    /// Seeds a narrow stream from UTF-8 text. No terminator unit is
    /// stored; the size is the text's byte length.
    pub fn from_text(text: &str) -> MemoryStream<u8> {
        MemoryStream::from_units(text.as_bytes())
    }
}

impl MemoryStream<u16> {
    /// Seeds a wide stream from text encoded as UTF-16 units. No
    /// terminator unit is stored.
    pub fn from_text(text: &str) -> MemoryStream<u16> {
        let units: Vec<u16> = text.encode_utf16().collect();
        MemoryStream::from_units(&units)
    }
}

impl<U: Unit> Default for MemoryStream<U> {
    fn default() -> Self {
        MemoryStream::new()
    }
}

impl<U: Unit> ObjectControl for MemoryStream<U> {
    fn add_ref(&self) -> u32 {
        let refs = self.refs.get() + 1;
        self.refs.set(refs);
        refs
    }

    fn release(&self) -> u32 {
        let refs = self.refs.get();
        if refs > 1 {
            self.refs.set(refs - 1);
            return refs - 1;
        }
        self.refs.set(0);
        // Last reference gone: drop the buffer. Replacing an already
        // released state is a no-op, so the buffer is dropped exactly
        // once even under unbalanced extra releases.
        self.contents.replace(Contents::Released);
        self.cursor.set(0);
        0
    }
}

impl<U: Unit> UnitStream<U> for MemoryStream<U> {
    fn query_capability(&self, capability: Capability) -> Result<CapabilityRef<'_, U>> {
        match capability {
            Capability::Object => {
                self.add_ref();
                Ok(CapabilityRef::Object(self))
            }
            Capability::Stream => {
                self.add_ref();
                Ok(CapabilityRef::Stream(self))
            }
            other => Err(Error::unsupported_capability(other.as_str())),
        }
    }

    fn read(&self, dest: &mut [U]) -> u64 {
        let contents = self.contents.borrow();
        let Contents::Occupied(arena) = &*contents else {
            return 0;
        };
        let cursor = self.cursor.get() as usize;
        let amount = dest.len().min(arena.len().saturating_sub(cursor));
        dest[..amount].copy_from_slice(&arena.as_slice()[cursor..cursor + amount]);
        // The cursor deliberately stays put: reads are repeatable until
        // an explicit seek moves the position.
        amount as u64
    }

    fn write(&self, src: &[U]) -> u64 {
        let mut contents = self.contents.borrow_mut();
        if matches!(&*contents, Contents::Vacant) {
            // Vacant-to-occupied transition: adopt the written units and
            // take the implicit owner reference.
            *contents = Contents::Occupied(UnitArena::from_units(src));
            drop(contents);
            self.add_ref();
            return src.len() as u64;
        }
        match &mut *contents {
            Contents::Occupied(arena) => {
                let cursor = self.cursor.get() as usize;
                let amount = src.len().min(arena.len().saturating_sub(cursor));
                arena.as_mut_slice()[cursor..cursor + amount].copy_from_slice(&src[..amount]);
                self.cursor.set((cursor + amount) as u64);
                amount as u64
            }
            Contents::Vacant | Contents::Released => 0,
        }
    }

    fn seek(&self, offset: i64, origin: SeekOrigin) -> Result<u64> {
        let size = self.size() as i64;
        let target = match origin {
            SeekOrigin::Start => {
                // Cursor is untouched when an absolute seek fails.
                verify_arg!(offset, offset >= 0 && offset <= size);
                offset
            }
            SeekOrigin::Current => {
                match (self.cursor.get() as i64).checked_add(offset) {
                    Some(target) if (0..=size).contains(&target) => target,
                    _ => {
                        // Failed relative seeks reset the position to the
                        // start of the stream rather than leaving it be.
                        self.cursor.set(0);
                        return Err(Error::invalid_arg(
                            "offset",
                            "seek from the current position must land within [0, size]",
                        ));
                    }
                }
            }
            SeekOrigin::End => match size.checked_add(offset) {
                Some(target) if offset <= 0 && target >= 0 => target,
                _ => {
                    self.cursor.set(0);
                    return Err(Error::invalid_arg(
                        "offset",
                        "seek from the end must land within [0, size]",
                    ));
                }
            },
        };
        self.cursor.set(target as u64);
        Ok(target as u64)
    }

    fn set_size(&self, new_size: u64) {
        let new_size = new_size as usize;
        {
            let mut contents = self.contents.borrow_mut();
            match &mut *contents {
                Contents::Vacant => {
                    // Materializes a zero-filled buffer but does not take
                    // the owner reference; only write adopts.
                    *contents = Contents::Occupied(UnitArena::zeroed(new_size));
                }
                Contents::Occupied(arena) => {
                    if new_size > arena.len() {
                        arena.grow_zeroed(new_size);
                    } else {
                        arena.truncate_with_terminator(new_size);
                    }
                }
                Contents::Released => return,
            }
        }
        // Shrinking can strand the cursor past the end; clamp it back
        // into [0, size].
        if self.cursor.get() > new_size as u64 {
            self.cursor.set(new_size as u64);
        }
    }

    fn copy_to(&self, dest: Option<&dyn UnitStream<U>>, amount: u64) -> CopyOutcome {
        let Some(dest) = dest else {
            return CopyOutcome::NotPerformed;
        };
        // Copies always start at the head of the buffer, not the cursor.
        // Staged through a scratch vec so that copying a stream into
        // itself cannot alias the borrowed buffer.
        let staged: Vec<U> = {
            let contents = self.contents.borrow();
            let source = match &*contents {
                Contents::Occupied(arena) => arena.as_slice(),
                Contents::Vacant | Contents::Released => &[],
            };
            let amount = (amount as usize).min(source.len());
            source[..amount].to_vec()
        };
        let written = dest.write(&staged);
        CopyOutcome::Copied {
            units_read: staged.len() as u64,
            units_written: written,
        }
    }

    fn commit(&self, _flags: CommitFlags) -> Result<()> {
        Ok(())
    }

    fn revert(&self) -> Result<()> {
        Ok(())
    }

    fn lock_region(&self, _offset: u64, _len: u64, _kind: LockKind) -> Result<()> {
        Ok(())
    }

    fn unlock_region(&self, _offset: u64, _len: u64, _kind: LockKind) -> Result<()> {
        Ok(())
    }

    fn stat(&self) -> Result<StreamStat> {
        Ok(StreamStat::default())
    }

    fn clone_stream(&self) -> Result<Option<Box<dyn UnitStream<U>>>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;

    #[test]
    fn seek_from_start_then_read_covers_remainder() {
        let stream = MemoryStream::from_units(b"abcdefgh");
        let size = stream.size();
        for offset in 0..=size {
            stream.seek(offset as i64, SeekOrigin::Start).unwrap();
            let mut dest = [0u8; 16];
            assert_eq!(stream.read(&mut dest), size - offset);
            assert_eq!(&dest[..(size - offset) as usize], &b"abcdefgh"[offset as usize..]);
        }
    }

    #[test]
    fn read_does_not_advance_cursor() {
        let stream = MemoryStream::from_units(b"hello");
        let mut dest = [0u8; 3];
        assert_eq!(stream.read(&mut dest), 3);
        assert_eq!(&dest, b"hel");
        assert_eq!(stream.cursor(), 0);
        // Repeatable: the second read observes the same units.
        assert_eq!(stream.read(&mut dest), 3);
        assert_eq!(&dest, b"hel");
    }

    #[test]
    fn failed_seek_from_start_keeps_cursor() {
        let stream = MemoryStream::from_units(b"hello");
        stream.seek(2, SeekOrigin::Start).unwrap();
        assert!(stream.seek(6, SeekOrigin::Start).is_err());
        assert!(stream.seek(-1, SeekOrigin::Start).is_err());
        assert_eq!(stream.cursor(), 2);
    }

    #[test]
    fn failed_relative_seek_resets_cursor() {
        let stream = MemoryStream::from_units(b"hello");

        stream.seek(3, SeekOrigin::Start).unwrap();
        assert!(stream.seek(100, SeekOrigin::Current).is_err());
        assert_eq!(stream.cursor(), 0);

        stream.seek(3, SeekOrigin::Start).unwrap();
        assert!(stream.seek(-4, SeekOrigin::Current).is_err());
        assert_eq!(stream.cursor(), 0);

        stream.seek(3, SeekOrigin::Start).unwrap();
        assert!(stream.seek(1, SeekOrigin::End).is_err());
        assert_eq!(stream.cursor(), 0);

        stream.seek(3, SeekOrigin::Start).unwrap();
        assert!(stream.seek(-6, SeekOrigin::End).is_err());
        assert_eq!(stream.cursor(), 0);
    }

    #[test]
    fn seek_from_end_lands_relative_to_size() {
        let stream = MemoryStream::from_units(b"hello");
        stream.seek(2, SeekOrigin::Start).unwrap();
        assert_eq!(stream.seek(-2, SeekOrigin::End).unwrap(), 3);
        assert_eq!(stream.seek(0, SeekOrigin::End).unwrap(), 5);
    }

    #[test]
    fn first_write_adopts_and_takes_the_owner_reference() {
        let stream = MemoryStream::<u8>::new();
        assert_eq!(stream.ref_count(), 0);
        assert_eq!(stream.write(b"abcd"), 4);
        assert_eq!(stream.size(), 4);
        assert_eq!(stream.cursor(), 0);
        assert_eq!(stream.ref_count(), 1);

        // The adoption happens once: later writes are plain overwrites.
        assert_eq!(stream.write(b"xy"), 2);
        assert_eq!(stream.cursor(), 2);
        assert_eq!(stream.ref_count(), 1);
    }

    #[test]
    fn write_truncates_to_remaining_capacity() {
        let stream = MemoryStream::from_units(b"hello");
        stream.seek(3, SeekOrigin::Start).unwrap();
        assert_eq!(stream.write(b"wxyz"), 2);
        assert_eq!(stream.cursor(), 5);
        assert_eq!(stream.size(), 5);

        let mut dest = [0u8; 5];
        stream.seek(0, SeekOrigin::Start).unwrap();
        assert_eq!(stream.read(&mut dest), 5);
        assert_eq!(&dest, b"helwx");

        // At the very end, a write accepts nothing.
        stream.seek(0, SeekOrigin::End).unwrap();
        assert_eq!(stream.write(b"!"), 0);
    }

    #[test]
    fn set_size_grow_preserves_content_and_zero_fills() {
        let stream = MemoryStream::from_units(b"abc");
        stream.set_size(8);
        assert_eq!(stream.size(), 8);
        let mut dest = [0xffu8; 8];
        assert_eq!(stream.read(&mut dest), 8);
        assert_eq!(&dest[..3], b"abc");
        assert_eq!(&dest[3..], &[0u8; 5]);
    }

    #[test]
    fn set_size_shrink_keeps_prefix_and_clamps_cursor() {
        let stream = MemoryStream::from_units(b"hello");
        stream.seek(4, SeekOrigin::Start).unwrap();
        stream.set_size(2);
        assert_eq!(stream.size(), 2);
        assert_eq!(stream.cursor(), 2);
        let mut dest = [0u8; 8];
        stream.seek(0, SeekOrigin::Start).unwrap();
        assert_eq!(stream.read(&mut dest), 2);
        assert_eq!(&dest[..2], b"he");
    }

    #[test]
    fn set_size_on_vacant_stream_takes_no_reference() {
        let stream = MemoryStream::<u8>::new();
        stream.set_size(4);
        assert_eq!(stream.size(), 4);
        assert_eq!(stream.ref_count(), 0);

        // The stream is occupied now, so a write overwrites in place
        // instead of re-adopting.
        assert_eq!(stream.write(b"abcdef"), 4);
        assert_eq!(stream.ref_count(), 0);
        assert_eq!(stream.cursor(), 4);
    }

    #[test]
    fn copy_to_clamps_to_source_size() {
        let src = MemoryStream::from_units(b"hello");
        let dest = MemoryStream::<u8>::new();
        let outcome = src.copy_to(Some(&dest), 100);
        assert_eq!(
            outcome,
            CopyOutcome::Copied {
                units_read: 5,
                units_written: 5,
            }
        );
        let mut buf = [0u8; 5];
        assert_eq!(dest.read(&mut buf), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn copy_to_surfaces_destination_truncation() {
        let src = MemoryStream::from_units(b"hello");
        // Destination with no remaining capacity: its write accepts 0.
        let dest = MemoryStream::from_units(b"abc");
        dest.seek(3, SeekOrigin::Start).unwrap();
        let outcome = src.copy_to(Some(&dest), 5);
        assert_eq!(
            outcome,
            CopyOutcome::Copied {
                units_read: 5,
                units_written: 0,
            }
        );
    }

    #[test]
    fn copy_to_without_destination_is_not_performed() {
        let src = MemoryStream::from_units(b"hello");
        assert_eq!(src.copy_to(None, 5), CopyOutcome::NotPerformed);
    }

    #[test]
    fn copy_to_starts_at_the_head_not_the_cursor() {
        let src = MemoryStream::from_units(b"hello");
        src.seek(4, SeekOrigin::Start).unwrap();
        let dest = MemoryStream::<u8>::new();
        src.copy_to(Some(&dest), 2);
        let mut buf = [0u8; 2];
        assert_eq!(dest.read(&mut buf), 2);
        assert_eq!(&buf, b"he");
    }

    #[test]
    fn query_capability_grants_and_counts() {
        let stream = MemoryStream::from_units(b"ab");
        assert_eq!(stream.ref_count(), 1);

        let granted = stream.query_capability(Capability::Stream).unwrap();
        assert_eq!(stream.ref_count(), 2);
        assert!(granted.stream().is_some());
        granted.object().release();

        let granted = stream.query_capability(Capability::Object).unwrap();
        assert_eq!(stream.ref_count(), 2);
        assert!(granted.stream().is_none());
        granted.object().release();

        assert_eq!(stream.ref_count(), 1);
    }

    #[test]
    fn unsupported_capability_leaves_the_count_untouched() {
        let stream = MemoryStream::from_units(b"ab");
        let err = stream.query_capability(Capability::Storage).unwrap_err();
        assert!(matches!(
            err.kind(),
            memstream_common::error::ErrorKind::UnsupportedCapability { requested }
                if requested == "storage"
        ));
        assert_eq!(stream.ref_count(), 1);
    }

    #[test]
    fn release_to_zero_drops_the_buffer_once() {
        let stream = Rc::new(MemoryStream::from_units(b"hello"));
        let holder = Rc::clone(&stream);
        assert_eq!(holder.add_ref(), 2);
        assert_eq!(stream.release(), 1);
        assert_eq!(holder.release(), 0);

        // Terminal: the stream stays empty and is never re-adopted.
        assert_eq!(stream.size(), 0);
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf), 0);
        assert_eq!(stream.write(b"zz"), 0);
        assert_eq!(stream.ref_count(), 0);
        // An unbalanced extra release saturates at zero.
        assert_eq!(stream.release(), 0);
    }

    #[test]
    fn noop_members_always_succeed() {
        let stream = MemoryStream::from_units(b"ab");
        stream
            .commit(CommitFlags::OVERWRITE | CommitFlags::CONSOLIDATE)
            .unwrap();
        stream.revert().unwrap();
        stream.lock_region(0, 2, LockKind::Exclusive).unwrap();
        stream.unlock_region(0, 2, LockKind::Exclusive).unwrap();
        assert_eq!(stream.stat().unwrap(), StreamStat::default());
        assert!(stream.clone_stream().unwrap().is_none());
    }

    #[test]
    fn wide_units_behave_like_narrow_ones() {
        let stream = MemoryStream::<u16>::from_text("héllo");
        assert_eq!(stream.size(), 5);
        stream.seek(3, SeekOrigin::Start).unwrap();
        assert_eq!(stream.write(&[0x263A, 0x263B, 0x263C]), 2);
        assert_eq!(stream.cursor(), 5);

        stream.seek(0, SeekOrigin::Start).unwrap();
        let mut dest = [0u16; 8];
        assert_eq!(stream.read(&mut dest), 5);
        let expected: Vec<u16> = "hél".encode_utf16().chain([0x263A, 0x263B]).collect();
        assert_eq!(&dest[..5], expected.as_slice());
    }

    #[test]
    fn stream_is_usable_through_the_contract_object() {
        let stream: Rc<dyn UnitStream<u8>> = Rc::new(MemoryStream::<u8>::from_text("abc"));
        let mut dest = [0u8; 3];
        assert_eq!(stream.read(&mut dest), 3);
        assert_eq!(&dest, b"abc");
        assert_eq!(stream.seek(-1, SeekOrigin::End).unwrap(), 2);
    }

    #[test]
    fn end_to_end_scenario() {
        let stream = MemoryStream::from_units(&[1u8, 2, 3, 4, 5]);

        let mut dest = [0u8; 3];
        assert_eq!(stream.read(&mut dest), 3);
        assert_eq!(&dest, &[1, 2, 3]);
        assert_eq!(stream.cursor(), 0);

        assert_eq!(stream.seek(3, SeekOrigin::Start).unwrap(), 3);
        assert_eq!(stream.write(&[9, 9]), 2);
        assert_eq!(stream.cursor(), 5);

        stream.seek(1, SeekOrigin::Start).unwrap();
        stream.set_size(10);
        assert_eq!(stream.size(), 10);
        stream.seek(0, SeekOrigin::Start).unwrap();
        let mut all = [0xffu8; 10];
        assert_eq!(stream.read(&mut all), 10);
        assert_eq!(&all, &[1, 2, 3, 9, 9, 0, 0, 0, 0, 0]);
    }
}
