/*!
    ring of frame slots shared between the receiving handler and the application

    the handler is the only writer, it fills the current slot word by word and publishes it when complete. The application only ever copies the last published slot.

    Each slot carries a stamp which is odd while the handler owns the slot, even once complete. A copy is kept only if the stamp of its slot was even and unchanged around it, so a reader sees either the previous or the next complete frame and never a mix of both. The frame number travels in the slot with the words, so a copy is always labelled with the frame it holds. Only atomic loads and stores are used here, no read-modify-write.
*/

use core::{
    ops::Deref,
    sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, fence, Ordering::*},
    };
use crate::protocol::{self, Word};


/// pool of `POOL` frames of `SIZE` words
pub struct FramePool<const SIZE: usize, const POOL: usize> {
    slots: [Slot<SIZE>; POOL],
    /// slot being written by the handler
    current: AtomicUsize,
    /// slot most recently completed
    last: AtomicUsize,
    /// number of frames completed, wrapping
    frames: AtomicUsize,
    /// set once the first frame is completed
    ready: AtomicBool,
}
struct Slot<const SIZE: usize> {
    stamp: AtomicUsize,
    /// frame counter value this slot was completed with
    frame: AtomicUsize,
    // AtomicU16 matches Word
    words: [AtomicU16; SIZE],
}

/// copy of a complete frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Snapshot<const SIZE: usize> {
    /// frame counter value when these words were published
    pub frame: usize,
    /// slot the frame was copied from
    pub slot: usize,
    pub words: [Word; SIZE],
}

impl<const SIZE: usize> Slot<SIZE> {
    const fn new() -> Self {
        Self {
            stamp: AtomicUsize::new(0),
            frame: AtomicUsize::new(0),
            words: [const { AtomicU16::new(0) }; SIZE],
        }
    }
    /// step the stamp, the handler is the only one doing it
    fn step(&self, order: core::sync::atomic::Ordering) {
        self.stamp.store(self.stamp.load(Relaxed).wrapping_add(1), order);
    }
}

impl<const SIZE: usize, const POOL: usize> FramePool<SIZE, POOL> {
    pub const fn new() -> Self {
        assert!(POOL >= 2, "a pool needs at least a current and a last slot");
        assert!(protocol::valid_size(SIZE), "frame size must be addressable by index requests");
        let mut slots = [const { Slot::new() }; POOL];
        // the first slot belongs to the handler from the start
        slots[0].stamp = AtomicUsize::new(1);
        Self {
            slots,
            current: AtomicUsize::new(0),
            last: AtomicUsize::new(POOL - 1),
            frames: AtomicUsize::new(0),
            ready: AtomicBool::new(false),
        }
    }

    pub fn current(&self) -> usize  {self.current.load(Relaxed)}
    pub fn last(&self) -> usize  {self.last.load(Acquire)}
    pub fn frames(&self) -> usize  {self.frames.load(Acquire)}

    /**
        write a word in the current slot, returns false if `index` is outside the frame

        only the handler may call this
    */
    pub fn store(&self, index: usize, word: Word) -> bool {
        match self.slots[self.current()].words.get(index) {
            Some(dst) => {dst.store(word, Relaxed); true},
            None => false,
        }
    }

    /**
        publish the current slot as last and move on to the next one, returns the published slot

        only the handler may call this
    */
    pub fn rotate(&self) -> usize {
        let completed = self.current();
        let next = (completed + 1) % POOL;
        let frame = self.frames.load(Relaxed).wrapping_add(1);

        self.slots[completed].frame.store(frame, Relaxed);
        self.slots[completed].step(Release);
        self.last.store(completed, Release);
        self.frames.store(frame, Release);
        self.ready.store(true, Release);

        // take the next slot before writing anything in it
        self.slots[next].step(Relaxed);
        fence(Release);
        self.current.store(next, Relaxed);
        completed
    }

    /// copy of the last complete frame, none before a first frame was completed
    pub fn read_last(&self) -> Option<Snapshot<SIZE>> {
        if ! self.ready.load(Acquire)
            {return None}
        loop {
            // a slot that changed under the copy means a newer one is published
            if let Some(snapshot) = self.read(self.last.load(Acquire))
                {break Some(snapshot)}
        }
    }

    /// consistent copy of a complete slot, none if the handler is writing it or started to during the copy
    fn read(&self, slot: usize) -> Option<Snapshot<SIZE>> {
        let source = &self.slots[slot];
        let before = source.stamp.load(Acquire);
        if before % 2 == 1
            {return None}

        let frame = source.frame.load(Relaxed);
        let words = core::array::from_fn(|i| source.words[i].load(Relaxed));

        fence(Acquire);
        if source.stamp.load(Relaxed) != before
            {return None}
        Some(Snapshot {frame, slot, words})
    }
}

impl<const SIZE: usize, const POOL: usize> Default for FramePool<SIZE, POOL> {
    fn default() -> Self {Self::new()}
}

impl<const SIZE: usize> Deref for Snapshot<SIZE> {
    type Target = [Word; SIZE];
    fn deref(&self) -> &Self::Target {
        &self.words
    }
}
