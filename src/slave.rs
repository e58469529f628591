/*!
    slave side of the link, the receiving state machine run on every bus round trip

    The SPI peripheral is a shift register: the word loaded by the handler leaves during the *next* round trip, while the word just latched arrived during the current one. The master reads our previous request and answers with the requested payload word in the same round trip, so the handler always stores the answer to the request it loaded two round trips earlier. Hence the cursor offset of 2.

    For a frame of `SIZE` words the handler runs `SIZE + 1` times:

    | cursor | loads | latches |
    |--------|-------|---------|
    | 1 | 1 | [BEGIN] |
    | 2 ..= SIZE-1 | cursor | word `cursor - 2` |
    | SIZE | [END] | word `SIZE - 2` |
    | SIZE+1 | [IDLE] | word `SIZE - 1`, then the frame is published |

    The [IDLE] loaded last is what the master reads after its next [BEGIN], it requests word 0 of the next frame.

    ```ignore
    static SLAVE: Slave<8> = Slave::new();

    #[interrupt]
    fn SPI1() {
        SLAVE.on_transfer(unsafe {&mut *SPI.as_mut_ptr()}).ok();
    }

    fn main() -> ! {
        SLAVE.start(&mut spi).ok();
        let mut seen = SLAVE.frames();
        loop {
            if let Some(frame) = SLAVE.poll(seen) {
                seen = frame.frame;
                control(&frame.words);
            }
        }
    }
    ```
*/

use core::sync::atomic::{AtomicUsize, Ordering::*};
use embedded_hal_nb::spi::FullDuplex;
use log::*;

use crate::{
    mutex::*,
    pool::{FramePool, Snapshot},
    protocol::{self, Word, BEGIN, END, IDLE},
    };



/// receiving end of the link, holding the frame pool and the protocol state
pub struct Slave<const SIZE: usize, const POOL: usize = {protocol::POOL}> {
    pool: FramePool<SIZE, POOL>,
    control: HandlerCell<SlaveControl>,
    /// protocol anomalies detected since creation
    losses: AtomicUsize,
}
/// state only touched by the handler
struct SlaveControl {
    /// position in the current frame, offset by the 2 handshake words
    cursor: usize,
    /// a begin arrived in the middle of the current frame, which then mixes two sends and must not be published
    tainted: bool,
}

/// what a round trip did to the receiver
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transfer {
    /// start of frame received
    Begin,
    /// payload word stored at this index of the current frame
    Stored(usize),
    /// last payload word stored, the frame was published in this slot
    Completed(usize),
    /// word dropped because it did not fit the protocol, or frame dropped because it mixed two sends, a loss was counted
    Discarded,
    /// the handler was already running, nothing was done
    Busy,
}

impl<const SIZE: usize, const POOL: usize> Slave<SIZE, POOL> {
    /// the slave can be built in a static, to be shared with the interrupt handler
    pub const fn new() -> Self {
        Self {
            pool: FramePool::new(),
            control: HandlerCell::new(SlaveControl {cursor: 1, tainted: false}),
            losses: AtomicUsize::new(0),
        }
    }

    /// load [IDLE] for the first round trip, the peripheral only sends what was loaded before the master clocks
    pub fn start<B: FullDuplex<Word>>(&self, bus: &mut B) -> Result<(), B::Error> {
        nb::block!(bus.write(IDLE))
    }

    /**
        handle one complete round trip, this is meant to run in the bus interrupt

        the next request is loaded before the received word is read, as the peripheral expects. Both are immediately available during the interrupt, so blocking is bounded.
    */
    pub fn on_transfer<B: FullDuplex<Word>>(&self, bus: &mut B) -> Result<Transfer, B::Error> {
        let handled = self.control.try_with(|control| -> Result<Transfer, B::Error> {
            nb::block!(bus.write(control.outgoing::<SIZE>()))?;
            let received = nb::block!(bus.read())?;
            Ok(control.incoming(self, received))
        });
        handled.unwrap_or_else(|| {
            error!("reentered slave handler");
            Ok(Transfer::Busy)
        })
    }

    /**
        drop the frame in progress and wait for a new [BEGIN]

        to be called while the bus is idle, for instance when the master releases chip select after an error on its side. Returns false if the handler was running.
    */
    pub fn resynchronize<B: FullDuplex<Word>>(&self, bus: &mut B) -> Result<bool, B::Error> {
        let reset = self.control.try_with(|control| {
            if control.cursor != 1 {
                warn!("resynchronizing slave at cursor {}", control.cursor);
                self.lose();
            }
            control.reset();
        });
        if reset.is_none()
            {return Ok(false)}
        nb::block!(bus.write(IDLE))?;
        Ok(true)
    }

    /// last complete frame, none until a first frame is received
    pub fn latest(&self) -> Option<Snapshot<SIZE>> {
        self.pool.read_last()
    }
    /// last complete frame if it is newer than the frame counter `seen`
    pub fn poll(&self, seen: usize) -> Option<Snapshot<SIZE>> {
        if self.pool.frames() == seen
            {return None}
        self.pool.read_last()
            .filter(|frame| frame.frame != seen)
    }
    /// number of frames received, wrapping
    pub fn frames(&self) -> usize  {self.pool.frames()}
    /// number of protocol anomalies detected, wrapping
    pub fn losses(&self) -> usize  {self.losses.load(Relaxed)}
    /// slot currently written by the handler
    pub fn current_slot(&self) -> usize  {self.pool.current()}
    /// slot holding the last complete frame
    pub fn last_slot(&self) -> usize  {self.pool.last()}
    /// protocol cursor, none if the handler is running
    pub fn cursor(&self) -> Option<usize> {
        self.control.try_with(|control| control.cursor)
    }

    fn lose(&self) {
        // only the handler side counts, no read-modify-write needed
        self.losses.store(self.losses.load(Relaxed).wrapping_add(1), Relaxed);
    }
}

impl<const SIZE: usize, const POOL: usize> Default for Slave<SIZE, POOL> {
    fn default() -> Self {Self::new()}
}

impl SlaveControl {
    /// wait for the next begin
    fn reset(&mut self) {
        self.cursor = 1;
        self.tainted = false;
    }

    /// word to load for the next round trip
    fn outgoing<const SIZE: usize>(&self) -> Word {
        if self.cursor < SIZE {
            // request the next data, SIZE < END so this cannot truncate
            self.cursor as Word
        }
        else if self.cursor == SIZE {
            END
        }
        else {
            // no more data is coming for this frame after this round trip
            IDLE
        }
    }

    /// interpret the word latched during the round trip
    fn incoming<const SIZE: usize, const POOL: usize>(&mut self, slave: &Slave<SIZE, POOL>, received: Word) -> Transfer {
        let transfer;
        if received == BEGIN {
            if self.cursor != 1 {
                warn!("begin received at cursor {}", self.cursor);
                slave.lose();
                self.tainted = true;
            }
            self.cursor += 1;
            transfer = Transfer::Begin;
        }
        else if self.cursor < 2 {
            // payload arriving before any begin, there is no place for it
            warn!("payload {:#06x} received while awaiting begin", received);
            slave.lose();
            return Transfer::Discarded;
        }
        else {
            let index = self.cursor - 2;
            trace!("received word {} = {:#06x}", index, received);
            if ! slave.pool.store(index, received) {
                slave.lose();
                self.reset();
                return Transfer::Discarded;
            }
            self.cursor += 1;
            transfer = Transfer::Stored(index);
        }

        if self.cursor > SIZE + 1 {
            let tainted = self.tainted;
            self.reset();
            match transfer {
                Transfer::Stored(_) if ! tainted => {
                    let slot = slave.pool.rotate();
                    debug!("frame {} complete in slot {}", slave.pool.frames(), slot);
                    return Transfer::Completed(slot);
                },
                _ => {
                    // the frame overflowed through begins, or a begin restarted the master in the middle of it
                    warn!("frame abandoned");
                    slave.lose();
                    return Transfer::Discarded;
                },
            }
        }
        transfer
    }
}
