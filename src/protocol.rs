/*!
    constants shared by both ends of the link

    the link exchanges [Word]s only. Two values are reserved as sentinels and are never valid payload, a third one is the slave's filler which also reads as "index 0" to the master.
*/

use embedded_hal::spi::{Mode, MODE_1};


/// unit of bus transfer, the peripheral is configured word-wide
pub type Word = u16;

/// sent by the master to start a frame
pub const BEGIN: Word = 0xffff;
/// sent by the slave once it has no more index to request
pub const END: Word = 0xfffe;
/// loaded by the slave when it has nothing to request, it is also the request for the first word of the next frame
pub const IDLE: Word = 0x0000;
/// greatest word value allowed in payload, everything above is a sentinel
pub const MAX_PAYLOAD: Word = 0xfffd;

/// default number of frame slots in the slave's pool
pub const POOL: usize = 3;

/// word width the transport must be configured to
pub const WORD_BITS: u32 = Word::BITS;
/// bus clock rate the transport must be configured to, in Hz
pub const CLOCK: u32 = 10_000_000;
/// clock idle low, output changing on the transition from idle to active clock
pub const MODE: Mode = MODE_1;


/// true for words reserved to protocol signaling
pub const fn is_sentinel(word: Word) -> bool {
    word > MAX_PAYLOAD
}
/// true for words that can be carried in a frame
pub const fn is_payload(word: Word) -> bool {
    ! is_sentinel(word)
}

/**
    check a frame size can be addressed by the slave's index requests

    indices are sent as words, they must never collide with [END]
*/
pub const fn valid_size(size: usize) -> bool {
    size >= 1 && size < END as usize
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_outside_payload() {
        assert!(is_sentinel(BEGIN));
        assert!(is_sentinel(END));
        assert!(is_payload(IDLE));
        assert!(is_payload(MAX_PAYLOAD));
        assert_ne!(BEGIN, END);
    }

    #[test]
    fn frame_sizes() {
        assert!(! valid_size(0));
        assert!(valid_size(1));
        assert!(valid_size(usize::from(MAX_PAYLOAD)));
        assert!(! valid_size(usize::from(END)));
    }
}
