/*!
    master side of the link, in `std` environment.

    The central resource is the [Master] struct which pushes complete frames to the slave over an async SPI bus. Each frame is a sequence of round trips where the master sends the word the slave requested in the previous one, until the slave answers [END](crate::protocol::END).
*/

/// implementation of the bus exchanges
mod networking;

pub use networking::Master;


use embedded_hal_async::spi::ErrorKind;
use thiserror::Error;
use crate::protocol::Word;

/// error regarding link communication
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("problem with spi bus: {0:?}")]
    Bus(ErrorKind),
    #[error("slave requested word {index} of a {size} words frame")]
    IndexOutOfRange {index: Word, size: usize},
    #[error("payload word {index} is {word:#06x}, which is a protocol sentinel")]
    Sentinel {index: usize, word: Word},
    #[error("frame exchange desynchronized after {sent} of {size} words")]
    Desynchronized {sent: usize, size: usize},
    #[error("no data arrived in expected time")]
    Timeout,
}
