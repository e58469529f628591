/*!
    in-process SPI link, connecting a [Master](crate::master::Master) to a [Slave] without hardware

    every word the master transfers becomes a request on a channel. A single task owning the [SlaveEnd] drains it and plays the role of the slave peripheral and its interrupt: it shifts the loaded word out, latches the incoming one, then runs the slave handler exactly once. Requests are handled one at a time, so the handler is never preempted by the next round trip.

    ```ignore
    let slave = Slave::<4>::new();
    let (bus, peripheral) = loopback::link(1);
    let mut master = Master::<_, 4>::new(bus);
    (
        async {
            master.send(&[10, 20, 30, 40]).await.unwrap();
        },
        peripheral.run(&slave),
    ).race().await;
    assert_eq!(*slave.latest().unwrap(), [10, 20, 30, 40]);
    ```
*/

use core::convert::Infallible;
use embedded_hal_async::spi::{ErrorKind, ErrorType, SpiBus};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use log::*;

use crate::{
    protocol::{Word, IDLE},
    slave::Slave,
    };


/// error of the simulated bus
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("the other end of the link is gone")]
    Disconnected,
}
impl embedded_hal_async::spi::Error for LinkError {
    fn kind(&self) -> ErrorKind {ErrorKind::Other}
}

/// one round trip: the word sent by the master and where to answer
type Request = (Word, oneshot::Sender<Word>);

/// create both ends of a link, `capacity` is the number of round trips that can be queued
pub fn link(capacity: usize) -> (MasterEnd, SlaveEnd) {
    let (send, receive) = mpsc::channel(capacity);
    (
        MasterEnd {requests: send},
        SlaveEnd {
            requests: receive,
            register: ShiftRegister::new(),
            missed: None,
        },
    )
}


/// master end of the link, an async SPI bus of words
pub struct MasterEnd {
    requests: mpsc::Sender<Request>,
}
impl MasterEnd {
    async fn round_trip(&self, word: Word) -> Result<Word, LinkError> {
        let (answer, answered) = oneshot::channel();
        self.requests.send((word, answer)).await
            .map_err(|_| LinkError::Disconnected)?;
        answered.await
            .map_err(|_| LinkError::Disconnected)
    }
}
impl ErrorType for MasterEnd {
    type Error = LinkError;
}
impl SpiBus<Word> for MasterEnd {
    async fn read(&mut self, words: &mut [Word]) -> Result<(), LinkError> {
        for word in words {
            *word = self.round_trip(IDLE).await?;
        }
        Ok(())
    }
    async fn write(&mut self, words: &[Word]) -> Result<(), LinkError> {
        for &word in words {
            self.round_trip(word).await?;
        }
        Ok(())
    }
    async fn transfer(&mut self, read: &mut [Word], write: &[Word]) -> Result<(), LinkError> {
        // the longest of both sets the transfer length, missing words are sent idle and extra words discarded
        for i in 0 .. read.len().max(write.len()) {
            let received = self.round_trip(write.get(i).copied().unwrap_or(IDLE)).await?;
            if let Some(dst) = read.get_mut(i) {
                *dst = received;
            }
        }
        Ok(())
    }
    async fn transfer_in_place(&mut self, words: &mut [Word]) -> Result<(), LinkError> {
        for word in words {
            *word = self.round_trip(*word).await?;
        }
        Ok(())
    }
    async fn flush(&mut self) -> Result<(), LinkError> {
        // every round trip is already completed when its word is answered
        Ok(())
    }
}


/// slave end of the link, to be run by one task
pub struct SlaveEnd {
    requests: mpsc::Receiver<Request>,
    register: ShiftRegister,
    /// round trip on which the slave interrupt will not fire
    missed: Option<usize>,
}
impl SlaveEnd {
    /// skip the slave handler on the given round trip (counting from 0), as if its interrupt was lost
    pub fn miss(mut self, round_trip: usize) -> Self {
        self.missed = Some(round_trip);
        self
    }

    /**
        serve round trips to the given slave until the master end is dropped

        returns the number of round trips served
    */
    pub async fn run<const SIZE: usize, const POOL: usize>(mut self, slave: &Slave<SIZE, POOL>) -> usize {
        let Ok(()) = slave.start(&mut self.register);
        let mut round_trips = 0;
        while let Some((word, answer)) = self.requests.recv().await {
            let sent = self.register.shift(word);
            if self.missed == Some(round_trips) {
                warn!("missing slave interrupt on round trip {}", round_trips);
            }
            else {
                let Ok(transfer) = slave.on_transfer(&mut self.register);
                trace!("round trip {}: {:?}", round_trips, transfer);
            }
            round_trips += 1;
            // the master may have given up waiting
            answer.send(sent).ok();
        }
        debug!("link closed after {} round trips", round_trips);
        round_trips
    }
}


/**
    simulated peripheral data register

    holds the word loaded for the next round trip and the word latched by the last one. It can also be used to drive a [Slave] synchronously.
*/
#[derive(Debug, Default)]
pub struct ShiftRegister {
    loaded: Word,
    latched: Option<Word>,
}
impl ShiftRegister {
    pub fn new() -> Self {
        Self::default()
    }
    /// clock a full round trip, returns the word shifted out
    pub fn shift(&mut self, incoming: Word) -> Word {
        if self.latched.replace(incoming).is_some() {
            warn!("receive overrun, previous word was never read");
        }
        core::mem::replace(&mut self.loaded, IDLE)
    }
}
impl embedded_hal_nb::spi::ErrorType for ShiftRegister {
    type Error = Infallible;
}
impl embedded_hal_nb::spi::FullDuplex<Word> for ShiftRegister {
    fn read(&mut self) -> nb::Result<Word, Infallible> {
        self.latched.take().ok_or(nb::Error::WouldBlock)
    }
    fn write(&mut self, word: Word) -> nb::Result<(), Infallible> {
        self.loaded = word;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BEGIN, END};

    #[test]
    fn register_shifts_loaded_word() {
        use embedded_hal_nb::spi::FullDuplex;
        let mut register = ShiftRegister::new();
        register.write(5).unwrap();
        assert_eq!(register.shift(BEGIN), 5);
        assert_eq!(register.read().unwrap(), BEGIN);
        assert!(register.read().is_err());
        // nothing loaded since
        assert_eq!(register.shift(1), IDLE);
    }

    #[tokio::test]
    async fn master_end_is_a_bus() {
        let slave = Slave::<2>::new();
        let (mut bus, peripheral) = link(1);
        let serving = peripheral.run(&slave);
        let driving = async move {
            let mut words = [BEGIN, 11, 12];
            bus.transfer_in_place(&mut words).await.unwrap();
            assert_eq!(words, [IDLE, 1, END]);
            let mut read = [0; 2];
            bus.transfer(&mut read, &[BEGIN]).await.unwrap();
            // the idle word sent after begin is stored as payload 0, then the idle tail request comes back
            assert_eq!(read, [IDLE, 1]);
        };
        let (served, ()) = tokio::join!(serving, driving);
        assert_eq!(served, 5);
        assert_eq!(slave.frames(), 1);
        assert_eq!(*slave.latest().unwrap(), [11, 12]);
    }

    #[tokio::test]
    async fn disconnected_slave() {
        let (mut bus, peripheral) = link(1);
        drop(peripheral);
        assert_eq!(bus.write(&[BEGIN]).await, Err(LinkError::Disconnected));
    }
}
