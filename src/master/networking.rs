use std::time::Duration;
use embedded_hal_async::spi::{SpiBus, Error as _};
use log::*;

use crate::protocol::{self, Word, BEGIN, END};
use super::Error;



/**
    link master async implementation, pushing frames of `SIZE` words

    every word is one round trip on the bus, bounded by the master's timeout
*/
pub struct Master<B, const SIZE: usize> {
    /// full-duplex SPI bus, already configured as in [protocol]
    bus: B,
    /// maximum duration of one round trip
    timeout: Duration,
}

impl<B: SpiBus<Word>, const SIZE: usize> Master<B, SIZE> {
    /// initialize a master on the given bus, with a 100ms timeout per round trip
    pub fn new(bus: B) -> Self {
        assert!(protocol::valid_size(SIZE), "frame size must be addressable by index requests");
        Self {
            bus,
            timeout: Duration::from_millis(100),
        }
    }
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
    pub fn timeout(&self) -> Duration  {self.timeout}
    pub fn bus(&mut self) -> &mut B  {&mut self.bus}
    pub fn into_inner(self) -> B  {self.bus}

    /**
        send a complete frame, returning once the slave signaled its end

        nothing is sent if the frame contains sentinels. Indices requested by the slave are checked against the frame, and the frame must end after exactly `SIZE` payload words.
    */
    pub async fn send(&mut self, frame: &[Word; SIZE]) -> Result<(), Error> {
        if let Some(index) = frame.iter().position(|&word| protocol::is_sentinel(word)) {
            return Err(Error::Sentinel {index, word: frame[index]});
        }

        // let the slave know we are ready to transmit, it answers the first index it wants
        let mut requested = self.exchange(BEGIN).await?;
        let mut sent = 0;
        // keep sending the requested index until the slave tells it is done
        while requested != END {
            if sent == SIZE {
                return Err(Error::Desynchronized {sent, size: SIZE});
            }
            let word = *frame.get(usize::from(requested))
                .ok_or(Error::IndexOutOfRange {index: requested, size: SIZE})?;
            requested = self.exchange(word).await?;
            sent += 1;
        }
        if sent != SIZE {
            return Err(Error::Desynchronized {sent, size: SIZE});
        }
        debug!("sent frame of {} words", SIZE);
        Ok(())
    }

    /// one round trip: send a word and get the one the slave loaded
    async fn exchange(&mut self, word: Word) -> Result<Word, Error> {
        let mut buffer = [word];
        tokio::time::timeout(self.timeout, self.bus.transfer_in_place(&mut buffer)).await
            .map_err(|_| Error::Timeout)?
            .map_err(|error| Error::Bus(error.kind()))?;
        trace!("sent {:#06x} received {:#06x}", word, buffer[0]);
        Ok(buffer[0])
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::VecDeque, vec::Vec};
    use embedded_hal_async::spi::{ErrorKind, ErrorType};

    /// bus answering a fixed script of words
    #[derive(Default)]
    struct Scripted {
        replies: VecDeque<Word>,
        sent: Vec<Word>,
        /// never answer once the script is exhausted
        stall: bool,
    }
    #[derive(Debug)]
    struct Broken;
    impl embedded_hal_async::spi::Error for Broken {
        fn kind(&self) -> ErrorKind {ErrorKind::Overrun}
    }
    impl ErrorType for Scripted {
        type Error = Broken;
    }
    impl SpiBus<Word> for Scripted {
        async fn read(&mut self, words: &mut [Word]) -> Result<(), Broken> {
            for word in words {
                *word = self.replies.pop_front().ok_or(Broken)?;
            }
            Ok(())
        }
        async fn write(&mut self, words: &[Word]) -> Result<(), Broken> {
            self.sent.extend_from_slice(words);
            Ok(())
        }
        async fn transfer(&mut self, read: &mut [Word], write: &[Word]) -> Result<(), Broken> {
            self.write(write).await?;
            self.read(read).await
        }
        async fn transfer_in_place(&mut self, words: &mut [Word]) -> Result<(), Broken> {
            for word in words {
                self.sent.push(*word);
                match self.replies.pop_front() {
                    Some(reply) => *word = reply,
                    None if self.stall => std::future::pending::<()>().await,
                    None => return Err(Broken),
                }
            }
            Ok(())
        }
        async fn flush(&mut self) -> Result<(), Broken> {
            Ok(())
        }
    }
    fn scripted(replies: &[Word]) -> Scripted {
        Scripted {replies: replies.iter().copied().collect(), .. Default::default()}
    }

    #[tokio::test]
    async fn follows_requests() {
        // requests out of order are honored as long as they stay in the frame
        let mut master = Master::<_, 3>::new(scripted(&[2, 0, 1, END]));
        master.send(&[10, 20, 30]).await.unwrap();
        assert_eq!(master.into_inner().sent, [BEGIN, 30, 10, 20]);
    }

    #[tokio::test]
    async fn sentinel_rejected_before_sending() {
        let mut master = Master::<_, 3>::new(scripted(&[0, 1, 2, END]));
        assert_eq!(
            master.send(&[10, END, 30]).await,
            Err(Error::Sentinel {index: 1, word: END}),
            );
        assert_eq!(
            master.send(&[BEGIN, 0, 0]).await,
            Err(Error::Sentinel {index: 0, word: BEGIN}),
            );
        assert!(master.into_inner().sent.is_empty());
    }

    #[tokio::test]
    async fn index_out_of_range() {
        let mut master = Master::<_, 2>::new(scripted(&[0, 7]));
        assert_eq!(
            master.send(&[1, 2]).await,
            Err(Error::IndexOutOfRange {index: 7, size: 2}),
            );
    }

    #[tokio::test]
    async fn early_end() {
        let mut master = Master::<_, 3>::new(scripted(&[0, END]));
        assert_eq!(
            master.send(&[1, 2, 3]).await,
            Err(Error::Desynchronized {sent: 1, size: 3}),
            );
    }

    #[tokio::test]
    async fn missing_end() {
        let mut master = Master::<_, 2>::new(scripted(&[0, 1, 1, 1]));
        assert_eq!(
            master.send(&[1, 2]).await,
            Err(Error::Desynchronized {sent: 2, size: 2}),
            );
    }

    #[tokio::test]
    async fn bus_error() {
        let mut master = Master::<_, 2>::new(scripted(&[0]));
        assert_eq!(master.send(&[1, 2]).await, Err(Error::Bus(ErrorKind::Overrun)));
    }

    #[tokio::test]
    async fn stalled_bus_times_out() {
        let bus = Scripted {stall: true, .. scripted(&[0])};
        let mut master = Master::<_, 2>::new(bus).with_timeout(Duration::from_millis(20));
        assert_eq!(master.timeout(), Duration::from_millis(20));
        assert_eq!(master.send(&[1, 2]).await, Err(Error::Timeout));
    }
}
