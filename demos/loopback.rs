//! sensor unit pushing readings to the control unit over a simulated link, while the control unit reads them

use std::time::{Duration, Instant};
use futures_concurrency::future::Race;
use log::*;
use ipcspi::{
    protocol,
    master::Master,
    slave::Slave,
    loopback,
    };

/// accelerometer, gyroscope, magnetometer, each on 3 axis, then pressure and temperature
const READINGS: usize = 11;

static CONTROL: Slave<READINGS> = Slave::new();

#[tokio::main]
async fn main() {
    env_logger::init();
    info!("simulating a {} bits link at {} Hz in {:?}", protocol::WORD_BITS, protocol::CLOCK, protocol::MODE);

    let (bus, peripheral) = loopback::link(1);
    let mut sensor = Master::<_, READINGS>::new(bus)
        .with_timeout(Duration::from_millis(10));

    let sensing = async {
        let start = Instant::now();
        for tick in 0 .. 1000u16 {
            let mut readings = [0; READINGS];
            for (axis, reading) in readings.iter_mut().enumerate() {
                *reading = tick.wrapping_mul(7).wrapping_add(axis as u16) % 0x8000;
            }
            if let Err(error) = sensor.send(&readings).await {
                error!("sensor frame {} lost: {}", tick, error);
            }
        }
        println!("sent 1000 frames in {:?}", start.elapsed());
    };
    let controlling = async {
        let mut seen = CONTROL.frames();
        // the sensor side ends the demo, unless every frame arrived
        while seen != 1000 {
            if let Some(frame) = CONTROL.poll(seen) {
                seen = frame.frame;
                debug!("control received frame {} from slot {}: {:?}", frame.frame, frame.slot, frame.words);
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    };
    let serving = async {
        peripheral.run(&CONTROL).await;
    };
    (sensing, controlling, serving).race().await;

    println!("control unit got {} frames, {} losses, latest {:?}",
        CONTROL.frames(),
        CONTROL.losses(),
        CONTROL.latest().map(|frame| frame.words),
        );
}
