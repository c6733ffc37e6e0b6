use std::time::Duration;
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::device::types::Handle;
use crate::sim::peripheral::SimTransport;

/// Build a 34 byte status frame whose readings drift with `tick`.
pub fn status_frame(tick: u16) -> Vec<u8> {
    let mut frame = vec![2, 0];
    let wave = tick % 50;

    let mut push = |value: u16| frame.extend_from_slice(&value.to_be_bytes());
    for i in 0..4 { push(200 + wave + i * 10); } // temperature
    for i in 0..6 { push(1000 + wave * 4 + i); } // pressure
    for i in 0..2 { push(50 + i * 25); } // level
    for i in 0..4 { push(wave * 2 + i); } // flow rate

    frame
}

pub fn status_feed_task(cancel: CancellationToken, transport: SimTransport, handle: Handle, interval: Duration) -> JoinHandle<()> {
    spawn(async move {
        let mut tick: u16 = 0;

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                _ = sleep(interval) => {
                    transport.notify_handle(handle, status_frame(tick));
                    tick = tick.wrapping_add(1);
                },
            }
        }
    })
}
