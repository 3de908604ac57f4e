//! Status LED blink patterns.
//!
//! State transitions queue a pattern; a separate blink task plays them
//! against the LED pin so the control task never waits on the LED. The
//! queue holds three patterns and the producer drops on overflow.

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::OutputPin;
use heapless::spsc::{Consumer, Producer, Queue};

/// One blink pattern: `blinks` pulses of `on_ms` + `off_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blink {
    /// Number of pulses.
    pub blinks: u8,
    /// LED-on time per pulse, ms.
    pub on_ms: u32,
    /// LED-off time per pulse, ms.
    pub off_ms: u32,
}

impl Blink {
    /// A pattern of `blinks` pulses.
    pub fn new(blinks: u8, on_ms: u32, off_ms: u32) -> Blink {
        Blink {
            blinks,
            on_ms,
            off_ms,
        }
    }
}

// Queue depth 3; heapless spsc keeps one slot unused.
type Backing = Queue<Blink, 4>;

/// Storage for the pattern queue; owned by the embedder so the two ends can
/// live on different tasks.
pub struct BlinkQueue(Backing);

impl Default for BlinkQueue {
    fn default() -> BlinkQueue {
        BlinkQueue::new()
    }
}

impl BlinkQueue {
    /// An empty queue.
    pub fn new() -> BlinkQueue {
        BlinkQueue(Queue::new())
    }

    /// Splits into the controller's sender and the blink task's receiver.
    pub fn split(&mut self) -> (BlinkSender<'_>, BlinkReceiver<'_>) {
        let (producer, consumer) = self.0.split();
        (BlinkSender(producer), BlinkReceiver(consumer))
    }
}

/// Producing end; never blocks, drops patterns when the queue is full.
pub struct BlinkSender<'a>(Producer<'a, Blink, 4>);

impl<'a> BlinkSender<'a> {
    /// Queues a pattern, silently dropping it on overflow.
    pub fn send(&mut self, blink: Blink) {
        let _ = self.0.enqueue(blink);
    }
}

/// Consuming end, for [`BlinkTask`] or a custom LED driver.
pub struct BlinkReceiver<'a>(Consumer<'a, Blink, 4>);

impl<'a> BlinkReceiver<'a> {
    /// Next queued pattern, if any.
    pub fn recv(&mut self) -> Option<Blink> {
        self.0.dequeue()
    }
}

/// Plays queued patterns on an LED pin.
pub struct BlinkTask<'a, LED, DELAY> {
    receiver: BlinkReceiver<'a>,
    led: LED,
    delay: DELAY,
}

impl<'a, LED, DELAY> BlinkTask<'a, LED, DELAY>
where
    LED: OutputPin,
    DELAY: DelayMs<u32>,
{
    /// Binds the receiver to an LED pin and a delay source.
    pub fn new(receiver: BlinkReceiver<'a>, led: LED, delay: DELAY) -> Self {
        BlinkTask {
            receiver,
            led,
            delay,
        }
    }

    /// Plays every queued pattern; call from the blink task's loop.
    pub fn poll(&mut self) {
        while let Some(blink) = self.receiver.recv() {
            for _ in 0..blink.blinks {
                self.led.set_high().ok();
                self.delay.delay_ms(blink.on_ms);
                self.led.set_low().ok();
                self.delay.delay_ms(blink.off_ms);
            }
        }
    }
}
