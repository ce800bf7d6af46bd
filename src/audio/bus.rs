//! Mix bus - sums every active stream into one hardware output
//!
//! The bus is split in two halves:
//! - `MixBusHandle` lives on the control side. It queues commands
//!   (add a stream, clear everything) into a lock-free ring buffer.
//! - `MixBus` is moved into the audio callback. At the start of every
//!   `read` it drains the command queue, then mixes.
//!
//! The callback never blocks and never allocates: stream slots are
//! reserved up front and the command queue is fixed size.
//!
//! ## Drain notification
//!
//! Each transition from "at least one stream" to "no streams" sends one
//! message on the drain channel. Reads with nothing playing produce
//! silence and send nothing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::Sender;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::stream::ActiveStream;
use super::AudioError;

/// Maximum number of simultaneously playing streams per bus
pub const MAX_STREAMS: usize = 64;

/// Capacity of the control -> callback command queue
const COMMAND_QUEUE_SIZE: usize = 128;

/// Sample layout the bus produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for BusFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
        }
    }
}

enum BusCommand {
    Add(ActiveStream),
    Clear,
    /// Clear and add in one step, so the bus never goes idle in between
    Replace(ActiveStream),
}

/// Create a connected handle/bus pair
///
/// # Arguments
/// * `format` - Layout of the samples `read` produces
/// * `drained` - Receives one `()` per transition to idle
pub fn mix_bus(format: BusFormat, drained: Sender<()>) -> (MixBusHandle, MixBus) {
    let (producer, consumer) = HeapRb::<BusCommand>::new(COMMAND_QUEUE_SIZE).split();
    let active = Arc::new(AtomicUsize::new(0));

    let handle = MixBusHandle {
        commands: Mutex::new(producer),
        format,
        active: Arc::clone(&active),
    };
    let bus = MixBus {
        commands: consumer,
        streams: Vec::with_capacity(MAX_STREAMS),
        format,
        drained,
        active,
    };
    (handle, bus)
}

/// Control-side handle for a mix bus
pub struct MixBusHandle {
    commands: Mutex<HeapProd<BusCommand>>,
    format: BusFormat,
    active: Arc<AtomicUsize>,
}

impl MixBusHandle {
    pub fn format(&self) -> BusFormat {
        self.format
    }

    /// Streams alive as of the last callback
    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Queue a stream to start on the next pull
    pub fn add_stream(&self, stream: ActiveStream) -> Result<(), AudioError> {
        if self.active_streams() >= MAX_STREAMS {
            return Err(AudioError::Stream(format!(
                "mix bus is full ({} streams)",
                MAX_STREAMS
            )));
        }
        self.push(BusCommand::Add(stream))
    }

    /// Drop every stream on the next pull
    pub fn remove_all_streams(&self) -> Result<(), AudioError> {
        self.push(BusCommand::Clear)
    }

    /// Drop every stream and start `stream` on the same pull
    ///
    /// No drain notification is sent for the streams it cuts.
    pub fn replace_streams(&self, stream: ActiveStream) -> Result<(), AudioError> {
        self.push(BusCommand::Replace(stream))
    }

    fn push(&self, command: BusCommand) -> Result<(), AudioError> {
        let mut producer = self.commands.lock().unwrap_or_else(PoisonError::into_inner);
        producer
            .try_push(command)
            .map_err(|_| AudioError::Stream("mix bus command queue is full".to_string()))
    }
}

/// Callback-side half of the mix bus
pub struct MixBus {
    commands: HeapCons<BusCommand>,
    streams: Vec<ActiveStream>,
    format: BusFormat,
    drained: Sender<()>,
    active: Arc<AtomicUsize>,
}

impl MixBus {
    /// Fill `out` with the next interleaved block
    ///
    /// Always fills the whole buffer; silence when nothing is playing.
    pub fn read(&mut self, out: &mut [f32]) {
        out.fill(0.0);

        let was_active = !self.streams.is_empty();
        self.apply_commands();
        if was_active && self.streams.is_empty() {
            self.notify_drained();
        }

        if !self.streams.is_empty() {
            let frames = out.len() / self.format.channels.max(1) as usize;
            self.streams
                .retain_mut(|stream| stream.mix_into(out) == frames && !stream.is_finished());
            if self.streams.is_empty() {
                self.notify_drained();
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.active.store(self.streams.len(), Ordering::Relaxed);
    }

    fn apply_commands(&mut self) {
        while let Some(command) = self.commands.try_pop() {
            match command {
                BusCommand::Add(stream) => {
                    if self.streams.len() < MAX_STREAMS {
                        self.streams.push(stream);
                    }
                }
                BusCommand::Clear => self.streams.clear(),
                BusCommand::Replace(stream) => {
                    self.streams.clear();
                    self.streams.push(stream);
                }
            }
        }
    }

    fn notify_drained(&self) {
        // A full channel means a notification is already pending
        let _ = self.drained.try_send(());
    }
}
