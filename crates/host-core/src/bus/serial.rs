use std::collections::VecDeque;
use std::io::Write;
use std::ops::RangeInclusive;

use super::{BusError, Peripheral};

/// Serial data port.
pub const SERIAL_PORT: u32 = 0x0000_0000;

enum Sink {
    Buffer(Vec<u8>),
    Writer(Box<dyn Write>),
}

/// Byte-wide serial line: guest output goes to a host sink, guest input is
/// drained from a host-filled queue.
pub struct Serial {
    sink: Sink,
    input: VecDeque<u8>,
}

impl std::fmt::Debug for Serial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sink = match &self.sink {
            Sink::Buffer(bytes) => format!("buffer({} bytes)", bytes.len()),
            Sink::Writer(_) => "writer".to_string(),
        };
        f.debug_struct("Serial")
            .field("sink", &sink)
            .field("pending_input", &self.input.len())
            .finish()
    }
}

impl Serial {
    /// Serial line that writes guest output to `writer`.
    #[must_use]
    pub fn with_writer(writer: Box<dyn Write>) -> Self {
        Self {
            sink: Sink::Writer(writer),
            input: VecDeque::new(),
        }
    }

    /// Serial line that keeps guest output in memory.
    #[must_use]
    pub const fn buffered() -> Self {
        Self {
            sink: Sink::Buffer(Vec::new()),
            input: VecDeque::new(),
        }
    }

    /// Output captured by a [`Serial::buffered`] line; empty for writer sinks.
    #[must_use]
    pub fn captured(&self) -> &[u8] {
        match &self.sink {
            Sink::Buffer(bytes) => bytes.as_slice(),
            Sink::Writer(_) => &[],
        }
    }

    /// Drains the captured output, leaving the buffer empty.
    pub fn take_captured(&mut self) -> Vec<u8> {
        match &mut self.sink {
            Sink::Buffer(bytes) => std::mem::take(bytes),
            Sink::Writer(_) => Vec::new(),
        }
    }

    /// Queues bytes for the guest to read.
    pub fn push_input(&mut self, bytes: &[u8]) {
        self.input.extend(bytes);
    }
}

impl Peripheral for Serial {
    fn ports(&self) -> RangeInclusive<u32> {
        SERIAL_PORT..=SERIAL_PORT
    }

    fn read(&mut self, _offset: u32) -> Result<u32, BusError> {
        Ok(self.input.pop_front().map_or(0, u32::from))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write(&mut self, _offset: u32, value: u32) -> Result<(), BusError> {
        let byte = value as u8;
        match &mut self.sink {
            Sink::Buffer(bytes) => {
                bytes.push(byte);
                Ok(())
            }
            Sink::Writer(writer) => writer
                .write_all(&[byte])
                .and_then(|()| writer.flush())
                .map_err(|error| BusError::WriteFailed {
                    port: SERIAL_PORT,
                    value,
                    reason: error.to_string(),
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Serial;
    use crate::bus::Peripheral;

    #[test]
    fn input_queue_drains_in_order_then_reads_zero() {
        let mut serial = Serial::buffered();
        serial.push_input(b"hi");
        assert_eq!(serial.read(0), Ok(u32::from(b'h')));
        assert_eq!(serial.read(0), Ok(u32::from(b'i')));
        assert_eq!(serial.read(0), Ok(0));
    }

    #[test]
    fn writes_keep_only_the_low_byte() {
        let mut serial = Serial::buffered();
        serial.write(0, 0x1234_5641).expect("buffer sink");
        assert_eq!(serial.captured(), b"A");
    }

    #[test]
    fn take_captured_empties_the_buffer() {
        let mut serial = Serial::buffered();
        for byte in b"ok" {
            serial.write(0, u32::from(*byte)).expect("buffer sink");
        }

        assert_eq!(serial.take_captured(), b"ok");
        assert!(serial.captured().is_empty());
        serial.write(0, u32::from(b'!')).expect("buffer sink");
        assert_eq!(serial.take_captured(), b"!");
    }
}
