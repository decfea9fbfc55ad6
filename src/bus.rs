//! Interfaces to the collaborators the driver does not implement itself:
//! the two-wire bus carrying EEPROM transactions, and an optional GPIO
//! controller driving the write-protect line.

/// Payload bytes a single bus transfer can carry when the transport does not
/// say otherwise. Common small-MCU bus buffers hold 32 bytes, two of which
/// are taken by the memory address.
pub const DEFAULT_MAX_TRANSFER: usize = 30;

/// Non-zero status code reported by the bus transport.
///
/// The value is opaque to this crate and is passed through to callers
/// without reinterpretation.
#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
#[error("Bus transaction failed with status {0}.")]
pub struct TransportError(pub u8);

impl TransportError {
    /// Data too long to fit in the transport's buffer.
    pub const DATA_TOO_LONG: TransportError = TransportError(1);
    /// Device did not acknowledge its address.
    pub const ADDRESS_NACK: TransportError = TransportError(2);
    /// Device did not acknowledge a data byte.
    pub const DATA_NACK: TransportError = TransportError(3);
}

/// Trait for objects which provide access to a two-wire bus.
///
/// Each call is one complete addressed transaction: the transport issues a
/// start condition, the device address, transfers the bytes and then either
/// a stop condition or, if `hold` is set, keeps the bus for a repeated start.
pub trait BusTransport {
    /// Address the device at `address` and write all of `data`.
    ///
    /// An empty `data` is a bare address probe; it succeeds iff the device
    /// acknowledges.
    fn transmit(&mut self, address: u8, data: &[u8], hold: bool)
        -> std::result::Result<(), TransportError>;

    /// Address the device at `address` for reading and fill `buffer`.
    ///
    /// Returns the number of bytes actually received, which may be fewer
    /// than `buffer.len()` (zero if the device did not respond).
    fn receive(&mut self, address: u8, buffer: &mut [u8]) -> usize;

    /// Maximum number of payload bytes in a single transaction.
    fn max_transfer(&self) -> usize {
        DEFAULT_MAX_TRANSFER
    }

    /// Zero-length transaction to `address`, checking for an acknowledge.
    fn ping(&mut self, address: u8) -> std::result::Result<(), TransportError> {
        self.transmit(address, &[], false)
    }
}

/// Trait for objects which can drive a GPIO output line.
pub trait LineControl {
    /// Drive `line` high (`true`) or low (`false`).
    fn set_line(&mut self, line: u32, high: bool) -> anyhow::Result<()>;
}

/// A write-protect line: the GPIO controller and the line it drives.
///
/// The EEPROM ignores writes while the line is high.
pub struct WriteProtect {
    control: Box<dyn LineControl>,
    line: u32,
}

impl WriteProtect {
    pub fn new(control: Box<dyn LineControl>, line: u32) -> Self {
        WriteProtect { control, line }
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    /// Drive the line low, allowing writes.
    pub fn release(&mut self) -> anyhow::Result<()> {
        log::trace!("Releasing write-protect line {}", self.line);
        self.control.set_line(self.line, false)
    }

    /// Drive the line high, blocking writes.
    pub fn assert(&mut self) -> anyhow::Result<()> {
        log::trace!("Asserting write-protect line {}", self.line);
        self.control.set_line(self.line, true)
    }
}

impl std::fmt::Debug for WriteProtect {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("WriteProtect").field("line", &self.line).finish()
    }
}
