use std::thread;
use std::time::Instant;
use num_enum::IntoPrimitive;

use crate::address::{translate, AddressMode, Region, ID_PAGE_OFFSET, ONE_WORD_LIMIT};
use crate::bus::{BusTransport, TransportError, WriteProtect};
use crate::gate::WriteCycleGate;
use crate::plan::ChunkPlan;
use crate::update::UpdatePolicy;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Write would cross the end of the identification page.")]
    PageBoundaryOverflow,
    #[error("Address out of range for memory.")]
    OutOfRange,
    #[error("Device returned {actual} of {expected} requested bytes.")]
    ShortRead { expected: usize, actual: usize },
    #[error("Identification page locking is not enabled.")]
    LockNotPermitted,
    #[error("Device has no identification page.")]
    NoIdPage,
    #[error("Device did not respond.")]
    NotConnected,
    #[error("Bus error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Access(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Numeric status codes for errors raised by the driver itself.
///
/// Transport errors keep the code the bus reported.
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum StatusCode {
    PageBoundaryOverflow = 11,
    OutOfRange = 12,
    LockNotPermitted = 13,
    Other = 0xFF,
}

impl Error {
    /// The numeric status for this error; never 0.
    pub fn status(&self) -> u8 {
        match self {
            Error::Transport(e) => e.0,
            Error::PageBoundaryOverflow => StatusCode::PageBoundaryOverflow.into(),
            Error::OutOfRange => StatusCode::OutOfRange.into(),
            Error::LockNotPermitted => StatusCode::LockNotPermitted.into(),
            _ => StatusCode::Other.into(),
        }
    }
}

/// Outcome of `Eeprom::determine_size_no_write`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SizeProbe {
    /// Capacity in bytes.
    Detected(u32),
    /// Device absent, or no difference found at any probe offset.
    Undetermined,
    /// The first bytes only hold erased values (0x00/0xFF).
    /// Write some other data there first.
    DefaultContent,
    /// The first bytes are all the same non-default value.
    UniformContent,
}

impl SizeProbe {
    /// Legacy numeric result: the size, or 0, 1, 2 for the other outcomes.
    pub fn code(&self) -> u32 {
        match self {
            SizeProbe::Detected(size) => *size,
            SizeProbe::Undetermined => 0,
            SizeProbe::DefaultContent => 1,
            SizeProbe::UniformContent => 2,
        }
    }
}

/// Capacity assumed when none is given.
pub const DEFAULT_DEVICE_SIZE: u32 = 32768;
pub const MIN_DEVICE_SIZE: u32 = 128;
pub const MAX_DEVICE_SIZE: u32 = 65536;

/// Bytes compared at each offset by `determine_size_no_write`.
const PROBE_LEN: usize = 32;
const NO_WRITE_MAX_PROBE: u32 = 32768;
const NO_WRITE_MIN_PROBE: u32 = 64;
const FOLD_PATTERNS: [u8; 2] = [0x55, 0xAA];

/// Identification page address and data which set its permanent lock.
const ID_PAGE_LOCK_ADDRESS: u32 = 0x400;
const ID_PAGE_LOCK_BYTE: u8 = 0b0000_0010;

/// Page size in bytes for a device of `capacity` bytes, from M24xx datasheets.
///
/// The identification page, where present, has the same size.
pub fn page_size_for(capacity: u32) -> usize {
    if capacity <= 2048 {
        16
    } else if capacity <= 8192 {
        32
    } else if capacity <= 32768 {
        64
    } else {
        128
    }
}

/// Source of the bytes written by a chunked write.
#[derive(Copy, Clone)]
enum Source<'d> {
    Data(&'d [u8]),
    Fill(u8, usize),
}

impl<'d> Source<'d> {
    fn len(&self) -> usize {
        match self {
            Source::Data(data) => data.len(),
            Source::Fill(_, length) => *length,
        }
    }
}

/// I2C EEPROM.
///
/// This struct provides byte and block access to 24-series EEPROMs,
/// taking care of page boundaries, transfer limits and write cycle time.
pub struct Eeprom<'a, B: BusTransport> {
    bus: &'a mut B,

    /// Bus address of the main memory array.
    address: u8,

    /// Bus address of the identification page, for devices which have one.
    id_page_address: Option<u8>,

    /// Main array size in bytes, always a power of two.
    capacity: u32,

    /// Internal write page size in bytes.
    page_size: usize,

    /// Number of address bytes, derived from `capacity`.
    address_mode: AddressMode,

    gate: WriteCycleGate,

    write_protect: Option<WriteProtect>,
    auto_write_protect: bool,

    update_policy: UpdatePolicy,
}

impl<'a, B: BusTransport> Eeprom<'a, B> {
    /// Create a new Eeprom at bus address `address` using the given transport.
    ///
    /// `capacity` is forced to a power of two between 128 and 65536 bytes;
    /// the page size and addressing mode are derived from it.
    pub fn new(bus: &'a mut B, address: u8, capacity: u32, has_id_page: bool) -> Self {
        let mut eeprom = Eeprom {
            bus,
            address,
            id_page_address: if has_id_page {
                Some(address.wrapping_add(ID_PAGE_OFFSET))
            } else {
                None
            },
            capacity: MIN_DEVICE_SIZE,
            page_size: page_size_for(MIN_DEVICE_SIZE),
            address_mode: AddressMode::OneWord,
            gate: WriteCycleGate::new(),
            write_protect: None,
            auto_write_protect: false,
            update_policy: UpdatePolicy::default(),
        };
        eeprom.set_device_size(capacity);
        eeprom
    }

    /// Create a new Eeprom of the default 32kB size, without identification page.
    pub fn with_default_size(bus: &'a mut B, address: u8) -> Self {
        Self::new(bus, address, DEFAULT_DEVICE_SIZE, false)
    }

    /// Prepare the device for use and check whether it responds.
    ///
    /// If a write-protect line is given, automatic write protection is
    /// enabled and the line is driven to its protecting level.
    pub fn begin(&mut self, write_protect: Option<WriteProtect>) -> Result<bool> {
        self.gate.reset();
        if let Some(wp) = write_protect {
            log::debug!("Using write-protect line {}", wp.line());
            self.write_protect = Some(wp);
            self.auto_write_protect = true;
            self.prevent_write()?;
        }
        Ok(self.is_connected(Region::Main))
    }

    /// Check whether the device acknowledges the bus address of `region`.
    pub fn is_connected(&mut self, region: Region) -> bool {
        match self.region_base(region) {
            Ok(base) => self.bus.ping(base).is_ok(),
            Err(_) => false,
        }
    }

    /// Get the transport.
    pub fn transport(&self) -> &B {
        &*self.bus
    }

    /// Get the transport mutably.
    pub fn transport_mut(&mut self) -> &mut B {
        &mut *self.bus
    }

    /// Get the bus address of the main memory array.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Get the bus address of the identification page, if present.
    pub fn id_page_address(&self) -> Option<u8> {
        self.id_page_address
    }

    pub fn has_id_page(&self) -> bool {
        self.id_page_address.is_some()
    }

    /// Get the main array size in bytes.
    pub fn device_size(&self) -> u32 {
        self.capacity
    }

    /// Override the main array size.
    ///
    /// The size is forced to the largest power of two not above `size`,
    /// within 128..=65536. The addressing mode and page size are updated
    /// to match. Returns the size set.
    pub fn set_device_size(&mut self, size: u32) -> u32 {
        let mut capacity = MIN_DEVICE_SIZE;
        while capacity < MAX_DEVICE_SIZE && capacity * 2 <= size {
            capacity *= 2;
        }
        self.capacity = capacity;
        self.address_mode = AddressMode::for_capacity(capacity);
        self.page_size = page_size_for(capacity);
        log::debug!("Device size {} bytes, page size {} bytes, {:?} addressing",
                    self.capacity, self.page_size, self.address_mode);
        capacity
    }

    /// Get the write page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Override the write page size.
    ///
    /// The size is forced down to one of 16, 32, 64 or 128 bytes.
    /// Returns the size set.
    pub fn set_page_size(&mut self, size: usize) -> usize {
        self.page_size = match size {
            s if s >= 128 => 128,
            s if s >= 64 => 64,
            s if s >= 32 => 32,
            _ => 16,
        };
        self.page_size
    }

    pub fn address_mode(&self) -> AddressMode {
        self.address_mode
    }

    /// Get the write cycle time added to the 5ms baseline, in milliseconds.
    pub fn extra_write_delay_ms(&self) -> u8 {
        self.gate.extra_delay_ms()
    }

    /// Set the write cycle time added to the 5ms baseline, in milliseconds.
    ///
    /// Some parts, such as the AT24C32, need up to 20ms.
    pub fn set_extra_write_delay_ms(&mut self, ms: u8) {
        self.gate.set_extra_delay_ms(ms);
    }

    /// Time of the most recent write transaction, if any.
    pub fn last_write(&self) -> Option<Instant> {
        self.gate.last_write()
    }

    pub fn update_policy(&self) -> UpdatePolicy {
        self.update_policy
    }

    /// Select the algorithm used by `update_block()`.
    pub fn set_update_policy(&mut self, policy: UpdatePolicy) {
        self.update_policy = policy;
    }

    pub fn has_write_protect_line(&self) -> bool {
        self.write_protect.is_some()
    }

    /// Release the write-protect line, if configured.
    pub fn allow_write(&mut self) -> Result<()> {
        if let Some(wp) = self.write_protect.as_mut() {
            wp.release()?;
        }
        Ok(())
    }

    /// Assert the write-protect line, if configured.
    pub fn prevent_write(&mut self) -> Result<()> {
        if let Some(wp) = self.write_protect.as_mut() {
            wp.assert()?;
        }
        Ok(())
    }

    /// Enable or disable releasing the write-protect line around each write.
    ///
    /// Has no effect unless a write-protect line was given to `begin()`.
    pub fn set_auto_write_protect(&mut self, enabled: bool) {
        if self.has_write_protect_line() {
            self.auto_write_protect = enabled;
        }
    }

    pub fn auto_write_protect(&self) -> bool {
        self.auto_write_protect
    }

    /// Write a single byte to `address`.
    pub fn write_byte(&mut self, region: Region, address: u32, value: u8) -> Result<()> {
        self.write_block(region, address, &[value])
    }

    /// Write `data` starting at `address`.
    ///
    /// The data is split into as many transactions as needed so that none
    /// crosses a page boundary or exceeds the transport's transfer limit.
    /// Stops at the first failing transaction.
    pub fn write_block(&mut self, region: Region, address: u32, data: &[u8]) -> Result<()> {
        self.write_block_cb(region, address, data, |_| {})
    }

    /// Write `data` starting at `address`.
    ///
    /// Calls `cb` with the number of bytes written so far after each transaction.
    pub fn write_block_cb<F: Fn(usize)>(&mut self, region: Region, address: u32, data: &[u8],
                                        cb: F) -> Result<()>
    {
        self.page_write(region, address, Source::Data(data), cb)
    }

    /// Set `length` bytes starting at `address` to `value`.
    pub fn set_block(&mut self, region: Region, address: u32, value: u8, length: usize)
        -> Result<()>
    {
        self.page_write(region, address, Source::Fill(value, length), |_| {})
    }

    /// Read a single byte from `address`.
    pub fn read_byte(&mut self, region: Region, address: u32) -> Result<u8> {
        let mut data = [0u8; 1];
        match self.read_block(region, address, &mut data)? {
            1 => Ok(data[0]),
            actual => Err(Error::ShortRead { expected: 1, actual }),
        }
    }

    /// Read `buffer.len()` bytes starting at `address` into `buffer`.
    ///
    /// Returns the number of bytes the device delivered, which is less than
    /// requested if any transaction came back short.
    pub fn read_block(&mut self, region: Region, address: u32, buffer: &mut [u8])
        -> Result<usize>
    {
        self.read_block_cb(region, address, buffer, |_| {})
    }

    /// Read `buffer.len()` bytes starting at `address` into `buffer`.
    ///
    /// Calls `cb` with the number of bytes read so far after each transaction.
    pub fn read_block_cb<F: Fn(usize)>(&mut self, region: Region, address: u32,
                                       buffer: &mut [u8], cb: F) -> Result<usize>
    {
        log::debug!("Reading {} bytes from {:?} 0x{:04X}", buffer.len(), region, address);
        let base = self.region_base(region)?;
        self.check_range(region, address, buffer.len(), false)?;
        let plan = ChunkPlan::read(address, buffer.len(), self.max_transfer());
        let mode = self.address_mode;
        let mut total = 0;
        cb(total);
        for &(addr, size) in plan.chunks() {
            let offset = (addr - address) as usize;
            let n = self.read_transaction(base, addr, &mut buffer[offset..offset + size], mode)?;
            if n < size {
                log::warn!("Short read at 0x{:04X}: {} of {} bytes", addr, n, size);
            }
            total += n;
            cb(total);
        }
        Ok(total)
    }

    /// Compare the device content starting at `address` with `data`.
    ///
    /// Returns `Ok(false)` at the first differing transaction.
    pub fn verify_block(&mut self, region: Region, address: u32, data: &[u8]) -> Result<bool> {
        log::debug!("Verifying {} bytes at {:?} 0x{:04X}", data.len(), region, address);
        let base = self.region_base(region)?;
        self.check_range(region, address, data.len(), false)?;
        let plan = ChunkPlan::read(address, data.len(), self.max_transfer());
        let mode = self.address_mode;
        let mut readback = vec![0u8; self.max_transfer()];
        for &(addr, size) in plan.chunks() {
            let offset = (addr - address) as usize;
            let n = self.read_transaction(base, addr, &mut readback[..size], mode)?;
            if n != size || readback[..size] != data[offset..offset + size] {
                log::warn!("Verification failed in {} bytes at 0x{:04X}", size, addr);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Write `value` to `address` only if it differs from the stored byte.
    pub fn update_byte(&mut self, region: Region, address: u32, value: u8) -> Result<()> {
        if self.read_byte(region, address)? == value {
            return Ok(());
        }
        self.write_byte(region, address, value)
    }

    /// Write only the parts of `data` which differ from the device content.
    ///
    /// The stored range is read first and compared according to the
    /// current `UpdatePolicy`. Returns the number of bytes written; see
    /// `UpdatePolicy` for how each policy counts them.
    pub fn update_block(&mut self, region: Region, address: u32, data: &[u8]) -> Result<usize> {
        self.region_base(region)?;
        self.check_range(region, address, data.len(), true)?;

        let mut stored = vec![0u8; data.len()];
        let n = self.read_block(region, address, &mut stored)?;
        if n != data.len() {
            return Err(Error::ShortRead { expected: data.len(), actual: n });
        }

        let runs = self.update_policy.runs(&stored, data, self.max_transfer());
        log::debug!("Updating {} bytes at 0x{:04X} with {} write runs ({:?})",
                    data.len(), address, runs.len(), self.update_policy);

        let mut written = 0;
        for run in runs {
            self.write_block(region, address + run.start as u32, &data[run.clone()])?;
            written += run.len();
        }
        Ok(written)
    }

    /// Write a byte, then read it back.
    ///
    /// Returns false if either the write failed or the readback differs.
    pub fn write_byte_verify(&mut self, region: Region, address: u32, value: u8) -> bool {
        let result = self.write_byte(region, address, value)
            .and_then(|_| self.read_byte(region, address))
            .map(|stored| stored == value);
        verified(result)
    }

    /// Write a block, then verify it.
    pub fn write_block_verify(&mut self, region: Region, address: u32, data: &[u8]) -> bool {
        let result = self.write_block(region, address, data)
            .and_then(|_| self.verify_block(region, address, data));
        verified(result)
    }

    /// Set a block to `value`, then verify it.
    pub fn set_block_verify(&mut self, region: Region, address: u32, value: u8, length: usize)
        -> bool
    {
        let result = self.set_block(region, address, value, length)
            .and_then(|_| self.verify_block(region, address, &vec![value; length]));
        verified(result)
    }

    /// Update a byte, then read it back.
    pub fn update_byte_verify(&mut self, region: Region, address: u32, value: u8) -> bool {
        let result = self.update_byte(region, address, value)
            .and_then(|_| self.read_byte(region, address))
            .map(|stored| stored == value);
        verified(result)
    }

    /// Update a block, then verify it.
    pub fn update_block_verify(&mut self, region: Region, address: u32, data: &[u8]) -> bool {
        let result = self.update_block(region, address, data)
            .and_then(|_| self.verify_block(region, address, data));
        verified(result)
    }

    /// Detect the main array size by writing test patterns.
    ///
    /// For each candidate size from 128 to 65536 bytes, two patterns are
    /// written at the candidate address; if both show up at address 0 the
    /// device has folded the address and the candidate is the capacity.
    /// The byte at each candidate address is restored afterwards.
    ///
    /// Returns 0 if the device does not respond or no fold was found.
    /// The configured size is not changed; use `set_device_size()`.
    pub fn determine_size(&mut self) -> Result<u32> {
        if !self.is_connected(Region::Main) {
            log::warn!("No device found at 0x{:02X}", self.address);
            return Ok(0);
        }

        let mut size = MIN_DEVICE_SIZE;
        while size <= MAX_DEVICE_SIZE {
            let mode = AddressMode::for_capacity(size);
            let saved = self.probe_read_byte(size, mode)?;

            let mut folded = true;
            for &pattern in FOLD_PATTERNS.iter() {
                self.probe_write_byte(size, pattern, mode)?;
                folded &= self.probe_read_byte(0, mode)? == Some(pattern);
            }

            if let Some(value) = saved {
                self.probe_write_byte(size, value, mode)?;
            }
            log::debug!("Candidate size {}: folded={}", size, folded);

            if folded {
                return Ok(size);
            }
            size *= 2;
        }
        Ok(0)
    }

    /// Detect the main array size without writing to the device.
    ///
    /// The first 32 bytes are compared with 32 bytes read at descending
    /// power-of-two offsets from 32768 down to 64. Offsets beyond the
    /// capacity fold back to address 0, so the first offset that reads
    /// differently lies inside the device, which is then twice that size.
    ///
    /// The first bytes must not be erased or uniform for this to work; those
    /// cases are reported rather than guessed.
    pub fn determine_size_no_write(&mut self) -> Result<SizeProbe> {
        if !self.is_connected(Region::Main) {
            log::warn!("No device found at 0x{:02X}", self.address);
            return Ok(SizeProbe::Undetermined);
        }

        // Two address bytes for the reference read, so large devices are
        // read from address 0 even if the configured size is too small.
        let mut first = [0u8; PROBE_LEN];
        if self.probe_read(0, &mut first, AddressMode::TwoWord)? != PROBE_LEN {
            return Ok(SizeProbe::Undetermined);
        }
        if first.iter().all(|&b| b == 0x00 || b == 0xFF) {
            log::warn!("First {} bytes hold default values, cannot determine size", PROBE_LEN);
            return Ok(SizeProbe::DefaultContent);
        }
        if first.iter().all(|&b| b == first[0]) {
            log::warn!("First {} bytes are all 0x{:02X}, cannot determine size",
                       PROBE_LEN, first[0]);
            return Ok(SizeProbe::UniformContent);
        }

        let mut data = [0u8; PROBE_LEN];
        let mut size = NO_WRITE_MAX_PROBE;
        while size >= NO_WRITE_MIN_PROBE {
            let mode = if size >= ONE_WORD_LIMIT {
                AddressMode::TwoWord
            } else {
                AddressMode::OneWord
            };
            let n = self.probe_read(size, &mut data, mode)?;
            log::trace!("Offset {}: read {} bytes, match={}", size, n, data == first);
            if n == PROBE_LEN && data != first {
                return Ok(SizeProbe::Detected(size * 2));
            }
            size /= 2;
        }
        Ok(SizeProbe::Undetermined)
    }

    /// Permanently lock the identification page.
    ///
    /// This cannot be undone. Unless the crate is built with both the
    /// `idpage-lock` and `idpage-lock-irreversible` features, returns
    /// `LockNotPermitted` without accessing the device.
    pub fn lock_id_page(&mut self) -> Result<()> {
        if !cfg!(all(feature = "idpage-lock", feature = "idpage-lock-irreversible")) {
            log::warn!("Identification page locking is disabled in this build.");
            return Err(Error::LockNotPermitted);
        }
        let base = self.region_base(Region::IdPage)?;
        log::warn!("Permanently locking identification page at 0x{:02X}", base);
        let mode = self.address_mode;
        self.write_transaction(base, ID_PAGE_LOCK_ADDRESS, &[ID_PAGE_LOCK_BYTE], mode)
    }

    /// Query the identification page lock.
    ///
    /// Returns the raw bus status of the query transaction; 0 means the
    /// device acknowledged it. How the status maps onto the lock state
    /// depends on the part, so it is left to the caller to interpret.
    pub fn is_id_page_locked(&mut self) -> Result<u8> {
        let base = self.region_base(Region::IdPage)?;
        self.wait_ready();
        let auto = self.auto_write_protect;
        if auto {
            self.allow_write()?;
        }
        let status = match self.bus.transmit(base, &[0x01], false) {
            Ok(()) => 0,
            Err(e) => e.0,
        };
        // Close the write frame left open by the query; its status is irrelevant.
        let _ = self.bus.ping(base);
        if auto {
            self.prevent_write()?;
        }
        log::debug!("Identification page lock query status: {}", status);
        Ok(status)
    }

    fn max_transfer(&self) -> usize {
        self.bus.max_transfer().max(1)
    }

    fn region_base(&self, region: Region) -> Result<u8> {
        match region {
            Region::Main => Ok(self.address),
            Region::IdPage => self.id_page_address.ok_or(Error::NoIdPage),
        }
    }

    fn region_size(&self, region: Region) -> u64 {
        match region {
            Region::Main => self.capacity as u64,
            Region::IdPage => self.page_size as u64,
        }
    }

    /// Checks if `address` and `length` together are permissible:
    /// * Writes to the identification page must stay within its single page.
    /// * The whole span must lie within the region.
    fn check_range(&self, region: Region, address: u32, length: usize, write: bool)
        -> Result<()>
    {
        let end = address as u64 + length as u64;
        if write && region == Region::IdPage && end > self.page_size as u64 {
            log::error!("Write of {} bytes at 0x{:04X} would cross the identification page",
                        length, address);
            Err(Error::PageBoundaryOverflow)
        } else if end > self.region_size(region) {
            log::error!("Operation of {} bytes at 0x{:04X} would exceed {:?} size {}",
                        length, address, region, self.region_size(region));
            Err(Error::OutOfRange)
        } else {
            Ok(())
        }
    }

    /// Write `source` to `address` in page- and transfer-sized transactions.
    fn page_write<F: Fn(usize)>(&mut self, region: Region, address: u32, source: Source<'_>,
                                cb: F) -> Result<()>
    {
        let length = source.len();
        log::debug!("Writing {} bytes to {:?} 0x{:04X}", length, region, address);
        let base = self.region_base(region)?;
        self.check_range(region, address, length, true)?;

        let plan = ChunkPlan::write(address, length, self.page_size, self.max_transfer());
        let filler = match source {
            Source::Fill(value, _) => vec![value; self.max_transfer()],
            Source::Data(_) => Vec::new(),
        };
        let mode = self.address_mode;
        let mut total = 0;
        cb(total);
        for &(addr, size) in plan.chunks() {
            let chunk = match source {
                Source::Data(data) => &data[total..total + size],
                Source::Fill(..) => &filler[..size],
            };
            self.write_transaction(base, addr, chunk, mode)?;
            total += size;
            cb(total);
        }
        Ok(())
    }

    /// Wait out any write cycle in progress.
    fn wait_ready(&mut self) {
        let address = self.address;
        let bus = &mut *self.bus;
        self.gate.await_ready(|| bus.ping(address).is_ok());
    }

    /// Single write transaction, with no range checking.
    fn write_transaction(&mut self, base: u8, address: u32, data: &[u8], mode: AddressMode)
        -> Result<()>
    {
        self.wait_ready();
        let (device, mut frame) = translate(base, address, mode);
        frame.extend_from_slice(data);
        log::trace!("Write to 0x{:02X}: {:02X?}", device, &frame);

        let auto = self.auto_write_protect;
        if auto {
            self.allow_write()?;
        }
        let result = self.bus.transmit(device, &frame, false);
        self.gate.mark_written();
        let reassert = if auto { self.prevent_write() } else { Ok(()) };
        thread::yield_now();

        // A bus failure takes precedence over a failure to reassert the line.
        if let Err(e) = result {
            if let Err(wp) = reassert {
                log::error!("Failed to reassert write-protect line: {}", wp);
            }
            return Err(e.into());
        }
        reassert
    }

    /// Single read transaction, with no range checking.
    fn read_transaction(&mut self, base: u8, address: u32, buffer: &mut [u8], mode: AddressMode)
        -> Result<usize>
    {
        self.wait_ready();
        let (device, frame) = translate(base, address, mode);
        self.bus.transmit(device, &frame, true)?;
        let n = self.bus.receive(device, buffer);
        log::trace!("Read from 0x{:02X} at {:02X?}: {:02X?}", device, &frame, &buffer[..n]);
        thread::yield_now();
        Ok(n)
    }

    /// Read for size probing, with no range checking.
    ///
    /// Stops at the first short or failed transaction and returns the
    /// number of bytes read until then.
    fn probe_read(&mut self, address: u32, buffer: &mut [u8], mode: AddressMode)
        -> Result<usize>
    {
        let base = self.address;
        let plan = ChunkPlan::read(address, buffer.len(), self.max_transfer());
        let mut total = 0;
        for &(addr, size) in plan.chunks() {
            let offset = (addr - address) as usize;
            match self.read_transaction(base, addr, &mut buffer[offset..offset + size], mode) {
                Ok(n) => {
                    total += n;
                    if n < size {
                        break;
                    }
                },
                Err(Error::Transport(e)) => {
                    log::trace!("Probe read at 0x{:05X} failed: {}", addr, e);
                    break;
                },
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    fn probe_read_byte(&mut self, address: u32, mode: AddressMode) -> Result<Option<u8>> {
        let mut data = [0u8; 1];
        match self.probe_read(address, &mut data, mode)? {
            1 => Ok(Some(data[0])),
            _ => Ok(None),
        }
    }

    /// Write for size probing; a failed transaction is not an error.
    fn probe_write_byte(&mut self, address: u32, value: u8, mode: AddressMode) -> Result<()> {
        let base = self.address;
        match self.write_transaction(base, address, &[value], mode) {
            Err(Error::Transport(e)) => {
                log::trace!("Probe write at 0x{:05X} failed: {}", address, e);
                Ok(())
            },
            other => other,
        }
    }
}

/// Collapse the result of a verify combinator into success or failure.
fn verified(result: Result<bool>) -> bool {
    match result {
        Ok(matched) => matched,
        Err(e) => {
            log::warn!("Operation failed before verification: {}", e);
            false
        },
    }
}

#[cfg(test)]
use std::{cell::RefCell, rc::Rc, time::Duration};
#[cfg(test)]
use crate::bus::LineControl;
#[cfg(test)]
use crate::emulator::{EmulatedEeprom, WriteRecord};

#[cfg(test)]
fn patterned(capacity: usize) -> Vec<u8> {
    (0..capacity).map(|i| (i % 61) as u8).collect()
}

#[cfg(test)]
struct RecordingLines(Rc<RefCell<Vec<(u32, bool)>>>);

#[cfg(test)]
impl LineControl for RecordingLines {
    fn set_line(&mut self, line: u32, high: bool) -> anyhow::Result<()> {
        self.0.borrow_mut().push((line, high));
        Ok(())
    }
}

/// Line controller which can be made to fail when driving its line high.
#[cfg(test)]
struct StuckLines(Rc<std::cell::Cell<bool>>);

#[cfg(test)]
impl LineControl for StuckLines {
    fn set_line(&mut self, line: u32, high: bool) -> anyhow::Result<()> {
        if high && self.0.get() {
            anyhow::bail!("line {} stuck low", line);
        }
        Ok(())
    }
}

/// Transport which acknowledges everything and logs each transmit.
#[cfg(test)]
#[derive(Default)]
struct TransactionLog(Vec<(u8, Vec<u8>, bool)>);

#[cfg(test)]
impl BusTransport for TransactionLog {
    fn transmit(&mut self, address: u8, data: &[u8], hold: bool)
        -> std::result::Result<(), TransportError>
    {
        self.0.push((address, data.to_vec(), hold));
        Ok(())
    }

    fn receive(&mut self, _address: u8, buffer: &mut [u8]) -> usize {
        buffer.len()
    }
}

#[test]
fn test_defaults() {
    let mut emu = EmulatedEeprom::new(0x50, 32768);
    let eeprom = Eeprom::with_default_size(&mut emu, 0x50);
    assert_eq!(eeprom.device_size(), 32768);
    assert_eq!(eeprom.page_size(), 64);
    assert_eq!(eeprom.address_mode(), AddressMode::TwoWord);
    assert_eq!(eeprom.extra_write_delay_ms(), 0);
    assert_eq!(eeprom.update_policy(), UpdatePolicy::DiffRuns);
    assert!(!eeprom.has_id_page());
    assert!(!eeprom.has_write_protect_line());
    assert!(!eeprom.auto_write_protect());
    assert!(eeprom.last_write().is_none());
}

#[test]
fn test_set_device_size() {
    let mut emu = EmulatedEeprom::new(0x50, 2048);
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 2048, true);
    assert_eq!(eeprom.address_mode(), AddressMode::OneWord);
    assert_eq!(eeprom.page_size(), 16);
    assert_eq!(eeprom.id_page_address(), Some(0x58));

    assert_eq!(eeprom.set_device_size(5000), 4096);
    assert_eq!(eeprom.address_mode(), AddressMode::TwoWord);
    assert_eq!(eeprom.page_size(), 32);
    assert_eq!(eeprom.set_device_size(10), 128);
    assert_eq!(eeprom.address_mode(), AddressMode::OneWord);
    assert_eq!(eeprom.set_device_size(1 << 20), 65536);
    assert_eq!(eeprom.page_size(), 128);

    assert_eq!(eeprom.set_page_size(100), 64);
    assert_eq!(eeprom.set_page_size(8), 16);
    assert_eq!(eeprom.set_page_size(1000), 128);
}

#[test]
fn test_page_size_for() {
    assert_eq!(page_size_for(128), 16);
    assert_eq!(page_size_for(2048), 16);
    assert_eq!(page_size_for(4096), 32);
    assert_eq!(page_size_for(8192), 32);
    assert_eq!(page_size_for(16384), 64);
    assert_eq!(page_size_for(32768), 64);
    assert_eq!(page_size_for(65536), 128);
}

#[test]
fn test_begin() {
    let mut emu = EmulatedEeprom::new(0x50, 8192);
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 8192, false);
    assert!(eeprom.begin(None).unwrap());
    assert!(!eeprom.auto_write_protect());
    assert!(eeprom.is_connected(Region::Main));
    assert!(!eeprom.is_connected(Region::IdPage));

    eeprom.transport_mut().set_connected(false);
    assert!(!eeprom.begin(None).unwrap());
}

#[test]
fn test_write_block_chunking() {
    let mut emu = EmulatedEeprom::new(0x50, 32768);
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 32768, false);
    let data = patterned(100);
    eeprom.write_block(Region::Main, 40, &data).unwrap();

    let chunks: Vec<(usize, usize)> = eeprom.transport().writes().iter()
        .map(|w| (w.address, w.data.len()))
        .collect();
    assert_eq!(chunks, vec![(40, 24), (64, 30), (94, 30), (124, 4), (128, 12)]);
    assert_eq!(&eeprom.transport().memory()[40..140], &data[..]);
    assert!(eeprom.last_write().is_some());
}

#[test]
fn test_round_trip_one_word() {
    let mut emu = EmulatedEeprom::new(0x50, 2048);
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 2048, false);
    let data = patterned(300);
    eeprom.write_block(Region::Main, 0x1F0, &data).unwrap();
    assert_eq!(&eeprom.transport().memory()[0x1F0..0x1F0 + 300], &data[..]);

    let mut readback = vec![0u8; 300];
    assert_eq!(eeprom.read_block(Region::Main, 0x1F0, &mut readback).unwrap(), 300);
    assert_eq!(readback, data);

    eeprom.write_byte(Region::Main, 0x7FF, 0x5A).unwrap();
    assert_eq!(eeprom.read_byte(Region::Main, 0x7FF).unwrap(), 0x5A);
}

#[test]
fn test_round_trip_id_page() {
    let mut emu = EmulatedEeprom::new(0x50, 8192).with_id_page();
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 8192, true);
    let data = patterned(32);
    eeprom.write_block(Region::IdPage, 0, &data).unwrap();
    assert_eq!(eeprom.transport().id_page().unwrap(), &data[..]);
    assert_eq!(eeprom.transport().memory()[0], 0xFF);

    let mut readback = [0u8; 8];
    assert_eq!(eeprom.read_block(Region::IdPage, 24, &mut readback).unwrap(), 8);
    assert_eq!(&readback[..], &data[24..]);
}

#[test]
fn test_id_page_overflow() {
    let mut emu = EmulatedEeprom::new(0x50, 2048).with_id_page();
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 2048, true);
    let err = eeprom.write_block(Region::IdPage, 0, &[0u8; 20]).unwrap_err();
    assert!(matches!(err, Error::PageBoundaryOverflow));
    assert_eq!(err.status(), 11);
    assert!(eeprom.transport().writes().is_empty());
    assert!(eeprom.write_block(Region::IdPage, 0, &[0u8; 16]).is_ok());
}

#[test]
fn test_out_of_range() {
    let mut emu = EmulatedEeprom::new(0x50, 32768);
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 32768, false);
    let err = eeprom.write_block(Region::Main, 32760, &[0u8; 10]).unwrap_err();
    assert!(matches!(err, Error::OutOfRange));
    assert_eq!(err.status(), 12);
    let mut buf = [0u8; 10];
    assert!(matches!(eeprom.read_block(Region::Main, 32760, &mut buf), Err(Error::OutOfRange)));
    assert!(eeprom.transport().writes().is_empty());
    assert!(eeprom.write_block(Region::Main, 32758, &[0u8; 10]).is_ok());
}

#[test]
fn test_missing_id_page() {
    let mut emu = EmulatedEeprom::new(0x50, 8192);
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 8192, false);
    let mut buf = [0u8; 4];
    let err = eeprom.read_block(Region::IdPage, 0, &mut buf).unwrap_err();
    assert!(matches!(err, Error::NoIdPage));
    assert_eq!(err.status(), 255);
    assert!(matches!(eeprom.is_id_page_locked(), Err(Error::NoIdPage)));
}

#[test]
fn test_set_block() {
    let mut emu = EmulatedEeprom::new(0x50, 8192);
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 8192, false);
    eeprom.set_block(Region::Main, 20, 0xA5, 50).unwrap();
    let memory = eeprom.transport().memory();
    assert!(memory[20..70].iter().all(|&b| b == 0xA5));
    assert_eq!(memory[19], 0xFF);
    assert_eq!(memory[70], 0xFF);
    assert!(eeprom.transport().writes().iter().all(|w| w.data.len() <= 30));
}

#[test]
fn test_progress_callbacks() {
    let mut emu = EmulatedEeprom::new(0x50, 8192);
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 8192, false);
    let progress = RefCell::new(Vec::new());
    eeprom.write_block_cb(Region::Main, 0, &[1u8; 40], |n| progress.borrow_mut().push(n))
          .unwrap();
    assert_eq!(progress.replace(Vec::new()), vec![0, 30, 32, 40]);

    let mut buf = [0u8; 64];
    let n = eeprom.read_block_cb(Region::Main, 0, &mut buf, |n| progress.borrow_mut().push(n))
                  .unwrap();
    assert_eq!(n, 64);
    assert_eq!(progress.into_inner(), vec![0, 30, 60, 64]);
}

#[test]
fn test_verify_block() {
    let mut emu = EmulatedEeprom::new(0x50, 8192);
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 8192, false);
    let data = patterned(100);
    eeprom.write_block(Region::Main, 10, &data).unwrap();
    assert!(eeprom.verify_block(Region::Main, 10, &data).unwrap());

    let mut other = data.clone();
    other[95] ^= 0x01;
    assert!(!eeprom.verify_block(Region::Main, 10, &other).unwrap());
    assert!(!eeprom.verify_block(Region::Main, 11, &data).unwrap());
}

#[test]
fn test_update_block_single_difference() {
    let mut emu = EmulatedEeprom::new(0x50, 32768);
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 32768, false);
    let mut data = [0xFFu8; 10];
    data[5] = 0x42;
    assert_eq!(eeprom.update_block(Region::Main, 100, &data).unwrap(), 1);
    assert_eq!(eeprom.transport().writes(),
               &[WriteRecord { region: Region::Main, address: 105, data: vec![0x42] }]);
}

#[test]
fn test_update_block_idempotent() {
    let mut emu = EmulatedEeprom::new(0x50, 8192);
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 8192, false);
    let data = patterned(200);
    assert_eq!(eeprom.update_block(Region::Main, 50, &data).unwrap(), 200);
    let writes = eeprom.transport().writes().len();
    assert_eq!(eeprom.update_block(Region::Main, 50, &data).unwrap(), 0);
    assert_eq!(eeprom.transport().writes().len(), writes);
}

#[test]
fn test_update_block_bulk() {
    let mut emu = EmulatedEeprom::new(0x50, 8192);
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 8192, false);
    eeprom.set_update_policy(UpdatePolicy::BulkChunkCompare);
    let mut data = [0xFFu8; 64];
    data[5] = 0;
    data[40] = 0;
    assert_eq!(eeprom.update_block(Region::Main, 0, &data).unwrap(), 60);
    assert!(eeprom.verify_block(Region::Main, 0, &data).unwrap());

    // Whole chunks are rewritten, unchanged bytes included.
    let writes = eeprom.transport().writes();
    let chunks: Vec<(usize, usize)> = writes.iter().map(|w| (w.address, w.data.len())).collect();
    assert_eq!(chunks, vec![(0, 30), (30, 2), (32, 28)]);
    assert_eq!(&writes[0].data[..], &data[..30]);

    eeprom.transport_mut().clear_writes();
    data[63] = 0;
    assert_eq!(eeprom.update_block(Region::Main, 0, &data).unwrap(), 4);
    assert_eq!(eeprom.transport().writes(),
               &[WriteRecord { region: Region::Main, address: 60, data: data[60..].to_vec() }]);
}

#[test]
fn test_update_byte() {
    let mut emu = EmulatedEeprom::new(0x50, 8192);
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 8192, false);
    eeprom.update_byte(Region::Main, 7, 0xFF).unwrap();
    assert!(eeprom.transport().writes().is_empty());
    eeprom.update_byte(Region::Main, 7, 0x01).unwrap();
    assert_eq!(eeprom.transport().writes().len(), 1);
    assert_eq!(eeprom.transport().memory()[7], 0x01);
}

#[test]
fn test_verify_combinators() {
    let mut emu = EmulatedEeprom::new(0x50, 8192);
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 8192, false);
    let data = patterned(70);
    assert!(eeprom.write_byte_verify(Region::Main, 3, 0x33));
    assert!(eeprom.write_block_verify(Region::Main, 100, &data));
    assert!(eeprom.set_block_verify(Region::Main, 300, 0x00, 45));
    assert!(eeprom.update_byte_verify(Region::Main, 3, 0x34));
    assert!(eeprom.update_block_verify(Region::Main, 100, &patterned(90)));
    assert!(!eeprom.write_block_verify(Region::Main, 8190, &data));
    assert!(!eeprom.write_byte_verify(Region::IdPage, 0, 1));
}

#[test]
fn test_read_disconnected() {
    let mut emu = EmulatedEeprom::new(0x50, 8192);
    emu.set_connected(false);
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 8192, false);
    let err = eeprom.read_byte(Region::Main, 0).unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::ADDRESS_NACK)));
    assert_eq!(err.status(), 2);
}

#[test]
fn test_status_codes() {
    assert_eq!(Error::Transport(TransportError(4)).status(), 4);
    assert_eq!(Error::LockNotPermitted.status(), 13);
    assert_eq!(Error::ShortRead { expected: 2, actual: 1 }.status(), 255);
    assert_eq!(Error::NotConnected.status(), 255);
    assert_eq!(Error::Access(anyhow::anyhow!("gpio")).status(), 255);
}

#[test]
fn test_write_cycle_busy_device() {
    let mut emu = EmulatedEeprom::new(0x50, 8192).with_write_cycle(Duration::from_millis(3));
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 8192, false);
    let data = patterned(100);
    eeprom.write_block(Region::Main, 0, &data).unwrap();
    assert!(eeprom.verify_block(Region::Main, 0, &data).unwrap());
    let chunks: Vec<(usize, usize)> = eeprom.transport().writes().iter()
        .map(|w| (w.address, w.data.len()))
        .collect();
    assert_eq!(chunks, vec![(0, 30), (30, 2), (32, 30), (62, 2), (64, 30), (94, 2), (96, 4)]);
}

#[test]
fn test_write_block_stops_at_failed_chunk() {
    // The device is still busy once the gate's write delay has elapsed.
    let mut emu = EmulatedEeprom::new(0x50, 8192).with_write_cycle(Duration::from_millis(50));
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 8192, false);
    let err = eeprom.write_block(Region::Main, 0, &patterned(100)).unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::ADDRESS_NACK)));
    assert_eq!(err.status(), 2);
    assert_eq!(eeprom.transport().writes().len(), 1);
    assert_eq!(eeprom.transport().memory()[30], 0xFF);
}

#[test]
fn test_determine_size_folding() {
    let contents = patterned(8192);
    let mut emu = EmulatedEeprom::new(0x50, 8192).with_contents(&contents);
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 32768, false);
    assert_eq!(eeprom.determine_size().unwrap(), 8192);
    assert_eq!(eeprom.device_size(), 32768);
    assert_eq!(eeprom.transport().memory(), &contents[..]);
}

#[test]
fn test_determine_size_one_word() {
    let contents = patterned(1024);
    let mut emu = EmulatedEeprom::new(0x50, 1024).with_contents(&contents);
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 32768, false);
    assert_eq!(eeprom.determine_size().unwrap(), 1024);
    assert_eq!(eeprom.transport().memory(), &contents[..]);
}

#[test]
fn test_determine_size_disconnected() {
    let mut emu = EmulatedEeprom::new(0x50, 8192);
    emu.set_connected(false);
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 8192, false);
    assert_eq!(eeprom.determine_size().unwrap(), 0);
    assert_eq!(eeprom.determine_size_no_write().unwrap(), SizeProbe::Undetermined);
}

#[test]
fn test_determine_size_no_write() {
    let mut emu = EmulatedEeprom::new(0x50, 8192);
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 8192, false);
    let probe = eeprom.determine_size_no_write().unwrap();
    assert_eq!(probe, SizeProbe::DefaultContent);
    assert_eq!(probe.code(), 1);

    let mut emu = EmulatedEeprom::new(0x50, 8192).with_contents(&[0x42; 64]);
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 8192, false);
    let probe = eeprom.determine_size_no_write().unwrap();
    assert_eq!(probe, SizeProbe::UniformContent);
    assert_eq!(probe.code(), 2);

    for &capacity in &[8192usize, 32768] {
        let mut emu = EmulatedEeprom::new(0x50, capacity).with_contents(&patterned(capacity));
        let mut eeprom = Eeprom::new(&mut emu, 0x50, 2048, false);
        assert_eq!(eeprom.determine_size_no_write().unwrap(),
                   SizeProbe::Detected(capacity as u32));
        assert!(eeprom.transport().writes().is_empty());
    }
}

#[test]
fn test_auto_write_protect() {
    let events = Rc::new(RefCell::new(Vec::new()));
    let mut emu = EmulatedEeprom::new(0x50, 8192);
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 8192, false);
    let wp = WriteProtect::new(Box::new(RecordingLines(events.clone())), 7);
    assert!(eeprom.begin(Some(wp)).unwrap());
    assert!(eeprom.auto_write_protect());
    assert_eq!(*events.borrow(), vec![(7, true)]);

    eeprom.write_byte(Region::Main, 0, 1).unwrap();
    assert_eq!(*events.borrow(), vec![(7, true), (7, false), (7, true)]);

    // Reads leave the line alone.
    eeprom.read_byte(Region::Main, 0).unwrap();
    assert_eq!(events.borrow().len(), 3);

    // The line is reasserted after a failed write too.
    eeprom.transport_mut().set_connected(false);
    assert!(eeprom.write_byte(Region::Main, 0, 2).is_err());
    assert_eq!(events.borrow().len(), 5);
    assert_eq!(events.borrow().last(), Some(&(7, true)));

    eeprom.transport_mut().set_connected(true);
    eeprom.set_auto_write_protect(false);
    eeprom.write_byte(Region::Main, 0, 3).unwrap();
    assert_eq!(events.borrow().len(), 5);
    eeprom.allow_write().unwrap();
    assert_eq!(events.borrow().last(), Some(&(7, false)));
}

#[test]
fn test_id_page_lock_status() {
    let mut emu = EmulatedEeprom::new(0x50, 8192).with_id_page();
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 8192, true);
    assert_eq!(eeprom.is_id_page_locked().unwrap(), 0);
}

#[test]
fn test_id_page_lock_query_closes_frame() {
    let mut log = TransactionLog::default();
    let mut eeprom = Eeprom::new(&mut log, 0x50, 8192, true);
    assert_eq!(eeprom.is_id_page_locked().unwrap(), 0);
    assert_eq!(eeprom.transport().0, vec![(0x58, vec![0x01], false), (0x58, vec![], false)]);
}

#[test]
fn test_transport_error_wins_over_write_protect_error() {
    let stuck = Rc::new(std::cell::Cell::new(false));
    let mut emu = EmulatedEeprom::new(0x50, 8192);
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 8192, false);
    let wp = WriteProtect::new(Box::new(StuckLines(stuck.clone())), 3);
    assert!(eeprom.begin(Some(wp)).unwrap());
    stuck.set(true);

    // The write lands, so the line failure is what gets reported.
    let err = eeprom.write_byte(Region::Main, 0, 1).unwrap_err();
    assert!(matches!(err, Error::Access(_)));
    assert_eq!(eeprom.transport().memory()[0], 1);

    eeprom.transport_mut().set_connected(false);
    let err = eeprom.write_byte(Region::Main, 0, 2).unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::ADDRESS_NACK)));
    assert_eq!(err.status(), 2);
}

#[cfg(not(all(feature = "idpage-lock", feature = "idpage-lock-irreversible")))]
#[test]
fn test_lock_id_page_refused() {
    let mut emu = EmulatedEeprom::new(0x50, 8192).with_id_page();
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 8192, true);
    let err = eeprom.lock_id_page().unwrap_err();
    assert!(matches!(err, Error::LockNotPermitted));
    assert_eq!(err.status(), 13);
    assert!(eeprom.last_write().is_none());
    assert!(!eeprom.transport().is_id_page_locked());
}

#[cfg(all(feature = "idpage-lock", feature = "idpage-lock-irreversible"))]
#[test]
fn test_lock_id_page() {
    let mut emu = EmulatedEeprom::new(0x50, 8192).with_id_page();
    let mut eeprom = Eeprom::new(&mut emu, 0x50, 8192, true);
    eeprom.write_byte(Region::IdPage, 0, 0x11).unwrap();
    eeprom.lock_id_page().unwrap();
    assert!(eeprom.transport().is_id_page_locked());
    assert_eq!(eeprom.is_id_page_locked().unwrap(), 3);
    let err = eeprom.write_byte(Region::IdPage, 0, 0x22).unwrap_err();
    assert_eq!(err.status(), 3);
    assert_eq!(eeprom.read_byte(Region::IdPage, 0).unwrap(), 0x11);
}
