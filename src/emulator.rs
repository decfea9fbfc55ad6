//! An in-memory 24-series EEPROM attached to an emulated bus.
//!
//! The emulation follows the bus-visible behaviour of real parts closely
//! enough to exercise the driver:
//! * one-word parts decode memory address bits 8..10 from the device address,
//!   two-word parts take a big-endian 16-bit address;
//! * address bits beyond the part's capacity are ignored, so addresses fold;
//! * a write frame is only programmed when it ends with a stop condition,
//!   and wraps around within its page;
//! * the part ignores its address while a write cycle is in progress;
//! * an optional identification page at `base + 8`, which can be locked.

use std::time::{Duration, Instant};

use crate::address::{AddressMode, Region, ID_PAGE_OFFSET};
use crate::bus::{BusTransport, TransportError, DEFAULT_MAX_TRANSFER};
use crate::eeprom::page_size_for;

/// Identification page address bit selecting the lock control byte.
const ID_LOCK_BIT: usize = 0x400;

/// A programmed write, as seen by the emulated device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteRecord {
    pub region: Region,
    pub address: usize,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct EmulatedEeprom {
    base: u8,
    mode: AddressMode,
    page_size: usize,
    memory: Vec<u8>,
    pointer: usize,
    id_page: Option<Vec<u8>>,
    id_pointer: usize,
    id_locked: bool,
    write_cycle: Duration,
    busy_until: Option<Instant>,
    max_transfer: usize,
    connected: bool,
    writes: Vec<WriteRecord>,
}

impl EmulatedEeprom {
    /// Create an erased part of `capacity` bytes responding at `base`.
    ///
    /// The addressing mode and page size follow from the capacity.
    pub fn new(base: u8, capacity: usize) -> Self {
        EmulatedEeprom {
            base,
            mode: AddressMode::for_capacity(capacity as u32),
            page_size: page_size_for(capacity as u32),
            memory: vec![0xFF; capacity],
            pointer: 0,
            id_page: None,
            id_pointer: 0,
            id_locked: false,
            write_cycle: Duration::from_millis(0),
            busy_until: None,
            max_transfer: DEFAULT_MAX_TRANSFER,
            connected: true,
            writes: Vec::new(),
        }
    }

    /// Add an erased identification page.
    pub fn with_id_page(mut self) -> Self {
        self.id_page = Some(vec![0xFF; self.page_size]);
        self
    }

    /// Copy `data` into memory starting at address 0.
    pub fn with_contents(mut self, data: &[u8]) -> Self {
        let n = usize::min(data.len(), self.memory.len());
        self.memory[..n].copy_from_slice(&data[..n]);
        self
    }

    /// Copy `data` into the identification page, if present.
    pub fn with_id_page_contents(mut self, data: &[u8]) -> Self {
        if let Some(page) = self.id_page.as_mut() {
            let n = usize::min(data.len(), page.len());
            page[..n].copy_from_slice(&data[..n]);
        }
        self
    }

    /// Time the part stays busy after programming a write.
    pub fn with_write_cycle(mut self, write_cycle: Duration) -> Self {
        self.write_cycle = write_cycle;
        self
    }

    pub fn with_max_transfer(mut self, max_transfer: usize) -> Self {
        self.max_transfer = max_transfer;
        self
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn id_page(&self) -> Option<&[u8]> {
        self.id_page.as_deref()
    }

    pub fn is_id_page_locked(&self) -> bool {
        self.id_locked
    }

    /// All writes programmed so far, oldest first.
    pub fn writes(&self) -> &[WriteRecord] {
        &self.writes
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    fn is_busy(&self) -> bool {
        self.busy_until.map_or(false, |t| Instant::now() < t)
    }

    /// Work out which region `address` selects, with the borrowed address
    /// bits for one-word parts.
    fn decode(&self, address: u8) -> Option<(Region, usize)> {
        if self.id_page.is_some() && address == self.base.wrapping_add(ID_PAGE_OFFSET) {
            return Some((Region::IdPage, 0));
        }
        match self.mode {
            AddressMode::OneWord if address & !0x07 == self.base & !0x07 =>
                Some((Region::Main, (address & 0x07) as usize)),
            AddressMode::TwoWord if address == self.base => Some((Region::Main, 0)),
            _ => None,
        }
    }

    fn program(&mut self, region: Region, address: usize, data: &[u8]) {
        let page_size = self.page_size;
        let page_base = address - (address % page_size);
        let memory = match region {
            Region::Main => &mut self.memory,
            Region::IdPage => match self.id_page.as_mut() {
                Some(page) => page,
                None => return,
            },
        };
        let mut offset = address % page_size;
        for byte in data {
            memory[page_base + offset] = *byte;
            offset = (offset + 1) % page_size;
        }
        match region {
            Region::Main => self.pointer = page_base + offset,
            Region::IdPage => self.id_pointer = offset,
        }
        self.writes.push(WriteRecord { region, address, data: data.to_vec() });
        self.start_write_cycle();
    }

    fn start_write_cycle(&mut self) {
        self.busy_until = Some(Instant::now() + self.write_cycle);
    }
}

impl BusTransport for EmulatedEeprom {
    fn transmit(&mut self, address: u8, data: &[u8], hold: bool)
        -> std::result::Result<(), TransportError>
    {
        if !self.connected || self.is_busy() {
            return Err(TransportError::ADDRESS_NACK);
        }
        let (region, block) = self.decode(address).ok_or(TransportError::ADDRESS_NACK)?;
        let width = self.mode.address_bytes();
        if data.len() > width + self.max_transfer {
            return Err(TransportError::DATA_TOO_LONG);
        }
        if data.len() < width {
            // The address is incomplete; the internal pointer is unchanged.
            if region == Region::IdPage && self.id_locked && !data.is_empty() {
                return Err(TransportError::DATA_NACK);
            }
            return Ok(());
        }

        let raw = match self.mode {
            AddressMode::OneWord => (block << 8) | data[0] as usize,
            AddressMode::TwoWord => u16::from_be_bytes([data[0], data[1]]) as usize,
        };
        let payload = &data[width..];
        let commit = !hold && !payload.is_empty();

        match region {
            Region::Main => {
                let addr = raw % self.memory.len();
                self.pointer = addr;
                if commit {
                    self.program(Region::Main, addr, payload);
                }
            },
            Region::IdPage => {
                if self.id_locked && !payload.is_empty() {
                    return Err(TransportError::DATA_NACK);
                }
                if raw & ID_LOCK_BIT != 0 {
                    if commit && payload[0] & 0b10 != 0 {
                        self.id_locked = true;
                        self.start_write_cycle();
                    }
                    return Ok(());
                }
                let addr = raw % self.page_size;
                self.id_pointer = addr;
                if commit {
                    self.program(Region::IdPage, addr, payload);
                }
            },
        }
        Ok(())
    }

    fn receive(&mut self, address: u8, buffer: &mut [u8]) -> usize {
        if !self.connected || self.is_busy() {
            return 0;
        }
        let region = match self.decode(address) {
            Some((region, _)) => region,
            None => return 0,
        };
        let n = usize::min(buffer.len(), self.max_transfer);
        match region {
            Region::Main => {
                for byte in buffer[..n].iter_mut() {
                    *byte = self.memory[self.pointer];
                    self.pointer = (self.pointer + 1) % self.memory.len();
                }
            },
            Region::IdPage => {
                let page = match self.id_page.as_ref() {
                    Some(page) => page,
                    None => return 0,
                };
                for byte in buffer[..n].iter_mut() {
                    *byte = page[self.id_pointer];
                    self.id_pointer = (self.id_pointer + 1) % page.len();
                }
            },
        }
        n
    }

    fn max_transfer(&self) -> usize {
        self.max_transfer
    }
}

#[test]
fn test_two_word_write_and_read() {
    let mut emu = EmulatedEeprom::new(0x50, 8192);
    emu.transmit(0x50, &[0x01, 0x00, 1, 2, 3], false).unwrap();
    assert_eq!(&emu.memory()[0x100..0x103], &[1, 2, 3]);
    emu.transmit(0x50, &[0x01, 0x01], true).unwrap();
    let mut buf = [0u8; 2];
    assert_eq!(emu.receive(0x50, &mut buf), 2);
    assert_eq!(buf, [2, 3]);
}

#[test]
fn test_one_word_block_bits() {
    let mut emu = EmulatedEeprom::new(0x50, 2048);
    emu.transmit(0x53, &[0x10, 0xAB], false).unwrap();
    assert_eq!(emu.memory()[0x310], 0xAB);
    assert_eq!(emu.writes()[0].address, 0x310);
}

#[test]
fn test_folding() {
    let mut emu = EmulatedEeprom::new(0x50, 8192);
    emu.transmit(0x50, &[0x20, 0x05, 0x42], false).unwrap();
    assert_eq!(emu.memory()[5], 0x42);
}

#[test]
fn test_held_write_is_not_programmed() {
    let mut emu = EmulatedEeprom::new(0x50, 8192);
    emu.transmit(0x50, &[0x00, 0x00, 0x42], true).unwrap();
    assert_eq!(emu.memory()[0], 0xFF);
    assert!(emu.writes().is_empty());
}

#[test]
fn test_page_rollover() {
    let mut emu = EmulatedEeprom::new(0x50, 8192).with_max_transfer(64);
    // Page size is 32; writing 4 bytes at 30 wraps to 0 and 1.
    emu.transmit(0x50, &[0x00, 30, 1, 2, 3, 4], false).unwrap();
    assert_eq!(&emu.memory()[30..32], &[1, 2]);
    assert_eq!(&emu.memory()[0..2], &[3, 4]);
    assert_eq!(emu.memory()[32], 0xFF);
}

#[test]
fn test_busy_after_write() {
    let mut emu = EmulatedEeprom::new(0x50, 8192).with_write_cycle(Duration::from_secs(60));
    emu.transmit(0x50, &[0x00, 0x00, 0x42], false).unwrap();
    assert_eq!(emu.ping(0x50), Err(TransportError::ADDRESS_NACK));
}

#[test]
fn test_unknown_address_nacks() {
    let mut emu = EmulatedEeprom::new(0x50, 8192);
    assert_eq!(emu.ping(0x51), Err(TransportError::ADDRESS_NACK));
    assert_eq!(emu.ping(0x58), Err(TransportError::ADDRESS_NACK));
    let mut emu = emu.with_id_page();
    assert_eq!(emu.ping(0x58), Ok(()));
}

#[test]
fn test_oversized_transfer() {
    let mut emu = EmulatedEeprom::new(0x50, 8192).with_max_transfer(4);
    assert_eq!(emu.transmit(0x50, &[0, 0, 1, 2, 3, 4, 5], false),
               Err(TransportError::DATA_TOO_LONG));
}

#[test]
fn test_id_page_lock() {
    let mut emu = EmulatedEeprom::new(0x50, 8192).with_id_page();
    emu.transmit(0x58, &[0x00, 0x02, 0x11], false).unwrap();
    assert_eq!(emu.id_page().unwrap()[2], 0x11);
    emu.transmit(0x58, &[0x04, 0x00, 0x02], false).unwrap();
    assert!(emu.is_id_page_locked());
    assert_eq!(emu.transmit(0x58, &[0x00, 0x02, 0x22], false),
               Err(TransportError::DATA_NACK));
    assert_eq!(emu.id_page().unwrap()[2], 0x11);
}

#[test]
fn test_id_page_contents() {
    let emu = EmulatedEeprom::new(0x50, 2048).with_id_page_contents(&[1, 2]);
    assert!(emu.id_page().is_none());
    let emu = EmulatedEeprom::new(0x50, 2048).with_id_page().with_id_page_contents(&[1; 40]);
    assert_eq!(emu.id_page().unwrap(), &[1u8; 16][..]);
}
