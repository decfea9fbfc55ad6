// Copyright 2026 The i2c-eeprom Authors
// Licensed under the Apache-2.0 and MIT licenses.

//! i2c-eeprom
//!
//! Driver for 24-series I2C EEPROMs, from 128 bytes to 64kB, with optional
//! identification page, write-protect line handling and capacity probing.

pub mod bus;
pub mod address;
pub mod gate;
pub mod plan;
pub mod update;
pub mod eeprom;
pub mod emulator;

pub use crate::bus::{BusTransport, LineControl, TransportError, WriteProtect};
pub use crate::address::{AddressMode, Region};
pub use crate::update::UpdatePolicy;
pub use crate::eeprom::{Eeprom, Error, Result, SizeProbe, page_size_for};
pub use crate::emulator::EmulatedEeprom;
