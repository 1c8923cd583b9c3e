//! In-memory devices speaking the same framing as the drivers, for tests
//! and dry runs.
//!
//! Both simulated chips wrap around inside the current page when a write
//! runs past its end, like the real parts do.

use crate::planner::{
	AddressWidth,
	DeviceProfile,
};
use crate::w25q::consts::*;

use super::Transport;

/// Shared failure injection: fail every exchange after `n` succeeded
#[derive(Clone, Copy, Default, Debug)]
struct FailAfter {
	limit: Option<usize>,
	done: usize,
}

impl FailAfter {
	fn check(&mut self) -> crate::AResult<()> {
		if let Some(limit) = self.limit {
			ensure!(self.done < limit, "simulated timeout after {} exchanges", limit);
		}
		self.done += 1;
		Ok(())
	}
}

fn decode_address(width: AddressWidth, bytes: &[u8]) -> usize {
	bytes[..width.bytes()].iter().fold(0usize, |a, b| (a << 8) | (*b as usize))
}

fn write_in_page(memory: &mut [u8], page_size: usize, address: usize, data: &[u8], program: bool) -> usize {
	let page_base = address - address % page_size;
	let mut column = address % page_size;
	for b in data {
		let cell = &mut memory[page_base + column];
		if program {
			// NOR flash can only clear bits
			*cell &= *b;
		} else {
			*cell = *b;
		}
		column = (column + 1) % page_size;
	}
	page_base + column
}

fn read_sequential(memory: &[u8], address: usize, len: usize) -> Vec<u8> {
	(0..len).map(|i| memory[(address + i) % memory.len()]).collect()
}

/// AT24C-style I2C EEPROM
pub struct SimEeprom {
	memory: Vec<u8>,
	page_size: usize,
	address_width: AddressWidth,
	device_address: u8,
	pointer: usize,
	fail: FailAfter,
}

impl SimEeprom {
	/// `device_address` is the 7-bit I2C address; memory starts as 0xff
	pub fn new(profile: &DeviceProfile, device_address: u8) -> Self {
		SimEeprom {
			memory: vec![0xff; profile.capacity()],
			page_size: profile.page_size(),
			address_width: profile.address_width(),
			device_address,
			pointer: 0,
			fail: FailAfter::default(),
		}
	}

	pub fn memory(&self) -> &[u8] {
		&self.memory
	}

	pub fn memory_mut(&mut self) -> &mut [u8] {
		&mut self.memory
	}

	pub fn fail_after(&mut self, exchanges: usize) {
		self.fail = FailAfter { limit: Some(exchanges), done: 0 };
	}
}

impl Transport for SimEeprom {
	fn write_then_read(&mut self, out: &[u8], read_len: usize) -> crate::AResult<Vec<u8>> {
		self.fail.check()?;
		ensure!(!out.is_empty(), "missing I2C address byte");
		let address_byte = out[0];
		ensure!(address_byte >> 1 == self.device_address, "NACK for I2C address 0x{:02x}", address_byte >> 1);

		if 0 == address_byte & 1 {
			ensure!(0 == read_len, "read requested after a write address byte");
			let aw = self.address_width.bytes();
			ensure!(out.len() >= 1 + aw, "incomplete memory address");
			self.pointer = decode_address(self.address_width, &out[1..]) % self.memory.len();
			let data = &out[1 + aw..];
			if !data.is_empty() {
				self.pointer = write_in_page(&mut self.memory, self.page_size, self.pointer, data, false);
			}
			Ok(Vec::new())
		} else {
			ensure!(1 == out.len(), "unexpected bytes after read address byte");
			let result = read_sequential(&self.memory, self.pointer, read_len);
			self.pointer = (self.pointer + read_len) % self.memory.len();
			Ok(result)
		}
	}
}

/// Winbond W25Q-style SPI NOR flash
pub struct SimFlash {
	memory: Vec<u8>,
	page_size: usize,
	write_enabled: bool,
	busy: bool,
	status2: u8,
	manufacturer: u8,
	memory_type: u8,
	unique_id: [u8; 8],
	opcodes: Vec<u8>,
	fail: FailAfter,
}

impl SimFlash {
	/// Erased flash (all 0xff) with Winbond identification
	pub fn new(profile: &DeviceProfile) -> Self {
		SimFlash {
			memory: vec![0xff; profile.capacity()],
			page_size: profile.page_size(),
			write_enabled: false,
			busy: false,
			status2: 0x02, // QE set, factory default on many parts
			manufacturer: 0xef,
			memory_type: 0x40,
			unique_id: [0xd2, 0x63, 0x48, 0x39, 0x47, 0x2b, 0x1d, 0x27],
			opcodes: Vec::new(),
			fail: FailAfter::default(),
		}
	}

	pub fn memory(&self) -> &[u8] {
		&self.memory
	}

	pub fn memory_mut(&mut self) -> &mut [u8] {
		&mut self.memory
	}

	/// opcodes of all commands received so far
	pub fn opcodes(&self) -> &[u8] {
		&self.opcodes
	}

	pub fn clear_opcodes(&mut self) {
		self.opcodes.clear();
	}

	pub fn set_busy(&mut self, busy: bool) {
		self.busy = busy;
	}

	pub fn set_write_enabled(&mut self, write_enabled: bool) {
		self.write_enabled = write_enabled;
	}

	pub fn is_write_enabled(&self) -> bool {
		self.write_enabled
	}

	pub fn fail_after(&mut self, exchanges: usize) {
		self.fail = FailAfter { limit: Some(exchanges), done: 0 };
	}

	fn status1(&self) -> u8 {
		let mut sr1 = 0;
		if self.busy {
			sr1 |= STATUS_BUSY;
		}
		if self.write_enabled {
			sr1 |= STATUS_WEL;
		}
		sr1
	}

	// smallest power of two holding the memory; real parts never need rounding
	fn capacity_log2(&self) -> u8 {
		self.memory.len().next_power_of_two().trailing_zeros() as u8
	}

	fn address(&self, out: &[u8]) -> crate::AResult<usize> {
		ensure!(out.len() >= 4, "incomplete address for opcode 0x{:02x}", out[0]);
		Ok(decode_address(AddressWidth::Three, &out[1..]) % self.memory.len())
	}

	// program and erase commands need WEL and are dropped while busy
	fn accepts_modification(&mut self, opcode: u8) -> bool {
		if self.busy {
			warn!("simulated flash: ignoring opcode 0x{:02x} while busy", opcode);
			return false;
		}
		if !self.write_enabled {
			warn!("simulated flash: ignoring opcode 0x{:02x} without write enable", opcode);
			return false;
		}
		self.write_enabled = false;
		true
	}

	fn erase(&mut self, address: usize, size: usize) {
		let start = address - address % size;
		let end = (start + size).min(self.memory.len());
		for b in &mut self.memory[start..end] {
			*b = 0xff;
		}
	}
}

impl Transport for SimFlash {
	fn write_then_read(&mut self, out: &[u8], read_len: usize) -> crate::AResult<Vec<u8>> {
		self.fail.check()?;
		ensure!(!out.is_empty(), "empty SPI command");
		let opcode = out[0];
		self.opcodes.push(opcode);

		let mut response = Vec::new();
		match opcode {
			COMMAND_READ_STATUS_REG_1 => response = vec![self.status1(); read_len],
			COMMAND_READ_STATUS_REG_2 => response = vec![self.status2; read_len],
			COMMAND_WRITE_ENABLE => {
				if !self.busy {
					self.write_enabled = true;
				}
			},
			COMMAND_READ => {
				let address = self.address(out)?;
				response = if self.busy {
					vec![0xff; read_len]
				} else {
					read_sequential(&self.memory, address, read_len)
				};
			},
			COMMAND_PAGE_PROGRAM => {
				let address = self.address(out)?;
				if self.accepts_modification(opcode) {
					write_in_page(&mut self.memory, self.page_size, address, &out[4..], true);
				}
			},
			COMMAND_ERASE_SECTOR | COMMAND_ERASE_32KB | COMMAND_ERASE_64KB => {
				let address = self.address(out)?;
				let size = match opcode {
					COMMAND_ERASE_SECTOR => 4 * 1024,
					COMMAND_ERASE_32KB => 32 * 1024,
					_ => 64 * 1024,
				};
				if self.accepts_modification(opcode) {
					self.erase(address, size);
				}
			},
			COMMAND_ERASE_CHIP | COMMAND_ERASE_CHIP_ALT => {
				if self.accepts_modification(opcode) {
					let len = self.memory.len();
					self.erase(0, len);
				}
			},
			COMMAND_MANUFACTURER => {
				let id = [self.manufacturer, self.capacity_log2().saturating_sub(1)];
				response = id.iter().cloned().cycle().take(read_len).collect();
			},
			COMMAND_UNIQUE_ID => {
				response = self.unique_id.iter().cloned().chain(std::iter::repeat(0xff)).take(read_len).collect();
			},
			COMMAND_JEDEC_ID => {
				let id = [self.manufacturer, self.memory_type, self.capacity_log2()];
				response = id.iter().cloned().chain(std::iter::repeat(0xff)).take(read_len).collect();
			},
			_ => bail!("simulated flash: unsupported opcode 0x{:02x}", opcode),
		}
		if response.len() < read_len {
			// MISO idles high
			response.resize(read_len, 0xff);
		}
		Ok(response)
	}
}
