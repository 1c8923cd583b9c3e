/* Chip documentation: https://www.winbond.com/resource-files/w25q64fv%20revq%2006142016.pdf */

use std::fmt;

use crate::planner::{
	self,
	AddressWidth,
	DeviceProfile,
	W25Q64FV,
};
use crate::transport::{
	Transport,
	TransportExt,
};
use crate::DeviceError;

#[allow(dead_code)]
pub mod consts {
	pub const COMMAND_READ:              u8 = 0x03;
	pub const COMMAND_READ_STATUS_REG_1: u8 = 0x05;
	pub const COMMAND_READ_STATUS_REG_2: u8 = 0x35;
	pub const COMMAND_WRITE_ENABLE:      u8 = 0x06; // sets WEL
	pub const COMMAND_ERASE_SECTOR:      u8 = 0x20; // 4KB
	pub const COMMAND_ERASE_32KB:        u8 = 0x52;
	pub const COMMAND_ERASE_64KB:        u8 = 0xD8;
	pub const COMMAND_ERASE_CHIP:        u8 = 0x60;
	pub const COMMAND_ERASE_CHIP_ALT:    u8 = 0xC7;
	pub const COMMAND_MANUFACTURER:      u8 = 0x90;
	pub const COMMAND_UNIQUE_ID:         u8 = 0x4B;
	pub const COMMAND_JEDEC_ID:          u8 = 0x9F;
	pub const COMMAND_PAGE_PROGRAM:      u8 = 0x02; // clears WEL when done

	// status register 1
	pub const STATUS_BUSY: u8 = 0x01;
	pub const STATUS_WEL:  u8 = 0x02;
	pub const STATUS_BP_MASK: u8 = 0x1c; // block protect BP0..BP2
	pub const STATUS_SRP0: u8 = 0x80;
}

use self::consts::*;

/// Erase granularity
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum EraseCommand {
	Sector,
	Block32K,
	Block64K,
	Chip,
}

impl EraseCommand {
	pub fn opcode(self) -> u8 {
		match self {
			EraseCommand::Sector => COMMAND_ERASE_SECTOR,
			EraseCommand::Block32K => COMMAND_ERASE_32KB,
			EraseCommand::Block64K => COMMAND_ERASE_64KB,
			EraseCommand::Chip => COMMAND_ERASE_CHIP,
		}
	}

	pub fn from_opcode(opcode: u8) -> Option<Self> {
		match opcode {
			COMMAND_ERASE_SECTOR => Some(EraseCommand::Sector),
			COMMAND_ERASE_32KB => Some(EraseCommand::Block32K),
			COMMAND_ERASE_64KB => Some(EraseCommand::Block64K),
			COMMAND_ERASE_CHIP | COMMAND_ERASE_CHIP_ALT => Some(EraseCommand::Chip),
			_ => None,
		}
	}
}

/// Status registers 1 and 2, as read in one `status_registers` call.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub [u8; 2]);

impl Status {
	pub fn is_busy(&self) -> bool {
		0 != self.0[0] & STATUS_BUSY
	}
	pub fn is_write_enabled(&self) -> bool {
		0 != self.0[0] & STATUS_WEL
	}
	pub fn block_protect(&self) -> u8 {
		(self.0[0] & STATUS_BP_MASK) >> 2
	}
}

impl fmt::Debug for Status {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "SR1 0x{:02x} SR2 0x{:02x} (BP: {}", self.0[0], self.0[1], self.block_protect())?;
		if self.is_busy() { write!(f, " [BUSY]")?; }
		if self.is_write_enabled() { write!(f, " [WEL]")?; }
		if 0 != self.0[0] & STATUS_SRP0 { write!(f, " [SRP0]")?; }
		write!(f, ")")
	}
}

/// When to look at the status register during multi-page writes
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Interlock {
	/// fresh status (busy check, write enable if needed) before every
	/// program/erase command
	EveryCommand,
	/// single busy check per request; write enable before every command
	/// except a first one finding WEL already set
	Once,
}

impl Default for Interlock {
	fn default() -> Self {
		Interlock::EveryCommand
	}
}

impl std::str::FromStr for Interlock {
	type Err = failure::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"every" => Ok(Interlock::EveryCommand),
			"once" => Ok(Interlock::Once),
			_ => bail!("unknown interlock policy {:?} (expected 'every' or 'once')", s),
		}
	}
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FlashInfo {
	pub manufacturer: u8,
	pub device_id: u8,
	pub unique_id: [u8; 8],
	pub memory_type: u8,
	/// in bytes
	pub capacity: u64,
}

impl fmt::Display for FlashInfo {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "manufacturer 0x{:02x}, device 0x{:02x}, unique id 0x", self.manufacturer, self.device_id)?;
		for b in self.unique_id.iter() {
			write!(f, "{:02x}", b)?;
		}
		write!(f, ", memory type 0x{:02x}, capacity {} bytes", self.memory_type, self.capacity)
	}
}

/// Winbond W25Q SPI NOR flash behind a write-then-read transport
pub struct Flash<T: Transport> {
	transport: T,
	profile: DeviceProfile,
	interlock: Interlock,
}

impl<T: Transport> Flash<T> {
	/// W25Q parts take 3-byte addresses; other profiles are rejected.
	pub fn open(transport: T, profile: DeviceProfile) -> crate::AResult<Self> {
		ensure!(profile.address_width() == AddressWidth::Three,
			"SPI flash needs 3 address bytes, profile has {}", profile.address_width().bytes()
		);
		Ok(Flash {
			transport,
			profile,
			interlock: Interlock::default(),
		})
	}

	/// W25Q64FV (8 MiB)
	pub fn w25q64fv(transport: T) -> Self {
		Flash {
			transport,
			profile: W25Q64FV,
			interlock: Interlock::default(),
		}
	}

	pub fn with_interlock(mut self, interlock: Interlock) -> Self {
		self.interlock = interlock;
		self
	}

	pub fn profile(&self) -> &DeviceProfile {
		&self.profile
	}

	pub fn transport(&mut self) -> &mut T {
		&mut self.transport
	}

	pub fn into_transport(self) -> T {
		self.transport
	}

	fn header(&self, opcode: u8, address: u32) -> Vec<u8> {
		let mut header = vec![opcode];
		header.extend(self.profile.address_width().encode(address));
		header
	}

	pub fn status_registers(&mut self) -> crate::AResult<Status> {
		let sr1 = self.transport.exchange(&[COMMAND_READ_STATUS_REG_1], 1)?;
		let sr2 = self.transport.exchange(&[COMMAND_READ_STATUS_REG_2], 1)?;
		let status = Status([sr1[0], sr2[0]]);
		trace!("flash status: {:?}", status);
		Ok(status)
	}

	/// Sets the Write Enable Latch; needed before every program or erase.
	pub fn write_enable(&mut self) -> crate::AResult<()> {
		self.transport.command(&[COMMAND_WRITE_ENABLE])
	}

	fn not_busy(&mut self) -> crate::AResult<Status> {
		let status = self.status_registers()?;
		if status.is_busy() {
			return Err(DeviceError::DeviceBusy.into());
		}
		Ok(status)
	}

	fn ensure_write_enabled(&mut self) -> crate::AResult<()> {
		if !self.not_busy()?.is_write_enabled() {
			self.write_enable()?;
		}
		Ok(())
	}

	/// Read `amount` bytes starting at `address`
	pub fn read(&mut self, address: u32, amount: usize) -> crate::AResult<Vec<u8>> {
		let plan = planner::plan_read(&self.profile, address, amount)?;
		if 0 == amount {
			return Ok(Vec::new());
		}
		self.not_busy()?;

		let mut result = Vec::with_capacity(amount);
		for sub in plan {
			debug!("flash read @0x{:06x}: {} bytes", sub.address, sub.len);
			let header = self.header(COMMAND_READ, sub.address);
			result.extend(self.transport.exchange(&header, sub.len)?);
		}
		Ok(result)
	}

	/// Program `data` starting at `address`, one page program per touched
	/// page. The target range should be erased.
	pub fn store(&mut self, address: u32, data: &[u8]) -> crate::AResult<()> {
		let plan = planner::plan_write(&self.profile, address, data)?;
		if data.is_empty() {
			return Ok(());
		}

		// WEL found set by the single check covers the first program only
		let mut latch_set = false;
		if let Interlock::Once = self.interlock {
			latch_set = self.not_busy()?.is_write_enabled();
		}

		for sub in plan {
			match self.interlock {
				Interlock::EveryCommand => self.ensure_write_enabled()?,
				Interlock::Once => if !latch_set {
					self.write_enable()?;
				},
			}
			latch_set = false;
			debug!("flash page program @0x{:06x}: {} bytes", sub.address, sub.len);
			let mut out = self.header(COMMAND_PAGE_PROGRAM, sub.address);
			out.extend_from_slice(sub.payload(data));
			self.transport.command(&out)?;
		}
		Ok(())
	}

	/// Number of page programs `store(address, data)` would issue
	pub fn calculate_pages(&self, address: u32, data: &[u8]) -> crate::AResult<usize> {
		planner::page_count(&self.profile, address, data.len())
	}

	/// Erase the sector/block containing `address`; `address` is ignored
	/// for `EraseCommand::Chip`.
	pub fn erase(&mut self, command: EraseCommand, address: u32) -> crate::AResult<()> {
		if command != EraseCommand::Chip {
			planner::check_address(&self.profile, address)?;
		}
		self.ensure_write_enabled()?;

		let out = match command {
			EraseCommand::Chip => vec![command.opcode()],
			_ => self.header(command.opcode(), address),
		};
		debug!("flash erase {:?} @0x{:06x}", command, address);
		self.transport.command(&out)
	}

	pub fn info(&mut self) -> crate::AResult<FlashInfo> {
		let manufacturer = self.transport.exchange(&[COMMAND_MANUFACTURER, 0x00, 0x00, 0x00], 2)?;
		let unique = self.transport.exchange(&[COMMAND_UNIQUE_ID, 0x00, 0x00, 0x00, 0x00], 8)?;
		let jedec_id = self.transport.exchange(&[COMMAND_JEDEC_ID], 3)?;

		let mut unique_id = [0u8; 8];
		unique_id.copy_from_slice(&unique);
		ensure!(jedec_id[2] < 64, "Invalid JEDEC capacity code 0x{:02x}", jedec_id[2]);

		Ok(FlashInfo {
			manufacturer: manufacturer[0],
			device_id: manufacturer[1],
			unique_id,
			memory_type: jedec_id[1],
			capacity: 1u64 << jedec_id[2],
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::planner::W25Q32FV;
	use crate::transport::{
		sim::SimFlash,
		Exchange,
		Recorder,
	};

	fn flash() -> Flash<SimFlash> {
		Flash::w25q64fv(SimFlash::new(&W25Q64FV))
	}

	fn is_busy_error(e: &failure::Error) -> bool {
		DeviceError::kind_of(e) == Some(&DeviceError::DeviceBusy)
	}

	#[test]
	fn store_and_read_back() {
		let mut flash = flash();
		let data: Vec<u8> = (0..1000u32).map(|i| (i ^ 0x5a) as u8).collect();
		flash.store(0x0100f0, &data).unwrap();
		assert_eq!(flash.read(0x0100f0, data.len()).unwrap(), data);
		assert_eq!(flash.read(0x0100ef, 1).unwrap(), vec![0xff]);
	}

	#[test]
	fn write_enable_before_each_page_program() {
		let mut flash = flash();
		flash.store(0xf0, &[0u8; 300]).unwrap();
		// 0xf0..0x100, 0x100..0x200, 0x200..0x21c
		let expected = [
			COMMAND_READ_STATUS_REG_1, COMMAND_READ_STATUS_REG_2, COMMAND_WRITE_ENABLE, COMMAND_PAGE_PROGRAM,
			COMMAND_READ_STATUS_REG_1, COMMAND_READ_STATUS_REG_2, COMMAND_WRITE_ENABLE, COMMAND_PAGE_PROGRAM,
			COMMAND_READ_STATUS_REG_1, COMMAND_READ_STATUS_REG_2, COMMAND_WRITE_ENABLE, COMMAND_PAGE_PROGRAM,
		];
		assert_eq!(flash.transport().opcodes(), &expected[..]);
		assert!(flash.transport().memory()[0xf0..0xf0 + 300].iter().all(|b| *b == 0));
	}

	#[test]
	fn no_write_enable_when_latch_already_set() {
		let mut flash = flash();
		flash.transport().set_write_enabled(true);
		flash.store(0, &[1, 2, 3]).unwrap();
		assert_eq!(flash.transport().opcodes(), &[
			COMMAND_READ_STATUS_REG_1, COMMAND_READ_STATUS_REG_2, COMMAND_PAGE_PROGRAM,
		][..]);
		assert_eq!(&flash.transport().memory()[..3], &[1, 2, 3]);
	}

	#[test]
	fn single_interlock_check() {
		let mut flash = flash().with_interlock(Interlock::Once);
		flash.store(0xf0, &[0u8; 32]).unwrap();
		assert_eq!(flash.transport().opcodes(), &[
			COMMAND_READ_STATUS_REG_1, COMMAND_READ_STATUS_REG_2,
			COMMAND_WRITE_ENABLE, COMMAND_PAGE_PROGRAM,
			COMMAND_WRITE_ENABLE, COMMAND_PAGE_PROGRAM,
		][..]);
	}

	#[test]
	fn single_interlock_check_with_latch_set() {
		let mut flash = flash().with_interlock(Interlock::Once);
		flash.transport().set_write_enabled(true);
		flash.store(0xf0, &[0u8; 32]).unwrap();
		assert_eq!(flash.transport().opcodes(), &[
			COMMAND_READ_STATUS_REG_1, COMMAND_READ_STATUS_REG_2,
			COMMAND_PAGE_PROGRAM,
			COMMAND_WRITE_ENABLE, COMMAND_PAGE_PROGRAM,
		][..]);
		assert!(flash.transport().memory()[0xf0..0x110].iter().all(|b| *b == 0));
	}

	#[test]
	fn empty_requests_send_nothing() {
		for interlock in [Interlock::EveryCommand, Interlock::Once].iter() {
			let mut flash = flash().with_interlock(*interlock);
			assert_eq!(flash.read(0x1000, 0).unwrap(), Vec::<u8>::new());
			flash.store(0x1000, &[]).unwrap();
			assert!(flash.transport().opcodes().is_empty());
		}
		assert!(flash().read(8 * 1024 * 1024, 1).is_err());
	}

	#[test]
	fn open_rejects_short_addresses() {
		assert!(Flash::open(SimFlash::new(&W25Q64FV), crate::planner::AT24C256).is_err());
		assert!(Flash::open(SimFlash::new(&W25Q32FV), W25Q32FV).is_ok());
	}

	#[test]
	fn busy_device_is_not_touched() {
		let mut flash = flash();
		flash.transport().set_busy(true);

		assert!(is_busy_error(&flash.store(0, &[0u8; 4]).unwrap_err()));
		assert!(is_busy_error(&flash.erase(EraseCommand::Sector, 0).unwrap_err()));
		assert!(is_busy_error(&flash.read(0, 4).unwrap_err()));
		assert!(flash.transport().opcodes().iter().all(|op| *op == COMMAND_READ_STATUS_REG_1 || *op == COMMAND_READ_STATUS_REG_2));

		flash.transport().set_busy(false);
		flash.store(0, &[0u8; 4]).unwrap();
	}

	#[test]
	fn out_of_range_is_checked_first() {
		let mut flash = Flash::open(Recorder::new(SimFlash::new(&W25Q32FV)), W25Q32FV).unwrap();
		let capacity = 4 * 1024 * 1024;
		let err = flash.read(capacity - 4, 5).unwrap_err();
		match DeviceError::kind_of(&err) {
			Some(DeviceError::OutOfRange { .. }) => (),
			other => panic!("unexpected error {:?}", other),
		}
		assert!(flash.store(capacity - 4, &[0u8; 5]).is_err());
		assert!(flash.erase(EraseCommand::Block64K, capacity).is_err());
		assert!(flash.transport().exchanges().is_empty());
		assert_eq!(flash.read(capacity - 4, 4).unwrap(), vec![0xff; 4]);
	}

	#[test]
	fn read_frames() {
		let mut flash = Flash::w25q64fv(Recorder::new(SimFlash::new(&W25Q64FV)));
		flash.read(0x123456, 9000).unwrap();
		let reads: Vec<Exchange> = flash.transport().exchanges().iter()
			.filter(|e| e.out[0] == COMMAND_READ)
			.cloned()
			.collect();
		assert_eq!(reads, vec![
			Exchange { out: vec![COMMAND_READ, 0x12, 0x34, 0x56], read_len: 4096 },
			Exchange { out: vec![COMMAND_READ, 0x12, 0x44, 0x56], read_len: 4096 },
			Exchange { out: vec![COMMAND_READ, 0x12, 0x54, 0x56], read_len: 808 },
		]);
	}

	#[test]
	fn erase_sector() {
		let mut flash = flash();
		flash.transport().memory_mut()[0x1000..0x3000].iter_mut().for_each(|b| *b = 0);
		flash.erase(EraseCommand::Sector, 0x1234).unwrap();
		let memory = flash.transport().memory();
		assert!(memory[0x1000..0x2000].iter().all(|b| *b == 0xff));
		assert!(memory[0x2000..0x3000].iter().all(|b| *b == 0));
	}

	#[test]
	fn chip_erase_ignores_address() {
		let mut flash = Flash::w25q64fv(Recorder::new(SimFlash::new(&W25Q64FV)));
		flash.erase(EraseCommand::Chip, 0xffff_ffff).unwrap();
		let last = flash.transport().exchanges().last().cloned().unwrap();
		assert_eq!(last, Exchange { out: vec![COMMAND_ERASE_CHIP], read_len: 0 });
	}

	#[test]
	fn pages() {
		let flash = flash();
		assert_eq!(flash.calculate_pages(0, &[0u8; 256]).unwrap(), 1);
		assert_eq!(flash.calculate_pages(0xff, &[0u8; 2]).unwrap(), 2);
		assert_eq!(flash.calculate_pages(0x80, &[0u8; 300]).unwrap(), 2);
		assert!(flash.calculate_pages(8 * 1024 * 1024 - 1, &[0u8; 2]).is_err());
	}

	#[test]
	fn identification() {
		let mut flash = flash();
		let info = flash.info().unwrap();
		assert_eq!(info.manufacturer, 0xef);
		assert_eq!(info.device_id, 0x16);
		assert_eq!(info.memory_type, 0x40);
		assert_eq!(info.capacity, 8 * 1024 * 1024);
		assert_eq!(info.unique_id, [0xd2, 0x63, 0x48, 0x39, 0x47, 0x2b, 0x1d, 0x27]);
		assert!(info.to_string().contains("unique id 0xd2634839472b1d27"));
	}

	#[test]
	fn status_formatting() {
		let status = Status([STATUS_BUSY | STATUS_WEL | 0x04, 0x02]);
		assert!(status.is_busy());
		assert!(status.is_write_enabled());
		assert_eq!(status.block_protect(), 1);
		assert_eq!(format!("{:?}", status), "SR1 0x07 SR2 0x02 (BP: 1 [BUSY] [WEL])");
	}

	#[test]
	fn erase_opcodes() {
		for cmd in [EraseCommand::Sector, EraseCommand::Block32K, EraseCommand::Block64K, EraseCommand::Chip].iter() {
			assert_eq!(EraseCommand::from_opcode(cmd.opcode()), Some(*cmd));
		}
		assert_eq!(EraseCommand::from_opcode(COMMAND_ERASE_CHIP_ALT), Some(EraseCommand::Chip));
		assert_eq!(EraseCommand::from_opcode(COMMAND_READ), None);
	}

	#[test]
	fn protocol_failure_mid_write() {
		let mut sim = SimFlash::new(&W25Q64FV);
		// status (2) + write enable + program for the first page, then fail
		sim.fail_after(4);
		let mut flash = Flash::w25q64fv(sim);
		let err = flash.store(0, &[0u8; 512]).unwrap_err();
		match DeviceError::kind_of(&err) {
			Some(DeviceError::Protocol(_)) => (),
			other => panic!("unexpected error {:?}", other),
		}
		let memory = flash.transport().memory();
		assert!(memory[..256].iter().all(|b| *b == 0));
		assert!(memory[256..512].iter().all(|b| *b == 0xff));
	}
}
