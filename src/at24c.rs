/* Chip documentation: https://ww1.microchip.com/downloads/en/DeviceDoc/AT24C128C-AT24C256C-Data-Sheet-DS20006270B.pdf */

use crate::planner::{
	self,
	DeviceProfile,
	AT24C128,
	AT24C256,
};
use crate::transport::{
	Transport,
	TransportExt,
};

pub const DEFAULT_DEVICE_ADDRESS: u8 = 0x50;

/// AT24C128/256 I2C EEPROM behind a write-then-read transport
pub struct Eeprom<T: Transport> {
	transport: T,
	profile: DeviceProfile,
	// 8-bit address byte with R/W cleared
	address_byte: u8,
}

impl<T: Transport> Eeprom<T> {
	/// `device_address` is the 7-bit I2C address (without R/W bit)
	pub fn open(transport: T, profile: DeviceProfile, device_address: u8) -> crate::AResult<Self> {
		ensure!(device_address <= 0x7f, "Invalid I2C device address 0x{:02x}", device_address);
		Ok(Eeprom {
			transport,
			profile,
			address_byte: device_address << 1,
		})
	}

	/// Select the profile from the size in kbit (128 or 256)
	pub fn from_size_kbit(transport: T, size: u32, device_address: u8) -> crate::AResult<Self> {
		let profile = match size {
			128 => AT24C128,
			256 => AT24C256,
			_ => bail!("Invalid EEPROM size {} kbit (expected 128 or 256)", size),
		};
		Self::open(transport, profile, device_address)
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

	fn header(&self, address: u32) -> Vec<u8> {
		let mut header = vec![self.address_byte];
		header.extend(self.profile.address_width().encode(address));
		header
	}

	/// Write `data` starting at `address`, one page write per touched page.
	///
	/// Pages written before a failure stay written.
	pub fn store(&mut self, address: u32, data: &[u8]) -> crate::AResult<()> {
		let plan = planner::plan_write(&self.profile, address, data)?;
		for sub in plan {
			debug!("EEPROM page write @0x{:04x}: {} bytes", sub.address, sub.len);
			let mut out = self.header(sub.address);
			out.extend_from_slice(sub.payload(data));
			self.transport.command(&out)?;
		}
		Ok(())
	}

	/// Read `amount` bytes starting at `address`
	pub fn load(&mut self, address: u32, amount: usize) -> crate::AResult<Vec<u8>> {
		let plan = planner::plan_read(&self.profile, address, amount)?;
		if 0 == amount {
			return Ok(Vec::new());
		}

		// dummy write to set the address pointer
		let header = self.header(address);
		self.transport.command(&header)?;

		let read_address = [self.address_byte | 1];
		let mut result = Vec::with_capacity(amount);
		for sub in plan {
			debug!("EEPROM sequential read @0x{:04x}: {} bytes", sub.address, sub.len);
			result.extend(self.transport.exchange(&read_address, sub.len)?);
		}
		Ok(result)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::{
		sim::SimEeprom,
		Exchange,
		Recorder,
	};
	use crate::DeviceError;

	fn eeprom() -> Eeprom<Recorder<SimEeprom>> {
		let sim = SimEeprom::new(&AT24C256, DEFAULT_DEVICE_ADDRESS);
		Eeprom::open(Recorder::new(sim), AT24C256, DEFAULT_DEVICE_ADDRESS).unwrap()
	}

	#[test]
	fn store_frames() {
		let mut ee = eeprom();
		let data: Vec<u8> = (0..70).collect();
		ee.store(60, &data).unwrap();
		let ex = ee.transport().exchanges().to_vec();
		assert_eq!(ex.len(), 3);
		assert_eq!(&ex[0].out[..3], &[0xa0, 0x00, 60]);
		assert_eq!(ex[0].out.len(), 3 + 4);
		assert_eq!(&ex[1].out[..3], &[0xa0, 0x00, 64]);
		assert_eq!(ex[1].out.len(), 3 + 64);
		assert_eq!(&ex[2].out[..3], &[0xa0, 0x00, 128]);
		assert_eq!(ex[2].out.len(), 3 + 2);
		assert!(ex.iter().all(|e| e.read_len == 0));
	}

	#[test]
	fn store_then_load() {
		let mut ee = eeprom();
		let data: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();
		ee.store(0x1234, &data).unwrap();
		assert_eq!(ee.load(0x1234, data.len()).unwrap(), data);
		let sim = ee.into_transport().into_inner();
		assert_eq!(&sim.memory()[0x1234..0x1234 + 1000], &data[..]);
		assert_eq!(sim.memory()[0x1233], 0xff);
	}

	#[test]
	fn load_frames() {
		let mut ee = eeprom();
		ee.load(0x7f00, 1000).unwrap_err();
		assert!(ee.transport().exchanges().is_empty());

		ee.load(0x0102, 5000).unwrap();
		assert_eq!(ee.transport().exchanges(), &[
			Exchange { out: vec![0xa0, 0x01, 0x02], read_len: 0 },
			Exchange { out: vec![0xa1], read_len: 4096 },
			Exchange { out: vec![0xa1], read_len: 904 },
		][..]);
	}

	#[test]
	fn empty_load_sends_nothing() {
		let mut ee = eeprom();
		assert!(ee.load(0, 0).unwrap().is_empty());
		assert!(ee.transport().exchanges().is_empty());
	}

	#[test]
	fn out_of_range_sends_nothing() {
		let mut ee = eeprom();
		let err = ee.store(32760, &[0u8; 9]).unwrap_err();
		match DeviceError::kind_of(&err) {
			Some(DeviceError::OutOfRange { address: 32760, len: 9, capacity: 32768 }) => (),
			other => panic!("unexpected error {:?}", other),
		}
		assert!(ee.transport().exchanges().is_empty());
		ee.store(32759, &[0u8; 9]).unwrap();
	}

	#[test]
	fn sizes_and_addresses() {
		let sim = SimEeprom::new(&AT24C128, 0x51);
		assert!(Eeprom::from_size_kbit(SimEeprom::new(&AT24C128, 0x50), 512, 0x50).is_err());
		assert!(Eeprom::open(SimEeprom::new(&AT24C128, 0x50), AT24C128, 0x80).is_err());
		let mut ee = Eeprom::from_size_kbit(sim, 128, 0x51).unwrap();
		assert_eq!(ee.profile().capacity(), 16384);
		ee.store(16383, &[0x42]).unwrap();
		assert_eq!(ee.load(16383, 1).unwrap(), vec![0x42]);
	}

	#[test]
	fn transport_failure_aborts() {
		let mut sim = SimEeprom::new(&AT24C256, DEFAULT_DEVICE_ADDRESS);
		sim.fail_after(1);
		let mut ee = Eeprom::open(sim, AT24C256, DEFAULT_DEVICE_ADDRESS).unwrap();
		let data = [0x11u8; 128];
		let err = ee.store(0, &data).unwrap_err();
		match DeviceError::kind_of(&err) {
			Some(DeviceError::Protocol(_)) => (),
			other => panic!("unexpected error {:?}", other),
		}
		let sim = ee.into_transport();
		// first page stays written
		assert!(sim.memory()[..64].iter().all(|b| *b == 0x11));
		assert!(sim.memory()[64..128].iter().all(|b| *b == 0xff));
	}
}
