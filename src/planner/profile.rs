use std::fmt;

/// Number of address bytes sent after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AddressWidth {
	One,
	Two,
	Three,
}

impl AddressWidth {
	pub fn bytes(self) -> usize {
		match self {
			AddressWidth::One => 1,
			AddressWidth::Two => 2,
			AddressWidth::Three => 3,
		}
	}

	pub fn from_bytes(bytes: usize) -> Option<Self> {
		match bytes {
			1 => Some(AddressWidth::One),
			2 => Some(AddressWidth::Two),
			3 => Some(AddressWidth::Three),
			_ => None,
		}
	}

	/// number of addressable bytes
	pub fn limit(self) -> usize {
		1usize << (8 * self.bytes())
	}

	/// big-endian address bytes, truncated to the width
	pub fn encode(self, address: u32) -> Vec<u8> {
		match self {
			AddressWidth::One => vec![address as u8],
			AddressWidth::Two => vec![(address >> 8) as u8, address as u8],
			AddressWidth::Three => vec![(address >> 16) as u8, (address >> 8) as u8, address as u8],
		}
	}
}

/// Geometry of a memory device; doesn't change while a driver is open.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct DeviceProfile {
	page_size: usize,
	capacity: usize,
	max_transaction_size: usize,
	address_width: AddressWidth,
}

impl DeviceProfile {
	pub fn new(
		page_size: usize,
		capacity: usize,
		max_transaction_size: usize,
		address_width: AddressWidth,
	) -> crate::AResult<Self> {
		ensure!(page_size > 0, "page size must not be zero");
		ensure!(capacity > 0, "capacity must not be zero");
		ensure!(page_size <= max_transaction_size,
			"page size {} exceeds maximum transaction size {}", page_size, max_transaction_size
		);
		ensure!(capacity <= address_width.limit(),
			"capacity {} not addressable with {} address bytes", capacity, address_width.bytes()
		);
		Ok(DeviceProfile {
			page_size,
			capacity,
			max_transaction_size,
			address_width,
		})
	}

	/// Find a built-in profile by (case insensitive) name
	pub fn lookup(name: &str) -> crate::AResult<Self> {
		let name = name.to_ascii_lowercase();
		match PROFILES.iter().find(|(n, _)| *n == name) {
			Some((_, p)) => Ok(*p),
			None => bail!("unknown device {:?}, known devices: {}", name, known_names()),
		}
	}

	pub fn page_size(&self) -> usize {
		self.page_size
	}
	pub fn capacity(&self) -> usize {
		self.capacity
	}
	pub fn max_transaction_size(&self) -> usize {
		self.max_transaction_size
	}
	pub fn address_width(&self) -> AddressWidth {
		self.address_width
	}

	pub fn with_page_size(self, page_size: usize) -> crate::AResult<Self> {
		Self::new(page_size, self.capacity, self.max_transaction_size, self.address_width)
	}
	pub fn with_capacity(self, capacity: usize) -> crate::AResult<Self> {
		Self::new(self.page_size, capacity, self.max_transaction_size, self.address_width)
	}
	pub fn with_max_transaction_size(self, max_transaction_size: usize) -> crate::AResult<Self> {
		Self::new(self.page_size, self.capacity, max_transaction_size, self.address_width)
	}
}

impl fmt::Display for DeviceProfile {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f,
			"page {} bytes, capacity {} bytes, max transaction {} bytes, {} address bytes",
			self.page_size,
			self.capacity,
			self.max_transaction_size,
			self.address_width.bytes(),
		)
	}
}

// largest read a single Bus Pirate write_then_read will do
pub const BUS_PIRATE_MAX_TRANSACTION: usize = 4096;

const fn profile(page_size: usize, capacity: usize, address_width: AddressWidth) -> DeviceProfile {
	DeviceProfile {
		page_size,
		capacity,
		max_transaction_size: BUS_PIRATE_MAX_TRANSACTION,
		address_width,
	}
}

pub const AT24C128: DeviceProfile = profile(64, 16 * 1024, AddressWidth::Two);
pub const AT24C256: DeviceProfile = profile(64, 32 * 1024, AddressWidth::Two);
pub const W25Q32FV: DeviceProfile = profile(256, 4 * 1024 * 1024, AddressWidth::Three);
pub const W25Q64FV: DeviceProfile = profile(256, 8 * 1024 * 1024, AddressWidth::Three);
pub const W25Q128FV: DeviceProfile = profile(256, 16 * 1024 * 1024, AddressWidth::Three);

pub const PROFILES: [(&str, DeviceProfile); 5] = [
	("at24c128", AT24C128),
	("at24c256", AT24C256),
	("w25q32fv", W25Q32FV),
	("w25q64fv", W25Q64FV),
	("w25q128fv", W25Q128FV),
];

fn known_names() -> String {
	PROFILES.iter().map(|(n, _)| *n).collect::<Vec<_>>().join(", ")
}
