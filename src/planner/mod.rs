//! Splits transfers into sub-transactions a device (and the adapter) can
//! handle in a single exchange.
//!
//! Writes must not cross a page boundary: most serial memories wrap around
//! inside the current page and would overwrite its start. Reads stream
//! sequentially from the address pointer, so they only need to respect the
//! maximum transaction size.

mod profile;

pub use self::profile::{
	AddressWidth,
	DeviceProfile,
	BUS_PIRATE_MAX_TRANSACTION,
	PROFILES,
	AT24C128,
	AT24C256,
	W25Q32FV,
	W25Q64FV,
	W25Q128FV,
};

use crate::DeviceError;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Direction {
	Write,
	Read,
}

/// One bounded exchange with the device.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SubTransaction {
	pub address: u32,
	/// position of the chunk in the request
	pub offset: usize,
	pub len: usize,
	pub direction: Direction,
}

impl SubTransaction {
	/// The part of the request payload this sub-transaction carries
	pub fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
		&data[self.offset..self.offset + self.len]
	}
}

/// Iterator over the sub-transactions of a request, in issue order.
#[derive(Clone, Debug)]
pub struct Plan {
	address: u32,
	offset: usize,
	remaining: usize,
	direction: Direction,
	page_size: Option<usize>,
	max_len: usize,
}

impl Iterator for Plan {
	type Item = SubTransaction;

	fn next(&mut self) -> Option<Self::Item> {
		if 0 == self.remaining {
			return None;
		}
		let mut len = self.remaining.min(self.max_len);
		if let Some(page_size) = self.page_size {
			let page_slot = page_size - (self.address as usize % page_size);
			len = len.min(page_slot);
		}
		let sub = SubTransaction {
			address: self.address,
			offset: self.offset,
			len,
			direction: self.direction,
		};
		self.address += len as u32;
		self.offset += len;
		self.remaining -= len;
		Some(sub)
	}
}

fn check_range(profile: &DeviceProfile, address: u32, len: usize) -> crate::AResult<()> {
	let end = (address as u64).checked_add(len as u64);
	match end {
		Some(end) if end <= profile.capacity() as u64 => Ok(()),
		_ => Err(DeviceError::OutOfRange {
			address: address as u64,
			len,
			capacity: profile.capacity(),
		}.into()),
	}
}

/// Plan writing `data` at `address`; no chunk crosses a page boundary.
pub fn plan_write(profile: &DeviceProfile, address: u32, data: &[u8]) -> crate::AResult<Plan> {
	plan_write_len(profile, address, data.len())
}

/// Like `plan_write`, for `len` bytes of payload not at hand yet
pub fn plan_write_len(profile: &DeviceProfile, address: u32, len: usize) -> crate::AResult<Plan> {
	check_range(profile, address, len)?;
	Ok(Plan {
		address,
		offset: 0,
		remaining: len,
		direction: Direction::Write,
		page_size: Some(profile.page_size()),
		max_len: profile.max_transaction_size(),
	})
}

/// Plan reading `amount` bytes starting at `address`.
pub fn plan_read(profile: &DeviceProfile, address: u32, amount: usize) -> crate::AResult<Plan> {
	check_range(profile, address, amount)?;
	Ok(Plan {
		address,
		offset: 0,
		remaining: amount,
		direction: Direction::Read,
		page_size: None,
		max_len: profile.max_transaction_size(),
	})
}

/// Number of page writes needed to write `len` bytes at `address`
pub fn page_count(profile: &DeviceProfile, address: u32, len: usize) -> crate::AResult<usize> {
	check_range(profile, address, len)?;
	if 0 == len {
		return Ok(0);
	}
	let page_size = profile.page_size() as u64;
	let first = address as u64 / page_size;
	let last = (address as u64 + len as u64 - 1) / page_size;
	Ok((last - first + 1) as usize)
}

/// Check an erase (or other single address) target lies inside the device
pub fn check_address(profile: &DeviceProfile, address: u32) -> crate::AResult<()> {
	if (address as usize) < profile.capacity() {
		Ok(())
	} else {
		Err(DeviceError::OutOfRange {
			address: address as u64,
			len: 0,
			capacity: profile.capacity(),
		}.into())
	}
}
