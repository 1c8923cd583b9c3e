/// Errors callers may want to tell apart.
///
/// Everything is returned wrapped in a `failure::Error`; use
/// `err.downcast_ref::<DeviceError>()` to match on the kind.
#[derive(Clone, PartialEq, Eq, Debug, Fail)]
pub enum DeviceError {
	/// requested range doesn't fit in the device; nothing was sent
	#[fail(display = "range 0x{:06x}+{} out of range for device with {} bytes", address, len, capacity)]
	OutOfRange {
		address: u64,
		len: usize,
		capacity: usize,
	},

	/// device reported BUSY before a program/erase/read; retry later
	#[fail(display = "device is busy")]
	DeviceBusy,

	/// transport failed or returned an unexpected response
	#[fail(display = "protocol error: {}", _0)]
	Protocol(String),
}

impl DeviceError {
	pub fn kind_of(e: &failure::Error) -> Option<&DeviceError> {
		e.downcast_ref::<DeviceError>()
	}
}
