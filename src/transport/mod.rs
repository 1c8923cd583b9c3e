/// Boundary to the adapter doing the actual bus traffic.
///
/// A Bus Pirate in binary I2C or SPI mode offers a single "write then read"
/// primitive: it asserts chip select (or generates a START condition), sends
/// the given bytes, then clocks in the requested number of bytes before
/// releasing the bus. The drivers in this crate only need that primitive;
/// entering binary mode, configuring speed/pins and dealing with firmware
/// differences is up to the implementation.
///
/// For I2C the first byte sent is the device address including the R/W bit.

mod record;
pub mod sim;

pub use self::record::{
	Exchange,
	Recorder,
};

pub trait Transport {
	/// Send `out`, then read back exactly `read_len` bytes.
	fn write_then_read(&mut self, out: &[u8], read_len: usize) -> crate::AResult<Vec<u8>>;
}

impl<'a, T: ?Sized + Transport> Transport for &'a mut T {
	fn write_then_read(&mut self, out: &[u8], read_len: usize) -> crate::AResult<Vec<u8>> {
		T::write_then_read(*self, out, read_len)
	}
}

impl<T: ?Sized + Transport> Transport for Box<T> {
	fn write_then_read(&mut self, out: &[u8], read_len: usize) -> crate::AResult<Vec<u8>> {
		T::write_then_read(&mut **self, out, read_len)
	}
}

pub(crate) trait TransportExt: Transport {
	/// `write_then_read`, but turns every failure into a protocol error and
	/// checks the response length
	fn exchange(&mut self, out: &[u8], read_len: usize) -> crate::AResult<Vec<u8>> {
		let response = match self.write_then_read(out, read_len) {
			Ok(r) => r,
			Err(e) => {
				if crate::DeviceError::kind_of(&e).is_some() {
					return Err(e);
				}
				return Err(crate::DeviceError::Protocol(e.to_string()).into());
			},
		};
		if response.len() != read_len {
			return Err(crate::DeviceError::Protocol(format!(
				"expected {} response bytes, got {}", read_len, response.len()
			)).into());
		}
		Ok(response)
	}

	fn command(&mut self, out: &[u8]) -> crate::AResult<()> {
		self.exchange(out, 0)?;
		Ok(())
	}
}

impl<T: Transport + ?Sized> TransportExt for T {}
