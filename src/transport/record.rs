use std::fmt;

use super::Transport;

struct Hex<'a>(&'a [u8]);

impl<'a> fmt::Display for Hex<'a> {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		const SHOWN: usize = 16;
		for (i, b) in self.0.iter().take(SHOWN).enumerate() {
			if i > 0 {
				write!(f, " ")?;
			}
			write!(f, "{:02x}", b)?;
		}
		if self.0.len() > SHOWN {
			write!(f, " .. ({} bytes)", self.0.len())?;
		}
		Ok(())
	}
}

/// One exchange as seen by a `Recorder`
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Exchange {
	pub out: Vec<u8>,
	pub read_len: usize,
}

/// Logs (and remembers) every exchange passed to the wrapped transport.
pub struct Recorder<T: Transport> {
	inner: T,
	log: Vec<Exchange>,
}

impl<T: Transport> Recorder<T> {
	pub fn new(inner: T) -> Self {
		Recorder {
			inner,
			log: Vec::new(),
		}
	}

	pub fn exchanges(&self) -> &[Exchange] {
		&self.log
	}

	pub fn clear(&mut self) {
		self.log.clear();
	}

	pub fn inner(&self) -> &T {
		&self.inner
	}

	pub fn into_inner(self) -> T {
		self.inner
	}
}

impl<T: Transport> Transport for Recorder<T> {
	fn write_then_read(&mut self, out: &[u8], read_len: usize) -> crate::AResult<Vec<u8>> {
		self.log.push(Exchange {
			out: out.to_vec(),
			read_len,
		});
		let result = self.inner.write_then_read(out, read_len);
		match &result {
			Ok(response) => trace!("write [{}] read {}: [{}]", Hex(out), read_len, Hex(response)),
			Err(e) => debug!("write [{}] read {}: failed: {}", Hex(out), read_len, e),
		}
		result
	}
}
