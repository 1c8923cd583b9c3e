#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

macro_rules! with_context {
	(( $fmt:tt $($t:tt)* ), $e:expr) => {{
		use failure::Error;

		match (|| { $e })() {
			Ok(v) => Ok(v),
			Err(e) => {
				let e: Error = e;
				let msg = format!(concat!($fmt, ": {}") $($t)*, e);
				Err(Error::from(e.context(msg)))
			}
		}
	}};

	($msg:expr, $e:expr) => {
		with_context!(("{}", $msg), $e)
	};
}

pub type AResult<T> = Result<T, failure::Error>;

mod error;

pub mod at24c;
pub mod planner;
pub mod transport;
pub mod w25q;

pub use self::error::DeviceError;

/// Parse a decimal or `0x`-prefixed hexadecimal number
pub fn parse_number(s: &str) -> AResult<u64> {
	let s = s.trim();
	let parsed = if s.starts_with("0x") || s.starts_with("0X") {
		u64::from_str_radix(&s[2..], 16)
	} else {
		s.parse::<u64>()
	};
	with_context!(("invalid number {:?}", s), parsed.map_err(failure::Error::from))
}
