use std::fmt;

use failure::Fail;

/// Errors reported by the peripheral driving the bus
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum PeripheralErrorKind {
	Read,
	Write,
	General,
}

impl fmt::Display for PeripheralErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			PeripheralErrorKind::Read => write!(f, "read error"),
			PeripheralErrorKind::Write => write!(f, "write error"),
			PeripheralErrorKind::General => write!(f, "general error"),
		}
	}
}

#[derive(Clone, PartialEq, Eq, Debug, Fail)]
pub enum EepromError {
	#[fail(display = "access of {} bytes @ 0x{:04x} out of bounds (size 0x{:04x})", len, address, size)]
	OutOfBounds {
		address: u16,
		len: usize,
		size: u16,
	},

	#[fail(display = "peripheral {}", _0)]
	Peripheral(PeripheralErrorKind),

	#[fail(display = "invalid configuration: {}", _0)]
	Configuration(String),
}

impl EepromError {
	pub fn is_out_of_bounds(&self) -> bool {
		match self {
			EepromError::OutOfBounds { .. } => true,
			_ => false,
		}
	}
}
