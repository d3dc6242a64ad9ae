use std::fmt;
use std::str;

use crate::error::EepromError;

const PORT_COUNT: u8 = 2;
const PINS_PER_PORT: u8 = 32;

/// GPIO pin `P<port>.<pin>`
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Pin {
	pub port: u8,
	pub pin: u8,
}

impl Pin {
	pub fn new(port: u8, pin: u8) -> Self {
		Pin { port, pin }
	}

	/// Flat pin number as the peripheral expects it in its PSEL registers
	pub fn psel(&self) -> u32 {
		(self.port as u32) * (PINS_PER_PORT as u32) + (self.pin as u32)
	}
}

impl fmt::Display for Pin {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "P{}.{:02}", self.port, self.pin)
	}
}

impl str::FromStr for Pin {
	type Err = ::failure::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		// long: P0.26, short: 0.26, 1.4
		let r = if s.starts_with('P') || s.starts_with('p') { &s[1..] } else { s };

		ensure!(r.len() <= 4, "String too long for GPIO port.pin: {:?}", s);

		let mut parts = r.split('.');
		let port_s = parts.next().unwrap_or("");
		let pin_s = parts.next().ok_or_else(|| format_err!("Need a '.' in GPIO port.pin: {:?}", s))?;
		ensure!(parts.next().is_none(), "At most one '.' in GPIO port.pin: {:?}", s);
		ensure!(!port_s.is_empty() && !pin_s.is_empty(), "Empty port or pin in GPIO port.pin: {:?}", s);

		let port = with_context!(("invalid GPIO port: {}", port_s),
			Ok(port_s.parse::<u8>()?)
		)?;
		let pin = with_context!(("invalid GPIO pin: {}", pin_s),
			Ok(pin_s.parse::<u8>()?)
		)?;

		ensure!(port < PORT_COUNT, "invalid GPIO port: {} (too big)", port);
		ensure!(pin < PINS_PER_PORT, "invalid GPIO pin: {} (too big)", pin);

		Ok(Pin { port, pin })
	}
}

/// Parameters fixed when the emulated EEPROM is created
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct DeviceConfig {
	/// 7-bit address the device answers to on the bus
	pub address: u8,
	/// capacity in bytes
	pub size: u16,
	pub sda: Pin,
	pub scl: Pin,
}

impl DeviceConfig {
	pub fn new(address: u8, size: u16, sda: Pin, scl: Pin) -> Self {
		DeviceConfig { address, size, sda, scl }
	}

	pub fn validate(&self) -> Result<(), EepromError> {
		if self.address > 0x7f {
			return Err(EepromError::Configuration(format!(
				"bus address 0x{:02x} is not a 7-bit address", self.address
			)));
		}
		if self.size == 0 {
			return Err(EepromError::Configuration("size must not be zero".into()));
		}
		if self.sda == self.scl {
			return Err(EepromError::Configuration(format!(
				"SDA and SCL share pin {}", self.sda
			)));
		}
		Ok(())
	}
}

impl Default for DeviceConfig {
	fn default() -> Self {
		DeviceConfig {
			address: 0x50,
			size: 256,
			sda: Pin::new(0, 26),
			scl: Pin::new(0, 27),
		}
	}
}
