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

pub mod bus;
pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod sim;
pub mod store;

pub use self::bus::{
	BusConfig,
	BusEvent,
	TargetBus,
};

pub use self::config::{
	DeviceConfig,
	Pin,
};

pub use self::control::{
	ControlClient,
	ControlHost,
};

pub use self::device::{
	EepromEvent,
	State,
	VirtualEeprom,
};

pub use self::error::{
	EepromError,
	PeripheralErrorKind,
};

/// Read a binary image from `path`, e.g. to preload a device.
pub fn read_image_file(path: &str) -> AResult<Vec<u8>> {
	use std::io::Read;

	with_context!(("couldn't read image file {}", path), {
		let mut f = std::fs::File::open(path)?;
		let mut image = Vec::new();
		f.read_to_end(&mut image)?;
		Ok(image)
	})
}
