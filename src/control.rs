//! Connectivity bridge control: a small register file exposed through the
//! virtual EEPROM.
//!
//! The host owns the device and publishes register values with direct
//! writes; the client sits on the other end of the bus and polls them like
//! any other EEPROM contents.

use crate::device::VirtualEeprom;
use crate::error::EepromError;
use crate::sim::Controller;

/// One byte-wide control register
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Register {
	pub name: &'static str,
	pub address: u16,
}

/// Non-zero while the bridge's USB side is attached
pub const USB_ATTACHED: Register = Register {
	name: "usb_attached",
	address: 0x0,
};

pub struct ControlHost<'a> {
	eeprom: &'a VirtualEeprom,
}

impl<'a> ControlHost<'a> {
	pub fn new(eeprom: &'a VirtualEeprom) -> Self {
		ControlHost { eeprom }
	}

	pub fn set(&self, reg: Register, value: u8) -> Result<(), EepromError> {
		self.eeprom.write(reg.address, &[value])?;
		debug!("Set {} = {}", reg.name, value);
		Ok(())
	}

	pub fn set_usb_attached(&self, attached: bool) -> Result<(), EepromError> {
		self.set(USB_ATTACHED, attached as u8)
	}
}

pub struct ControlClient<'a> {
	controller: Controller<'a>,
}

impl<'a> ControlClient<'a> {
	pub fn new(controller: Controller<'a>) -> Self {
		ControlClient { controller }
	}

	pub fn controller_mut(&mut self) -> &mut Controller<'a> {
		&mut self.controller
	}

	pub fn get(&mut self, reg: Register) -> Result<u8, EepromError> {
		let size = self.controller.device().size();
		// the target ignores seeks past its end, the read would start elsewhere
		if reg.address >= size {
			error!("Register {} @ 0x{:04x} beyond device of size 0x{:04x}", reg.name, reg.address, size);
			return Err(EepromError::OutOfBounds {
				address: reg.address,
				len: 1,
				size,
			});
		}
		let data = self.controller.read(reg.address, 1)?;
		data.first().cloned().ok_or(EepromError::OutOfBounds {
			address: reg.address,
			len: 1,
			size,
		})
	}

	pub fn get_usb_attached(&mut self) -> Result<bool, EepromError> {
		Ok(self.get(USB_ATTACHED)? != 0)
	}
}
