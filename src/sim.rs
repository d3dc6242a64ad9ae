//! In-process bus: a simulated target peripheral, and a controller driving
//! transactions through it the way an I²C EEPROM driver on the other end of
//! the bus would.

use crate::bus::{
	BusConfig,
	BusEvent,
	TargetBus,
};
use crate::device::VirtualEeprom;
use crate::error::{
	EepromError,
	PeripheralErrorKind,
};

#[derive(Default, Debug)]
pub struct SimulatedBus {
	enabled: Option<BusConfig>,
	fail_enable: bool,
	fault: Option<PeripheralErrorKind>,
	// bytes the controller clocks in with the next write
	incoming: Vec<u8>,
	// room the target gave for the current write
	rx_capacity: Option<usize>,
	// bytes offered for the current read
	offered: Vec<u8>,
}

impl SimulatedBus {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn enabled(&self) -> Option<BusConfig> {
		self.enabled
	}

	/// make the next `enable` fail like a peripheral that doesn't come up
	pub fn fail_enable(&mut self, fail: bool) {
		self.fail_enable = fail;
	}

	/// abort the next transaction with a peripheral error
	pub fn fail_next(&mut self, kind: PeripheralErrorKind) {
		self.fault = Some(kind);
	}

	pub fn set_incoming(&mut self, data: &[u8]) {
		self.incoming = data.to_vec();
	}

	pub fn offered(&self) -> &[u8] {
		&self.offered
	}
}

impl TargetBus for SimulatedBus {
	fn enable(&mut self, config: &BusConfig) -> crate::AResult<()> {
		ensure!(!self.fail_enable, "peripheral initialization failed");
		ensure!(config.address <= 0x7f, "invalid bus address 0x{:02x}", config.address);
		self.enabled = Some(*config);
		Ok(())
	}

	fn rx_prepare(&mut self, max_len: usize) -> crate::AResult<()> {
		ensure!(self.enabled.is_some(), "peripheral not enabled");
		self.rx_capacity = Some(max_len);
		Ok(())
	}

	fn rx_take(&mut self, buffer: &mut [u8]) -> usize {
		let capacity = match self.rx_capacity.take() {
			Some(capacity) => capacity,
			None => return 0,
		};
		let n = self.incoming.len().min(capacity).min(buffer.len());
		buffer[..n].copy_from_slice(&self.incoming[..n]);
		n
	}

	fn tx_prepare(&mut self, buffer: &[u8]) -> crate::AResult<()> {
		ensure!(self.enabled.is_some(), "peripheral not enabled");
		self.offered = buffer.to_vec();
		Ok(())
	}
}

pub struct Controller<'a> {
	device: &'a VirtualEeprom,
	bus: SimulatedBus,
}

impl<'a> Controller<'a> {
	pub fn new(device: &'a VirtualEeprom, bus: SimulatedBus) -> Self {
		Controller { device, bus }
	}

	/// Bring up a fresh simulated bus for `device`.
	pub fn attach(device: &'a VirtualEeprom) -> Result<Self, EepromError> {
		let mut bus = SimulatedBus::new();
		device.attach(&mut bus)?;
		Ok(Controller { device, bus })
	}

	pub fn device(&self) -> &'a VirtualEeprom {
		self.device
	}

	pub fn bus(&self) -> &SimulatedBus {
		&self.bus
	}

	pub fn bus_mut(&mut self) -> &mut SimulatedBus {
		&mut self.bus
	}

	fn event(&mut self, event: BusEvent) {
		trace!("Bus event {:?}", event);
		self.device.handle_bus_event(&mut self.bus, event);
	}

	fn check_addressed(&mut self, request: BusEvent) -> Result<(), EepromError> {
		if self.bus.enabled.is_none() {
			// nobody listening: address NACK
			return Err(EepromError::Peripheral(PeripheralErrorKind::General));
		}
		if let Some(kind) = self.bus.fault.take() {
			self.event(request);
			self.event(BusEvent::Error(kind));
			return Err(EepromError::Peripheral(kind));
		}
		Ok(())
	}

	/// One write transaction; returns the number of bytes the target accepted.
	pub fn write_transaction(&mut self, data: &[u8]) -> Result<usize, EepromError> {
		self.bus.incoming = data.to_vec();
		self.bus.rx_capacity = None;
		self.check_addressed(BusEvent::WriteRequested)?;
		self.event(BusEvent::WriteRequested);
		let rx_amount = match self.bus.rx_capacity {
			Some(capacity) => capacity.min(data.len()),
			None => 0,
		};
		if rx_amount < data.len() {
			debug!("Receive buffer full, NACKing {} bytes", data.len() - rx_amount);
		}
		self.event(BusEvent::WriteDone { rx_amount });
		Ok(rx_amount)
	}

	/// One read transaction of up to `len` bytes; the target may offer less.
	pub fn read_transaction(&mut self, len: usize) -> Result<Vec<u8>, EepromError> {
		self.bus.offered.clear();
		self.check_addressed(BusEvent::ReadRequested)?;
		self.event(BusEvent::ReadRequested);
		let mut data = std::mem::replace(&mut self.bus.offered, Vec::new());
		data.truncate(len);
		self.event(BusEvent::ReadDone { tx_amount: data.len() });
		Ok(data)
	}

	pub fn seek(&mut self, address: u16) -> Result<(), EepromError> {
		self.write_transaction(&address.to_be_bytes())?;
		Ok(())
	}

	pub fn write(&mut self, address: u16, data: &[u8]) -> Result<(), EepromError> {
		let mut tx = Vec::with_capacity(2 + data.len());
		tx.extend_from_slice(&address.to_be_bytes());
		tx.extend_from_slice(data);
		self.write_transaction(&tx)?;
		Ok(())
	}

	pub fn read(&mut self, address: u16, len: usize) -> Result<Vec<u8>, EepromError> {
		self.seek(address)?;
		self.read_transaction(len)
	}
}
