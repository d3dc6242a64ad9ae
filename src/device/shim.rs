use super::{
	EepromEvent,
	Staged,
	State,
	VirtualEeprom,
};
use crate::bus::{
	BusEvent,
	TargetBus,
};

// first bytes of every write: the new address, big endian
const ADDRESS_LEN: usize = 2;

impl VirtualEeprom {
	/// Handle the next event reported by the bus peripheral.
	///
	/// Bound violations on the bus truncate or drop the transaction, peripheral
	/// errors are logged; the device stays usable either way. A completion is
	/// only served if the peripheral accepted a buffer for it.
	pub fn handle_bus_event<B: ?Sized + TargetBus>(&self, bus: &mut B, event: BusEvent) {
		let mut notification = None;
		{
			let mut guard = self.lock_transaction();
			let tx = &mut *guard;
			let size = self.config.size as usize;

			match event {
				BusEvent::WriteRequested => {
					tx.state = State::Operation;
					tx.staged = match bus.rx_prepare(tx.scratch.len()) {
						Ok(()) => Some(Staged::Rx),
						Err(e) => {
							error!("Failed to prepare receive buffer: {}", e);
							None
						},
					};
				},
				BusEvent::WriteDone { rx_amount } => {
					if tx.staged.take() != Some(Staged::Rx) {
						warn!("Write of {} bytes without receive buffer, dropped", rx_amount);
						return;
					}

					let taken = bus.rx_take(&mut tx.scratch);
					let write_len = rx_amount.min(taken).min(tx.scratch.len());
					if write_len < ADDRESS_LEN {
						warn!("Write of {} bytes too short for an address, ignored", write_len);
						return;
					}

					let new_address = u16::from_be_bytes([tx.scratch[0], tx.scratch[1]]);
					if new_address as usize >= size {
						error!("Address 0x{:04x} exceeds size 0x{:04x}", new_address, size);
						return;
					}

					tx.cursor = new_address;
					debug!("Set address to 0x{:04x}", tx.cursor);

					if write_len > ADDRESS_LEN {
						let requested = write_len - ADDRESS_LEN;
						let data_len = self.store.write_truncated(tx.cursor, &tx.scratch[ADDRESS_LEN..write_len]);
						if data_len < requested {
							debug!("Dropped {} bytes beyond end of device", requested - data_len);
						}
						debug!("Written {} bytes @ 0x{:04x}", data_len, tx.cursor);

						notification = Some((EepromEvent::Write, tx.cursor, data_len as u16));
						tx.cursor += data_len as u16;
					}
				},
				BusEvent::ReadRequested => {
					tx.state = State::Operation;
					let max_read_len = self.store.read_truncated(tx.cursor, &mut tx.scratch);
					tx.staged = match bus.tx_prepare(&tx.scratch[..max_read_len]) {
						Ok(()) => Some(Staged::Tx(max_read_len)),
						Err(e) => {
							error!("Failed to prepare transmit buffer: {}", e);
							None
						},
					};
				},
				BusEvent::ReadDone { tx_amount } => {
					tx.state = State::Idle;
					let offered = match tx.staged.take() {
						Some(Staged::Tx(offered)) => offered,
						_ => {
							warn!("Read of {} bytes without transmit buffer, dropped", tx_amount);
							return;
						},
					};

					let read_len = if tx_amount > offered {
						warn!("Peripheral reports {} bytes read, only {} were offered", tx_amount, offered);
						offered
					} else {
						tx_amount
					};
					debug!("Read {} bytes @ 0x{:04x}", read_len, tx.cursor);

					notification = Some((EepromEvent::Read, tx.cursor, read_len as u16));
					tx.cursor += read_len as u16;
				},
				BusEvent::Error(kind) => {
					error!("Bus {}", kind);
					tx.staged = None;
					tx.state = State::Idle;
				},
			}
		}

		if let Some((event, address, len)) = notification {
			self.notify(event, address, len);
		}
	}
}

#[cfg(test)]
mod test {
	use std::sync::{
		Arc,
		Mutex,
	};
	use std::thread;

	use crate::bus::{
		BusConfig,
		BusEvent,
		TargetBus,
	};
	use crate::config::DeviceConfig;
	use crate::device::{
		EepromEvent,
		State,
		VirtualEeprom,
	};
	use crate::error::{
		EepromError,
		PeripheralErrorKind,
	};
	use crate::sim::{
		Controller,
		SimulatedBus,
	};

	type Events = Arc<Mutex<Vec<(EepromEvent, u16, u16)>>>;

	// peripheral whose buffer preparation can be made to fail
	#[derive(Default)]
	struct FailingBus {
		fail_rx: bool,
		fail_tx: bool,
		incoming: Vec<u8>,
	}

	impl TargetBus for FailingBus {
		fn enable(&mut self, _config: &BusConfig) -> crate::AResult<()> {
			Ok(())
		}

		fn rx_prepare(&mut self, _max_len: usize) -> crate::AResult<()> {
			if self.fail_rx {
				bail!("no receive buffer");
			}
			Ok(())
		}

		fn rx_take(&mut self, buffer: &mut [u8]) -> usize {
			let n = self.incoming.len().min(buffer.len());
			buffer[..n].copy_from_slice(&self.incoming[..n]);
			n
		}

		fn tx_prepare(&mut self, _buffer: &[u8]) -> crate::AResult<()> {
			if self.fail_tx {
				bail!("no transmit buffer");
			}
			Ok(())
		}
	}

	// peripheral filling its own receive buffer after rx_prepare returned,
	// like DMA finishing in the background
	#[derive(Default)]
	struct DeferredBus {
		capacity: Option<usize>,
		received: Vec<u8>,
	}

	impl DeferredBus {
		fn clock_in(&mut self, data: &[u8]) -> usize {
			let n = self.capacity.map_or(0, |c| c.min(data.len()));
			self.received = data[..n].to_vec();
			n
		}
	}

	impl TargetBus for DeferredBus {
		fn enable(&mut self, _config: &BusConfig) -> crate::AResult<()> {
			Ok(())
		}

		fn rx_prepare(&mut self, max_len: usize) -> crate::AResult<()> {
			self.capacity = Some(max_len);
			self.received.clear();
			Ok(())
		}

		fn rx_take(&mut self, buffer: &mut [u8]) -> usize {
			self.capacity = None;
			let n = self.received.len().min(buffer.len());
			buffer[..n].copy_from_slice(&self.received[..n]);
			n
		}

		fn tx_prepare(&mut self, _buffer: &[u8]) -> crate::AResult<()> {
			Ok(())
		}
	}

	fn device(size: u16) -> (VirtualEeprom, Events) {
		let mut config = DeviceConfig::default();
		config.size = size;
		let dev = VirtualEeprom::new(config).unwrap();
		let events: Events = Arc::new(Mutex::new(Vec::new()));
		let e = events.clone();
		dev.set_event_handler(move |ev, addr, len| e.lock().unwrap().push((ev, addr, len)));
		(dev, events)
	}

	fn take(events: &Events) -> Vec<(EepromEvent, u16, u16)> {
		std::mem::replace(&mut *events.lock().unwrap(), Vec::new())
	}

	#[test]
	fn concrete_scenario() {
		let (dev, events) = device(16);
		let mut ctrl = Controller::attach(&dev).unwrap();

		dev.write(0, &[0xca, 0xfe, 0xba, 0xbe]).unwrap();
		assert_eq!(dev.read(0, 4).unwrap(), vec![0xca, 0xfe, 0xba, 0xbe]);

		assert_eq!(ctrl.write_transaction(&[0x00, 0x02, 0x11, 0x22]).unwrap(), 4);
		assert_eq!(&dev.snapshot()[2..4], &[0x11, 0x22]);
		assert_eq!(take(&events), vec![(EepromEvent::Write, 2, 2)]);
		assert_eq!(dev.cursor(), 4);

		let data = ctrl.read_transaction(16).unwrap();
		assert_eq!(data.len(), 12);
		assert_eq!(&data[..], &dev.snapshot()[4..16]);
		assert_eq!(take(&events), vec![(EepromEvent::Read, 4, 12)]);
		assert_eq!(dev.cursor(), 16);
		assert_eq!(dev.state(), State::Idle);
	}

	#[test]
	fn address_only_write_seeks() {
		let (dev, events) = device(16);
		dev.load(0, &(0u8..16).collect::<Vec<_>>());
		let mut ctrl = Controller::attach(&dev).unwrap();

		ctrl.write_transaction(&[0x00, 0x09]).unwrap();
		assert_eq!(dev.cursor(), 9);
		assert!(take(&events).is_empty());
		assert_eq!(dev.snapshot(), (0u8..16).collect::<Vec<_>>());

		assert_eq!(ctrl.read_transaction(3).unwrap(), vec![9, 10, 11]);
		assert_eq!(take(&events), vec![(EepromEvent::Read, 9, 3)]);
		assert_eq!(dev.cursor(), 12);
	}

	#[test]
	fn write_with_data_advances_cursor() {
		let (dev, events) = device(32);
		let mut ctrl = Controller::attach(&dev).unwrap();

		ctrl.write_transaction(&[0x00, 0x10, 0xd0, 0xd1, 0xd2]).unwrap();
		assert_eq!(&dev.snapshot()[0x10..0x13], &[0xd0, 0xd1, 0xd2]);
		assert_eq!(take(&events), vec![(EepromEvent::Write, 0x10, 3)]);
		assert_eq!(dev.cursor(), 0x13);

		// reads continue where the write stopped
		dev.write(0x13, &[0x42]).unwrap();
		assert_eq!(ctrl.read_transaction(1).unwrap(), vec![0x42]);
	}

	#[test]
	fn write_truncated_at_end() {
		let (dev, events) = device(16);
		let mut ctrl = Controller::attach(&dev).unwrap();

		ctrl.write_transaction(&[0x00, 0x0c, 1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
		let contents = dev.snapshot();
		assert_eq!(&contents[12..16], &[1, 2, 3, 4]);
		assert!(contents[..12].iter().all(|&b| b == 0));
		assert_eq!(take(&events), vec![(EepromEvent::Write, 12, 4)]);
		assert_eq!(dev.cursor(), 16);

		// nothing left to read at the end of the device
		assert!(ctrl.read_transaction(4).unwrap().is_empty());
		assert_eq!(take(&events), vec![(EepromEvent::Read, 16, 0)]);
		assert_eq!(dev.cursor(), 16);
	}

	#[test]
	fn write_larger_than_scratch_clipped() {
		let (dev, events) = device(8);
		let mut ctrl = Controller::attach(&dev).unwrap();

		// only 8 bytes fit the receive buffer: 2 address + 6 data
		assert_eq!(ctrl.write_transaction(&[0x00, 0x01, 1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap(), 8);
		assert_eq!(dev.snapshot(), vec![0, 1, 2, 3, 4, 5, 6, 0]);
		assert_eq!(take(&events), vec![(EepromEvent::Write, 1, 6)]);
		assert_eq!(dev.cursor(), 7);
	}

	#[test]
	fn address_overflow_rejected() {
		let (dev, events) = device(16);
		let mut ctrl = Controller::attach(&dev).unwrap();
		ctrl.write_transaction(&[0x00, 0x05]).unwrap();

		for header in &[[0x00u8, 0x10], [0x01, 0x00], [0xff, 0xff]] {
			let mut tx = header.to_vec();
			tx.extend_from_slice(&[0xaa, 0xbb]);
			ctrl.write_transaction(&tx).unwrap();
			assert_eq!(dev.snapshot(), vec![0u8; 16]);
			assert!(take(&events).is_empty());
			assert_eq!(dev.cursor(), 5);
		}
	}

	#[test]
	fn short_write_ignored() {
		let (dev, events) = device(16);
		let mut ctrl = Controller::attach(&dev).unwrap();
		ctrl.write_transaction(&[0x00, 0x03]).unwrap();

		ctrl.write_transaction(&[0x00]).unwrap();
		ctrl.write_transaction(&[]).unwrap();
		assert_eq!(dev.cursor(), 3);
		assert!(take(&events).is_empty());
	}

	#[test]
	fn events_in_completion_order() {
		let (dev, events) = device(64);
		let mut ctrl = Controller::attach(&dev).unwrap();

		ctrl.write(0x00, &[1, 2, 3, 4]).unwrap();
		ctrl.read(0x01, 2).unwrap();
		ctrl.write(0x20, &[5]).unwrap();
		ctrl.read_transaction(5).unwrap();
		ctrl.seek(0x30).unwrap();
		ctrl.write(0x3e, &[6, 7, 8]).unwrap();

		assert_eq!(take(&events), vec![
			(EepromEvent::Write, 0x00, 4),
			(EepromEvent::Read, 0x01, 2),
			(EepromEvent::Write, 0x20, 1),
			(EepromEvent::Read, 0x21, 5),
			(EepromEvent::Write, 0x3e, 2),
		]);
		assert_eq!(dev.cursor(), 0x40);
	}

	#[test]
	fn peripheral_errors_not_sticky() {
		let (dev, events) = device(16);
		let mut ctrl = Controller::attach(&dev).unwrap();
		ctrl.write(0, &[7, 8, 9]).unwrap();
		take(&events);

		ctrl.bus_mut().fail_next(PeripheralErrorKind::Read);
		assert_eq!(ctrl.read(0, 3).unwrap_err(), EepromError::Peripheral(PeripheralErrorKind::Read));
		assert_eq!(dev.state(), State::Idle);
		assert!(take(&events).is_empty());

		assert_eq!(ctrl.read(0, 3).unwrap(), vec![7, 8, 9]);
		assert_eq!(take(&events), vec![(EepromEvent::Read, 0, 3)]);
	}

	#[test]
	fn read_done_clamped_to_device() {
		let (dev, events) = device(16);
		let mut bus = SimulatedBus::new();
		dev.attach(&mut bus).unwrap();
		bus.set_incoming(&[0x00, 0x0e]);
		dev.handle_bus_event(&mut bus, BusEvent::WriteRequested);
		dev.handle_bus_event(&mut bus, BusEvent::WriteDone { rx_amount: 2 });
		dev.handle_bus_event(&mut bus, BusEvent::ReadRequested);
		assert_eq!(bus.offered().len(), 2);
		dev.handle_bus_event(&mut bus, BusEvent::ReadDone { tx_amount: 10 });
		assert_eq!(dev.cursor(), 16);
		assert_eq!(take(&events), vec![(EepromEvent::Read, 14, 2)]);
	}

	#[test]
	fn state_tracks_transactions() {
		let (dev, _) = device(16);
		let mut bus = SimulatedBus::new();
		dev.attach(&mut bus).unwrap();

		dev.handle_bus_event(&mut bus, BusEvent::ReadRequested);
		assert_eq!(dev.state(), State::Operation);
		dev.handle_bus_event(&mut bus, BusEvent::ReadDone { tx_amount: 1 });
		assert_eq!(dev.state(), State::Idle);

		dev.handle_bus_event(&mut bus, BusEvent::WriteRequested);
		assert_eq!(dev.state(), State::Operation);
		dev.handle_bus_event(&mut bus, BusEvent::Error(PeripheralErrorKind::General));
		assert_eq!(dev.state(), State::Idle);
	}

	#[test]
	fn handler_may_access_device() {
		let mut config = DeviceConfig::default();
		config.size = 16;
		let dev = Arc::new(VirtualEeprom::new(config).unwrap());
		let seen = Arc::new(Mutex::new(Vec::new()));

		let (d, s) = (Arc::downgrade(&dev), seen.clone());
		dev.set_event_handler(move |_, addr, len| {
			if let Some(d) = d.upgrade() {
				s.lock().unwrap().push((d.read(addr, len).unwrap(), d.cursor()));
			}
		});

		let mut ctrl = Controller::attach(&*dev).unwrap();
		ctrl.write(3, &[0xab, 0xcd]).unwrap();
		assert_eq!(*seen.lock().unwrap(), vec![(vec![0xab, 0xcd], 5)]);
	}

	#[test]
	fn api_concurrent_with_bus() {
		let (dev, _) = device(64);
		let dev = Arc::new(dev);

		let writer = {
			let dev = dev.clone();
			thread::spawn(move || {
				for round in 0..200u32 {
					dev.write(0, &[round as u8; 16]).unwrap();
				}
			})
		};

		let mut ctrl = Controller::attach(&*dev).unwrap();
		for round in 0..200u32 {
			ctrl.write(32, &[round as u8; 16]).unwrap();
			let block = ctrl.read(0, 16).unwrap();
			// each synchronous write lands as a whole
			assert!(block.iter().all(|&b| b == block[0]));
		}
		writer.join().unwrap();

		let contents = dev.snapshot();
		assert!(contents[..16].iter().all(|&b| b == 199));
		assert!(contents[32..48].iter().all(|&b| b == 199));
	}

	#[test]
	fn failed_prepare_drops_transaction() {
		let (dev, events) = device(16);
		dev.write(0, &[0x00, 0x03, 0x77]).unwrap();
		let mut bus = FailingBus {
			fail_rx: true,
			fail_tx: true,
			incoming: vec![0x00, 0x03, 0x77],
		};

		dev.handle_bus_event(&mut bus, BusEvent::ReadRequested);
		dev.handle_bus_event(&mut bus, BusEvent::ReadDone { tx_amount: 0 });
		dev.handle_bus_event(&mut bus, BusEvent::ReadRequested);
		dev.handle_bus_event(&mut bus, BusEvent::ReadDone { tx_amount: 4 });
		assert_eq!(dev.cursor(), 0);
		assert_eq!(dev.state(), State::Idle);

		// receive buffer still holds the bytes of the read above
		dev.handle_bus_event(&mut bus, BusEvent::WriteRequested);
		dev.handle_bus_event(&mut bus, BusEvent::WriteDone { rx_amount: 3 });

		assert!(take(&events).is_empty());
		assert_eq!(dev.cursor(), 0);
		let mut expected = vec![0u8; 16];
		expected[..3].copy_from_slice(&[0x00, 0x03, 0x77]);
		assert_eq!(dev.snapshot(), expected);

		// the same peripheral works again once preparing succeeds
		bus.fail_rx = false;
		dev.handle_bus_event(&mut bus, BusEvent::WriteRequested);
		dev.handle_bus_event(&mut bus, BusEvent::WriteDone { rx_amount: 3 });
		assert_eq!(take(&events), vec![(EepromEvent::Write, 3, 1)]);
		assert_eq!(dev.cursor(), 4);
	}

	#[test]
	fn failed_rx_prepare_ignores_stale_read() {
		let (dev, events) = device(16);
		dev.write(0, &[0x00, 0x03, 0x77]).unwrap();
		let mut bus = FailingBus {
			fail_rx: true,
			fail_tx: false,
			incoming: Vec::new(),
		};

		// the read stages [00 03 77 ..] in the scratch buffer
		dev.handle_bus_event(&mut bus, BusEvent::ReadRequested);
		dev.handle_bus_event(&mut bus, BusEvent::ReadDone { tx_amount: 0 });
		assert_eq!(take(&events), vec![(EepromEvent::Read, 0, 0)]);

		dev.handle_bus_event(&mut bus, BusEvent::WriteRequested);
		dev.handle_bus_event(&mut bus, BusEvent::WriteDone { rx_amount: 3 });

		assert!(take(&events).is_empty());
		assert_eq!(dev.cursor(), 0);
		assert_eq!(dev.read(0, 4).unwrap(), vec![0x00, 0x03, 0x77, 0x00]);
	}

	#[test]
	fn done_without_request_ignored() {
		let (dev, events) = device(16);
		let mut bus = SimulatedBus::new();
		dev.attach(&mut bus).unwrap();
		bus.set_incoming(&[0x00, 0x05, 0xee]);

		dev.handle_bus_event(&mut bus, BusEvent::WriteDone { rx_amount: 3 });
		dev.handle_bus_event(&mut bus, BusEvent::ReadDone { tx_amount: 2 });
		assert!(take(&events).is_empty());
		assert_eq!(dev.cursor(), 0);
		assert_eq!(dev.snapshot(), vec![0u8; 16]);

		// one done per request
		dev.handle_bus_event(&mut bus, BusEvent::WriteRequested);
		dev.handle_bus_event(&mut bus, BusEvent::WriteDone { rx_amount: 3 });
		dev.handle_bus_event(&mut bus, BusEvent::WriteDone { rx_amount: 3 });
		assert_eq!(take(&events), vec![(EepromEvent::Write, 5, 1)]);
		assert_eq!(dev.cursor(), 6);
	}

	#[test]
	fn done_after_error_ignored() {
		let (dev, events) = device(16);
		let mut bus = SimulatedBus::new();
		dev.attach(&mut bus).unwrap();
		bus.set_incoming(&[0x00, 0x05, 0xee]);

		dev.handle_bus_event(&mut bus, BusEvent::WriteRequested);
		dev.handle_bus_event(&mut bus, BusEvent::Error(PeripheralErrorKind::Write));
		dev.handle_bus_event(&mut bus, BusEvent::WriteDone { rx_amount: 3 });

		dev.handle_bus_event(&mut bus, BusEvent::ReadRequested);
		dev.handle_bus_event(&mut bus, BusEvent::Error(PeripheralErrorKind::Read));
		dev.handle_bus_event(&mut bus, BusEvent::ReadDone { tx_amount: 4 });

		assert!(take(&events).is_empty());
		assert_eq!(dev.cursor(), 0);
		assert_eq!(dev.state(), State::Idle);
		assert_eq!(dev.snapshot(), vec![0u8; 16]);
	}

	#[test]
	fn received_bytes_pulled_on_write_done() {
		let (dev, events) = device(16);
		dev.load(0, &(0u8..16).collect::<Vec<_>>());
		let mut bus = DeferredBus::default();

		// a read leaves its data in the scratch buffer
		dev.handle_bus_event(&mut bus, BusEvent::ReadRequested);
		dev.handle_bus_event(&mut bus, BusEvent::ReadDone { tx_amount: 3 });
		assert_eq!(take(&events), vec![(EepromEvent::Read, 0, 3)]);

		dev.handle_bus_event(&mut bus, BusEvent::WriteRequested);
		// bytes arrive only after rx_prepare returned
		let rx_amount = bus.clock_in(&[0x00, 0x08, 0x11]);
		assert_eq!(rx_amount, 3);
		dev.handle_bus_event(&mut bus, BusEvent::WriteDone { rx_amount });

		assert_eq!(take(&events), vec![(EepromEvent::Write, 8, 1)]);
		assert_eq!(dev.cursor(), 9);
		assert_eq!(dev.read(8, 1).unwrap(), vec![0x11]);
		assert_eq!(dev.read(0, 3).unwrap(), vec![0, 1, 2]);
	}

	#[test]
	fn write_done_trusts_taken_bytes() {
		let (dev, events) = device(16);
		let mut bus = DeferredBus::default();

		dev.handle_bus_event(&mut bus, BusEvent::WriteRequested);
		bus.clock_in(&[0x00, 0x02, 0xaa]);
		// peripheral claims more than it handed over
		dev.handle_bus_event(&mut bus, BusEvent::WriteDone { rx_amount: 8 });

		assert_eq!(take(&events), vec![(EepromEvent::Write, 2, 1)]);
		assert_eq!(dev.cursor(), 3);
		assert_eq!(&dev.snapshot()[2..8], &[0xaa, 0, 0, 0, 0, 0]);
	}
}
