//! Emulated serial EEPROM answering bus transactions.
//!
//! Like a physical I²C EEPROM the device keeps an address cursor:
//! - the first 2 bytes (big endian) of every write set the cursor; any
//!   further bytes are stored from there on
//! - reads return data starting at the cursor
//! - both advance the cursor by the number of bytes moved
//!
//! Application code accesses the contents directly with [`VirtualEeprom::read`]
//! and [`VirtualEeprom::write`], and can watch bus accesses through an event
//! handler.

use std::fmt;
use std::sync::{
	Arc,
	Mutex,
	MutexGuard,
};

use crate::bus::{
	BusConfig,
	TargetBus,
};
use crate::config::DeviceConfig;
use crate::error::EepromError;
use crate::store::MemoryStore;

mod shim;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum EepromEvent {
	Read,
	Write,
}

impl fmt::Display for EepromEvent {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			EepromEvent::Read => write!(f, "read"),
			EepromEvent::Write => write!(f, "write"),
		}
	}
}

/// Whether a bus transaction is open; diagnostic only.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum State {
	Idle,
	Operation,
}

/// Called with (event, address, length) after each completed bus access
pub type EventHandler = Arc<dyn Fn(EepromEvent, u16, u16) + Send + Sync>;

// buffer the peripheral accepted for the open transaction
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Staged {
	Rx,
	Tx(usize),
}

// touched by the bus path only; one transaction at a time
struct Transaction {
	cursor: u16,
	state: State,
	staged: Option<Staged>,
	scratch: Box<[u8]>,
}

pub struct VirtualEeprom {
	config: DeviceConfig,
	store: MemoryStore,
	transaction: Mutex<Transaction>,
	handler: Mutex<Option<EventHandler>>,
}

impl VirtualEeprom {
	pub fn new(config: DeviceConfig) -> Result<Self, EepromError> {
		config.validate()?;
		debug!("Creating virtual EEPROM @ 0x{:02x}, size 0x{:04x}", config.address, config.size);

		Ok(VirtualEeprom {
			config,
			store: MemoryStore::new(config.size),
			transaction: Mutex::new(Transaction {
				cursor: 0,
				state: State::Idle,
				staged: None,
				scratch: vec![0u8; config.size as usize].into_boxed_slice(),
			}),
			handler: Mutex::new(None),
		})
	}

	/// Bring up the bus peripheral so the device answers on its address.
	pub fn attach<B: ?Sized + TargetBus>(&self, bus: &mut B) -> Result<(), EepromError> {
		let bus_config = BusConfig::from(&self.config);
		debug!("Initializing EEPROM target: {:?}", bus_config);
		if let Err(e) = bus.enable(&bus_config) {
			error!("Error initializing bus peripheral: {}", e);
			return Err(EepromError::Configuration(format!("bus peripheral initialization failed: {}", e)));
		}
		info!("Virtual EEPROM listening @ 0x{:02x} (SDA {}, SCL {})", self.config.address, self.config.sda, self.config.scl);
		Ok(())
	}

	pub fn config(&self) -> &DeviceConfig {
		&self.config
	}

	pub fn size(&self) -> u16 {
		self.config.size
	}

	pub fn cursor(&self) -> u16 {
		self.lock_transaction().cursor
	}

	pub fn state(&self) -> State {
		self.lock_transaction().state
	}

	fn lock_transaction(&self) -> MutexGuard<'_, Transaction> {
		self.transaction.lock().unwrap_or_else(|e| e.into_inner())
	}

	fn lock_handler(&self) -> MutexGuard<'_, Option<EventHandler>> {
		self.handler.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// Replaces a previously registered handler.
	///
	/// The handler runs inline with the bus transaction completion and must
	/// not block.
	pub fn set_event_handler<F>(&self, handler: F)
	where
		F: Fn(EepromEvent, u16, u16) + Send + Sync + 'static,
	{
		*self.lock_handler() = Some(Arc::new(handler));
	}

	pub fn clear_event_handler(&self) {
		*self.lock_handler() = None;
	}

	fn notify(&self, event: EepromEvent, address: u16, len: u16) {
		// don't hold the lock while calling out; the handler may replace itself
		let handler = self.lock_handler().clone();
		if let Some(handler) = handler {
			handler(event, address, len);
		}
	}

	pub fn write(&self, address: u16, src: &[u8]) -> Result<(), EepromError> {
		self.store.write(address, src)?;
		debug!("Internally written {} bytes to 0x{:04x}", src.len(), address);
		Ok(())
	}

	pub fn read(&self, address: u16, len: u16) -> Result<Vec<u8>, EepromError> {
		self.store.read(address, len)
	}

	pub fn read_into(&self, address: u16, dest: &mut [u8]) -> Result<(), EepromError> {
		self.store.read_into(address, dest)
	}

	/// Preload contents from `offset` on, dropping what doesn't fit; returns
	/// the number of bytes stored.
	pub fn load(&self, offset: u16, image: &[u8]) -> usize {
		let stored = self.store.write_truncated(offset, image);
		if stored < image.len() {
			warn!("Image of {} bytes truncated to {} bytes @ 0x{:04x}", image.len(), stored, offset);
		}
		info!("Loaded {} bytes @ 0x{:04x}", stored, offset);
		stored
	}

	/// Copy of the whole contents
	pub fn snapshot(&self) -> Vec<u8> {
		self.store.snapshot()
	}
}

impl fmt::Debug for VirtualEeprom {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let tx = self.lock_transaction();
		f.debug_struct("VirtualEeprom")
			.field("config", &self.config)
			.field("cursor", &tx.cursor)
			.field("state", &tx.state)
			.finish()
	}
}
