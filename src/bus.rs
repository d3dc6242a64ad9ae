//! Boundary to the bus peripheral (an I²C target/slave controller).
//!
//! The peripheral reports what the controller on the far side is doing as a
//! stream of [`BusEvent`]s; the device answers them through [`TargetBus`].
//! Only one transaction is on the bus at a time, the peripheral serializes
//! them.
//!
//! Received bytes stay with the peripheral until the write is done; the
//! device pulls them with [`TargetBus::rx_take`]. Data to send is copied by
//! the peripheral in [`TargetBus::tx_prepare`].

use crate::config::DeviceConfig;
use crate::error::PeripheralErrorKind;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BusEvent {
	/// controller addressed us for writing; a receive buffer is needed
	WriteRequested,
	/// controller finished writing `rx_amount` bytes into the receive buffer
	WriteDone { rx_amount: usize },
	/// controller addressed us for reading; data to send is needed
	ReadRequested,
	/// controller finished reading `tx_amount` bytes
	ReadDone { tx_amount: usize },
	Error(PeripheralErrorKind),
}

/// What the peripheral needs to listen on the bus
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BusConfig {
	pub address: u8,
	pub sda_psel: u32,
	pub scl_psel: u32,
}

impl<'a> From<&'a DeviceConfig> for BusConfig {
	fn from(config: &'a DeviceConfig) -> Self {
		BusConfig {
			address: config.address,
			sda_psel: config.sda.psel(),
			scl_psel: config.scl.psel(),
		}
	}
}

pub trait TargetBus {
	fn enable(&mut self, config: &BusConfig) -> crate::AResult<()>;

	/// accept up to `max_len` bytes with the next write by the controller
	fn rx_prepare(&mut self, max_len: usize) -> crate::AResult<()>;

	/// hand over the bytes received since `rx_prepare`; returns how many
	/// were copied into `buffer`
	///
	/// Called once per completed write, after `WriteDone`.
	fn rx_take(&mut self, buffer: &mut [u8]) -> usize;

	/// offer `buffer` as data for the next read by the controller
	fn tx_prepare(&mut self, buffer: &[u8]) -> crate::AResult<()>;
}
