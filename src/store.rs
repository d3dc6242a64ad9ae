use std::sync::{
	Mutex,
	MutexGuard,
};

use crate::error::EepromError;

/// EEPROM contents; every access copies bytes in or out under the lock.
///
/// Synchronous accesses must stay strictly below the capacity:
/// `address + len < size`.
pub struct MemoryStore {
	size: u16,
	data: Mutex<Box<[u8]>>,
}

impl MemoryStore {
	pub fn new(size: u16) -> Self {
		MemoryStore {
			size,
			data: Mutex::new(vec![0u8; size as usize].into_boxed_slice()),
		}
	}

	pub fn size(&self) -> u16 {
		self.size
	}

	// the bytes stay valid even if another holder panicked
	fn lock(&self) -> MutexGuard<'_, Box<[u8]>> {
		self.data.lock().unwrap_or_else(|e| e.into_inner())
	}

	fn check_bounds(&self, address: u16, len: usize) -> Result<(), EepromError> {
		if address as usize + len >= self.size as usize {
			error!("Data out of bounds: {} bytes @ 0x{:04x} (size 0x{:04x})", len, address, self.size);
			return Err(EepromError::OutOfBounds {
				address,
				len,
				size: self.size,
			});
		}
		Ok(())
	}

	pub fn write(&self, address: u16, src: &[u8]) -> Result<(), EepromError> {
		self.check_bounds(address, src.len())?;
		let start = address as usize;
		self.lock()[start..start + src.len()].copy_from_slice(src);
		Ok(())
	}

	pub fn read_into(&self, address: u16, dest: &mut [u8]) -> Result<(), EepromError> {
		let len = dest.len();
		self.check_bounds(address, len)?;
		let start = address as usize;
		dest.copy_from_slice(&self.lock()[start..start + len]);
		Ok(())
	}

	pub fn read(&self, address: u16, len: u16) -> Result<Vec<u8>, EepromError> {
		let mut buf = vec![0u8; len as usize];
		self.read_into(address, &mut buf)?;
		Ok(buf)
	}

	/// Copy as much of `src` as fits starting at `address`; returns the
	/// number of bytes stored.
	pub(crate) fn write_truncated(&self, address: u16, src: &[u8]) -> usize {
		let start = (address as usize).min(self.size as usize);
		let len = src.len().min(self.size as usize - start);
		self.lock()[start..start + len].copy_from_slice(&src[..len]);
		len
	}

	/// Fill `dest` from `address` up to the end of the device; returns the
	/// number of bytes copied.
	pub(crate) fn read_truncated(&self, address: u16, dest: &mut [u8]) -> usize {
		let start = (address as usize).min(self.size as usize);
		let len = dest.len().min(self.size as usize - start);
		dest[..len].copy_from_slice(&self.lock()[start..start + len]);
		len
	}

	pub fn snapshot(&self) -> Vec<u8> {
		self.lock().to_vec()
	}
}
