//! Bounds-checked view over a USB device descriptor.
//!
//! The record is interpreted in place inside a caller's read buffer; it is
//! never copied or allocated. Multi-byte fields are little-endian.

/// `sizeof(struct usb_device_descriptor)`
pub const DESCRIPTOR_LEN: usize = 18;

pub const OFFSET_ID_VENDOR: usize = 8;
pub const OFFSET_ID_PRODUCT: usize = 10;

/// Value written over the identifying fields.
pub const SPOOF_ID: u16 = 0xffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("short descriptor: {len} of 18 bytes")]
    Short { len: usize },
}

pub struct DeviceDescriptor<'a> {
    bytes: &'a mut [u8],
}

impl<'a> DeviceDescriptor<'a> {
    /// View the leading record of `buf`. Bytes past the record are ignored.
    pub fn new(buf: &'a mut [u8]) -> Result<Self, RecordError> {
        if buf.len() < DESCRIPTOR_LEN {
            return Err(RecordError::Short { len: buf.len() });
        }
        Ok(Self {
            bytes: &mut buf[..DESCRIPTOR_LEN],
        })
    }

    fn u16_at(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.bytes[offset], self.bytes[offset + 1]])
    }

    fn set_u16_at(&mut self, offset: usize, value: u16) {
        self.bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    pub fn id_vendor(&self) -> u16 {
        self.u16_at(OFFSET_ID_VENDOR)
    }

    pub fn id_product(&self) -> u16 {
        self.u16_at(OFFSET_ID_PRODUCT)
    }

    pub fn set_id_vendor(&mut self, value: u16) {
        self.set_u16_at(OFFSET_ID_VENDOR, value);
    }

    pub fn set_id_product(&mut self, value: u16) {
        self.set_u16_at(OFFSET_ID_PRODUCT, value);
    }

    /// Overwrite idVendor and idProduct with [`SPOOF_ID`]; nothing else changes.
    pub fn anonymize(&mut self) {
        self.set_id_vendor(SPOOF_ID);
        self.set_id_product(SPOOF_ID);
    }
}
