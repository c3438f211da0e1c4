//! Fake sysfs trees for isolated testing.
//!
//! Provides `FakeSysfs` to build a throwaway `sys/bus/usb/devices` directory
//! with per-device `descriptors`, `serial` and `devnum` attributes.
//!
//! # Usage
//!
//! ```ignore
//! use labshim_config::testing::{FakeSysfs, sample_descriptor};
//!
//! let sysfs = FakeSysfs::new()?;
//! let desc = sysfs.add_device("1-1", &sample_descriptor(0x0403, 0x6010))?;
//! sysfs.set_serial("1-1", "210249A0B3C1")?;
//! ```

use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use tempfile::TempDir;

/// Length of a USB device descriptor as exposed by sysfs.
pub const DESCRIPTOR_LEN: usize = 18;

/// USB 2.0 device descriptor with the given vendor and product ids.
pub fn sample_descriptor(id_vendor: u16, id_product: u16) -> [u8; DESCRIPTOR_LEN] {
    let vendor = id_vendor.to_le_bytes();
    let product = id_product.to_le_bytes();
    [
        18,   // bLength
        1,    // bDescriptorType
        0x00, // bcdUSB
        0x02,
        0x00, // bDeviceClass
        0x00, // bDeviceSubClass
        0x00, // bDeviceProtocol
        64,   // bMaxPacketSize0
        vendor[0],
        vendor[1],
        product[0],
        product[1],
        0x00, // bcdDevice
        0x07,
        1, // iManufacturer
        2, // iProduct
        3, // iSerialNumber
        1, // bNumConfigurations
    ]
}

/// Isolated `sys/bus/usb/devices` tree
pub struct FakeSysfs {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// `.../sys/bus/usb/devices`
    pub root: PathBuf,
}

impl FakeSysfs {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("sys/bus/usb/devices");
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            _temp_dir: temp_dir,
            root,
        })
    }

    /// Root as raw bytes with a trailing `/`, the form the scope matcher takes.
    pub fn root_prefix(&self) -> Vec<u8> {
        let mut prefix = self.root.as_os_str().as_bytes().to_vec();
        prefix.push(b'/');
        prefix
    }

    /// Scratch directory outside the device tree.
    pub fn scratch_dir(&self) -> PathBuf {
        self._temp_dir.path().to_path_buf()
    }

    /// Create `<root>/<segment>/descriptors` and return its path.
    pub fn add_device(&self, segment: &str, descriptor: &[u8]) -> anyhow::Result<PathBuf> {
        let dir = self.root.join(segment);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("descriptors");
        std::fs::write(&path, descriptor)?;
        Ok(path)
    }

    /// Write the `serial` attribute with sysfs' trailing newline.
    pub fn set_serial(&self, segment: &str, serial: &str) -> anyhow::Result<()> {
        self.write_attr(segment, "serial", serial)
    }

    /// Write the `devnum` attribute with sysfs' trailing newline.
    pub fn set_devnum(&self, segment: &str, devnum: &str) -> anyhow::Result<()> {
        self.write_attr(segment, "devnum", devnum)
    }

    fn write_attr(&self, segment: &str, name: &str, value: &str) -> anyhow::Result<()> {
        let dir = self.root.join(segment);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(name), format!("{}\n", value))?;
        Ok(())
    }

    /// Create a regular file outside the device tree.
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self._temp_dir.path().join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }
}

impl Default for FakeSysfs {
    fn default() -> Self {
        Self::new().expect("Failed to create fake sysfs")
    }
}
