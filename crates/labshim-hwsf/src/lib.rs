//! # libhwsf
//!
//! LD_PRELOAD library hiding all USB devices but one from a program that
//! enumerates them through sysfs: reads of
//! `/sys/bus/usb/devices/<dev>/descriptors` report idVendor and idProduct
//! as `0xffff` for every device except the one named by `HWSF_DEV`.
//!
//! ```bash
//! LD_PRELOAD=target/release/libhwsf.so \
//!     HWSF_PRG_NAME=hw_server \
//!     HWSF_DEV=id:210249A0B3C1 \
//!     hw_server ...
//! ```
//!
//! `HWSF_DEV` takes `id:<serial>`, `path:<sysfs entry>` or `num:<devnum>`.
//! `HWSF_DBG` enables debug lines in syslog under the `hwsf` ident.

use labshim_config::Variant;
use labshim_core::GlobalShim;

static SHIM: GlobalShim = GlobalShim::new(Variant::HardwareSpoof);

labshim_core::export_constructor!(SHIM);
labshim_core::export_open_family!(SHIM);
labshim_core::export_read_close!(SHIM);
