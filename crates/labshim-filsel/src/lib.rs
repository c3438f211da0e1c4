//! # libfilsel
//!
//! LD_PRELOAD library redirecting every open of one path prefix to a fixed
//! destination file, scoped to a single program.
//!
//! ```bash
//! LD_PRELOAD=target/release/libfilsel.so \
//!     FILSEL_PROG_NAME=quartus_pgm \
//!     FILSEL_ORG_PATH=/home/lab/.jtag.conf \
//!     FILSEL_DEST_PATH=/tmp/place-3/jtag.conf \
//!     quartus_pgm ...
//! ```
//!
//! `FILSEL_DBG` enables debug lines in syslog under the `filsel` ident.

use labshim_config::Variant;
use labshim_core::GlobalShim;

static SHIM: GlobalShim = GlobalShim::new(Variant::FileSelect);

labshim_core::export_constructor!(SHIM);
labshim_core::export_open_family!(SHIM);
