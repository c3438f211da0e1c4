pub mod fd_table;

pub use fd_table::FdTable;
