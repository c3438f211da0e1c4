// Interception logic, one module per syscall family
pub mod io;
pub mod open;
