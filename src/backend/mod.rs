//! Target code generation. The only target is x86-64 System V assembly in
//! AT&T syntax, fed to the system assembler by the driver.

mod x86_64;

pub use x86_64::generate_program;
