//! Host console for SD card images, built on the `sdfat` driver.

pub mod clock;
pub mod config;
pub mod console;
pub mod image;
pub mod logging;

pub use console::Console;
