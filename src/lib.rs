pub mod driver;
pub mod error;
pub mod parser;
pub mod report;
pub mod runner;
pub mod store;
pub mod upload;
pub mod utils;

// Re-export common items
pub use driver::list_devices;
pub use report::generate_report;
pub use runner::{run_batch, RunOptions};
