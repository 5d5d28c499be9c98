pub mod processor;
pub mod scanner;

pub use processor::{ProcessOutcome, TenantPassSummary, TopologyProcessor};
pub use scanner::{ScanSummary, TopologyScanner};
