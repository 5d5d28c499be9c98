pub mod alert;
pub mod import;
pub mod incident;
pub mod topology;

pub use alert::*;
pub use import::*;
pub use incident::*;
pub use topology::*;
