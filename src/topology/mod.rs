//! Topology reads and writes: service graph listing, application CRUD and bulk import.

mod query;

pub use query::TopologyQueryService;
