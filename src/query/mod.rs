/// Read-through query execution
///
/// This module implements the two-level read path in front of the document
/// store: query results are cached as ordered id lists, and document bodies
/// are cached separately so a partially evicted result can be repaired with
/// one targeted fetch.

mod executor;


pub use executor::QueryExecutor;
