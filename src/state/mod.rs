//! State module for tracking crawl progress
//!
//! `RequestState` tracks each request row of the durable queue (queued,
//! in flight, handled, failed).

mod request_state;

pub use request_state::RequestState;
