//! Network side: the content origin and its HTTP client.

mod client;
mod types;

pub use client::{HttpOrigin, Origin};
pub use types::{FetchRequest, FetchResponse};

#[cfg(test)]
pub(crate) mod testing;
