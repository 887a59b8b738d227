//! Network access: the request/response model and the `Network` seam.

mod client;
#[cfg(test)]
pub mod testing;
mod types;

pub use client::{HttpClient, Network};
pub use types::{Headers, Request, Response};
