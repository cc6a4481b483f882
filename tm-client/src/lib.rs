//! Client API (C8): the thin library a benchmark driver links against to
//! publish action messages to the control bus and learn whether every
//! tracked participant handled them successfully.

pub mod client;

pub use client::Client;
