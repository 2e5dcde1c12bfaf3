//! Wire types shared between the charter server and its HTTP clients.

mod api;

pub use api::*;
