//! Helpers shared by the HTTP and realtime layers.

pub mod http_utils;
