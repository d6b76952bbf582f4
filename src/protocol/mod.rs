//! The remote command protocol: reply decoding, command paths,
//! classification tables, and the dynamic namespace proxy.

pub mod namespace;
pub mod path;
pub mod response;
pub mod tables;
