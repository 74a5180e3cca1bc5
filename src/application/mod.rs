//! Application-level contracts: rendering, object storage, root mapping, errors.

pub mod error;
pub mod render;
pub mod roots;
pub mod storage;
