//! Prelude module for SyncSocket
//!
//! Everything needed to build and run requests.

pub use crate::request::Request;
pub use crate::response::Response;
pub use crate::{ClientConfig, CloseCode, Error, Result};

pub use std::collections::HashMap;
pub use std::time::Duration;
