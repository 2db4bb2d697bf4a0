#![allow(unused_imports)]

pub use crate::runtime::{http_get, Params, Route, RouteError, RouteResult};
pub use serde_json::{json, Value};
