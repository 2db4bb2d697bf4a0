//! Extension module for the tool registry.
//!
//! Reads one JSON request from stdin and answers on stdout:
//! `{"op":"describe"}` lists the route descriptors, `{"op":"invoke",...}` runs a handler.

mod imports;
mod routes;
mod runtime;

fn main() {
    runtime::serve(routes::routes());
}
