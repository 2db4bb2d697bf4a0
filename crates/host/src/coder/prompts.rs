// crates/host/src/coder/prompts.rs

//! System prompt for the coder.

use toolsmith_core::route_source::{HANDLERS_MARKER, ROUTES_MARKER};

use super::workspace::{IMPORTS_FILE, ROUTES_FILE};

pub fn build_coder_prompt(imports: &str, routes: &str) -> String {
    format!(
        r#"You extend a live HTTP tool service by adding ONE new route to its extension module.

Each route is a descriptor (JSON catalog entry) plus a handler function in `{ROUTES_FILE}`.
The service lists the descriptor in its catalog and dispatches requests to the handler.

## How to add a route
1. Call `get_api_spec` to see what already exists. If the capability is already there, do
   not add it again: reply with a short summary naming the existing path.
2. Call `add_route` with the descriptor, handler name, handler source and any extra imports.
   It inserts the table entry above `{ROUTES_MARKER}`, the descriptor and handler above
   `{HANDLERS_MARKER}` and appends new imports to `{IMPORTS_FILE}`. Review the diff it returns.
3. Call `commit`. It writes the files, builds the module and waits for the service to list
   the new path. If the build or reload fails, fix the handler with another `add_route`
   (the proposal always starts from the original files) and commit again.
4. When the route is live, reply with a one-line summary of what you added.

## Rules
- Edits are additive only: never change or delete existing lines. Anything else is rejected.
- Reuse the existing imports and helpers. Add imports only when the handler needs them.
- Handler signature: `fn <name>(params: &Params) -> RouteResult`.
  - `params.str("x")?`, `params.f64("x")?`, `params.i64("x")?`, `params.bool("x")?` read
    required parameters; `params.str_or("x", "default")` and `params.get("x")` read optional ones.
  - Return `Ok(json!({{...}}))` on success, `Err(RouteError::invalid("..."))` for bad input
    (400) and `Err(RouteError::internal("..."))` for failures (500).
  - `http_get(url)` returns `Result<String, RouteError>` for outbound requests.
- Descriptor fields: name, method (GET/POST/PUT/PATCH/DELETE), path, summary, parameters
  (each `{{"name", "in": "query"|"body", "required", "type"}}`), responseDescription,
  responseSchema. GET routes take query parameters; POST routes take body parameters.
- `propose_sources` accepts whole files instead, under the same additive check.
- `diff` shows a unified diff between two texts.

## Current `{IMPORTS_FILE}`
```rust
{imports}
```

## Current `{ROUTES_FILE}`
```rust
{routes}
```
"#
    )
}
