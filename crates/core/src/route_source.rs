// crates/core/src/route_source.rs

//! Append-only edits to the extension route source.
//!
//! `routes.rs` keeps a route table and the descriptor constants + handlers that back it.
//! Two marker comments are the only insertion points:
//!
//! ```text
//! pub fn routes() -> Vec<Route> {
//!     vec![
//!         Route::new(HELLO_DESCRIPTOR, hello),
//!         // @toolsmith:routes
//!     ]
//! }
//! ...
//! // @toolsmith:handlers
//! ```
//!
//! `imports.rs` only grows at end of file.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::catalog::{CatalogError, ToolDescriptor};
use crate::patch::{self, PatchError};

pub const ROUTES_MARKER: &str = "// @toolsmith:routes";
pub const HANDLERS_MARKER: &str = "// @toolsmith:handlers";

/// Markers of `routes.rs`, for [`patch::check_additive`].
pub const ROUTE_FILE_MARKERS: [&str; 2] = [ROUTES_MARKER, HANDLERS_MARKER];

static DESCRIPTOR_CONST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"const\s+([A-Z][A-Z0-9_]*)\s*:\s*&(?:'static\s+)?str\s*=\s*r(#+)""#)
        .expect("descriptor regex")
});

static HANDLER_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("handler name regex"));

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RouteSourceError {
    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Descriptor(#[from] CatalogError),

    #[error("a route for '{0}' already exists")]
    DuplicatePath(String),

    #[error("'{0}' is already defined in the route source")]
    DuplicateSymbol(String),

    #[error("'{0}' is not a valid handler function name (use snake_case)")]
    InvalidHandlerName(String),

    #[error("handler source must define `fn {0}(`")]
    HandlerMissing(String),

    #[error("descriptor constant {constant} is malformed: {reason}")]
    MalformedDescriptor { constant: String, reason: String },
}

/// A descriptor constant found in the route source.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredRoute {
    pub constant: String,
    pub descriptor: ToolDescriptor,
}

/// Every `const *: &str = r#"..."#;` holding a descriptor, in file order.
///
/// String constants whose JSON is not an object with a `path` are not descriptors and
/// are skipped; ones that look like descriptors but fail to parse are errors.
pub fn declared_routes(routes_src: &str) -> Result<Vec<DeclaredRoute>, RouteSourceError> {
    let mut out = Vec::new();

    for caps in DESCRIPTOR_CONST.captures_iter(routes_src) {
        let constant = caps[1].to_string();
        let hashes = &caps[2];
        let Some(whole) = caps.get(0) else { continue };
        let body_start = whole.end();
        let terminator = format!("\"{hashes}");

        let Some(len) = routes_src[body_start..].find(&terminator) else {
            return Err(RouteSourceError::MalformedDescriptor {
                constant,
                reason: "unterminated raw string".into(),
            });
        };
        let raw = &routes_src[body_start..body_start + len];

        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(_) => continue,
        };
        if value.get("path").is_none() {
            continue;
        }

        let descriptor: ToolDescriptor = serde_json::from_value(value).map_err(|e| {
            RouteSourceError::MalformedDescriptor {
                constant: constant.clone(),
                reason: e.to_string(),
            }
        })?;
        out.push(DeclaredRoute {
            constant,
            descriptor,
        });
    }

    Ok(out)
}

/// Paths already declared in the route source.
pub fn declared_paths(routes_src: &str) -> Result<Vec<String>, RouteSourceError> {
    Ok(declared_routes(routes_src)?
        .into_iter()
        .map(|r| r.descriptor.path)
        .collect())
}

/// One new route: its descriptor, handler function and any imports it needs.
#[derive(Debug, Clone)]
pub struct RouteAddition {
    pub descriptor: ToolDescriptor,
    /// Name of the handler function defined in `handler_source`.
    pub handler: String,
    /// Full handler function source, `fn <handler>(params: &Params) -> RouteResult { .. }`.
    pub handler_source: String,
    /// `use` lines to append to the import preamble; existing ones are skipped.
    pub imports: Vec<String>,
}

/// Result of applying a [`RouteAddition`].
#[derive(Debug, Clone, PartialEq)]
pub struct RouteEdit {
    pub routes: String,
    pub imports: String,
}

impl RouteAddition {
    pub fn constant_name(&self) -> String {
        format!("{}_DESCRIPTOR", self.handler.to_uppercase())
    }

    /// Produce the edited sources. Inputs are never modified in place.
    pub fn apply(&self, routes_src: &str, imports_src: &str) -> Result<RouteEdit, RouteSourceError> {
        self.descriptor.validate()?;

        if !HANDLER_NAME.is_match(&self.handler) {
            return Err(RouteSourceError::InvalidHandlerName(self.handler.clone()));
        }
        if !self.handler_source.contains(&format!("fn {}(", self.handler)) {
            return Err(RouteSourceError::HandlerMissing(self.handler.clone()));
        }

        let declared = declared_routes(routes_src)?;
        if declared
            .iter()
            .any(|r| r.descriptor.path == self.descriptor.path)
        {
            return Err(RouteSourceError::DuplicatePath(self.descriptor.path.clone()));
        }

        let constant = self.constant_name();
        if routes_src.contains(&format!("const {constant}")) {
            return Err(RouteSourceError::DuplicateSymbol(constant));
        }
        if routes_src.contains(&format!("fn {}(", self.handler)) {
            return Err(RouteSourceError::DuplicateSymbol(self.handler.clone()));
        }

        let json = serde_json::to_string_pretty(&self.descriptor)
            .map_err(|e| CatalogError::InvalidDescriptor {
                path: self.descriptor.path.clone(),
                reason: e.to_string(),
            })?;
        let hashes = raw_string_hashes(&json);

        let table_entry = format!("Route::new({constant}, {}),", self.handler);
        let definitions = format!(
            "const {constant}: &str = r{hashes}\"{json}\"{hashes};\n\n{}\n\n",
            self.handler_source.trim_end()
        );

        let routes = insert_before_marker(routes_src, ROUTES_MARKER, &table_entry, true)?;
        let routes = insert_before_marker(&routes, HANDLERS_MARKER, &definitions, false)?;
        let imports = append_imports(imports_src, &self.imports);

        Ok(RouteEdit { routes, imports })
    }
}

/// Enough `#` that the raw string cannot terminate early.
fn raw_string_hashes(body: &str) -> String {
    let mut n = 1;
    while body.contains(&format!("\"{}", "#".repeat(n))) {
        n += 1;
    }
    "#".repeat(n)
}

/// Insert `text` on the lines directly above the marker. With `indent`, each inserted
/// line takes the marker's indentation.
fn insert_before_marker(
    src: &str,
    marker: &str,
    text: &str,
    indent: bool,
) -> Result<String, PatchError> {
    let mut hits = src.lines().filter(|l| l.contains(marker));
    let Some(marker_line) = hits.next() else {
        return Err(PatchError::MarkerMissing(marker.to_string()));
    };
    if hits.next().is_some() {
        return Err(PatchError::MarkerDuplicated(marker.to_string()));
    }

    let pad: String = if indent {
        marker_line
            .chars()
            .take_while(|c| c.is_whitespace())
            .collect()
    } else {
        String::new()
    };

    let mut out = String::with_capacity(src.len() + text.len() + 64);
    for line in src.split_inclusive('\n') {
        if line.contains(marker) {
            for new_line in text.lines() {
                if new_line.is_empty() {
                    out.push('\n');
                } else {
                    out.push_str(&pad);
                    out.push_str(new_line);
                    out.push('\n');
                }
            }
        }
        out.push_str(line);
    }
    Ok(out)
}

/// Append import lines not already present (compared trimmed).
pub fn append_imports(imports_src: &str, imports: &[String]) -> String {
    let existing: Vec<&str> = imports_src.lines().map(str::trim).collect();
    let mut out = imports_src.to_string();
    let mut added: Vec<&str> = Vec::new();

    for line in imports {
        let line = line.trim();
        if line.is_empty() || existing.contains(&line) || added.contains(&line) {
            continue;
        }
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(line);
        out.push('\n');
        added.push(line);
    }
    out
}

/// Check a full-file proposal for both route files against their originals.
pub fn check_route_edit(
    original: &RouteEdit,
    proposed: &RouteEdit,
) -> Result<(), PatchError> {
    patch::check_additive(&original.routes, &proposed.routes, &ROUTE_FILE_MARKERS)?;
    patch::check_additive(&original.imports, &proposed.imports, &[])
}
