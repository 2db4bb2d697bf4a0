// crates/host/src/coder/tool_defs.rs

//! Tool definitions for the coder.

use serde_json::json;

use toolsmith_core::ai_client::Tool;

pub fn coder_tools() -> Vec<Tool> {
    vec![
        Tool::function(
            "read_file",
            "Read a file of the routes crate (src/ or Cargo.toml).",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "e.g. src/routes.rs" }
                },
                "required": ["path"]
            }),
        ),
        Tool::function(
            "get_api_spec",
            "Fetch the tool catalog the service currently publishes, as YAML.",
            json!({ "type": "object", "properties": {}, "required": [] }),
        ),
        Tool::function(
            "add_route",
            "Propose one new route. Returns the diff against the original files. Nothing is written until commit.",
            json!({
                "type": "object",
                "properties": {
                    "descriptor": {
                        "type": "object",
                        "description": "Catalog entry for the route",
                        "properties": {
                            "name": { "type": "string" },
                            "method": { "type": "string", "enum": ["GET", "POST", "PUT", "PATCH", "DELETE"] },
                            "path": { "type": "string", "description": "e.g. /square" },
                            "summary": { "type": "string" },
                            "parameters": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "name": { "type": "string" },
                                        "in": { "type": "string", "enum": ["query", "body"] },
                                        "required": { "type": "boolean" },
                                        "type": { "type": "string" },
                                        "description": { "type": "string" }
                                    },
                                    "required": ["name", "in"]
                                }
                            },
                            "responseDescription": { "type": "string" },
                            "responseSchema": { "type": "object" }
                        },
                        "required": ["name", "method", "path", "summary"]
                    },
                    "handler": { "type": "string", "description": "snake_case handler function name" },
                    "handler_source": { "type": "string", "description": "Full Rust source of the handler function" },
                    "imports": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Extra `pub use ...;` lines the handler needs"
                    }
                },
                "required": ["descriptor", "handler", "handler_source"]
            }),
        ),
        Tool::function(
            "propose_sources",
            "Propose complete new contents for routes.rs (and optionally imports.rs). Must only add lines.",
            json!({
                "type": "object",
                "properties": {
                    "routes": { "type": "string" },
                    "imports": { "type": "string" }
                },
                "required": ["routes"]
            }),
        ),
        Tool::function(
            "diff",
            "Unified diff between two texts.",
            json!({
                "type": "object",
                "properties": {
                    "source": { "type": "string" },
                    "destination": { "type": "string" }
                },
                "required": ["source", "destination"]
            }),
        ),
        Tool::function(
            "commit",
            "Write the current proposal, build the module and wait for the service to serve it.",
            json!({ "type": "object", "properties": {}, "required": [] }),
        ),
    ]
}
