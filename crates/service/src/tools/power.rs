use async_trait::async_trait;
use serde_json::{json, Value};
use toolsmith_core::catalog::{default_errors, HttpMethod, ParamLocation, Parameter, ToolDescriptor};

use crate::handler::{ToolError, ToolHandler, ToolRequest};

pub fn descriptor() -> ToolDescriptor {
    let number = |name: &str, description: &str| Parameter {
        name: name.to_string(),
        location: ParamLocation::Query,
        required: true,
        kind: "number".to_string(),
        items: None,
        description: Some(description.to_string()),
    };

    ToolDescriptor {
        name: "power".to_string(),
        method: HttpMethod::Get,
        path: "/power".to_string(),
        summary: "Raise a base to an exponent".to_string(),
        parameters: vec![
            number("base", "The base number"),
            number("exponent", "The exponent"),
        ],
        response_description: "The base, the exponent and base^exponent".to_string(),
        response_schema: json!({
            "type": "object",
            "properties": {
                "base": { "type": "number" },
                "exponent": { "type": "number" },
                "result": { "type": "number" }
            }
        }),
        errors: default_errors(),
    }
}

pub struct PowerTool;

#[async_trait]
impl ToolHandler for PowerTool {
    async fn invoke(&self, request: ToolRequest) -> Result<Value, ToolError> {
        let base = request.f64("base")?;
        let exponent = request.f64("exponent")?;
        let result = base.powf(exponent);

        if !result.is_finite() {
            return Err(ToolError::Internal(format!(
                "{base}^{exponent} is not a finite number"
            )));
        }

        Ok(json!({
            "base": number(base),
            "exponent": number(exponent),
            "result": number(result),
        }))
    }
}

/// Whole numbers render as integers (`1024`, not `1024.0`).
pub fn number(x: f64) -> Value {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0; // 2^53
    if x.fract() == 0.0 && x.abs() <= MAX_EXACT {
        json!(x as i64)
    } else {
        json!(x)
    }
}
