use std::path::{Path, PathBuf};

use async_trait::async_trait;
use plotters::prelude::*;
use serde_json::{json, Value};
use toolsmith_core::catalog::{default_errors, HttpMethod, ParamLocation, Parameter, ToolDescriptor};

use crate::handler::{ToolError, ToolHandler, ToolRequest};

pub const PLOT_FILE: &str = "points_plot.png";

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

pub fn descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: "plot".to_string(),
        method: HttpMethod::Post,
        path: "/plot".to_string(),
        summary: "Render a scatter plot of points and return the image URL".to_string(),
        parameters: vec![Parameter {
            name: "points".to_string(),
            location: ParamLocation::Body,
            required: true,
            kind: "array".to_string(),
            items: Some(json!({ "type": "array", "items": { "type": "number" } })),
            description: Some("Points as [[x, y], ...]".to_string()),
        }],
        response_description: "URL of the rendered PNG".to_string(),
        response_schema: json!({
            "type": "object",
            "properties": { "url": { "type": "string" } }
        }),
        errors: default_errors(),
    }
}

pub struct PlotTool {
    artifacts_dir: PathBuf,
    public_base_url: String,
}

impl PlotTool {
    pub fn new(artifacts_dir: PathBuf, public_base_url: &str) -> Self {
        Self {
            artifacts_dir,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ToolHandler for PlotTool {
    async fn invoke(&self, request: ToolRequest) -> Result<Value, ToolError> {
        let points = parse_points(request.get("points"))?;

        let path = self.artifacts_dir.join(PLOT_FILE);
        let target = path.clone();
        tokio::task::spawn_blocking(move || render(&target, &points))
            .await
            .map_err(|e| ToolError::Internal(format!("plot task failed: {e}")))??;

        tracing::debug!(path = %path.display(), "plot rendered");
        Ok(json!({ "url": format!("{}/{PLOT_FILE}", self.public_base_url) }))
    }
}

fn parse_points(value: Option<&Value>) -> Result<Vec<(f64, f64)>, ToolError> {
    let list = value
        .and_then(Value::as_array)
        .filter(|l| !l.is_empty())
        .ok_or_else(|| ToolError::Validation("No points provided".to_string()))?;

    list.iter()
        .enumerate()
        .map(|(i, point)| match point.as_array().map(Vec::as_slice) {
            Some([x, y]) => match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Ok((x, y)),
                _ => Err(malformed(i)),
            },
            _ => Err(malformed(i)),
        })
        .collect()
}

fn malformed(index: usize) -> ToolError {
    ToolError::Validation(format!(
        "Point {index} is malformed; expected [x, y] with numeric coordinates"
    ))
}

/// Padded axis range covering every value.
fn axis_range(values: impl Iterator<Item = f64>) -> std::ops::Range<f64> {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    let pad = if hi > lo { (hi - lo) * 0.05 } else { 1.0 };
    (lo - pad)..(hi + pad)
}

fn render(path: &Path, points: &[(f64, f64)]) -> Result<(), ToolError> {
    let draw_err = |e: &dyn std::fmt::Display| ToolError::Internal(format!("failed to draw plot: {e}"));

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| ToolError::Internal(format!("failed to create {}: {e}", dir.display())))?;
    }

    let root = BitMapBackend::new(path, (WIDTH, HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| draw_err(&e))?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .build_cartesian_2d(
            axis_range(points.iter().map(|p| p.0)),
            axis_range(points.iter().map(|p| p.1)),
        )
        .map_err(|e| draw_err(&e))?;

    chart
        .draw_series(
            points
                .iter()
                .map(|&(x, y)| Circle::new((x, y), 4, BLUE.filled())),
        )
        .map_err(|e| draw_err(&e))?;

    root.present().map_err(|e| draw_err(&e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::sync::Arc;

    fn request(points: Value) -> ToolRequest {
        let mut params = Map::new();
        params.insert("points".into(), points);
        ToolRequest {
            descriptor: Arc::new(descriptor()),
            params,
        }
    }

    #[test]
    fn empty_points_are_rejected() {
        assert_eq!(
            parse_points(Some(&json!([]))).unwrap_err(),
            ToolError::Validation("No points provided".into())
        );
        assert!(parse_points(None).is_err());
    }

    #[test]
    fn malformed_point_is_rejected() {
        let err = parse_points(Some(&json!([[0, 0], [1]]))).unwrap_err();
        assert!(err.to_string().starts_with("Point 1 is malformed"));
        assert!(parse_points(Some(&json!([[0, "a"]]))).is_err());
    }

    #[test]
    fn single_point_gets_a_nonempty_range() {
        let range = axis_range([3.0].into_iter());
        assert!(range.start < 3.0 && range.end > 3.0);
    }

    #[tokio::test]
    async fn renders_png_and_returns_public_url() {
        let dir = tempfile::tempdir().unwrap();
        let tool = PlotTool::new(dir.path().join("artifacts"), "http://localhost:5000/");

        let out = tool.invoke(request(json!([[0, 0], [1, 1]]))).await.unwrap();
        assert_eq!(out, json!({ "url": "http://localhost:5000/points_plot.png" }));

        let bytes = std::fs::read(dir.path().join("artifacts").join(PLOT_FILE)).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }
}
