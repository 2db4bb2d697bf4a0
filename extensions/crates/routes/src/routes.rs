use crate::imports::*;

pub fn routes() -> Vec<Route> {
    vec![
        Route::new(HELLO_DESCRIPTOR, hello),
        // @toolsmith:routes
    ]
}

const HELLO_DESCRIPTOR: &str = r#"{
  "name": "hello",
  "method": "GET",
  "path": "/hello",
  "summary": "Greets the caller by name",
  "parameters": [
    {
      "name": "name",
      "in": "query",
      "required": false,
      "type": "string",
      "description": "Who to greet"
    }
  ],
  "responseDescription": "A greeting",
  "responseSchema": {
    "type": "object",
    "properties": {
      "message": { "type": "string" }
    }
  }
}"#;

fn hello(params: &Params) -> RouteResult {
    Ok(json!({ "message": format!("Hello, {}!", params.str_or("name", "world")) }))
}

// @toolsmith:handlers
