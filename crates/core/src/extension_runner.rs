// crates/core/src/extension_runner.rs

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wasmtime::{Caller, Config, Engine, Linker, Module, Store, Trap};
use wasmtime_wasi::pipe::{MemoryInputPipe, MemoryOutputPipe};
use wasmtime_wasi::preview1::{self, WasiP1Ctx};
use wasmtime_wasi::WasiCtxBuilder;

use crate::catalog::{HttpMethod, ToolDescriptor};

const STDOUT_CAPACITY: usize = 4 * 1024 * 1024;
const STDERR_CAPACITY: usize = 64 * 1024;

/// Instructions one call may execute before it is stopped.
pub const DEFAULT_FUEL: u64 = 2_000_000_000;

/// Request written to the module's stdin.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum GuestRequest<'a> {
    Describe,
    Invoke {
        path: &'a str,
        method: HttpMethod,
        params: &'a Value,
    },
}

#[derive(Debug, Deserialize)]
struct DescribeReply {
    #[serde(default)]
    routes: Option<Vec<ToolDescriptor>>,
    #[serde(default)]
    error: Option<String>,
}

/// What a route handler inside the module answered.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InvokeReply {
    pub status: u16,
    pub body: Value,
}

/// A compiled extension module (`routes.wasm`).
///
/// Contract:
/// - compiled for wasm32-wasip1, one JSON request on stdin, one JSON reply on stdout
/// - `{"op":"describe"}` → `{"routes":[<descriptor>...]}`
/// - `{"op":"invoke","path","method","params"}` → `{"status","body"}`
/// - host functions under module "host": `http_get`, `current_time_millis`,
///   `current_time_secs`
///
/// The module is compiled once; every call runs in a fresh store with a fuel budget,
/// so a handler that never returns traps instead of holding its thread.
pub struct ExtensionModule {
    engine: Engine,
    module: Module,
    path: PathBuf,
    fuel: u64,
}

impl ExtensionModule {
    /// Compile from bytes already read (the caller may have hashed them). Accepts
    /// binary wasm or WAT text.
    pub fn from_bytes(bytes: &[u8], path: &Path) -> Result<Self> {
        let mut config = Config::new();
        config.consume_fuel(true);
        let engine = Engine::new(&config).context("failed to create WASM engine")?;
        let module = Module::new(&engine, bytes)
            .with_context(|| format!("failed to compile WASM module {}", path.display()))?;
        Ok(Self {
            engine,
            module,
            path: path.to_path_buf(),
            fuel: DEFAULT_FUEL,
        })
    }

    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel = fuel;
        self
    }

    /// Ask the module which routes it serves.
    pub fn describe(&self) -> Result<Vec<ToolDescriptor>> {
        let input = serde_json::to_string(&GuestRequest::Describe)?;
        let stdout = self.run(&input)?;
        let reply: DescribeReply = serde_json::from_str(stdout.trim())
            .with_context(|| format!("describe returned invalid JSON: {}", stdout.trim()))?;

        if let Some(err) = reply.error {
            anyhow::bail!("describe failed: {err}");
        }
        reply
            .routes
            .context("describe reply has no 'routes' field")
    }

    /// Run one route handler.
    pub fn invoke(&self, path: &str, method: HttpMethod, params: &Value) -> Result<InvokeReply> {
        let input = serde_json::to_string(&GuestRequest::Invoke {
            path,
            method,
            params,
        })?;
        let stdout = self.run(&input)?;
        serde_json::from_str(stdout.trim())
            .with_context(|| format!("{method} {path} returned invalid JSON: {}", stdout.trim()))
    }

    fn run(&self, input_json: &str) -> Result<String> {
        let stdin_data: bytes::Bytes = input_json.as_bytes().to_vec().into();
        let stdout_pipe = MemoryOutputPipe::new(STDOUT_CAPACITY);
        let stderr_pipe = MemoryOutputPipe::new(STDERR_CAPACITY);

        let wasi_ctx = WasiCtxBuilder::new()
            .stdin(MemoryInputPipe::new(stdin_data))
            .stdout(stdout_pipe.clone())
            .stderr(stderr_pipe.clone())
            .build_p1();

        let mut store = Store::new(&self.engine, wasi_ctx);
        store.set_fuel(self.fuel)?;

        let mut linker: Linker<WasiP1Ctx> = Linker::new(&self.engine);
        preview1::add_to_linker_sync(&mut linker, |cx| cx)?;
        add_host_functions(&mut linker)?;

        let instance = linker
            .instantiate(&mut store, &self.module)
            .context("failed to instantiate WASM module")?;

        let start = instance
            .get_typed_func::<(), ()>(&mut store, "_start")
            .context("WASM module missing _start function")?;

        let result = start.call(&mut store, ());

        // Release the pipes before reading them.
        drop(store);

        let stdout_bytes = stdout_pipe.try_into_inner().unwrap_or_default();
        let stderr_bytes = stderr_pipe.try_into_inner().unwrap_or_default();

        let stdout = String::from_utf8(stdout_bytes.to_vec())
            .context("extension stdout was not valid UTF-8")?;
        let stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();

        match result {
            Ok(()) => Ok(stdout),
            Err(e) => {
                if let Some(exit) = e.downcast_ref::<wasmtime_wasi::I32Exit>() {
                    if exit.0 == 0 {
                        return Ok(stdout);
                    }
                    anyhow::bail!(
                        "extension {} exited with code {}: {}",
                        self.path.display(),
                        exit.0,
                        stderr
                    );
                }
                if e.downcast_ref::<Trap>() == Some(&Trap::OutOfFuel) {
                    anyhow::bail!(
                        "extension {} stopped after exhausting its budget of {} instructions",
                        self.path.display(),
                        self.fuel
                    );
                }
                anyhow::bail!("extension {} trapped: {}: {}", self.path.display(), e, stderr)
            }
        }
    }
}

fn add_host_functions(linker: &mut Linker<WasiP1Ctx>) -> Result<()> {
    // host::http_get(url_ptr, url_len, result_ptr, result_cap) -> i32
    // Returns the body length written to result_ptr, or a negative error code:
    // -1 no memory export, -2 url out of bounds, -3 url not UTF-8, -4 request failed,
    // -5 body unreadable, -6 buffer too small
    linker.func_wrap(
        "host",
        "http_get",
        |mut caller: Caller<'_, WasiP1Ctx>,
         url_ptr: i32,
         url_len: i32,
         result_ptr: i32,
         result_cap: i32|
         -> i32 {
            let memory = match caller.get_export("memory") {
                Some(wasmtime::Extern::Memory(m)) => m,
                _ => return -1,
            };

            let url_bytes = {
                let data = memory.data(&caller);
                match guest_range(url_ptr, url_len, data.len()) {
                    Some(range) => data[range].to_vec(),
                    None => return -2,
                }
            };

            let url = match String::from_utf8(url_bytes) {
                Ok(s) => s,
                Err(_) => return -3,
            };

            let client = match reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
            {
                Ok(c) => c,
                Err(_) => return -4,
            };
            let response = match client.get(&url).send() {
                Ok(r) => r,
                Err(_) => return -4,
            };

            let body = match response.text() {
                Ok(b) => b,
                Err(_) => return -5,
            };
            let body_bytes = body.as_bytes();
            let Ok(body_len) = i32::try_from(body_bytes.len()) else {
                return -6;
            };
            if body_len > result_cap {
                return -6;
            }

            let data = memory.data_mut(&mut caller);
            match guest_range(result_ptr, body_len, data.len()) {
                Some(range) => data[range].copy_from_slice(body_bytes),
                None => return -6,
            }

            body_len
        },
    )?;

    linker.func_wrap("host", "current_time_millis", || -> i64 {
        chrono::Utc::now().timestamp_millis()
    })?;

    linker.func_wrap("host", "current_time_secs", || -> i64 {
        chrono::Utc::now().timestamp()
    })?;

    Ok(())
}

/// `ptr..ptr + len` in guest memory of `memory_len` bytes, if it fits.
fn guest_range(ptr: i32, len: i32, memory_len: usize) -> Option<Range<usize>> {
    let start = usize::try_from(ptr).ok()?;
    let end = start.checked_add(usize::try_from(len).ok()?)?;
    (end <= memory_len).then_some(start..end)
}
