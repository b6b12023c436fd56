use std::io::BufRead;
use std::io::Write;

use flycode_mcp::Dispatcher;
use flycode_mcp::JsonRpcRequest;
use flycode_mcp::JsonRpcResponse;
use serde_json::Value;
use uuid::Uuid;

/// Minimal line-delimited JSON-RPC loop over stdio (`spec.md` §1's "thinnest
/// possible stand-in" for the real loopback transport): one JSON object per
/// line in, one JSON object per line out. Since the real transport's
/// authenticated pairing handshake is out of scope, each request carries its
/// own top-level `site` field alongside the JSON-RPC envelope; a real
/// transport would derive `site` from the bearer token instead.
///
/// Mirrors the shape of the teacher's `mcp-server` stdin-reader/stdout-writer
/// tasks, collapsed into one synchronous loop since `Dispatcher::dispatch`
/// is itself synchronous.
pub fn run_stdio_loop<R: BufRead, W: Write>(dispatcher: &Dispatcher, input: R, mut output: W) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("failed to read stdin line: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(dispatcher, &line);
        if let Err(e) = write_response(&mut output, &response) {
            tracing::error!("failed to write response: {e}");
            break;
        }
    }
}

fn handle_line(dispatcher: &Dispatcher, line: &str) -> JsonRpcResponse {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return JsonRpcResponse::invalid_request(Value::Null, format!("invalid JSON: {e}")),
    };

    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let site = match value.get("site").and_then(Value::as_str) {
        Some(site) => site.to_string(),
        None => return JsonRpcResponse::invalid_request(id, "missing `site` field"),
    };

    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => return JsonRpcResponse::invalid_request(id, format!("malformed request: {e}")),
    };

    let trace_id = Uuid::new_v4().to_string();
    dispatcher.dispatch(&site, request, &trace_id)
}

fn write_response<W: Write>(output: &mut W, response: &JsonRpcResponse) -> std::io::Result<()> {
    let json = serde_json::to_string(response)?;
    output.write_all(json.as_bytes())?;
    output.write_all(b"\n")?;
    output.flush()
}
