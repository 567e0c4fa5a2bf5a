//! Request/response envelopes and command dispatch for the
//! line-delimited JSON debug protocol.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use vhsim_core::{Error, Result};

use crate::session::{DebugSession, WatchAccess};

/// `{id, cmd, ...args}` as received from a connected debugger. `args`
/// holds every field besides `id` and `cmd`, keyed by name.
#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub cmd: String,
    #[serde(flatten)]
    pub args: Map<String, Value>,
}

/// Builds the `{id, ok:true, result:...}` response envelope.
pub fn ok_response(id: &Value, result: Value) -> Value {
    json!({ "id": id, "ok": true, "result": result })
}

/// Builds the `{id, ok:false, error:"..."}` response envelope.
pub fn err_response(id: &Value, error: impl std::fmt::Display) -> Value {
    json!({ "id": id, "ok": false, "error": error.to_string() })
}

fn require_u32(args: &Map<String, Value>, key: &str) -> Result<u32> {
    args.get(key)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| Error::Protocol(format!("missing or invalid argument '{key}'")))
}

fn require_u8(args: &Map<String, Value>, key: &str) -> Result<u8> {
    args.get(key)
        .and_then(Value::as_u64)
        .and_then(|v| u8::try_from(v).ok())
        .ok_or_else(|| Error::Protocol(format!("missing or invalid argument '{key}'")))
}

fn require_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Protocol(format!("missing or invalid argument '{key}'")))
}

/// Executes one already-parsed request against `session`, returning the
/// JSON `result` value on success. Errors from board operations (a
/// `fault`, bounds, alignment, ...) and from missing/malformed
/// arguments (a protocol error) are both propagated as `Err` here; the
/// caller turns them into the `{ok:false,...}` envelope.
pub fn dispatch(session: &DebugSession, cmd: &str, args: &Map<String, Value>) -> Result<Value> {
    match cmd {
        "hello" => Ok(json!({ "version": 1, "board": session.board_name() })),

        "reset" => {
            session.reset()?;
            Ok(json!({ "status": "ok" }))
        }

        "read_mem" => {
            let address = require_u32(args, "address")?;
            let size = require_u32(args, "size")?;
            let bytes = session.read_mem(address, size)?;
            Ok(json!({ "data": hex::encode(bytes) }))
        }

        "write_mem" => {
            let address = require_u32(args, "address")?;
            let data_hex = require_str(args, "data")?;
            let bytes = hex::decode(data_hex)
                .map_err(|e| Error::Protocol(format!("invalid hex in 'data': {e}")))?;
            session.write_mem(address, &bytes)?;
            Ok(json!({ "status": "ok" }))
        }

        "read_reg" => {
            let index = require_u8(args, "index")?;
            Ok(json!({ "value": session.read_reg(index)? }))
        }

        "write_reg" => {
            let index = require_u8(args, "index")?;
            let value = require_u32(args, "value")?;
            session.write_reg(index, value)?;
            Ok(json!({ "status": "ok" }))
        }

        "set_bp" => {
            let address = require_u32(args, "address")?;
            session.set_breakpoint(address);
            Ok(json!({ "status": "ok" }))
        }

        "clear_bp" => {
            let address = require_u32(args, "address")?;
            Ok(json!({ "removed": session.clear_breakpoint(address) }))
        }

        "set_wp" => {
            let address = require_u32(args, "address")?;
            let size = require_u32(args, "size")?;
            let access = WatchAccess::parse(require_str(args, "access")?)?;
            let watch_id = session.set_watchpoint(address, size, access);
            Ok(json!({ "watch_id": watch_id }))
        }

        "clear_wp" => {
            let watch_id = args
                .get("watch_id")
                .and_then(Value::as_u64)
                .ok_or_else(|| Error::Protocol("missing or invalid argument 'watch_id'".into()))?;
            Ok(json!({ "removed": session.clear_watchpoint(watch_id) }))
        }

        "step" => {
            let reason = session.step()?;
            serde_json::to_value(reason).map_err(|e| Error::Protocol(e.to_string()))
        }

        "run" => {
            let max_steps = match args.get("max_steps") {
                Some(v) => Some(
                    v.as_u64()
                        .ok_or_else(|| Error::Protocol("'max_steps' must be an integer".into()))?,
                ),
                None => None,
            };
            let reason = session.run(max_steps)?;
            serde_json::to_value(reason).map_err(|e| Error::Protocol(e.to_string()))
        }

        "halt" => {
            session.request_halt();
            Ok(json!({ "status": "ok" }))
        }

        other => Err(Error::Protocol(format!("unknown command '{other}'"))),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use vhsim_core::{default_registry, Board};

    fn sample_board() -> Board {
        let registry = default_registry().unwrap();
        let mut board = registry.create("stm32f4", None).unwrap();
        let mut image = vec![0u8; 0x100];
        image[0..4].copy_from_slice(&0x2000_1000u32.to_le_bytes());
        image[4..8].copy_from_slice(&0x0800_0101u32.to_le_bytes());
        board.load_firmware(&image).unwrap();
        board
    }

    #[test]
    fn hello_reports_board_name() {
        let session = DebugSession::new(sample_board());
        let result = dispatch(&session, "hello", &Map::new()).unwrap();
        assert_eq!(result["board"], "stm32f4");
        assert_eq!(result["version"], 1);
    }

    #[test]
    fn read_mem_returns_lowercase_hex() {
        let session = DebugSession::new(sample_board());
        let mut args = Map::new();
        args.insert("address".into(), json!(0x0800_0000u32));
        args.insert("size".into(), json!(4));
        let result = dispatch(&session, "read_mem", &args).unwrap();
        assert_eq!(result["data"], "0010 0020".replace(' ', ""));
    }

    #[test]
    fn unknown_command_is_protocol_error() {
        let session = DebugSession::new(sample_board());
        let err = dispatch(&session, "frobnicate", &Map::new()).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn missing_argument_is_protocol_error() {
        let session = DebugSession::new(sample_board());
        let err = dispatch(&session, "read_mem", &Map::new()).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
