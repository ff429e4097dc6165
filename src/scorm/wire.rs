//! String wire adapter for the SCORM runtime API
//!
//! Packages call `LMS*` (1.2) or the unprefixed 2004 names and expect string
//! returns: `"true"`/`"false"` for state calls, the value (or `""`) for
//! `GetValue`, and numeric codes as strings. Everything typed stays in
//! `ScormSession`; this module only encodes and decodes.

use super::cmi::BridgeError;
use super::session::ScormSession;

pub const TRUE: &str = "true";
pub const FALSE: &str = "false";

/// A decoded runtime API call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    Initialize(String),
    Terminate(String),
    GetValue(String),
    SetValue(String, String),
    Commit(String),
    GetLastError,
    GetErrorString(String),
    GetDiagnostic(String),
}

impl ApiCall {
    /// Decode a method name and its string arguments. Both naming schemes
    /// are accepted; missing arguments read as `""`.
    pub fn parse(method: &str, args: &[String]) -> Option<ApiCall> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or_default();
        let name = method.strip_prefix("LMS").unwrap_or(method);

        Some(match name {
            "Initialize" => ApiCall::Initialize(arg(0)),
            "Finish" | "Terminate" => ApiCall::Terminate(arg(0)),
            "GetValue" => ApiCall::GetValue(arg(0)),
            "SetValue" => ApiCall::SetValue(arg(0), arg(1)),
            "Commit" => ApiCall::Commit(arg(0)),
            "GetLastError" => ApiCall::GetLastError,
            "GetErrorString" => ApiCall::GetErrorString(arg(0)),
            "GetDiagnostic" => ApiCall::GetDiagnostic(arg(0)),
            _ => return None,
        })
    }
}

fn encode_bool(result: Result<(), BridgeError>) -> String {
    let encoded = if result.is_ok() { TRUE } else { FALSE };
    encoded.to_string()
}

/// Execute a decoded call against a session and encode the return value
pub fn execute(session: &mut ScormSession, call: ApiCall) -> String {
    match call {
        ApiCall::Initialize(arg) => {
            if !arg.is_empty() {
                return encode_bool(session.reject_argument());
            }
            encode_bool(session.initialize())
        }
        ApiCall::Terminate(arg) => {
            if !arg.is_empty() {
                return encode_bool(session.reject_argument());
            }
            encode_bool(session.terminate())
        }
        ApiCall::Commit(arg) => {
            if !arg.is_empty() {
                return encode_bool(session.reject_argument());
            }
            encode_bool(session.commit())
        }
        ApiCall::GetValue(name) => session.get_value(&name).unwrap_or_default(),
        ApiCall::SetValue(name, value) => encode_bool(session.set_value(&name, &value)),
        ApiCall::GetLastError => session.last_error_code().to_string(),
        ApiCall::GetErrorString(code) => parse_code(&code)
            .map(|c| session.error_string(c).to_string())
            .unwrap_or_default(),
        ApiCall::GetDiagnostic(code) => {
            // An empty argument asks about the last error
            let code = if code.is_empty() {
                Some(session.last_error_code())
            } else {
                parse_code(&code)
            };
            code.map(|c| session.diagnostic(c)).unwrap_or_default()
        }
    }
}

/// Decode and execute in one step; unknown methods answer `"false"`
pub fn dispatch(session: &mut ScormSession, method: &str, args: &[String]) -> String {
    match ApiCall::parse(method, args) {
        Some(call) => execute(session, call),
        None => FALSE.to_string(),
    }
}

fn parse_code(code: &str) -> Option<u16> {
    code.trim().parse().ok()
}
