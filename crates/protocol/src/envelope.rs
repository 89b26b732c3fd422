use base64::Engine as _;

use crate::error::DtailError;
use crate::COMPAT_VERSION;

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Wraps a binary-unsafe command string in the `protocol <version> base64
/// <b64>;` envelope (spec §3, §6). The trailing `;` is part of the envelope,
/// not the delimiter byte, which the caller appends when framing.
#[must_use]
pub fn encode_command(command: &str) -> String {
    format!(
        "protocol {COMPAT_VERSION} base64 {};",
        B64.encode(command.as_bytes())
    )
}

/// Decodes a `protocol <version> base64 <b64>;` envelope, returning the
/// decoded command text. A compat-version mismatch is a hard
/// [`DtailError::Protocol`] error — spec §GLOSSARY: "mismatches must not be
/// silently ignored."
pub fn decode_command(envelope: &str) -> Result<String, DtailError> {
    let envelope = envelope.trim_end_matches(';');
    let mut parts = envelope.split_whitespace();
    let tag = parts
        .next()
        .ok_or_else(|| DtailError::Protocol("empty command envelope".into()))?;
    if tag != "protocol" {
        return Err(DtailError::Protocol(format!(
            "command envelope must start with 'protocol', got '{tag}'"
        )));
    }
    let version: u32 = parts
        .next()
        .ok_or_else(|| DtailError::Protocol("command envelope missing version".into()))?
        .parse()
        .map_err(|_| DtailError::Protocol("command envelope version is not a number".into()))?;
    if version != COMPAT_VERSION {
        return Err(DtailError::Protocol(format!(
            "wire compat version mismatch: peer sent {version}, we speak {COMPAT_VERSION}"
        )));
    }
    let codec_tag = parts
        .next()
        .ok_or_else(|| DtailError::Protocol("command envelope missing codec".into()))?;
    if codec_tag != "base64" {
        return Err(DtailError::Protocol(format!(
            "unsupported command codec '{codec_tag}'"
        )));
    }
    let b64 = parts
        .next()
        .ok_or_else(|| DtailError::Protocol("command envelope missing payload".into()))?;
    let decoded = B64
        .decode(b64)
        .map_err(|e| DtailError::Protocol(format!("invalid base64 command payload: {e}")))?;
    String::from_utf8(decoded)
        .map_err(|e| DtailError::Protocol(format!("command payload is not valid utf-8: {e}")))
}
