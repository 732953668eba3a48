//! Rendering of `.reg` files for `reg import`.
//!
//! Files are written as UTF-16LE with a byte-order mark, the encoding
//! `regedit` itself produces for version 5.00 files.
use std::fmt::Write as _;

use super::{RegistryData, ValueChange};

const HEADER: &str = "Windows Registry Editor Version 5.00";

/// Render the text of a `.reg` file that applies `values` under `key`.
///
/// `key` must be absolute (e.g. `HKEY_USERS\WinProv_DefaultProfile\Software\X`).
#[must_use]
pub fn render_text(key: &str, values: &[(String, ValueChange)]) -> String {
    let mut out = format!("{HEADER}\r\n\r\n[{key}]\r\n");
    for (name, change) in values {
        let lhs = if name.is_empty() {
            "@".to_string()
        } else {
            format!("\"{}\"", escape(name))
        };
        let rhs = match change {
            ValueChange::Delete => "-".to_string(),
            ValueChange::Set(data) => render_data(data),
        };
        let _ = write!(out, "{lhs}={rhs}\r\n");
    }
    out.push_str("\r\n");
    out
}

/// Render a complete `.reg` file, encoded and ready to write to disk.
#[must_use]
pub fn render(key: &str, values: &[(String, ValueChange)]) -> Vec<u8> {
    let text = render_text(key, values);
    let mut bytes = vec![0xFF, 0xFE];
    bytes.extend(text.encode_utf16().flat_map(u16::to_le_bytes));
    bytes
}

fn render_data(data: &RegistryData) -> String {
    match data {
        RegistryData::Dword(v) => format!("dword:{v:08x}"),
        RegistryData::Qword(v) => format!("hex(b):{}", hex_list(&v.to_le_bytes())),
        RegistryData::String(s) => format!("\"{}\"", escape(s)),
        RegistryData::ExpandString(s) => format!("hex(2):{}", hex_list(&utf16z(s))),
        RegistryData::MultiString(items) => {
            let mut bytes: Vec<u8> = items.iter().flat_map(|s| utf16z(s)).collect();
            bytes.extend([0, 0]);
            format!("hex(7):{}", hex_list(&bytes))
        }
        RegistryData::Binary(bytes) => format!("hex:{}", hex_list(bytes)),
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// UTF-16LE bytes of `s` followed by a NUL terminator.
fn utf16z(s: &str) -> Vec<u8> {
    s.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect()
}

fn hex_list(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(",")
}
