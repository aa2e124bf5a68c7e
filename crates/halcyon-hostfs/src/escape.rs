//! Escaping of characters that guest filesystems allow but host filesystems
//! reject.
//!
//! A forbidden character is stored on the host as `__xx__` (two lowercase hex
//! digits of the byte). Directory listings returned to the guest must decode
//! these so guest software finds the names it originally wrote.

/// Characters that cannot appear in a file name on common host filesystems.
fn is_forbidden(c: char) -> bool {
    matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || (c as u32) < 0x20
}

pub fn escape_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if is_forbidden(c) {
            out.push_str(&format!("__{:02x}__", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}

pub fn unescape_filename(name: &str) -> String {
    let bytes = name.as_bytes();
    let mut out = String::with_capacity(name.len());
    let mut i = 0;
    while i < bytes.len() {
        // A `__xx__` sequence is 6 bytes with hex digits at positions 2..4.
        if i + 6 <= bytes.len() && &bytes[i..i + 2] == b"__" && &bytes[i + 4..i + 6] == b"__" {
            let value = std::str::from_utf8(&bytes[i + 2..i + 4])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(value) = value {
                out.push(value as char);
                i += 6;
                continue;
            }
        }
        let c = name[i..].chars().next().unwrap_or('\u{FFFD}');
        out.push(c);
        i += c.len_utf8();
    }
    out
}
