const OCTET_STREAM: &str = "application/octet-stream";

/// Leading-byte signatures, checked in order
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b\x08", "application/x-gzip"),
    (b"BM", "image/bmp"),
    (b"OggS", "application/ogg"),
    (b"ID3", "audio/mpeg"),
    (b"\x00\x00\x01\x00", "image/x-icon"),
    (b"%!PS-Adobe-", "application/postscript"),
    (b"\x7fELF", "application/x-executable"),
];

/// Content type for a file name, if its extension is known.
pub fn guess_from_name(name: &str) -> Option<String> {
    mime_guess::from_path(name)
        .first()
        .map(|mime| mime.essence_str().to_string())
}

/// Content type from the first bytes of the content.
pub fn sniff(data: &[u8]) -> String {
    let head = &data[..data.len().min(512)];
    if head.is_empty() {
        return "text/plain; charset=utf-8".to_string();
    }
    if let Some((_, mime)) = SIGNATURES.iter().find(|(magic, _)| head.starts_with(magic)) {
        return mime.to_string();
    }
    if head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WEBP" {
        return "image/webp".to_string();
    }

    let trimmed = trim_leading_whitespace(head);
    let lower: Vec<u8> = trimmed.iter().take(16).map(u8::to_ascii_lowercase).collect();
    if lower.starts_with(b"<!doctype html") || lower.starts_with(b"<html") {
        return "text/html; charset=utf-8".to_string();
    }
    if lower.starts_with(b"<?xml") {
        return "text/xml; charset=utf-8".to_string();
    }

    if looks_like_text(head) {
        "text/plain; charset=utf-8".to_string()
    } else {
        OCTET_STREAM.to_string()
    }
}

/// Name first, content second.
pub fn detect(name: &str, data: &[u8]) -> String {
    guess_from_name(name).unwrap_or_else(|| sniff(data))
}

fn trim_leading_whitespace(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !matches!(b, b'\t' | b'\n' | b'\x0c' | b'\r' | b' '))
        .unwrap_or(data.len());
    &data[start..]
}

fn looks_like_text(data: &[u8]) -> bool {
    let binary = data
        .iter()
        .any(|&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | b'\x0c' | b'\x1b'));
    if binary {
        return false;
    }
    match std::str::from_utf8(data) {
        Ok(_) => true,
        // a multi-byte sequence cut at the sniff window is still text
        Err(e) => e.error_len().is_none(),
    }
}
