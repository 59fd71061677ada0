//! Content type detection by magic bytes with an extension fallback.

/// Number of leading bytes inspected by [`detect`].
pub const SNIFF_LEN: usize = 512;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// One byte of a signature; `None` matches anything.
type MagicByte = Option<u8>;

struct Signature {
    offset: usize,
    bytes: &'static [MagicByte],
    mime: &'static str,
}

impl Signature {
    fn matches(&self, buf: &[u8]) -> bool {
        let end = self.offset + self.bytes.len();
        buf.len() >= end
            && self
                .bytes
                .iter()
                .zip(&buf[self.offset..end])
                .all(|(expected, actual)| expected.is_none_or(|b| b == *actual))
    }
}

macro_rules! sig {
    (@byte _) => { None };
    (@byte $b:literal) => { Some($b) };
    ($offset:expr, [$($b:tt),*], $mime:expr) => {
        Signature { offset: $offset, bytes: &[$(sig!(@byte $b)),*], mime: $mime }
    };
}

// More specific patterns first.
const SIGNATURES: &[Signature] = &[
    sig!(0, [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A], "image/png"),
    sig!(0, [0xFF, 0xD8, 0xFF], "image/jpeg"),
    sig!(0, [0x47, 0x49, 0x46, 0x38, _, 0x61], "image/gif"),
    sig!(0, [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50], "image/webp"),
    sig!(0, [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x41, 0x56, 0x45], "audio/wav"),
    // "BM", then four size bytes and four reserved zero bytes.
    sig!(0, [0x42, 0x4D, _, _, _, _, 0x00, 0x00, 0x00, 0x00], "image/bmp"),
    sig!(0, [0x49, 0x49, 0x2A, 0x00], "image/tiff"),
    sig!(0, [0x4D, 0x4D, 0x00, 0x2A], "image/tiff"),
    sig!(0, [0x00, 0x00, 0x01, 0x00], "image/x-icon"),
    sig!(0, [0x25, 0x50, 0x44, 0x46, 0x2D], "application/pdf"),
    sig!(0, [0x50, 0x4B, 0x03, 0x04], "application/zip"),
    sig!(0, [0x1F, 0x8B], "application/gzip"),
    sig!(0, [0x49, 0x44, 0x33], "audio/mpeg"),
    sig!(0, [0x4F, 0x67, 0x67, 0x53], "audio/ogg"),
    sig!(0, [0x1A, 0x45, 0xDF, 0xA3], "video/webm"),
];

/// Detects the MIME type of a payload from its leading bytes, falling back to
/// the file name's extension and finally to [`OCTET_STREAM`].
#[must_use]
pub fn detect(head: &[u8], name: &str) -> String {
    let head = &head[..head.len().min(SNIFF_LEN)];

    if let Some(sig) = SIGNATURES.iter().find(|sig| sig.matches(head)) {
        return sig.mime.to_owned();
    }

    if let Some(mime) = iso_bmff(head) {
        return mime.to_owned();
    }

    if is_svg(head) {
        return "image/svg+xml".to_owned();
    }

    mime_guess::from_path(name).first_raw().unwrap_or(OCTET_STREAM).to_owned()
}

/// ISO base media files (`....ftyp<brand>`) are told apart by their major brand.
fn iso_bmff(head: &[u8]) -> Option<&'static str> {
    if head.get(4..8)? != b"ftyp" {
        return None;
    }
    let mime = match head.get(8..12)? {
        b"heic" | b"heix" | b"mif1" => "image/heic",
        b"avif" => "image/avif",
        b"M4A " => "audio/mp4",
        b"qt  " => "video/quicktime",
        _ => "video/mp4",
    };
    Some(mime)
}

fn is_svg(head: &[u8]) -> bool {
    // The sniff window may cut a multi-byte character; keep the valid prefix.
    let text = match std::str::from_utf8(head) {
        Ok(text) => text,
        Err(e) => match std::str::from_utf8(&head[..e.valid_up_to()]) {
            Ok(text) => text,
            Err(_) => return false,
        },
    };
    let text = text.trim_start_matches('\u{feff}').trim_start();
    (text.starts_with("<svg") || text.starts_with("<?xml")) && text.contains("<svg")
}
