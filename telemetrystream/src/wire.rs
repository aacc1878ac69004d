use crate::error::StreamError;

/// The length prefix is always exactly four bytes.
pub const PREFIX_LEN: usize = 4;

/// Filename lengths outside this range are rejected before anything is read.
pub const MAX_NAME_LEN: usize = 255;

/// Zero-padded decimal encoding of a filename length, e.g. `0031`.
pub fn encode_prefix(len: usize) -> [u8; PREFIX_LEN] {
    debug_assert!(len >= 1 && len <= MAX_NAME_LEN);
    let digits = format!("{:04}", len);
    digits.as_bytes().try_into().expect("four digits")
}

/// Parses the four prefix bytes. Anything but four decimal digits encoding a
/// value in `[1, 255]` is malformed.
pub fn parse_prefix(prefix: &[u8]) -> Result<usize, StreamError> {
    if prefix.len() != PREFIX_LEN {
        return Err(StreamError::MalformedFrame("length prefix is not four bytes"));
    }
    if !prefix.iter().all(|b| b.is_ascii_digit()) {
        return Err(StreamError::MalformedFrame("length prefix contains a non-digit byte"));
    }
    let len: usize = std::str::from_utf8(prefix)
        .expect("ascii digits")
        .parse()
        .expect("four digits fit in usize");
    if len < 1 || len > MAX_NAME_LEN {
        return Err(StreamError::MalformedFrame("filename length outside [1, 255]"));
    }
    Ok(len)
}

/// Filenames are joined onto the storage root, so anything that could escape
/// it is rejected before any filesystem operation.
pub fn validate_file_name(name: &str) -> Result<(), StreamError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(StreamError::MalformedFrame("filename length outside [1, 255]"));
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') || name.starts_with('.') {
        return Err(StreamError::MalformedFrame("unsafe filename"));
    }
    Ok(())
}
