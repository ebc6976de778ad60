//! Helpers for reading proc-style text files.

use super::SourceReadError;
use std::io::ErrorKind;
use std::path::Path;

/// Read a whole file, treating a missing file as "no data".
pub(crate) fn read_optional(path: &Path) -> Result<Option<String>, SourceReadError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(SourceReadError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Parse exactly `N` leading whitespace-separated fields. Extra fields are ignored.
pub(crate) fn parse_fields<T, const N: usize>(text: &str) -> Option<[T; N]>
where
    T: std::str::FromStr + Copy + Default,
{
    let mut out = [T::default(); N];
    let mut fields = text.split_whitespace();
    for slot in out.iter_mut() {
        *slot = fields.next()?.parse().ok()?;
    }
    Some(out)
}
