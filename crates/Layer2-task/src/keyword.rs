//! Keyword parsing shared by the task enums and batch actions

use warden_foundation::Error;

/// Match `input` against the snake_case names of `all`, accepting `-` for `_`
pub(crate) fn parse_keyword<T: Copy>(
    input: &str,
    all: &[T],
    name: fn(&T) -> &'static str,
    kind: &str,
) -> Result<T, Error> {
    let normalized = input.trim().to_ascii_lowercase().replace('-', "_");
    all.iter()
        .find(|v| name(*v) == normalized)
        .copied()
        .ok_or_else(|| {
            let expected: Vec<&str> = all.iter().map(name).collect();
            Error::InvalidInput(format!(
                "unknown {} '{}' (expected one of: {})",
                kind,
                input,
                expected.join(", ")
            ))
        })
}
