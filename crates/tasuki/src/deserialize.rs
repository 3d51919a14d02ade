//! Agent output to typed result.

use serde::de::DeserializeOwned;
use tasuki_core::{Absence, ActivityResult};
use tracing::warn;

/// Parses captured agent output into `T`.
///
/// Missing or blank output yields [`Absence::NoOutput`]. Output that is not
/// valid JSON for `T` yields [`Absence::Malformed`] and is logged; it never
/// becomes an error.
pub fn parse<T: DeserializeOwned>(output: Option<&str>) -> ActivityResult<T> {
    let Some(raw) = output.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return ActivityResult::Absent(Absence::NoOutput);
    };

    match serde_json::from_str::<T>(raw) {
        Ok(value) => ActivityResult::Completed(value),
        Err(err) => {
            warn!(
                target_type = std::any::type_name::<T>(),
                "agent output did not match the expected shape: {err}"
            );
            ActivityResult::Absent(Absence::Malformed(err.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Poem {
        text: String,
    }

    #[test]
    fn test_missing_and_blank_output() {
        assert_eq!(parse::<Poem>(None).absence(), Some(&Absence::NoOutput));
        assert_eq!(parse::<Poem>(Some("")).absence(), Some(&Absence::NoOutput));
        assert_eq!(parse::<Poem>(Some(" \n\t")).absence(), Some(&Absence::NoOutput));
    }

    #[test]
    fn test_valid_output() {
        let result = parse::<Poem>(Some("{\"text\":\"roses\"}\n"));
        assert_eq!(
            result.into_option(),
            Some(Poem {
                text: "roses".to_string()
            })
        );
    }

    #[test]
    fn test_malformed_output_is_absent() {
        let result = parse::<Poem>(Some("{not json"));
        assert!(result.absence().is_some_and(Absence::is_malformed));

        let wrong_shape = parse::<Poem>(Some("{\"title\":\"roses\"}"));
        assert!(wrong_shape.is_absent());
    }
}
