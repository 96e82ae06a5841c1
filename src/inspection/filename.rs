//! Inspection image file name parsing.
//!
//! Cameras name images `<CAMERA>_<RESULT>_LP-<loop>_ID-<link>.<ext>`, where
//! RESULT is one of the configured pass/fail/unknown tags. Numbers are not
//! zero padded.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::InspectionConfig;

static NAME_PATTERN: OnceLock<Regex> = OnceLock::new();

fn name_pattern() -> &'static Regex {
    NAME_PATTERN.get_or_init(|| {
        Regex::new(r"(\w+)_(\w+)_LP-(\d+)_ID-(\d+)").expect("file name pattern is valid")
    })
}

/// Fields extracted from an image file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    /// Camera name as written in the file name.
    pub camera: String,
    /// `Some(true)` passed, `Some(false)` failed, `None` inconclusive.
    pub passed: Option<bool>,
    pub loop_count: u64,
    pub link_id: u64,
}

/// Parse an image file name.
///
/// Returns `None` (after logging a warning) for names that do not follow
/// the pattern or carry an unrecognized result tag.
pub fn parse_file_name(file_name: &str, config: &InspectionConfig) -> Option<ParsedName> {
    let Some(captures) = name_pattern().captures(file_name) else {
        tracing::warn!("[detect] couldn't parse file name `{file_name}`");
        return None;
    };

    let result = &captures[2];
    let passed = if result == config.pass_tag {
        Some(true)
    } else if result == config.fail_tag {
        Some(false)
    } else if result == config.unknown_tag {
        None
    } else {
        tracing::warn!("[detect] unrecognized inspection result `{result}` in `{file_name}`");
        return None;
    };

    // The pattern only admits digits; overflow is the one way these fail
    let (Ok(loop_count), Ok(link_id)) = (captures[3].parse(), captures[4].parse()) else {
        tracing::warn!("[detect] counter out of range in `{file_name}`");
        return None;
    };

    Some(ParsedName {
        camera: captures[1].to_string(),
        passed,
        loop_count,
        link_id,
    })
}
