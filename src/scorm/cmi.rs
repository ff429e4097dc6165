//! CMI data model vocabulary for SCORM 1.2 and SCORM 2004
//!
//! Element names, status values, time formats and error codes follow the
//! published runtime specifications so unmodified third-party packages work.

use std::fmt;

use serde::Serialize;

use crate::db::models::runtime_versions;

/// Max characters of `cmi.suspend_data`
pub const SUSPEND_DATA_LIMIT_12: usize = 4096;
pub const SUSPEND_DATA_LIMIT_2004: usize = 64000;

/// Max characters of the bookmark element
const LOCATION_LIMIT_12: usize = 255;
const LOCATION_LIMIT_2004: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScormVersion {
    #[serde(rename = "scorm_1.2")]
    V12,
    #[serde(rename = "scorm_2004")]
    V2004,
}

impl ScormVersion {
    /// Version from a stored `runtime_version`; unknown tags read as 2004
    pub fn from_runtime_version(tag: &str) -> Self {
        if tag == runtime_versions::SCORM_12 {
            ScormVersion::V12
        } else {
            ScormVersion::V2004
        }
    }

    pub fn suspend_data_limit(self) -> usize {
        match self {
            ScormVersion::V12 => SUSPEND_DATA_LIMIT_12,
            ScormVersion::V2004 => SUSPEND_DATA_LIMIT_2004,
        }
    }

    pub fn location_limit(self) -> usize {
        match self {
            ScormVersion::V12 => LOCATION_LIMIT_12,
            ScormVersion::V2004 => LOCATION_LIMIT_2004,
        }
    }
}

// ============================================================================
// Elements
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element {
    /// 1.2 `cmi.core.lesson_status`
    LessonStatus,
    /// 2004 `cmi.completion_status`
    CompletionStatus,
    /// 2004 `cmi.success_status`
    SuccessStatus,
    Location,
    SessionTime,
    SuspendData,
    LearnerId,
    LearnerName,
    Entry,
    TotalTime,
    Exit,
    ScoreRaw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Element {
    /// Resolve an element name in the vocabulary of `version`
    pub fn parse(name: &str, version: ScormVersion) -> Option<Element> {
        let element = match version {
            ScormVersion::V12 => match name {
                "cmi.core.lesson_status" => Element::LessonStatus,
                "cmi.core.lesson_location" => Element::Location,
                "cmi.core.session_time" => Element::SessionTime,
                "cmi.suspend_data" => Element::SuspendData,
                "cmi.core.student_id" => Element::LearnerId,
                "cmi.core.student_name" => Element::LearnerName,
                "cmi.core.entry" => Element::Entry,
                "cmi.core.total_time" => Element::TotalTime,
                "cmi.core.exit" => Element::Exit,
                "cmi.core.score.raw" => Element::ScoreRaw,
                _ => return None,
            },
            ScormVersion::V2004 => match name {
                "cmi.completion_status" => Element::CompletionStatus,
                "cmi.success_status" => Element::SuccessStatus,
                "cmi.location" => Element::Location,
                "cmi.session_time" => Element::SessionTime,
                "cmi.suspend_data" => Element::SuspendData,
                "cmi.learner_id" => Element::LearnerId,
                "cmi.learner_name" => Element::LearnerName,
                "cmi.entry" => Element::Entry,
                "cmi.total_time" => Element::TotalTime,
                "cmi.exit" => Element::Exit,
                "cmi.score.raw" => Element::ScoreRaw,
                _ => return None,
            },
        };
        Some(element)
    }

    pub fn access(self) -> Access {
        match self {
            Element::LearnerId | Element::LearnerName | Element::Entry | Element::TotalTime => {
                Access::ReadOnly
            }
            Element::SessionTime | Element::Exit => Access::WriteOnly,
            _ => Access::ReadWrite,
        }
    }
}

// ============================================================================
// Status vocabulary
// ============================================================================

/// Lesson status as persisted. 1.2 uses it directly; 2004 splits it into
/// completion and success status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LessonStatus {
    #[default]
    NotAttempted,
    Browsed,
    Incomplete,
    Completed,
    Passed,
    Failed,
    Unknown,
}

impl LessonStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LessonStatus::NotAttempted => "not attempted",
            LessonStatus::Browsed => "browsed",
            LessonStatus::Incomplete => "incomplete",
            LessonStatus::Completed => "completed",
            LessonStatus::Passed => "passed",
            LessonStatus::Failed => "failed",
            LessonStatus::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<LessonStatus> {
        Some(match value {
            "not attempted" => LessonStatus::NotAttempted,
            "browsed" => LessonStatus::Browsed,
            "incomplete" => LessonStatus::Incomplete,
            "completed" => LessonStatus::Completed,
            "passed" => LessonStatus::Passed,
            "failed" => LessonStatus::Failed,
            "unknown" => LessonStatus::Unknown,
            _ => return None,
        })
    }

    /// "passed" and "completed" are completion; everything else is not
    pub fn is_complete(self) -> bool {
        matches!(self, LessonStatus::Completed | LessonStatus::Passed)
    }

    /// Values a 1.2 package may set
    pub fn valid_for_12(self) -> bool {
        !matches!(self, LessonStatus::Unknown)
    }

    /// Values of 2004 `cmi.completion_status`
    pub fn valid_completion(self) -> bool {
        matches!(
            self,
            LessonStatus::Completed
                | LessonStatus::Incomplete
                | LessonStatus::NotAttempted
                | LessonStatus::Unknown
        )
    }

    /// Values of 2004 `cmi.success_status`
    pub fn valid_success(self) -> bool {
        matches!(
            self,
            LessonStatus::Passed | LessonStatus::Failed | LessonStatus::Unknown
        )
    }

    /// 2004 completion status read back from a persisted lesson status
    pub fn completion_part(self) -> LessonStatus {
        match self {
            LessonStatus::Completed | LessonStatus::Passed => LessonStatus::Completed,
            LessonStatus::Incomplete | LessonStatus::Browsed | LessonStatus::Failed => {
                LessonStatus::Incomplete
            }
            LessonStatus::NotAttempted => LessonStatus::NotAttempted,
            LessonStatus::Unknown => LessonStatus::Unknown,
        }
    }

    /// 2004 success status read back from a persisted lesson status
    pub fn success_part(self) -> LessonStatus {
        match self {
            LessonStatus::Passed => LessonStatus::Passed,
            LessonStatus::Failed => LessonStatus::Failed,
            _ => LessonStatus::Unknown,
        }
    }

    /// Fold 2004 completion and success status into one persisted value
    pub fn combine(completion: LessonStatus, success: LessonStatus) -> LessonStatus {
        match (completion, success) {
            (_, LessonStatus::Passed) => LessonStatus::Passed,
            (LessonStatus::Completed, _) => LessonStatus::Completed,
            (_, LessonStatus::Failed) => LessonStatus::Failed,
            (completion, _) => completion,
        }
    }
}

/// `cmi.exit` values
pub fn valid_exit(value: &str, version: ScormVersion) -> bool {
    match version {
        ScormVersion::V12 => matches!(value, "" | "time-out" | "suspend" | "logout"),
        ScormVersion::V2004 => matches!(value, "" | "time-out" | "suspend" | "logout" | "normal"),
    }
}

// ============================================================================
// Time formats
// ============================================================================

/// Parse a session time in the format of `version` into seconds
pub fn parse_time(value: &str, version: ScormVersion) -> Option<f64> {
    match version {
        ScormVersion::V12 => parse_timespan_12(value),
        ScormVersion::V2004 => parse_duration_2004(value),
    }
}

/// Format seconds as a total time in the format of `version`
pub fn format_time(seconds: f64, version: ScormVersion) -> String {
    match version {
        ScormVersion::V12 => format_timespan_12(seconds),
        ScormVersion::V2004 => format_duration_2004(seconds),
    }
}

/// `HHHH:MM:SS.SS` with 2-4 hour digits and an optional 1-2 digit fraction
fn parse_timespan_12(value: &str) -> Option<f64> {
    let mut parts = value.split(':');
    let (h, m, s) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let digits = |p: &str, min: usize, max: usize| {
        (min..=max).contains(&p.len()) && p.bytes().all(|b| b.is_ascii_digit())
    };
    if !digits(h, 2, 4) || !digits(m, 2, 2) {
        return None;
    }
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (s, None),
    };
    if !digits(whole, 2, 2) || !frac.map_or(true, |f| digits(f, 1, 2)) {
        return None;
    }

    let minutes: f64 = m.parse().ok()?;
    let seconds: f64 = s.parse().ok()?;
    if minutes >= 60.0 || seconds >= 60.0 {
        return None;
    }
    Some(h.parse::<f64>().ok()? * 3600.0 + minutes * 60.0 + seconds)
}

fn format_timespan_12(seconds: f64) -> String {
    let centis = (seconds.max(0.0) * 100.0).round() as u64;
    let hours = centis / 360_000;
    let minutes = (centis / 6000) % 60;
    let secs = (centis / 100) % 60;
    format!("{:04}:{:02}:{:02}.{:02}", hours, minutes, secs, centis % 100)
}

/// ISO 8601 duration, `P[nY][nM][nD][T[nH][nM][n[.n]S]]`.
/// Years and months use 365 and 30 days.
fn parse_duration_2004(value: &str) -> Option<f64> {
    let rest = value.strip_prefix('P')?;
    let (date, time) = match rest.split_once('T') {
        Some((d, t)) => {
            if t.is_empty() {
                return None;
            }
            (d, Some(t))
        }
        None => (rest, None),
    };
    if date.is_empty() && time.is_none() {
        return None;
    }

    let mut total = 0.0;
    total += sum_designators(date, &[('Y', 365.0 * 86400.0), ('M', 30.0 * 86400.0), ('D', 86400.0)])?;
    if let Some(time) = time {
        total += sum_designators(time, &[('H', 3600.0), ('M', 60.0), ('S', 1.0)])?;
    }
    Some(total)
}

/// Sum `<number><designator>` pairs that appear in the given order
fn sum_designators(mut text: &str, units: &[(char, f64)]) -> Option<f64> {
    let mut total = 0.0;
    let mut next_unit = 0;
    while !text.is_empty() {
        let end = text.find(|c: char| c.is_ascii_alphabetic())?;
        let (number, rest) = text.split_at(end);
        let designator = rest.chars().next()?;
        let offset = units[next_unit..].iter().position(|(d, _)| *d == designator)?;
        let (unit, scale) = units[next_unit + offset];
        // Only seconds may carry a fraction
        if number.is_empty() || (number.contains('.') && unit != 'S') {
            return None;
        }
        total += number.parse::<f64>().ok()? * scale;
        next_unit += offset + 1;
        text = &rest[1..];
    }
    Some(total)
}

fn format_duration_2004(seconds: f64) -> String {
    let centis = (seconds.max(0.0) * 100.0).round() as u64;
    let hours = centis / 360_000;
    let minutes = (centis / 6000) % 60;
    let secs = (centis % 6000) as f64 / 100.0;
    format!("PT{}H{}M{}S", hours, minutes, secs)
}

// ============================================================================
// Errors
// ============================================================================

/// Which API call failed; 2004 codes depend on it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initialize,
    Terminate,
    GetValue,
    SetValue,
    Commit,
}

/// Version-independent runtime failure. `code` maps it onto the wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeError {
    General,
    AlreadyInitialized,
    BeforeInitialize(Phase),
    AfterTerminate(Phase),
    InvalidArgument,
    UndefinedElement,
    ReadOnly,
    WriteOnly,
    TypeMismatch,
    OutOfRange,
    StoreFailure(Phase),
}

impl BridgeError {
    pub fn code(self, version: ScormVersion) -> u16 {
        match version {
            ScormVersion::V12 => match self {
                BridgeError::General
                | BridgeError::AlreadyInitialized
                | BridgeError::AfterTerminate(_)
                | BridgeError::StoreFailure(_) => 101,
                BridgeError::InvalidArgument | BridgeError::UndefinedElement => 201,
                BridgeError::BeforeInitialize(_) => 301,
                BridgeError::ReadOnly => 403,
                BridgeError::WriteOnly => 404,
                BridgeError::TypeMismatch | BridgeError::OutOfRange => 405,
            },
            ScormVersion::V2004 => match self {
                BridgeError::General => 101,
                BridgeError::AlreadyInitialized => 103,
                BridgeError::BeforeInitialize(phase) => match phase {
                    Phase::Terminate => 112,
                    Phase::GetValue => 122,
                    Phase::SetValue => 132,
                    Phase::Commit => 142,
                    Phase::Initialize => 101,
                },
                BridgeError::AfterTerminate(phase) => match phase {
                    Phase::Initialize => 104,
                    Phase::Terminate => 113,
                    Phase::GetValue => 123,
                    Phase::SetValue => 133,
                    Phase::Commit => 143,
                },
                BridgeError::InvalidArgument => 201,
                BridgeError::UndefinedElement => 401,
                BridgeError::ReadOnly => 404,
                BridgeError::WriteOnly => 405,
                BridgeError::TypeMismatch => 406,
                BridgeError::OutOfRange => 407,
                BridgeError::StoreFailure(phase) => match phase {
                    Phase::Initialize => 102,
                    Phase::Terminate => 111,
                    _ => 391,
                },
            },
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Standard error text for a wire code
pub fn error_string(code: u16, version: ScormVersion) -> &'static str {
    match version {
        ScormVersion::V12 => match code {
            0 => "No error",
            101 => "General exception",
            201 => "Invalid argument error",
            202 => "Element cannot have children",
            203 => "Element not an array. Cannot have count",
            301 => "Not initialized",
            401 => "Not implemented error",
            402 => "Invalid set value, element is a keyword",
            403 => "Element is read only",
            404 => "Element is write only",
            405 => "Incorrect data type",
            _ => "",
        },
        ScormVersion::V2004 => match code {
            0 => "No Error",
            101 => "General Exception",
            102 => "General Initialization Failure",
            103 => "Already Initialized",
            104 => "Content Instance Terminated",
            111 => "General Termination Failure",
            112 => "Termination Before Initialization",
            113 => "Termination After Termination",
            122 => "Retrieve Data Before Initialization",
            123 => "Retrieve Data After Termination",
            132 => "Store Data Before Initialization",
            133 => "Store Data After Termination",
            142 => "Commit Before Initialization",
            143 => "Commit After Termination",
            201 => "General Argument Error",
            301 => "General Get Failure",
            351 => "General Set Failure",
            391 => "General Commit Failure",
            401 => "Undefined Data Model Element",
            402 => "Unimplemented Data Model Element",
            403 => "Data Model Element Value Not Initialized",
            404 => "Data Model Element Is Read Only",
            405 => "Data Model Element Is Write Only",
            406 => "Data Model Element Type Mismatch",
            407 => "Data Model Element Value Out Of Range",
            408 => "Data Model Dependency Not Established",
            _ => "",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_vocabulary_is_versioned() {
        assert_eq!(Element::parse("cmi.core.lesson_status", ScormVersion::V12), Some(Element::LessonStatus));
        assert_eq!(Element::parse("cmi.core.lesson_status", ScormVersion::V2004), None);
        assert_eq!(Element::parse("cmi.location", ScormVersion::V2004), Some(Element::Location));
        assert_eq!(Element::parse("cmi.learner_id", ScormVersion::V2004).map(Element::access), Some(Access::ReadOnly));
        assert_eq!(Element::SessionTime.access(), Access::WriteOnly);
    }

    #[test]
    fn test_timespan_12() {
        assert_eq!(parse_time("00:01:30", ScormVersion::V12), Some(90.0));
        assert_eq!(parse_time("0001:00:00.5", ScormVersion::V12), Some(3600.5));
        assert_eq!(parse_time("1:00:00", ScormVersion::V12), None);
        assert_eq!(parse_time("00:61:00", ScormVersion::V12), None);
        assert_eq!(parse_time("PT1M", ScormVersion::V12), None);
        assert_eq!(format_time(3725.25, ScormVersion::V12), "0001:02:05.25");
    }

    #[test]
    fn test_duration_2004() {
        assert_eq!(parse_time("PT1M30S", ScormVersion::V2004), Some(90.0));
        assert_eq!(parse_time("PT0.5S", ScormVersion::V2004), Some(0.5));
        assert_eq!(parse_time("P1DT1H", ScormVersion::V2004), Some(90000.0));
        assert_eq!(parse_time("P", ScormVersion::V2004), None);
        assert_eq!(parse_time("PT", ScormVersion::V2004), None);
        assert_eq!(parse_time("PT5S1M", ScormVersion::V2004), None);
        assert_eq!(parse_time("00:01:30", ScormVersion::V2004), None);
        assert_eq!(format_time(3725.25, ScormVersion::V2004), "PT1H2M5.25S");
    }

    #[test]
    fn test_status_mapping() {
        assert!(LessonStatus::Passed.is_complete());
        assert!(LessonStatus::Completed.is_complete());
        assert!(!LessonStatus::Failed.is_complete());
        assert!(!LessonStatus::Incomplete.is_complete());

        let folded = LessonStatus::combine(LessonStatus::Incomplete, LessonStatus::Passed);
        assert_eq!(folded, LessonStatus::Passed);
        assert_eq!(folded.completion_part(), LessonStatus::Completed);
        assert_eq!(folded.success_part(), LessonStatus::Passed);
    }

    #[test]
    fn test_error_codes_per_version() {
        let err = BridgeError::BeforeInitialize(Phase::GetValue);
        assert_eq!(err.code(ScormVersion::V12), 301);
        assert_eq!(err.code(ScormVersion::V2004), 122);
        assert_eq!(BridgeError::ReadOnly.code(ScormVersion::V12), 403);
        assert_eq!(BridgeError::ReadOnly.code(ScormVersion::V2004), 404);
        assert_eq!(error_string(403, ScormVersion::V12), "Element is read only");
    }
}
