//! Reduction of an Airbrake backtrace to Sentry stack frames.

use crate::notice::BacktraceLine;
use serde::Serialize;

/// Placeholder Airbrake notifiers write in place of the application root.
pub const PROJECT_ROOT_PLACEHOLDER: &str = "[PROJECT_ROOT]";

const FINAL_FRAME_MODULE: &str = "exception";
const FRAME_MODULE: &str = "node";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum BacktraceError {
    #[error("backtrace has no line with both a file and a line number")]
    NoUsableFrame,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub filename: String,
    pub lineno: String,
    pub function: String,
    pub in_app: bool,
    pub module: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReducedBacktrace {
    /// The last line carrying both a file and a line number.
    pub final_frame: Frame,
    /// Complete lines preceding the final frame, in backtrace order.
    pub other_frames: Vec<Frame>,
}

impl ReducedBacktrace {
    /// All frames in the order Sentry expects them, final frame last.
    pub fn into_frames(self) -> Vec<Frame> {
        let mut frames = self.other_frames;
        frames.push(self.final_frame);
        frames
    }
}

/// Picks the final frame and the frames leading up to it.
///
/// Trailing lines without a file or line number are dropped. Incomplete lines
/// before the final frame are skipped. `project_root` replaces the
/// `[PROJECT_ROOT]` placeholder in file names; without it names are kept as sent.
pub fn reduce(
    lines: &[BacktraceLine],
    project_root: Option<&str>,
) -> Result<ReducedBacktrace, BacktraceError> {
    let (final_index, final_frame) = lines
        .iter()
        .enumerate()
        .rev()
        .find_map(|(index, line)| {
            to_frame(line, project_root, FINAL_FRAME_MODULE).map(|frame| (index, frame))
        })
        .ok_or(BacktraceError::NoUsableFrame)?;

    let other_frames = lines[..final_index]
        .iter()
        .filter_map(|line| to_frame(line, project_root, FRAME_MODULE))
        .collect();

    Ok(ReducedBacktrace {
        final_frame,
        other_frames,
    })
}

fn to_frame(line: &BacktraceLine, project_root: Option<&str>, module: &str) -> Option<Frame> {
    let file = line.file.as_deref()?;
    let lineno = line.line_number.as_deref()?;

    let in_app = file.contains(PROJECT_ROOT_PLACEHOLDER);
    let filename = match project_root {
        Some(root) => file.replace(PROJECT_ROOT_PLACEHOLDER, root),
        None => file.to_string(),
    };

    Some(Frame {
        filename,
        lineno: lineno.to_string(),
        function: line.method.clone().unwrap_or_default(),
        in_app,
        module: module.to_string(),
    })
}
