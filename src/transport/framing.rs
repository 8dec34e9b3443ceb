//! Framing protocol that carves individual command results out of a shared
//! text stream.
//!
//! [`wrap`] turns a command into a shell snippet that brackets its output
//! between a start and an end marker and reports the exit status on a line of
//! its own. [`FrameParser`] consumes the resulting stream one line at a time.
//!
//! The snippet prints a newline before the exit-code marker so the marker
//! always starts a fresh line, even when the command's output lacks a
//! trailing newline. Joining the captured lines with `\n` therefore
//! reproduces the command's output byte for byte (modulo `\r\n` line endings,
//! which the line reader folds into `\n`).

use shell_escape::unix::escape;

/// Printed before the command runs.
pub const START_MARKER: &str = "__SKIFF_FRAME_BEGIN_8d41c6f02b9e4a57__";

/// Printed once the exit status has been reported.
pub const END_MARKER: &str = "__SKIFF_FRAME_END_8d41c6f02b9e4a57__";

/// Prefix of the line carrying the decimal exit status.
pub const EXIT_CODE_MARKER: &str = "__SKIFF_FRAME_EXIT_8d41c6f02b9e4a57__=";

const STATUS_VAR: &str = "__skiff_status";

/// Wraps `command` so its output and exit status can be recovered from a
/// stream shared with other commands.
///
/// The command is evaluated in a subshell inside a brace group with stderr
/// merged into stdout, so interleaving is preserved and `exit`, `cd` or a
/// syntax error cannot take the surrounding shell down with it. Its stdin is
/// `/dev/null`: the surrounding shell reads later commands from its own
/// stdin, and a command that reads input must not consume them.
#[must_use]
pub fn wrap(command: &str) -> String {
    let escaped = escape(command.into());
    format!(
        "printf '%s\\n' '{START_MARKER}'; {{ ( eval {escaped} ) < /dev/null ; }} 2>&1; \
         {STATUS_VAR}=$?; printf '\\n%s%s\\n' '{EXIT_CODE_MARKER}' \"${STATUS_VAR}\"; \
         printf '%s\\n' '{END_MARKER}'"
    )
}

/// Output and status recovered from one frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParsedFrame {
    /// Exit status; `0` when the exit-code line was missing or malformed.
    pub exit_code: i32,
    /// Whether a well-formed exit-code line was seen.
    pub exit_code_reported: bool,
    /// Captured output with stderr interleaved.
    pub output: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Phase {
    AwaitingStart,
    Capturing,
    AwaitingEnd,
    Complete,
}

/// Streaming consumer for wrapped command output.
///
/// Lines before the start marker are ignored. Markers only count when a line
/// equals them exactly; output that merely contains a marker is kept.
#[derive(Clone, Debug)]
pub struct FrameParser {
    phase: Phase,
    lines: Vec<String>,
    exit_code: Option<i32>,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    /// Creates a parser waiting for the start marker.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: Phase::AwaitingStart,
            lines: Vec::new(),
            exit_code: None,
        }
    }

    /// Feeds one line (without its terminator). Returns `true` once the end
    /// marker has been consumed.
    pub fn push_line(&mut self, line: &str) -> bool {
        let marker_view = line.strip_suffix('\r').unwrap_or(line);
        match self.phase {
            Phase::AwaitingStart => {
                if marker_view == START_MARKER {
                    self.phase = Phase::Capturing;
                }
            }
            Phase::Capturing => {
                if marker_view == END_MARKER {
                    self.phase = Phase::Complete;
                } else if let Some(code) = marker_view.strip_prefix(EXIT_CODE_MARKER) {
                    self.exit_code = code.trim().parse().ok();
                    self.phase = Phase::AwaitingEnd;
                } else {
                    self.lines.push(line.to_owned());
                }
            }
            Phase::AwaitingEnd => {
                if marker_view == END_MARKER {
                    self.phase = Phase::Complete;
                }
            }
            Phase::Complete => {}
        }
        self.is_complete()
    }

    /// Returns `true` once the start marker has been seen.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.phase != Phase::AwaitingStart
    }

    /// Returns `true` once the end marker has been seen.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    /// Consumes the parser, returning the frame when it is complete.
    #[must_use]
    pub fn finish(self) -> Option<ParsedFrame> {
        if !self.is_complete() {
            return None;
        }
        Some(ParsedFrame {
            exit_code: self.exit_code.unwrap_or(0),
            exit_code_reported: self.exit_code.is_some(),
            output: self.lines.join("\n"),
        })
    }
}

/// Parses the first complete frame in `text`.
#[must_use]
pub fn parse_frame(text: &str) -> Option<ParsedFrame> {
    let mut parser = FrameParser::new();
    for line in text.split('\n') {
        if parser.push_line(line) {
            return parser.finish();
        }
    }
    None
}
