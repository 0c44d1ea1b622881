// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-07-19

//! Code data model: channels, types, parameters, and flags.

mod parser;

pub use parser::{parse_line, LineMeta};

use std::fmt;

/// Logical originator of codes. Each channel owns a queue and a busy bit.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeChannel {
    /// HTTP clients.
    Http = 0,
    /// Telnet clients.
    Telnet = 1,
    /// The active job file.
    File = 2,
    /// USB serial console.
    Usb = 3,
    /// Auxiliary serial port.
    Aux = 4,
    /// Firmware triggers.
    Trigger = 5,
    /// The queued-code channel.
    Queue = 6,
    /// Attached LCD panel.
    Lcd = 7,
    /// Codes originated by the SBC itself.
    Sbc = 8,
    /// The daemon maintenance channel.
    Daemon = 9,
    /// Automatic pause handling.
    Autopause = 10,
    /// Second job file during multi-tool prints.
    File2 = 11,
    /// Second queued-code channel.
    Queue2 = 12,
    /// Fallback for unrecognised sources.
    Unknown = 13,
}

/// Number of addressable channels.
pub const CHANNEL_COUNT: usize = 14;

impl CodeChannel {
    /// All channels in wire order.
    pub const ALL: [CodeChannel; CHANNEL_COUNT] = [
        CodeChannel::Http,
        CodeChannel::Telnet,
        CodeChannel::File,
        CodeChannel::Usb,
        CodeChannel::Aux,
        CodeChannel::Trigger,
        CodeChannel::Queue,
        CodeChannel::Lcd,
        CodeChannel::Sbc,
        CodeChannel::Daemon,
        CodeChannel::Autopause,
        CodeChannel::File2,
        CodeChannel::Queue2,
        CodeChannel::Unknown,
    ];

    /// Wire index of the channel.
    #[must_use]
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Map a wire index back to a channel, defaulting to `Unknown`.
    #[must_use]
    pub fn from_index(index: u8) -> Self {
        Self::ALL
            .get(index as usize)
            .copied()
            .unwrap_or(CodeChannel::Unknown)
    }

    /// Parse a channel from its IPC name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let found = match name.to_ascii_lowercase().as_str() {
            "http" => CodeChannel::Http,
            "telnet" => CodeChannel::Telnet,
            "file" => CodeChannel::File,
            "usb" => CodeChannel::Usb,
            "aux" => CodeChannel::Aux,
            "trigger" => CodeChannel::Trigger,
            "queue" => CodeChannel::Queue,
            "lcd" => CodeChannel::Lcd,
            "sbc" => CodeChannel::Sbc,
            "daemon" => CodeChannel::Daemon,
            "autopause" => CodeChannel::Autopause,
            "file2" => CodeChannel::File2,
            "queue2" => CodeChannel::Queue2,
            _ => return None,
        };
        Some(found)
    }
}

impl fmt::Display for CodeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CodeChannel::Http => "HTTP",
            CodeChannel::Telnet => "Telnet",
            CodeChannel::File => "File",
            CodeChannel::Usb => "USB",
            CodeChannel::Aux => "Aux",
            CodeChannel::Trigger => "Trigger",
            CodeChannel::Queue => "Queue",
            CodeChannel::Lcd => "LCD",
            CodeChannel::Sbc => "SBC",
            CodeChannel::Daemon => "Daemon",
            CodeChannel::Autopause => "Autopause",
            CodeChannel::File2 => "File2",
            CodeChannel::Queue2 => "Queue2",
            CodeChannel::Unknown => "Unknown",
        };
        write!(f, "{name}")
    }
}

/// Kind of a parsed code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodeType {
    /// `G` code.
    GCode,
    /// `M` code.
    MCode,
    /// `T` code.
    TCode,
    /// A comment-only line.
    Comment,
    /// A flow-control keyword line.
    Keyword,
    /// No content (blank line).
    #[default]
    None,
}

/// Flow-control keywords understood by the file interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    /// Open a conditional block.
    If,
    /// Sibling conditional after a false `if`/`elif`.
    ElseIf,
    /// Sibling fallback after a false `if`/`elif`.
    Else,
    /// Open a loop block.
    While,
    /// Leave the innermost loop.
    Break,
    /// Jump to the next iteration of the innermost loop.
    Continue,
    /// Abort the file with a message.
    Abort,
    /// Leave the current macro.
    Return,
    /// Declare a block-local variable.
    Var,
    /// Declare a global variable.
    Global,
    /// Assign an existing variable.
    Set,
    /// Emit a message.
    Echo,
}

impl Keyword {
    fn from_word(word: &str) -> Option<Self> {
        Some(match word {
            "if" => Keyword::If,
            "elif" => Keyword::ElseIf,
            "else" => Keyword::Else,
            "while" => Keyword::While,
            "break" => Keyword::Break,
            "continue" => Keyword::Continue,
            "abort" => Keyword::Abort,
            "return" => Keyword::Return,
            "var" => Keyword::Var,
            "global" => Keyword::Global,
            "set" => Keyword::Set,
            "echo" => Keyword::Echo,
            _ => return None,
        })
    }

    /// Canonical keyword spelling.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::If => "if",
            Keyword::ElseIf => "elif",
            Keyword::Else => "else",
            Keyword::While => "while",
            Keyword::Break => "break",
            Keyword::Continue => "continue",
            Keyword::Abort => "abort",
            Keyword::Return => "return",
            Keyword::Var => "var",
            Keyword::Global => "global",
            Keyword::Set => "set",
            Keyword::Echo => "echo",
        }
    }
}

bitflags::bitflags! {
    /// Execution flags attached to a code.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CodeFlags: u32 {
        /// Complete as soon as the code is enqueued firmware-side.
        const ASYNCHRONOUS = 1 << 0;
        /// Handled entirely on the SBC, never sent to firmware.
        const INTERNALLY_PROCESSED = 1 << 1;
        /// Bypass the firmware code buffer.
        const UNBUFFERED = 1 << 2;
        /// Originates from a firmware-requested macro.
        const FROM_MACRO = 1 << 3;
        /// Originates from a macro invoked by another macro.
        const NESTED_MACRO = 1 << 4;
        /// Already ran through the post-processor.
        const POST_PROCESSED = 1 << 5;
    }
}

/// One `letter=value` parameter of a code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeParameter {
    /// Parameter letter as written.
    pub letter: char,
    /// Raw value text; may be a quoted string or a `{}` expression.
    pub value: String,
    /// Whether the value was written as a quoted string.
    pub quoted: bool,
}

impl CodeParameter {
    /// Value as a signed integer, if it parses.
    #[must_use]
    pub fn as_int(&self) -> Option<i32> {
        self.value.parse().ok()
    }

    /// Value as an unsigned integer, if it parses.
    #[must_use]
    pub fn as_uint(&self) -> Option<u32> {
        self.value.parse().ok()
    }

    /// Value as a float, if it parses.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        self.value.parse().ok()
    }

    /// Value as a boolean (`0`/`1`/`true`/`false`).
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self.value.as_str() {
            "0" | "false" => Some(false),
            "1" | "true" => Some(true),
            _ => None,
        }
    }

    /// Whether the value is a `{}` expression to be evaluated firmware-side.
    #[must_use]
    pub fn is_expression(&self) -> bool {
        !self.quoted && self.value.starts_with('{') && self.value.ends_with('}')
    }
}

/// A parsed code, the unit of work moved between host and firmware.
#[derive(Debug, Clone, Default)]
pub struct Code {
    /// Originating channel.
    pub channel: Option<CodeChannel>,
    /// Kind of code on this line.
    pub code_type: CodeType,
    /// Major code number (`28` in `G28`).
    pub major: Option<i32>,
    /// Minor code number (`2` in `G38.2`).
    pub minor: Option<i32>,
    /// Parameters in source order.
    pub parameters: Vec<CodeParameter>,
    /// Flow-control keyword, when `code_type` is [`CodeType::Keyword`].
    pub keyword: Option<Keyword>,
    /// Raw argument text following the keyword.
    pub keyword_argument: Option<String>,
    /// Trailing comment text, without the delimiter.
    pub comment: Option<String>,
    /// Leading whitespace count of the source line.
    pub indent: usize,
    /// Byte offset of the line in its source file.
    pub file_position: Option<u64>,
    /// One-based source line number.
    pub line_number: Option<u64>,
    /// Execution flags.
    pub flags: CodeFlags,
    /// IPC connection the code arrived on, if any.
    pub connection_id: Option<u64>,
}

impl Code {
    /// Shorthand for a comment-only or blank line.
    #[must_use]
    pub fn is_comment(&self) -> bool {
        matches!(self.code_type, CodeType::Comment | CodeType::None)
    }

    /// First parameter with the given letter (case-insensitive).
    #[must_use]
    pub fn parameter(&self, letter: char) -> Option<&CodeParameter> {
        self.parameters
            .iter()
            .find(|p| p.letter.eq_ignore_ascii_case(&letter))
    }

    /// The channel, defaulting to [`CodeChannel::Unknown`].
    #[must_use]
    pub fn channel_or_default(&self) -> CodeChannel {
        self.channel.unwrap_or(CodeChannel::Unknown)
    }

    /// Whether this code pushes a macro frame and needs the machine lock.
    #[must_use]
    pub fn needs_machine_lock(&self) -> bool {
        matches!(
            (self.code_type, self.major),
            (CodeType::MCode, Some(98)) | (CodeType::MCode, Some(120)) | (CodeType::MCode, Some(121))
        )
    }
}

impl fmt::Display for Code {
    /// Reconstruct canonical code text, e.g. `G1 X10 Y{var.pos}`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code_type {
            CodeType::GCode | CodeType::MCode | CodeType::TCode => {
                let letter = match self.code_type {
                    CodeType::GCode => 'G',
                    CodeType::MCode => 'M',
                    _ => 'T',
                };
                write!(f, "{letter}")?;
                if let Some(major) = self.major {
                    write!(f, "{major}")?;
                    if let Some(minor) = self.minor {
                        write!(f, ".{minor}")?;
                    }
                }
                for param in &self.parameters {
                    if param.quoted {
                        write!(f, " {}\"{}\"", param.letter, param.value.replace('"', "\"\""))?;
                    } else {
                        write!(f, " {}{}", param.letter, param.value)?;
                    }
                }
                Ok(())
            }
            CodeType::Keyword => {
                let keyword = self.keyword.map_or("", Keyword::as_str);
                match &self.keyword_argument {
                    Some(arg) if !arg.is_empty() => write!(f, "{keyword} {arg}"),
                    _ => write!(f, "{keyword}"),
                }
            }
            CodeType::Comment => match &self.comment {
                Some(comment) => write!(f, ";{comment}"),
                None => Ok(()),
            },
            CodeType::None => Ok(()),
        }
    }
}

/// Parse or flow error raised while handling a code, with source context.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("{message} (line {line:?})")]
pub struct CodeError {
    /// Description of the failure.
    pub message: String,
    /// Source line number, when known.
    pub line: Option<u64>,
}

impl CodeError {
    /// Build an error for the given code's source position.
    #[must_use]
    pub fn at(code: &Code, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: code.line_number,
        }
    }

    /// Build an error without source context.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
        }
    }
}
