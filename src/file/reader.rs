// CLASSIFICATION: COMMUNITY
// Filename: reader.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-19

//! Positioned line reader over a G-code file.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

use anyhow::Result;

use crate::code::{parse_line, Code, CodeChannel, CodeType, LineMeta};

/// Buffered reader tracking byte position and line number across seeks.
pub struct CodeFileReader {
    reader: BufReader<File>,
    channel: CodeChannel,
    position: u64,
    line_number: Option<u64>,
    last_major: Option<(CodeType, i32)>,
    modal_repetition: bool,
}

impl CodeFileReader {
    /// Open `path` for reading on behalf of `channel`.
    pub fn open(path: &Path, channel: CodeChannel) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            channel,
            position: 0,
            line_number: Some(1),
            last_major: None,
            modal_repetition: false,
        })
    }

    /// Enable CNC/Laser-style modal repetition of omitted major numbers.
    pub fn set_modal_repetition(&mut self, enabled: bool) {
        self.modal_repetition = enabled;
    }

    /// Byte offset of the next unread line.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// One-based line number of the next unread line, when known.
    #[must_use]
    pub fn line_number(&self) -> Option<u64> {
        self.line_number
    }

    /// Seek to an absolute byte offset, invalidating the parse buffer.
    ///
    /// The line number resets to 1 for position zero and becomes unknown for
    /// any other target.
    pub fn set_position(&mut self, position: u64) -> Result<()> {
        self.reader.seek(SeekFrom::Start(position))?;
        self.position = position;
        self.line_number = if position == 0 { Some(1) } else { None };
        self.last_major = None;
        Ok(())
    }

    /// Restore position and line number together, as when re-entering a loop.
    pub fn rewind_to(&mut self, position: u64, line_number: Option<u64>) -> Result<()> {
        self.set_position(position)?;
        self.line_number = line_number;
        Ok(())
    }

    /// Read and parse the next line; `None` at end of file.
    pub fn read_code(&mut self) -> Result<Option<Code>, crate::code::CodeError> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .map_err(|e| crate::code::CodeError::new(format!("read failed: {e}")))?;
        if read == 0 {
            return Ok(None);
        }
        let meta = LineMeta {
            channel: Some(self.channel),
            line_number: self.line_number,
            file_position: Some(self.position),
            implicit: if self.modal_repetition {
                self.last_major
            } else {
                None
            },
        };
        self.position += read as u64;
        if let Some(n) = self.line_number {
            // Line counting stays unknown after a blind seek.
            self.line_number = Some(n + 1);
        }
        let code = parse_line(line.trim_end_matches(['\r', '\n']), meta)?;
        if let (CodeType::GCode | CodeType::MCode, Some(major)) = (code.code_type, code.major) {
            self.last_major = Some((code.code_type, major));
        }
        Ok(Some(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn reader_for(content: &str) -> (tempfile::NamedTempFile, CodeFileReader) {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(content.as_bytes()).expect("write content");
        let reader = CodeFileReader::open(file.path(), CodeChannel::File).expect("open reader");
        (file, reader)
    }

    #[test]
    fn tracks_positions_and_line_numbers() {
        let (_file, mut reader) = reader_for("G28\nG1 X5\n");
        let first = reader.read_code().expect("parse").expect("code");
        assert_eq!(first.file_position, Some(0));
        assert_eq!(first.line_number, Some(1));
        let second = reader.read_code().expect("parse").expect("code");
        assert_eq!(second.file_position, Some(4));
        assert_eq!(second.line_number, Some(2));
        assert!(reader.read_code().expect("parse").is_none());
    }

    #[test]
    fn seek_to_zero_resets_line_number() {
        let (_file, mut reader) = reader_for("G28\nG1 X5\n");
        reader.read_code().expect("parse").expect("code");
        reader.set_position(0).expect("seek");
        assert_eq!(reader.line_number(), Some(1));
        let again = reader.read_code().expect("parse").expect("code");
        assert_eq!(again.line_number, Some(1));
        assert_eq!(again.to_string(), "G28");
    }

    #[test]
    fn blind_seek_loses_line_number() {
        let (_file, mut reader) = reader_for("G28\nG1 X5\n");
        reader.set_position(4).expect("seek");
        assert_eq!(reader.line_number(), None);
        let code = reader.read_code().expect("parse").expect("code");
        assert_eq!(code.line_number, None);
        assert_eq!(code.file_position, Some(4));
    }

    #[test]
    fn modal_repetition_tracks_last_major() {
        let (_file, mut reader) = reader_for("G1 X1\nX2 Y3\n");
        reader.set_modal_repetition(true);
        reader.read_code().expect("parse").expect("code");
        let modal = reader.read_code().expect("parse").expect("code");
        assert_eq!(modal.major, Some(1));
        assert_eq!(modal.parameters.len(), 2);
    }
}
