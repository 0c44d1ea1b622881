// CLASSIFICATION: COMMUNITY
// Filename: parser.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-07-19

//! Line-oriented G-code parser producing [`Code`] values.

use super::{Code, CodeChannel, CodeError, CodeParameter, CodeType, Keyword};

/// Source metadata attached to a parsed line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineMeta {
    /// Originating channel.
    pub channel: Option<CodeChannel>,
    /// One-based line number.
    pub line_number: Option<u64>,
    /// Byte offset of the line start.
    pub file_position: Option<u64>,
    /// Letter and major number to reuse when the line omits them
    /// (CNC/Laser modal repetition).
    pub implicit: Option<(CodeType, i32)>,
}

/// Parse one source line into a [`Code`].
///
/// Blank lines yield a [`CodeType::None`] code; comment-only lines yield
/// [`CodeType::Comment`]. Indent is the count of leading whitespace
/// characters.
pub fn parse_line(line: &str, meta: LineMeta) -> Result<Code, CodeError> {
    let indent = line.len() - line.trim_start_matches([' ', '\t']).len();
    let body = &line[indent..];
    let body = body.trim_end();

    let mut code = Code {
        channel: meta.channel,
        indent,
        file_position: meta.file_position,
        line_number: meta.line_number,
        ..Code::default()
    };

    if body.is_empty() {
        return Ok(code);
    }
    if let Some(comment) = body.strip_prefix(';') {
        code.code_type = CodeType::Comment;
        code.comment = Some(comment.to_string());
        return Ok(code);
    }
    if let Some(rest) = body.strip_prefix('(') {
        let end = rest.find(')').ok_or_else(|| {
            CodeError::at(&code, "unterminated parenthesized comment")
        })?;
        code.code_type = CodeType::Comment;
        code.comment = Some(rest[..end].to_string());
        return Ok(code);
    }

    // Flow-control keywords are lowercase words followed by whitespace or EOL.
    let word_len = body
        .find(|c: char| !c.is_ascii_lowercase())
        .unwrap_or(body.len());
    if let Some(keyword) = Keyword::from_word(&body[..word_len]) {
        if word_len == body.len() || body.as_bytes()[word_len].is_ascii_whitespace() {
            code.code_type = CodeType::Keyword;
            code.keyword = Some(keyword);
            let argument = strip_comment(&body[word_len..]).trim();
            if !argument.is_empty() {
                code.keyword_argument = Some(argument.to_string());
            }
            return Ok(code);
        }
    }

    let mut chars = body.char_indices().peekable();
    let (_, first) = *chars.peek().ok_or_else(|| CodeError::at(&code, "empty code"))?;
    match first.to_ascii_uppercase() {
        'G' | 'M' | 'T' => {
            chars.next();
            code.code_type = match first.to_ascii_uppercase() {
                'G' => CodeType::GCode,
                'M' => CodeType::MCode,
                _ => CodeType::TCode,
            };
            let rest = &body[1..];
            let number_len = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
                .unwrap_or(rest.len());
            if number_len > 0 {
                parse_number(&rest[..number_len], &mut code)?;
                for _ in 0..number_len {
                    chars.next();
                }
            }
        }
        letter if letter.is_ascii_alphabetic() => {
            // A line opening with a parameter letter reuses the previous
            // code's letter and major number (CNC/Laser modal style).
            let Some((code_type, major)) = meta.implicit else {
                return Err(CodeError::at(
                    &code,
                    format!("unexpected start of line: {first:?}"),
                ));
            };
            code.code_type = code_type;
            code.major = Some(major);
        }
        other => {
            return Err(CodeError::at(
                &code,
                format!("unexpected start of line: {other:?}"),
            ));
        }
    }

    // Parameter scan over the remainder of the line.
    while let Some((idx, c)) = chars.next() {
        if c.is_ascii_whitespace() {
            continue;
        }
        if c == ';' {
            let comment = body[idx + 1..].to_string();
            append_comment(&mut code, comment);
            break;
        }
        if c == '(' {
            let rest = &body[idx + 1..];
            let end = rest.find(')').ok_or_else(|| {
                CodeError::at(&code, "unterminated parenthesized comment")
            })?;
            append_comment(&mut code, rest[..end].to_string());
            for (_, inner) in chars.by_ref() {
                if inner == ')' {
                    break;
                }
            }
            continue;
        }
        if !c.is_ascii_alphabetic() {
            return Err(CodeError::at(
                &code,
                format!("invalid parameter start: {c:?}"),
            ));
        }
        let (value, quoted) = take_value(body, &mut chars, &code)?;
        code.parameters.push(CodeParameter {
            letter: c,
            value,
            quoted,
        });
    }

    Ok(code)
}

fn parse_number(text: &str, code: &mut Code) -> Result<(), CodeError> {
    let line = code.line_number;
    let invalid = || CodeError {
        message: format!("invalid code number {text:?}"),
        line,
    };
    let mut parts = text.splitn(2, '.');
    let major = parts.next().unwrap_or_default();
    code.major = Some(major.parse().map_err(|_| invalid())?);
    if let Some(minor) = parts.next() {
        code.minor = Some(minor.parse().map_err(|_| invalid())?);
    }
    Ok(())
}

fn take_value(
    body: &str,
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    code: &Code,
) -> Result<(String, bool), CodeError> {
    match chars.peek().copied() {
        Some((start, '"')) => {
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            while let Some((_, c)) = chars.next() {
                if c == '"' {
                    // A doubled quote is an escaped literal quote.
                    if matches!(chars.peek(), Some((_, '"'))) {
                        chars.next();
                        value.push('"');
                    } else {
                        closed = true;
                        break;
                    }
                } else {
                    value.push(c);
                }
            }
            if !closed {
                return Err(CodeError::at(code, "unterminated string parameter"));
            }
            let _ = start;
            Ok((value, true))
        }
        Some((start, '{')) => {
            let mut depth = 0usize;
            let mut end = None;
            for (idx, c) in chars.by_ref() {
                match c {
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            end = Some(idx);
                            break;
                        }
                    }
                    _ => {}
                }
            }
            let end = end.ok_or_else(|| CodeError::at(code, "unbalanced expression braces"))?;
            Ok((body[start..=end].to_string(), false))
        }
        _ => {
            let mut value = String::new();
            while let Some((_, c)) = chars.peek().copied() {
                if c.is_ascii_whitespace() || c == ';' || c == '(' {
                    break;
                }
                value.push(c);
                chars.next();
            }
            Ok((value, false))
        }
    }
}

fn append_comment(code: &mut Code, text: String) {
    match &mut code.comment {
        Some(existing) => {
            existing.push(' ');
            existing.push_str(&text);
        }
        None => code.comment = Some(text),
    }
}

fn strip_comment(text: &str) -> &str {
    match text.find(';') {
        Some(idx) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Code {
        parse_line(line, LineMeta::default()).expect("line parses")
    }

    #[test]
    fn plain_gcode_with_parameters() {
        let code = parse("G1 X10 Y-2.5 F3000");
        assert_eq!(code.code_type, CodeType::GCode);
        assert_eq!(code.major, Some(1));
        assert_eq!(code.minor, None);
        assert_eq!(code.parameters.len(), 3);
        assert_eq!(code.parameter('x').unwrap().as_int(), Some(10));
        assert_eq!(code.parameter('Y').unwrap().as_float(), Some(-2.5));
        assert_eq!(code.to_string(), "G1 X10 Y-2.5 F3000");
    }

    #[test]
    fn minor_number_split() {
        let code = parse("G38.2 Z-10");
        assert_eq!(code.major, Some(38));
        assert_eq!(code.minor, Some(2));
    }

    #[test]
    fn quoted_string_parameter() {
        let code = parse("M550 P\"my \"\"printer\"\"\"");
        let param = code.parameter('P').expect("P parameter");
        assert!(param.quoted);
        assert_eq!(param.value, "my \"printer\"");
        assert_eq!(code.to_string(), "M550 P\"my \"\"printer\"\"\"");
    }

    #[test]
    fn expression_parameter_keeps_braces() {
        let code = parse("G1 X{move.axes[0].max - 5}");
        let param = code.parameter('X').expect("X parameter");
        assert!(param.is_expression());
        assert_eq!(param.value, "{move.axes[0].max - 5}");
    }

    #[test]
    fn flag_parameter_has_empty_value() {
        let code = parse("G28 X Y");
        assert_eq!(code.parameters.len(), 2);
        assert_eq!(code.parameter('X').unwrap().value, "");
    }

    #[test]
    fn keyword_lines() {
        let code = parse("while iterations < 3");
        assert_eq!(code.code_type, CodeType::Keyword);
        assert_eq!(code.keyword, Some(Keyword::While));
        assert_eq!(code.keyword_argument.as_deref(), Some("iterations < 3"));

        let code = parse("else");
        assert_eq!(code.keyword, Some(Keyword::Else));
        assert_eq!(code.keyword_argument, None);
    }

    #[test]
    fn keyword_prefix_does_not_shadow_codes() {
        // `iffy` is not the `if` keyword.
        assert!(parse_line("iffy", LineMeta::default()).is_err());
    }

    #[test]
    fn indent_counts_leading_whitespace() {
        let code = parse("  G1 X0");
        assert_eq!(code.indent, 2);
        let code = parse("\t\tG1 X0");
        assert_eq!(code.indent, 2);
    }

    #[test]
    fn comment_lines() {
        let code = parse("; homing done");
        assert_eq!(code.code_type, CodeType::Comment);
        assert_eq!(code.comment.as_deref(), Some(" homing done"));

        let code = parse("(probe cycle)");
        assert_eq!(code.code_type, CodeType::Comment);
        assert_eq!(code.comment.as_deref(), Some("probe cycle"));
    }

    #[test]
    fn trailing_comment_is_captured() {
        let code = parse("G28 ; home all");
        assert_eq!(code.code_type, CodeType::GCode);
        assert_eq!(code.comment.as_deref(), Some(" home all"));
    }

    #[test]
    fn blank_line_is_none() {
        let code = parse("   ");
        assert_eq!(code.code_type, CodeType::None);
        assert_eq!(code.indent, 3);
    }

    #[test]
    fn modal_repetition_reuses_major() {
        let meta = LineMeta {
            implicit: Some((CodeType::GCode, 1)),
            ..LineMeta::default()
        };
        let code = parse_line("X12 Y4", meta).expect("modal line parses");
        assert_eq!(code.code_type, CodeType::GCode);
        assert_eq!(code.major, Some(1));
        assert_eq!(code.parameters.len(), 2);
    }

    #[test]
    fn modal_repetition_requires_context() {
        assert!(parse_line("X12 Y4", LineMeta::default()).is_err());
    }

    #[test]
    fn bare_tool_change() {
        let code = parse("T1");
        assert_eq!(code.code_type, CodeType::TCode);
        assert_eq!(code.major, Some(1));
        let code = parse("T");
        assert_eq!(code.major, None);
    }
}
