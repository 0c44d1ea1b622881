// CLASSIFICATION: COMMUNITY
// Filename: interpreter.rs v0.5
// Author: Lukas Bower
// Date Modified: 2026-07-19

//! Conditional block interpreter yielding codes from a G-code file.
//!
//! The interpreter keeps a stack of open blocks. Each new code first
//! reconciles the stack by indent, then either drives flow control or is
//! emitted to the caller. Popping an active `while` block seeks back to the
//! loop head after flushing pending codes, so the condition re-evaluates
//! against settled machine state.

use std::path::Path;
use std::sync::Arc;

use log::debug;

use super::{CodeFileReader, CodeFlush, ExpressionEvaluator, VariableScope};
use crate::code::{Code, CodeChannel, CodeError, Keyword};

/// One open `if`/`elif`/`else`/`while` block.
#[derive(Debug)]
pub struct CodeBlock {
    /// The keyword code that opened the block.
    pub start_code: Code,
    /// Indent of the opening keyword.
    pub indent: usize,
    /// Completed loop iterations (`while` blocks only).
    pub iterations: u32,
    /// Whether the current branch is taken.
    pub process_block: bool,
    /// Whether a following `elif`/`else` sibling may still fire.
    pub expecting_else: bool,
    /// Whether a `continue` was hit in this iteration.
    pub continue_loop: bool,
    /// Whether any code was processed inside the block.
    pub seen_codes: bool,
    /// Block-local variable names, deleted on exit.
    pub locals: Vec<String>,
}

impl CodeBlock {
    fn new(start_code: Code, process_block: bool, expecting_else: bool) -> Self {
        let indent = start_code.indent;
        Self {
            start_code,
            indent,
            iterations: 0,
            process_block,
            expecting_else,
            continue_loop: false,
            seen_codes: false,
            locals: Vec::new(),
        }
    }

    fn is_loop(&self) -> bool {
        self.start_code.keyword == Some(Keyword::While)
    }
}

/// Conditional reader feeding the channel scheduler from a file.
pub struct ConditionalReader {
    reader: CodeFileReader,
    channel: CodeChannel,
    blocks: Vec<CodeBlock>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    scope: Arc<dyn VariableScope>,
    flush: Arc<dyn CodeFlush>,
    closed: bool,
}

impl ConditionalReader {
    /// Open `path` for conditional interpretation on `channel`.
    pub fn open(
        path: &Path,
        channel: CodeChannel,
        evaluator: Arc<dyn ExpressionEvaluator>,
        scope: Arc<dyn VariableScope>,
        flush: Arc<dyn CodeFlush>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            reader: CodeFileReader::open(path, channel)?,
            channel,
            blocks: Vec::new(),
            evaluator,
            scope,
            flush,
            closed: false,
        })
    }

    /// Byte offset of the next unread line.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.reader.position()
    }

    /// Seek the underlying stream; see [`CodeFileReader::set_position`].
    pub fn set_position(&mut self, position: u64) -> anyhow::Result<()> {
        self.reader.set_position(position)
    }

    /// One-based line number of the next unread line, when known.
    #[must_use]
    pub fn line_number(&self) -> Option<u64> {
        self.reader.line_number()
    }

    /// Stop yielding codes; subsequent reads return `None`.
    pub fn close(&mut self) {
        self.closed = true;
        self.drop_all_locals();
        self.blocks.clear();
    }

    /// Iteration counter of the innermost enclosing loop.
    pub fn get_iterations(&self, code: &Code) -> Result<u32, CodeError> {
        self.blocks
            .iter()
            .rev()
            .find(|block| block.is_loop())
            .map(|block| block.iterations)
            .ok_or_else(|| CodeError::at(code, "not inside a while loop"))
    }

    /// Read the next executable code, driving block flow control.
    ///
    /// Returns `None` at end of file. `abort` and `return` codes are handed
    /// back to the caller for propagation after the file is closed.
    pub async fn read_code(&mut self) -> Result<Option<Code>, CodeError> {
        if self.closed {
            return Ok(None);
        }
        loop {
            let Some(code) = self.reader.read_code()? else {
                if self.reconcile_eof().await? {
                    continue;
                }
                self.closed = true;
                return Ok(None);
            };
            if code.is_comment() {
                continue;
            }

            // Loop head re-entry after a seek back: re-evaluate the condition
            // on the existing block instead of opening a new one.
            if code.keyword == Some(Keyword::While) {
                let top_start = self
                    .blocks
                    .last()
                    .and_then(|block| block.start_code.file_position);
                if top_start.is_some() && top_start == code.file_position {
                    let active = self.enclosing_active(self.blocks.len() - 1);
                    let process = if active {
                        self.evaluate_condition(&code).await?
                    } else {
                        false
                    };
                    let top = self.blocks.last_mut().expect("loop block present");
                    top.process_block = process;
                    top.continue_loop = false;
                    top.seen_codes = false;
                    continue;
                }
            }

            if self.reconcile(&code).await? {
                // A loop seek happened; the current code re-appears later.
                continue;
            }

            if let Some(top) = self.blocks.last_mut() {
                if code.indent > top.indent {
                    top.seen_codes = true;
                }
            }

            let active = self.block_active();
            match code.keyword {
                Some(Keyword::If) => {
                    let process = if active {
                        self.evaluate_condition(&code).await?
                    } else {
                        false
                    };
                    let expecting_else = active && !process;
                    self.blocks.push(CodeBlock::new(code, process, expecting_else));
                }
                Some(Keyword::While) => {
                    let process = if active {
                        self.evaluate_condition(&code).await?
                    } else {
                        false
                    };
                    self.blocks.push(CodeBlock::new(code, process, false));
                }
                Some(Keyword::ElseIf) => {
                    self.begin_sibling(code, true).await?;
                }
                Some(Keyword::Else) => {
                    self.begin_sibling(code, false).await?;
                }
                Some(Keyword::Break) => {
                    if active {
                        self.leave_loop(&code, false)?;
                    }
                }
                Some(Keyword::Continue) => {
                    if active {
                        self.leave_loop(&code, true)?;
                    }
                }
                Some(Keyword::Abort | Keyword::Return) => {
                    if active {
                        self.await_flush(&code).await?;
                        self.close();
                        return Ok(Some(code));
                    }
                }
                Some(Keyword::Var | Keyword::Global) => {
                    if active {
                        if let Some(name) = declared_name(&code) {
                            if let Some(top) = self.blocks.last_mut() {
                                top.locals.push(name);
                            }
                        }
                        return Ok(Some(code));
                    }
                }
                Some(Keyword::Set | Keyword::Echo) | None => {
                    if active {
                        return Ok(Some(code));
                    }
                }
            }
        }
    }

    /// Pop blocks whose indent encloses `code`; `Ok(true)` means a loop seek
    /// happened and the caller must re-read.
    async fn reconcile(&mut self, code: &Code) -> Result<bool, CodeError> {
        while let Some(top) = self.blocks.last() {
            if top.indent < code.indent {
                return Ok(false);
            }
            // Same-indent elif/else continues the sibling chain in place.
            if top.indent == code.indent
                && matches!(code.keyword, Some(Keyword::ElseIf | Keyword::Else))
                && matches!(
                    top.start_code.keyword,
                    Some(Keyword::If | Keyword::ElseIf)
                )
            {
                return Ok(false);
            }
            if self.pop_block(code).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Pop every block at end of file; `Ok(true)` means a loop seek happened.
    async fn reconcile_eof(&mut self) -> Result<bool, CodeError> {
        while !self.blocks.is_empty() {
            let eof_marker = Code::default();
            if self.pop_block(&eof_marker).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Pop the top block. An active loop block seeks back to its head and
    /// stays on the stack; everything else is discarded with its locals.
    async fn pop_block(&mut self, context: &Code) -> Result<bool, CodeError> {
        let top = self.blocks.last().expect("pop with empty stack");
        if top.is_loop() && !top.seen_codes {
            return Err(CodeError::at(&top.start_code, "empty while body"));
        }
        if top.is_loop() && (top.process_block || top.continue_loop) {
            self.await_flush(context).await?;
            let top = self.blocks.last_mut().expect("loop block present");
            let position = top
                .start_code
                .file_position
                .ok_or_else(|| CodeError::at(&top.start_code, "loop head position unknown"))?;
            let line = top.start_code.line_number;
            top.iterations += 1;
            top.continue_loop = false;
            top.seen_codes = false;
            debug!(
                "loop on {} iterating (iteration {})",
                self.channel, top.iterations
            );
            self.reader
                .rewind_to(position, line)
                .map_err(|e| CodeError::new(format!("loop seek failed: {e}")))?;
            return Ok(true);
        }
        let block = self.blocks.pop().expect("pop with empty stack");
        for name in &block.locals {
            self.scope.remove_local(self.channel, name);
        }
        Ok(false)
    }

    /// Continue an `if`/`elif` chain with an `elif` or `else` sibling.
    async fn begin_sibling(&mut self, code: Code, conditional: bool) -> Result<(), CodeError> {
        let Some(top) = self.blocks.last() else {
            return Err(CodeError::at(&code, "elif/else without a matching if"));
        };
        if top.indent != code.indent
            || !matches!(top.start_code.keyword, Some(Keyword::If | Keyword::ElseIf))
        {
            return Err(CodeError::at(&code, "elif/else without a matching if"));
        }
        let enclosing = self.enclosing_active(self.blocks.len() - 1);
        let expecting = self.blocks.last().expect("sibling block").expecting_else;
        let process = if enclosing && expecting {
            if conditional {
                self.evaluate_condition(&code).await?
            } else {
                true
            }
        } else {
            false
        };
        let top = self.blocks.last_mut().expect("sibling block");
        // The previous branch's locals go out of scope with the branch.
        for name in top.locals.drain(..) {
            self.scope.remove_local(self.channel, &name);
        }
        top.expecting_else = if conditional {
            expecting && enclosing && !process
        } else {
            false
        };
        top.process_block = process;
        top.seen_codes = false;
        top.start_code = code;
        Ok(())
    }

    /// Clear `process_block` up to and including the innermost loop, then
    /// mark whether the loop should iterate again.
    fn leave_loop(&mut self, code: &Code, continue_loop: bool) -> Result<(), CodeError> {
        let Some(loop_index) = self.blocks.iter().rposition(CodeBlock::is_loop) else {
            return Err(CodeError::at(
                code,
                format!(
                    "{} outside a while loop",
                    code.keyword.map_or("keyword", Keyword::as_str)
                ),
            ));
        };
        for block in &mut self.blocks[loop_index..] {
            block.process_block = false;
        }
        self.blocks[loop_index].continue_loop = continue_loop;
        Ok(())
    }

    fn block_active(&self) -> bool {
        self.blocks.last().map_or(true, |block| block.process_block)
    }

    /// Whether every block below `index` takes its current branch.
    fn enclosing_active(&self, index: usize) -> bool {
        self.blocks[..index].iter().all(|block| block.process_block)
    }

    async fn evaluate_condition(&self, code: &Code) -> Result<bool, CodeError> {
        let receiver = self.evaluator.evaluate(code, true);
        let result = receiver
            .await
            .map_err(|_| CodeError::at(code, "expression evaluator went away"))??;
        match result.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(CodeError::at(
                code,
                format!("expected boolean condition, got {other:?}"),
            )),
        }
    }

    async fn await_flush(&self, code: &Code) -> Result<(), CodeError> {
        let receiver = self.flush.flush(self.channel);
        match receiver.await {
            Ok(true) => Ok(()),
            Ok(false) => Err(CodeError::at(code, "channel aborted during flush")),
            Err(_) => Err(CodeError::at(code, "scheduler went away during flush")),
        }
    }

    fn drop_all_locals(&mut self) {
        for block in &self.blocks {
            for name in &block.locals {
                self.scope.remove_local(self.channel, name);
            }
        }
    }
}

fn declared_name(code: &Code) -> Option<String> {
    let argument = code.keyword_argument.as_deref()?;
    let name = argument.split('=').next()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
