// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.6
// Author: Lukas Bower
// Date Modified: 2026-07-22

//! Per-channel code scheduler: queues, busy-mask flow control, macro stacks,
//! and reply routing.
//!
//! Each channel carries two FIFOs: the code queue for externally submitted
//! codes and a macro FIFO fed by the channel's macro stack. The queue always
//! wins; macro codes only go out while the queue is empty.
//!
//! One mutex guards the scheduler state and is only held for O(1) updates;
//! object-model calls happen after it is released. Lock order across the
//! daemon is scheduler, then model, then subscribers.

mod queued;

pub use queued::{CodeResult, CodeState, QueuedCode};

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};

use log::{debug, error, info, warn};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

use crate::code::{Code, CodeChannel, CodeError, Keyword, CHANNEL_COUNT};
use crate::file::{CodeFlush, ConditionalReader, ExpressionEvaluator, VariableScope};
use crate::model::{ChangeKind, MessageSeverity, ModelStore, PathChange, PathSegment};
use spindle_wire::{ReplyFlags, WireError};

/// Outgoing packet writer surface offered by the SPI connection.
///
/// Every method fails softly with [`WireError::BufferFull`] when the current
/// transfer cannot take the packet; the scheduler retries next tick.
pub trait CodeWriter {
    /// Write a code for execution on a channel.
    fn write_code(&mut self, channel: u8, flags: u32, text: &str) -> Result<u16, WireError>;
    /// Report a finished macro back to the firmware.
    fn write_macro_completed(&mut self, channel: u8, error: bool) -> Result<(), WireError>;
    /// Request the global machine lock for a channel.
    fn write_lock_request(&mut self, channel: u8) -> Result<(), WireError>;
    /// Release all locks held on behalf of a channel.
    fn write_unlock_all(&mut self, channel: u8) -> Result<(), WireError>;
    /// Ask the firmware to evaluate an expression.
    fn write_evaluate_expression(&mut self, channel: u8, expression: &str)
        -> Result<(), WireError>;
    /// Set or delete a firmware variable (empty value deletes).
    fn write_set_variable(
        &mut self,
        channel: u8,
        create: bool,
        name: &str,
        value: &str,
    ) -> Result<(), WireError>;
}

struct MacroExecution {
    path: PathBuf,
    task: Option<JoinHandle<()>>,
}

/// Which of a channel's two FIFOs a code sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodeSource {
    /// Externally submitted codes; always serviced first.
    Queue,
    /// Codes pulled from the channel's macro stack.
    MacroStack,
}

#[derive(Default)]
struct ChannelProcessor {
    /// Externally submitted codes.
    queue: VecDeque<QueuedCode>,
    /// Codes emitted by the macro stack, only serviced while `queue` is empty.
    macro_queue: VecDeque<QueuedCode>,
    macros: Vec<MacroExecution>,
    flush_waiters: Vec<oneshot::Sender<bool>>,
    lock_requested: bool,
    lock_granted: bool,
    unlock_pending: bool,
}

impl ChannelProcessor {
    fn fifo(&mut self, source: CodeSource) -> &mut VecDeque<QueuedCode> {
        match source {
            CodeSource::Queue => &mut self.queue,
            CodeSource::MacroStack => &mut self.macro_queue,
        }
    }

    /// Whether a code from either FIFO is out at the firmware.
    fn in_flight(&self) -> bool {
        let sent = |code: &QueuedCode| {
            matches!(code.state, CodeState::Sent | CodeState::AwaitingReply)
        };
        self.queue.front().is_some_and(sent) || self.macro_queue.front().is_some_and(sent)
    }

    /// FIFO to send from next: the code queue preempts the macro stack.
    fn next_source(&self) -> Option<CodeSource> {
        if !self.queue.is_empty() {
            Some(CodeSource::Queue)
        } else if !self.macro_queue.is_empty() {
            Some(CodeSource::MacroStack)
        } else {
            None
        }
    }

    /// FIFO holding the in-flight code a reply belongs to.
    fn reply_source(&self) -> Option<CodeSource> {
        let sent = |code: &QueuedCode| {
            matches!(code.state, CodeState::Sent | CodeState::AwaitingReply)
        };
        if self.queue.front().is_some_and(sent) {
            Some(CodeSource::Queue)
        } else if self.macro_queue.front().is_some_and(sent) {
            Some(CodeSource::MacroStack)
        } else {
            None
        }
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.macro_queue.is_empty()
    }

    fn settle_flush_waiters(&mut self, ok: bool) {
        if self.is_idle() {
            for waiter in self.flush_waiters.drain(..) {
                let _ = waiter.send(ok);
            }
        }
    }
}

struct EvalRequest {
    channel: u8,
    expression: String,
    tx: oneshot::Sender<Result<String, CodeError>>,
}

#[derive(Default)]
struct State {
    channels: Vec<ChannelProcessor>,
    busy_channels: u16,
    macro_done: Vec<(u8, bool)>,
    var_deletes: Vec<(u8, String)>,
    evals_out: VecDeque<EvalRequest>,
    evals_in_flight: VecDeque<oneshot::Sender<Result<String, CodeError>>>,
}

/// The channel scheduler.
pub struct Scheduler {
    state: Mutex<State>,
    wake: Notify,
    model: Arc<ModelStore>,
    macro_dir: PathBuf,
    evaluator: Mutex<Arc<dyn ExpressionEvaluator>>,
}

impl Scheduler {
    /// Create a scheduler whose expressions round-trip through the firmware.
    pub fn new(model: Arc<ModelStore>, macro_dir: PathBuf) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Scheduler>| {
            let mut state = State::default();
            state
                .channels
                .resize_with(CHANNEL_COUNT, ChannelProcessor::default);
            Self {
                state: Mutex::new(state),
                wake: Notify::new(),
                model,
                macro_dir,
                evaluator: Mutex::new(Arc::new(FirmwareEvaluator {
                    scheduler: weak.clone(),
                })),
            }
        })
    }

    /// Replace the expression evaluator (used by tests and intercepts).
    pub fn set_evaluator(&self, evaluator: Arc<dyn ExpressionEvaluator>) {
        *self.evaluator.lock().expect("evaluator lock") = evaluator;
    }

    /// Notifier kicked whenever outgoing work appears.
    #[must_use]
    pub fn wake(&self) -> &Notify {
        &self.wake
    }

    /// Enqueue a code and receive its completion.
    pub fn enqueue(self: &Arc<Self>, code: Code) -> oneshot::Receiver<CodeResult> {
        self.enqueue_inner(code, false)
    }

    /// Enqueue a system code originating from a macro. System codes join the
    /// channel's macro FIFO and yield to directly queued codes.
    pub fn enqueue_system(self: &Arc<Self>, code: Code) -> oneshot::Receiver<CodeResult> {
        self.enqueue_inner(code, true)
    }

    fn enqueue_inner(self: &Arc<Self>, code: Code, system: bool) -> oneshot::Receiver<CodeResult> {
        let channel = code.channel_or_default();
        let (mut queued, rx) = QueuedCode::new(code, system);
        if queued
            .code
            .flags
            .contains(crate::code::CodeFlags::INTERNALLY_PROCESSED)
        {
            queued.complete();
            return rx;
        }
        let source = if system {
            CodeSource::MacroStack
        } else {
            CodeSource::Queue
        };
        {
            let mut state = self.state.lock().expect("scheduler lock");
            state.channels[channel.index() as usize]
                .fifo(source)
                .push_back(queued);
        }
        self.wake.notify_one();
        rx
    }

    /// Wait until every pending code on `channel` settled.
    pub fn flush_channel(&self, channel: CodeChannel) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().expect("scheduler lock");
        let chan = &mut state.channels[channel.index() as usize];
        if chan.is_idle() {
            let _ = tx.send(true);
        } else {
            chan.flush_waiters.push(tx);
        }
        rx
    }

    /// Queue an expression for firmware-side evaluation.
    pub fn request_evaluation(
        &self,
        channel: CodeChannel,
        expression: String,
    ) -> oneshot::Receiver<Result<String, CodeError>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().expect("scheduler lock");
            state.evals_out.push_back(EvalRequest {
                channel: channel.index(),
                expression,
                tx,
            });
        }
        self.wake.notify_one();
        rx
    }

    /// Fill the outgoing transfer from the channel queues.
    ///
    /// Runs once per transport tick. Writing stops at the first
    /// [`WireError::BufferFull`]; everything left over goes next tick.
    pub fn pump_outgoing(&self, writer: &mut dyn CodeWriter) {
        let mut state = self.state.lock().expect("scheduler lock");

        state
            .macro_done
            .retain(|(channel, error)| writer.write_macro_completed(*channel, *error).is_err());
        state
            .var_deletes
            .retain(|(channel, name)| writer.write_set_variable(*channel, false, name, "").is_err());

        while let Some(req) = state.evals_out.front() {
            if writer
                .write_evaluate_expression(req.channel, &req.expression)
                .is_err()
            {
                break;
            }
            let req = state.evals_out.pop_front().expect("front checked");
            state.evals_in_flight.push_back(req.tx);
        }

        let busy = state.busy_channels;
        for index in 0..CHANNEL_COUNT {
            let chan = &mut state.channels[index];
            if chan.unlock_pending && writer.write_unlock_all(index as u8).is_ok() {
                chan.unlock_pending = false;
            }
            if busy & (1 << index) != 0 {
                continue;
            }
            if chan.in_flight() {
                continue;
            }
            // The code queue preempts the macro stack: a macro code still
            // waiting to go out yields to freshly queued direct codes.
            let Some(source) = chan.next_source() else {
                continue;
            };
            let needs_lock = chan
                .fifo(source)
                .front()
                .expect("source is non-empty")
                .code
                .needs_machine_lock();
            if needs_lock && !chan.lock_granted {
                if !chan.lock_requested && writer.write_lock_request(index as u8).is_ok() {
                    chan.lock_requested = true;
                }
                continue;
            }
            let head = chan.fifo(source).front_mut().expect("source is non-empty");
            let text = head.code.to_string();
            match writer.write_code(index as u8, head.code.flags.bits(), &text) {
                Ok(_) => {
                    debug!("sent {text} on {}", CodeChannel::from_index(index as u8));
                    head.state = CodeState::Sent;
                    state.busy_channels |= 1 << index;
                }
                Err(WireError::BufferFull) => break,
                Err(err) => {
                    warn!("failed to write code {text}: {err}");
                    let mut failed = chan.fifo(source).pop_front().expect("front checked");
                    failed.fail(CodeError::new(format!("write failed: {err}")));
                    chan.settle_flush_waiters(true);
                }
            }
        }
    }

    /// Record the firmware-reported busy mask.
    pub fn update_busy(&self, mask: u16) {
        let mut state = self.state.lock().expect("scheduler lock");
        state.busy_channels = mask;
        drop(state);
        self.wake.notify_one();
    }

    /// Route a reply fragment to the head code of each addressed channel, or
    /// into the model message log when no channel is addressed.
    pub async fn handle_code_reply(&self, flags: ReplyFlags, text: String) {
        let mut routed = false;
        {
            let mut state = self.state.lock().expect("scheduler lock");
            for wire_index in flags.channels() {
                let index = wire_index as usize;
                if index >= CHANNEL_COUNT {
                    continue;
                }
                let chan = &mut state.channels[index];
                let Some(source) = chan.reply_source() else {
                    continue;
                };
                routed = true;
                let head = chan.fifo(source).front_mut().expect("source is in flight");
                head.reply.push_str(&text);
                if flags.contains(ReplyFlags::PUSH) {
                    head.state = CodeState::AwaitingReply;
                    continue;
                }
                if flags.contains(ReplyFlags::ERROR) {
                    head.error = Some(CodeError::new(std::mem::take(&mut head.reply)));
                }
                let mut settled = chan.fifo(source).pop_front().expect("front checked");
                settled.complete();
                state.busy_channels &= !(1 << index);
                let chan = &mut state.channels[index];
                if settled.code.needs_machine_lock() {
                    chan.lock_granted = false;
                    chan.lock_requested = false;
                    chan.unlock_pending = true;
                }
                chan.settle_flush_waiters(true);
            }
        }
        if routed {
            self.wake.notify_one();
            return;
        }
        let severity = if flags.contains(ReplyFlags::ERROR) {
            MessageSeverity::Error
        } else if flags.contains(ReplyFlags::WARNING) {
            MessageSeverity::Warning
        } else {
            MessageSeverity::Info
        };
        self.model.message(severity, &text).await;
    }

    /// Handle a firmware request to run a macro file.
    pub async fn handle_execute_macro(
        self: &Arc<Self>,
        channel: CodeChannel,
        report_missing: bool,
        file_name: &str,
    ) {
        let path = self.macro_dir.join(file_name);
        if !path.is_file() {
            if report_missing {
                error!("macro file {file_name} not found");
                self.model
                    .message(
                        MessageSeverity::Error,
                        &format!("Macro file {file_name} not found"),
                    )
                    .await;
            } else {
                debug!("optional macro file {file_name} not found");
            }
            self.report_macro_done(channel, true);
            return;
        }

        let handle = SchedulerHandle(Arc::downgrade(self));
        let evaluator = self.evaluator.lock().expect("evaluator lock").clone();
        let reader = match ConditionalReader::open(
            &path,
            channel,
            evaluator,
            Arc::new(handle.clone()),
            Arc::new(handle),
        ) {
            Ok(reader) => reader,
            Err(err) => {
                error!("failed to open macro {file_name}: {err}");
                self.report_macro_done(channel, true);
                return;
            }
        };

        info!("starting macro {file_name} on {channel}");
        let scheduler = Arc::clone(self);
        let mut state = self.state.lock().expect("scheduler lock");
        let chan = &mut state.channels[channel.index() as usize];
        let nested = !chan.macros.is_empty();
        let task = tokio::spawn(run_macro(scheduler, channel, reader, nested));
        chan.macros.push(MacroExecution {
            path,
            task: Some(task),
        });
    }

    /// Pop the finished macro and queue `MacroCompleted` for the firmware.
    fn finish_macro(&self, channel: CodeChannel, error: bool) {
        {
            let mut state = self.state.lock().expect("scheduler lock");
            let chan = &mut state.channels[channel.index() as usize];
            if let Some(done) = chan.macros.pop() {
                debug!("macro {:?} finished (error: {error})", done.path);
            }
        }
        self.report_macro_done(channel, error);
    }

    /// Queue `MacroCompleted` so the firmware unblocks, popping nothing.
    fn report_macro_done(&self, channel: CodeChannel, error: bool) {
        {
            let mut state = self.state.lock().expect("scheduler lock");
            state.macro_done.push((channel.index(), error));
        }
        self.wake.notify_one();
    }

    /// Abort the macro stack and pending codes of a channel.
    pub async fn handle_abort_file(&self, channel: CodeChannel) {
        self.abort_channel_inner(channel, true);
        if channel == CodeChannel::File {
            self.model
                .set_property(&["state", "status"], "idle".into())
                .await;
            self.model
                .message(MessageSeverity::Info, "File print cancelled")
                .await;
        }
    }

    fn abort_channel_inner(&self, channel: CodeChannel, abort_own_task: bool) {
        let mut state = self.state.lock().expect("scheduler lock");
        let chan = &mut state.channels[channel.index() as usize];
        let mut macros = std::mem::take(&mut chan.macros);
        if !abort_own_task {
            // Keep the caller's own frame out of the cancellation sweep.
            macros.pop();
        }
        for mut entry in macros {
            if let Some(task) = entry.task.take() {
                task.abort();
            }
        }
        let mut drained = std::mem::take(&mut chan.queue);
        drained.extend(std::mem::take(&mut chan.macro_queue));
        for mut queued in drained {
            if queued.is_settled() {
                continue;
            }
            match queued.state {
                CodeState::Sent | CodeState::AwaitingReply => {
                    let position = queued.code.file_position.unwrap_or_default();
                    queued.reply = format!("Aborted at byte {position}");
                    queued.complete();
                }
                _ => queued.fail(CodeError::new("file aborted")),
            }
        }
        for waiter in chan.flush_waiters.drain(..) {
            let _ = waiter.send(false);
        }
        chan.lock_granted = false;
        chan.lock_requested = false;
        state.busy_channels &= !(1 << channel.index());
    }

    /// Called by a macro task that hit `abort`: unwind the channel and
    /// report the macro as failed.
    pub async fn macro_aborted(&self, channel: CodeChannel, message: Option<&str>) {
        // The caller's own frame is removed by the sweep without being
        // cancelled, so this task keeps running to report the failure.
        self.abort_channel_inner(channel, false);
        self.report_macro_done(channel, true);
        let text = message.unwrap_or("Macro aborted");
        self.model.message(MessageSeverity::Error, text).await;
    }

    /// Settle in-flight file codes after a firmware-side pause.
    pub async fn handle_print_paused(&self, file_position: u32, reason: &str) {
        {
            let mut state = self.state.lock().expect("scheduler lock");
            let chan = &mut state.channels[CodeChannel::File.index() as usize];
            while let Some(source) = chan.reply_source() {
                let mut settled = chan.fifo(source).pop_front().expect("source is in flight");
                settled.reply = format!("Printing paused at byte {file_position}");
                settled.complete();
            }
            state.busy_channels &= !(1 << CodeChannel::File.index());
            state.channels[CodeChannel::File.index() as usize].settle_flush_waiters(true);
        }
        self.model
            .commit(vec![
                PathChange {
                    kind: ChangeKind::Property,
                    path: vec![
                        PathSegment::Key("state".into()),
                        PathSegment::Key("status".into()),
                    ],
                    value: "paused".into(),
                },
                PathChange {
                    kind: ChangeKind::Property,
                    path: vec![
                        PathSegment::Key("job".into()),
                        PathSegment::Key("filePosition".into()),
                    ],
                    value: serde_json::json!(file_position),
                },
            ])
            .await;
        self.model
            .message(
                MessageSeverity::Info,
                &format!("Printing paused at byte {file_position} ({reason})"),
            )
            .await;
    }

    /// Mirror a firmware stack event into the model.
    pub async fn handle_stack_event(
        &self,
        channel: CodeChannel,
        depth: u8,
        flags: u16,
        feedrate: f32,
    ) {
        self.model
            .commit(vec![PathChange {
                kind: ChangeKind::ObjectCollection,
                path: vec![PathSegment::Item {
                    name: "inputs".into(),
                    index: channel.index() as usize,
                    size: CHANNEL_COUNT,
                }],
                value: serde_json::json!({
                    "name": channel.to_string(),
                    "stackDepth": depth,
                    "flags": flags,
                    "feedRate": feedrate,
                }),
            }])
            .await;
    }

    /// Record a granted machine lock.
    pub fn handle_locked(&self, channel: CodeChannel) {
        {
            let mut state = self.state.lock().expect("scheduler lock");
            let chan = &mut state.channels[channel.index() as usize];
            chan.lock_granted = true;
            chan.lock_requested = false;
        }
        self.wake.notify_one();
    }

    /// Resolve the oldest pending expression evaluation.
    pub fn handle_evaluation_result(&self, success: bool, value: String) {
        let waiter = {
            let mut state = self.state.lock().expect("scheduler lock");
            state.evals_in_flight.pop_front()
        };
        if let Some(tx) = waiter {
            let result = if success {
                Ok(value)
            } else {
                Err(CodeError::new(value))
            };
            let _ = tx.send(result);
        } else {
            warn!("evaluation result with no pending request");
        }
    }

    /// Queue deletion of a block-local variable.
    fn queue_var_delete(&self, channel: CodeChannel, name: &str) {
        {
            let mut state = self.state.lock().expect("scheduler lock");
            state.var_deletes.push((channel.index(), name.to_string()));
        }
        self.wake.notify_one();
    }

    /// Number of codes pending on a channel across both FIFOs (diagnostics).
    #[must_use]
    pub fn queue_len(&self, channel: CodeChannel) -> usize {
        let state = self.state.lock().expect("scheduler lock");
        let chan = &state.channels[channel.index() as usize];
        chan.queue.len() + chan.macro_queue.len()
    }
}

/// Sequentially execute a macro file's codes, then report completion.
async fn run_macro(
    scheduler: Arc<Scheduler>,
    channel: CodeChannel,
    mut reader: ConditionalReader,
    nested: bool,
) {
    loop {
        match reader.read_code().await {
            Ok(Some(code)) => match code.keyword {
                Some(Keyword::Abort) => {
                    let message = code.keyword_argument.clone();
                    scheduler.macro_aborted(channel, message.as_deref()).await;
                    return;
                }
                Some(Keyword::Return) => {
                    scheduler.finish_macro(channel, false);
                    return;
                }
                _ => {
                    let mut code = code;
                    code.flags |= crate::code::CodeFlags::FROM_MACRO;
                    if nested {
                        code.flags |= crate::code::CodeFlags::NESTED_MACRO;
                    }
                    let rx = scheduler.enqueue_system(code);
                    match rx.await {
                        Ok(Ok(_)) | Err(_) => {}
                        Ok(Err(err)) => {
                            error!("macro code failed on {channel}: {err}");
                            scheduler.finish_macro(channel, true);
                            return;
                        }
                    }
                }
            },
            Ok(None) => {
                scheduler.finish_macro(channel, false);
                return;
            }
            Err(err) => {
                error!("macro parse error on {channel}: {err}");
                scheduler.finish_macro(channel, true);
                return;
            }
        }
    }
}

/// Weak scheduler handle implementing the interpreter capabilities.
#[derive(Clone)]
pub struct SchedulerHandle(Weak<Scheduler>);

impl SchedulerHandle {
    /// Build a handle from a shared scheduler.
    #[must_use]
    pub fn new(scheduler: &Arc<Scheduler>) -> Self {
        Self(Arc::downgrade(scheduler))
    }
}

impl CodeFlush for SchedulerHandle {
    fn flush(&self, channel: CodeChannel) -> oneshot::Receiver<bool> {
        match self.0.upgrade() {
            Some(scheduler) => scheduler.flush_channel(channel),
            None => {
                let (tx, rx) = oneshot::channel();
                let _ = tx.send(false);
                rx
            }
        }
    }
}

impl VariableScope for SchedulerHandle {
    fn remove_local(&self, channel: CodeChannel, name: &str) {
        if let Some(scheduler) = self.0.upgrade() {
            scheduler.queue_var_delete(channel, name);
        }
    }
}

/// Evaluator that round-trips expressions through the firmware.
struct FirmwareEvaluator {
    scheduler: Weak<Scheduler>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::{parse_line, LineMeta};

    #[derive(Default)]
    struct SinkWriter {
        codes: Vec<(u8, String)>,
    }

    impl CodeWriter for SinkWriter {
        fn write_code(&mut self, channel: u8, _flags: u32, text: &str) -> Result<u16, WireError> {
            self.codes.push((channel, text.to_string()));
            Ok(self.codes.len() as u16)
        }

        fn write_macro_completed(&mut self, _channel: u8, _error: bool) -> Result<(), WireError> {
            Ok(())
        }

        fn write_lock_request(&mut self, _channel: u8) -> Result<(), WireError> {
            Ok(())
        }

        fn write_unlock_all(&mut self, _channel: u8) -> Result<(), WireError> {
            Ok(())
        }

        fn write_evaluate_expression(
            &mut self,
            _channel: u8,
            _expression: &str,
        ) -> Result<(), WireError> {
            Ok(())
        }

        fn write_set_variable(
            &mut self,
            _channel: u8,
            _create: bool,
            _name: &str,
            _value: &str,
        ) -> Result<(), WireError> {
            Ok(())
        }
    }

    fn scheduler() -> Arc<Scheduler> {
        Scheduler::new(Arc::new(ModelStore::new()), std::path::PathBuf::from("/nonexistent"))
    }

    fn code_on(text: &str, channel: CodeChannel) -> Code {
        let meta = LineMeta {
            channel: Some(channel),
            ..LineMeta::default()
        };
        parse_line(text, meta).expect("test code parses")
    }

    #[test]
    fn busy_channel_defers_codes() {
        let scheduler = scheduler();
        let _rx = scheduler.enqueue(code_on("M115", CodeChannel::Http));
        scheduler.update_busy(1 << CodeChannel::Http.index());

        let mut writer = SinkWriter::default();
        scheduler.pump_outgoing(&mut writer);
        assert!(writer.codes.is_empty(), "busy channel must not send");

        scheduler.update_busy(0);
        scheduler.pump_outgoing(&mut writer);
        assert_eq!(writer.codes.len(), 1);

        // The head is now in flight; nothing more goes out until it settles.
        scheduler.pump_outgoing(&mut writer);
        assert_eq!(writer.codes.len(), 1);
    }

    #[test]
    fn codes_are_sent_in_enqueue_order() {
        let scheduler = scheduler();
        let _a = scheduler.enqueue(code_on("G28", CodeChannel::Sbc));
        let _b = scheduler.enqueue(code_on("G1 X5", CodeChannel::Sbc));

        let mut writer = SinkWriter::default();
        scheduler.pump_outgoing(&mut writer);
        assert_eq!(writer.codes.len(), 1, "one in-flight code per channel");
        assert_eq!(writer.codes[0].1, "G28");
    }

    #[tokio::test]
    async fn reply_completes_head_and_frees_the_channel() {
        let scheduler = scheduler();
        let first = scheduler.enqueue(code_on("G28", CodeChannel::Sbc));
        let _second = scheduler.enqueue(code_on("G1 X5", CodeChannel::Sbc));

        let mut writer = SinkWriter::default();
        scheduler.pump_outgoing(&mut writer);
        scheduler
            .handle_code_reply(
                ReplyFlags::for_channel(CodeChannel::Sbc.index()),
                "homed".to_string(),
            )
            .await;

        let reply = first.await.expect("completion delivered").expect("success");
        assert_eq!(reply, "homed");

        scheduler.pump_outgoing(&mut writer);
        assert_eq!(writer.codes.len(), 2);
        assert_eq!(writer.codes[1].1, "G1 X5");
    }

    #[tokio::test]
    async fn split_replies_accumulate_until_terminated() {
        let scheduler = scheduler();
        let rx = scheduler.enqueue(code_on("M115", CodeChannel::Http));
        let mut writer = SinkWriter::default();
        scheduler.pump_outgoing(&mut writer);

        let flags = ReplyFlags::for_channel(CodeChannel::Http.index());
        scheduler
            .handle_code_reply(flags | ReplyFlags::PUSH, "FIRMWARE_NAME: ".to_string())
            .await;
        scheduler
            .handle_code_reply(flags, "RepRapFirmware".to_string())
            .await;

        let reply = rx.await.expect("completion delivered").expect("success");
        assert_eq!(reply, "FIRMWARE_NAME: RepRapFirmware");
        assert_eq!(scheduler.queue_len(CodeChannel::Http), 0);
    }

    #[tokio::test]
    async fn unaddressed_replies_land_in_the_message_log() {
        let scheduler = scheduler();
        scheduler
            .handle_code_reply(ReplyFlags::WARNING, "heater tuned".to_string())
            .await;
        let messages = scheduler.model.get().await["messages"].clone();
        let entry = &messages.as_array().expect("messages array")[0];
        assert_eq!(entry["type"], "warning");
        assert_eq!(entry["content"], "heater tuned");
    }

    #[test]
    fn direct_codes_preempt_queued_macro_codes() {
        let scheduler = scheduler();
        // A busy channel parks the macro code before it can be sent.
        scheduler.update_busy(1 << CodeChannel::Trigger.index());
        let _macro_code = scheduler.enqueue_system(code_on("G28", CodeChannel::Trigger));
        let _direct = scheduler.enqueue(code_on("M115", CodeChannel::Trigger));
        scheduler.update_busy(0);

        let mut writer = SinkWriter::default();
        scheduler.pump_outgoing(&mut writer);
        assert_eq!(writer.codes.len(), 1);
        assert_eq!(
            writer.codes[0].1, "M115",
            "the code queue preempts a not-yet-sent macro code"
        );
    }

    #[tokio::test]
    async fn macro_codes_resume_once_the_queue_drains() {
        let scheduler = scheduler();
        scheduler.update_busy(1 << CodeChannel::Trigger.index());
        let _macro_code = scheduler.enqueue_system(code_on("G28", CodeChannel::Trigger));
        let direct = scheduler.enqueue(code_on("M115", CodeChannel::Trigger));
        scheduler.update_busy(0);

        let mut writer = SinkWriter::default();
        scheduler.pump_outgoing(&mut writer);
        scheduler
            .handle_code_reply(
                ReplyFlags::for_channel(CodeChannel::Trigger.index()),
                "ok".to_string(),
            )
            .await;
        direct.await.expect("completion delivered").expect("success");

        scheduler.pump_outgoing(&mut writer);
        assert_eq!(writer.codes.len(), 2);
        assert_eq!(writer.codes[1].1, "G28", "macro code follows the drained queue");
    }

    #[tokio::test]
    async fn flush_waits_for_the_queue_to_settle() {
        let scheduler = scheduler();
        let _rx = scheduler.enqueue(code_on("G4 S1", CodeChannel::Daemon));
        let mut flush = scheduler.flush_channel(CodeChannel::Daemon);
        assert!(flush.try_recv().is_err(), "flush must wait for the queue");

        let mut writer = SinkWriter::default();
        scheduler.pump_outgoing(&mut writer);
        scheduler
            .handle_code_reply(
                ReplyFlags::for_channel(CodeChannel::Daemon.index()),
                "ok".to_string(),
            )
            .await;
        assert!(matches!(flush.await, Ok(true)));

        // An empty queue resolves immediately.
        assert!(matches!(
            scheduler.flush_channel(CodeChannel::Daemon).await,
            Ok(true)
        ));
    }
}

impl ExpressionEvaluator for FirmwareEvaluator {
    fn evaluate(
        &self,
        code: &Code,
        _expect_bool: bool,
    ) -> oneshot::Receiver<Result<String, CodeError>> {
        let expression = code
            .keyword_argument
            .clone()
            .unwrap_or_else(|| code.to_string());
        match self.scheduler.upgrade() {
            Some(scheduler) => {
                scheduler.request_evaluation(code.channel_or_default(), expression)
            }
            None => {
                let (tx, rx) = oneshot::channel();
                let _ = tx.send(Err(CodeError::new("scheduler shut down")));
                rx
            }
        }
    }
}
