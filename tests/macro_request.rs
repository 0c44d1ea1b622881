// CLASSIFICATION: COMMUNITY
// Filename: macro_request.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-25

//! Firmware-requested macros: execution order and the missing-file path.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use spindle::code::CodeChannel;
use spindle::context::Context;
use spindle::scheduler::CodeWriter;
use spindle::settings::Settings;
use spindle_wire::{ReplyFlags, WireError};

/// In-process stand-in for the firmware side of the scheduler.
#[derive(Default)]
struct RecordingWriter {
    codes: Vec<(u8, String)>,
    macro_done: Vec<(u8, bool)>,
    unreplied: Vec<u8>,
}

impl CodeWriter for RecordingWriter {
    fn write_code(&mut self, channel: u8, _flags: u32, text: &str) -> Result<u16, WireError> {
        self.codes.push((channel, text.to_string()));
        self.unreplied.push(channel);
        Ok(self.codes.len() as u16)
    }

    fn write_macro_completed(&mut self, channel: u8, error: bool) -> Result<(), WireError> {
        self.macro_done.push((channel, error));
        Ok(())
    }

    fn write_lock_request(&mut self, _channel: u8) -> Result<(), WireError> {
        Ok(())
    }

    fn write_unlock_all(&mut self, _channel: u8) -> Result<(), WireError> {
        Ok(())
    }

    fn write_evaluate_expression(&mut self, _channel: u8, _expr: &str) -> Result<(), WireError> {
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

fn context_with_macro_dir(dir: &std::path::Path) -> (watch::Sender<bool>, Arc<Context>) {
    let settings = Settings {
        macro_dir: dir.to_path_buf(),
        ..Settings::default()
    };
    let (tx, rx) = watch::channel(false);
    (tx, Context::new(settings, rx))
}

/// Drive the scheduler until `done` returns true, replying to every code.
async fn drive_until(
    ctx: &Arc<Context>,
    writer: &Arc<Mutex<RecordingWriter>>,
    mut done: impl FnMut(&RecordingWriter) -> bool,
) {
    for _ in 0..500 {
        let replies: Vec<u8> = {
            let mut w = writer.lock().unwrap();
            ctx.scheduler.pump_outgoing(&mut *w);
            w.unreplied.drain(..).collect()
        };
        for channel in replies {
            ctx.scheduler
                .handle_code_reply(ReplyFlags::for_channel(channel), "ok".to_string())
                .await;
        }
        if done(&writer.lock().unwrap()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("scheduler did not reach the expected state");
}

#[tokio::test]
async fn macro_codes_execute_in_order_then_complete() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().expect("temp dir");
    std::fs::write(dir.path().join("homeall.g"), "G28\nG1 X0\nM400\n").expect("write macro");
    let (_shutdown, ctx) = context_with_macro_dir(dir.path());

    ctx.scheduler
        .handle_execute_macro(CodeChannel::Trigger, true, "homeall.g")
        .await;

    let writer = Arc::new(Mutex::new(RecordingWriter::default()));
    drive_until(&ctx, &writer, |w| !w.macro_done.is_empty()).await;

    let w = writer.lock().unwrap();
    let trigger = CodeChannel::Trigger.index();
    assert_eq!(
        w.codes,
        vec![
            (trigger, "G28".to_string()),
            (trigger, "G1 X0".to_string()),
            (trigger, "M400".to_string()),
        ]
    );
    assert_eq!(w.macro_done, vec![(trigger, false)]);
}

#[tokio::test]
async fn missing_macro_reports_error_and_unblocks_firmware() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().expect("temp dir");
    let (_shutdown, ctx) = context_with_macro_dir(dir.path());

    ctx.scheduler
        .handle_execute_macro(CodeChannel::Trigger, true, "missing.g")
        .await;

    let writer = Arc::new(Mutex::new(RecordingWriter::default()));
    drive_until(&ctx, &writer, |w| !w.macro_done.is_empty()).await;

    {
        let w = writer.lock().unwrap();
        assert!(w.codes.is_empty(), "no codes from a missing macro");
        assert_eq!(w.macro_done, vec![(CodeChannel::Trigger.index(), true)]);
    }

    let messages = ctx.model.get().await["messages"].clone();
    let logged = messages
        .as_array()
        .expect("messages array")
        .iter()
        .any(|m| {
            m["type"] == "error"
                && m["content"]
                    .as_str()
                    .is_some_and(|text| text.contains("missing.g"))
        });
    assert!(logged, "missing macro must be logged as an error");
}

#[tokio::test]
async fn optional_missing_macro_stays_quiet() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (_shutdown, ctx) = context_with_macro_dir(dir.path());

    ctx.scheduler
        .handle_execute_macro(CodeChannel::Trigger, false, "dsf-config.g")
        .await;

    let writer = Arc::new(Mutex::new(RecordingWriter::default()));
    drive_until(&ctx, &writer, |w| !w.macro_done.is_empty()).await;

    assert_eq!(
        writer.lock().unwrap().macro_done,
        vec![(CodeChannel::Trigger.index(), true)]
    );
    let messages = ctx.model.get().await["messages"].clone();
    assert!(
        messages.as_array().expect("messages array").is_empty(),
        "an optional macro must not log errors"
    );
}
