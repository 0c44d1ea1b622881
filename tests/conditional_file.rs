// CLASSIFICATION: COMMUNITY
// Filename: conditional_file.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-07-25

//! Conditional interpreter: loops, branches, break/continue, abort.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use spindle::code::{Code, CodeChannel, CodeError, Keyword};
use spindle::file::{CodeFlush, ConditionalReader, ExpressionEvaluator, VariableScope};

struct ScriptedEvaluator {
    script: Mutex<VecDeque<&'static str>>,
}

impl ScriptedEvaluator {
    fn new(script: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.iter().copied().collect()),
        })
    }
}

impl ExpressionEvaluator for ScriptedEvaluator {
    fn evaluate(&self, code: &Code, _expect_bool: bool) -> oneshot::Receiver<Result<String, CodeError>> {
        let (tx, rx) = oneshot::channel();
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("evaluator script exhausted at {code}"));
        let _ = tx.send(Ok(next.to_string()));
        rx
    }
}

#[derive(Default)]
struct RecordingScope {
    removed: Mutex<Vec<(CodeChannel, String)>>,
}

impl VariableScope for RecordingScope {
    fn remove_local(&self, channel: CodeChannel, name: &str) {
        self.removed.lock().unwrap().push((channel, name.to_string()));
    }
}

#[derive(Default)]
struct CountingFlush {
    count: AtomicUsize,
}

impl CodeFlush for CountingFlush {
    fn flush(&self, _channel: CodeChannel) -> oneshot::Receiver<bool> {
        self.count.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(true);
        rx
    }
}

struct Harness {
    _file: tempfile::NamedTempFile,
    reader: ConditionalReader,
    scope: Arc<RecordingScope>,
    flush: Arc<CountingFlush>,
}

fn harness(content: &str, script: &[&'static str]) -> Harness {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write gcode");
    let scope = Arc::new(RecordingScope::default());
    let flush = Arc::new(CountingFlush::default());
    let reader = ConditionalReader::open(
        file.path(),
        CodeChannel::File,
        ScriptedEvaluator::new(script),
        Arc::clone(&scope) as Arc<dyn VariableScope>,
        Arc::clone(&flush) as Arc<dyn CodeFlush>,
    )
    .expect("open reader");
    Harness {
        _file: file,
        reader,
        scope,
        flush,
    }
}

async fn drain(reader: &mut ConditionalReader) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(code) = reader.read_code().await.expect("read code") {
        out.push(code.to_string());
    }
    out
}

#[tokio::test]
async fn while_loop_iterates_three_times() {
    let mut h = harness(
        "while iterations < 3\n  G1 X{iterations}\nM400\n",
        &["true", "true", "true", "false"],
    );

    let mut codes = Vec::new();
    let mut iterations_seen = Vec::new();
    while let Some(code) = h.reader.read_code().await.expect("read code") {
        if code.to_string().starts_with("G1") {
            iterations_seen.push(h.reader.get_iterations(&code).expect("inside loop"));
        }
        codes.push(code.to_string());
    }

    assert_eq!(
        codes,
        vec!["G1 X{iterations}", "G1 X{iterations}", "G1 X{iterations}", "M400"]
    );
    assert_eq!(iterations_seen, vec![0, 1, 2]);
    // One settled-state flush per loop re-entry.
    assert_eq!(h.flush.count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn elif_chain_takes_first_true_branch() {
    let content = "if mode = 1\n  M117 A\nelif mode = 2\n  M117 B\nelse\n  M117 C\nM400\n";
    let mut h = harness(content, &["false", "true"]);
    assert_eq!(drain(&mut h.reader).await, vec!["M117 B", "M400"]);
}

#[tokio::test]
async fn else_fires_when_no_branch_was_taken() {
    let content = "if mode = 1\n  M117 A\nelif mode = 2\n  M117 B\nelse\n  M117 C\nM400\n";
    let mut h = harness(content, &["false", "false"]);
    assert_eq!(drain(&mut h.reader).await, vec!["M117 C", "M400"]);
}

#[tokio::test]
async fn else_without_if_is_an_error() {
    let mut h = harness("else\n  M117 A\n", &[]);
    let err = h.reader.read_code().await.expect_err("flow error");
    assert!(err.to_string().contains("without a matching if"));
}

#[tokio::test]
async fn break_leaves_the_loop_without_reseek() {
    let mut h = harness("while alive\n  G91\n  break\n  G92\nM400\n", &["true"]);
    assert_eq!(drain(&mut h.reader).await, vec!["G91", "M400"]);
    assert_eq!(h.flush.count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn continue_skips_the_rest_of_the_body() {
    let content = "while iterations < 2\n  continue\n  G91\nM400\n";
    let mut h = harness(content, &["true", "true", "false"]);
    assert_eq!(drain(&mut h.reader).await, vec!["M400"]);
    assert_eq!(h.flush.count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn break_outside_loop_is_an_error() {
    let mut h = harness("break\n", &[]);
    let err = h.reader.read_code().await.expect_err("flow error");
    assert!(err.to_string().contains("outside a while loop"));
}

#[tokio::test]
async fn abort_closes_the_file_and_returns_the_code() {
    let mut h = harness("G28\nabort \"boom\"\nG1 X0\n", &[]);
    let first = h.reader.read_code().await.expect("read").expect("code");
    assert_eq!(first.to_string(), "G28");
    let aborted = h.reader.read_code().await.expect("read").expect("abort code");
    assert_eq!(aborted.keyword, Some(Keyword::Abort));
    assert!(h.reader.read_code().await.expect("read").is_none());
    // Abort flushes pending codes before closing.
    assert_eq!(h.flush.count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_while_body_is_a_parse_error() {
    let mut h = harness("while alive\nM400\n", &["true"]);
    let err = h.reader.read_code().await.expect_err("parse error");
    assert!(err.to_string().contains("empty while body"));
}

#[tokio::test]
async fn var_is_scoped_to_its_block() {
    let content = "if armed\n  var foo = 1\n  G1 X0\nM400\n";
    let mut h = harness(content, &["true"]);
    let codes = drain(&mut h.reader).await;
    assert_eq!(codes, vec!["var foo = 1", "G1 X0", "M400"]);
    assert_eq!(
        h.scope.removed.lock().unwrap().as_slice(),
        &[(CodeChannel::File, "foo".to_string())]
    );
}

#[tokio::test]
async fn inactive_branches_do_not_evaluate_or_emit() {
    // The inner `if` of the false branch must not consume script entries.
    let content = "if armed\n  if nested\n    G91\n  G92\nM400\n";
    let mut h = harness(content, &["false"]);
    assert_eq!(drain(&mut h.reader).await, vec!["M400"]);
}
