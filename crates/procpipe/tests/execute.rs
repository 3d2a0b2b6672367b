#![cfg(unix)]

use procpipe::{
    CANCELLED_EXIT_CODE, CancellationToken, Capture, CommandSpec, ExecuteOptions, ProcessError,
    StreamKind, execute, output,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn collector() -> (Arc<Mutex<Vec<String>>>, Capture) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let capture = Capture::lines(move |line| sink.lock().unwrap().push(line));
    (seen, capture)
}

#[tokio::test]
async fn test_lines_are_delivered_in_order() {
    init_tracing();
    let (stdout, capture) = collector();
    let (stderr, err_capture) = collector();
    let command = CommandSpec::new("sh").args(["-c", "echo one; echo two >&2; printf three"]);
    let options = ExecuteOptions::new().stdout(capture).stderr(err_capture);

    let code = execute(command, options).await.unwrap();
    assert_eq!(code, 0);
    assert_eq!(*stdout.lock().unwrap(), ["one", "three"]);
    assert_eq!(*stderr.lock().unwrap(), ["two"]);
}

#[tokio::test]
async fn test_input_buffer_is_fed() {
    init_tracing();
    let result = output(CommandSpec::new("cat"), Some("abc\n".into()), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout_lossy(), "abc\n");
    assert!(result.stderr.is_empty());
}

#[tokio::test]
async fn test_output_collects_both_streams() {
    init_tracing();
    let command = CommandSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 5"]);
    let result = output(command, None, CancellationToken::new()).await.unwrap();
    assert_eq!(result.exit_code, 5);
    assert_eq!(result.stdout_lossy(), "out\n");
    assert_eq!(result.stderr_lossy(), "err\n");
}

#[tokio::test]
async fn test_large_output_does_not_stall() {
    init_tracing();
    let command = CommandSpec::new("sh").args(["-c", "head -c 1000000 /dev/zero; exit 2"]);
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        output(command, None, CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(result.exit_code, 2);
    assert_eq!(result.stdout.len(), 1_000_000);
}

#[tokio::test]
async fn test_cancellation_returns_sentinel() {
    init_tracing();
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let code = tokio::time::timeout(
        Duration::from_secs(2),
        execute(
            CommandSpec::new("sleep").arg("5"),
            ExecuteOptions::new().cancellation(token),
        ),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(code, CANCELLED_EXIT_CODE);
}

#[tokio::test]
async fn test_text_capture_reassembles_code_points() {
    init_tracing();
    let text = Arc::new(Mutex::new(String::new()));
    let sink = text.clone();
    let options =
        ExecuteOptions::new().stdout(Capture::text(move |piece| sink.lock().unwrap().push_str(&piece)));
    let code = execute(CommandSpec::new("printf").arg("caf\\303\\251"), options)
        .await
        .unwrap();
    assert_eq!(code, 0);
    assert_eq!(*text.lock().unwrap(), "café");
}

#[tokio::test]
async fn test_invalid_text_is_a_stream_fault() {
    init_tracing();
    let options = ExecuteOptions::new().stdout(Capture::text(|_| {}));
    let err = execute(CommandSpec::new("printf").arg("\\377"), options)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProcessError::StreamIo {
            stream: StreamKind::Stdout,
            ..
        }
    ));
}

#[tokio::test]
async fn test_missing_executable_is_an_error() {
    init_tracing();
    let err = execute(
        CommandSpec::new("/nonexistent/procpipe-missing"),
        ExecuteOptions::new(),
    )
    .await
    .unwrap_err();
    assert!(err.is_start_failure());
}
