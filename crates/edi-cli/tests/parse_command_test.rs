use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static TEMP_FILE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn cargo_bin() -> PathBuf {
    if let Ok(path) = env::var("CARGO_BIN_EXE_edi") {
        return PathBuf::from(path);
    }

    let target_dir = env::var("CARGO_TARGET_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| repo_root().join("target"));
    let executable_name = format!("edi{}", std::env::consts::EXE_SUFFIX);
    let fallback = target_dir.join("debug").join(executable_name);

    if fallback.exists() {
        return fallback;
    }

    panic!(
        "CARGO_BIN_EXE_edi is not set and fallback binary was not found at {}",
        fallback.display()
    );
}

fn repo_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

fn testdata(path: &str) -> String {
    repo_root()
        .join("testdata")
        .join(path)
        .to_string_lossy()
        .into_owned()
}

fn unique_temp_path(name: &str, extension: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time after epoch")
        .as_nanos();
    let counter = TEMP_FILE_COUNTER.fetch_add(1, Ordering::SeqCst);
    let filename = format!(
        "edi-cli-{name}-{}-{nanos}-{counter}.{extension}",
        std::process::id()
    );
    env::temp_dir().join(filename)
}

fn write_temp_file(name: &str, extension: &str, content: &str) -> PathBuf {
    let path = unique_temp_path(name, extension);
    fs::write(&path, content).expect("temporary file should be writable");
    path
}

fn run_edi(args: &[&str]) -> Output {
    Command::new(cargo_bin())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("run edi")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn parse_command_outputs_json_to_stdout() {
    let models = testdata("models");
    let input = testdata("edi/orders.edi");

    let output = run_edi(&[
        "parse",
        &input,
        "--mappings",
        &models,
        "--format",
        "json",
        "--pretty",
    ]);

    assert!(
        output.status.success(),
        "expected parse to succeed; stdout: {}; stderr: {}",
        String::from_utf8_lossy(&output.stdout),
        stderr(&output)
    );

    let stdout = String::from_utf8(output.stdout.clone()).expect("stdout should be UTF-8");
    let parsed: serde_json::Value =
        serde_json::from_str(&stdout).expect("stdout should contain valid JSON");
    assert_eq!(parsed["root"]["name"]["local_name"], "unEdifact");
    assert_eq!(parsed["interchanges"][0]["control_ref"], "ICR001");
    assert_eq!(
        parsed["interchanges"][0]["messages"]
            .as_array()
            .map(Vec::len),
        Some(2)
    );

    assert!(stderr(&output).contains("Parse summary: messages=2, warnings=0"));
}

#[test]
fn parse_command_writes_xml_file() {
    let models = testdata("models");
    let input = testdata("edi/orders_groups.edi");
    let xml_path = unique_temp_path("orders-groups", "xml");

    let output = run_edi(&[
        "parse",
        &input,
        "-m",
        &models,
        "--output",
        xml_path.to_string_lossy().as_ref(),
        "--pretty",
    ]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let xml = fs::read_to_string(&xml_path).expect("xml output should exist");
    assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
    assert!(xml.contains("unEdifact"));
    assert!(xml.contains("xmlns:ord=\"urn:edi:unedifact:orders:d96a\""));
    assert!(xml.contains("GRP1"));

    let _ = fs::remove_file(xml_path);
}

#[test]
fn parse_command_writes_event_stream() {
    let output = run_edi(&[
        "parse",
        &testdata("edi/orders.edi"),
        "--mappings",
        &testdata("models"),
        "--format",
        "events",
    ]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let events: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should contain valid JSON");
    let events = events.as_array().expect("events should be a JSON array");
    assert_eq!(events.first().unwrap()["event"], "start_document");
    assert_eq!(events.last().unwrap()["event"], "end_document");
}

#[test]
fn invalid_config_returns_fatal_exit_code() {
    let bad_config = write_temp_file("bad-cli-config", "yaml", "color: neon");

    let output = run_edi(&[
        "--config",
        bad_config.to_string_lossy().as_ref(),
        "parse",
        &testdata("edi/orders.edi"),
    ]);

    assert_eq!(output.status.code(), Some(3));
    assert!(
        stderr(&output).contains("ERROR:"),
        "expected plain error prefix; stderr: {}",
        stderr(&output)
    );

    let _ = fs::remove_file(bad_config);
}

#[test]
fn config_file_supplies_mappings_and_settings() {
    let models = testdata("models");
    let config = write_temp_file(
        "engine-config",
        "yaml",
        &format!(
            "mappings:\n  directories: ['{models}']\nparser:\n  validation:\n    policy: collect\n"
        ),
    );

    let output = run_edi(&[
        "--config",
        config.to_string_lossy().as_ref(),
        "check",
        &testdata("edi/orders_missing_dtm.edi"),
    ]);

    assert_eq!(output.status.code(), Some(1), "stderr: {}", stderr(&output));
    let stderr = stderr(&output);
    assert!(stderr.contains("WARNING:"));
    assert!(stderr.contains("Parse summary: messages=1, warnings=1"));

    let _ = fs::remove_file(config);
}

#[test]
fn unknown_message_type_is_a_configuration_error() {
    let output = run_edi(&[
        "parse",
        &testdata("edi/unknown_message.edi"),
        "--mappings",
        &testdata("models"),
    ]);

    assert_eq!(output.status.code(), Some(3));
    assert!(stderr(&output).contains("IFTMIN:D:96A:UN"));
}

#[test]
fn validation_failure_exit_code() {
    let output = run_edi(&[
        "check",
        &testdata("edi/orders_missing_dtm.edi"),
        "--mappings",
        &testdata("models"),
    ]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("ERROR:"));
    assert!(stderr(&output).contains("DateTime"));

    let skipped = run_edi(&[
        "check",
        &testdata("edi/orders_missing_dtm.edi"),
        "--mappings",
        &testdata("models"),
        "--no-validation",
    ]);
    assert!(skipped.status.success(), "stderr: {}", stderr(&skipped));
}

#[test]
fn truncated_input_exit_code() {
    let output = run_edi(&[
        "check",
        &testdata("edi/orders_unterminated.edi"),
        "--mappings",
        &testdata("models"),
    ]);

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("unexpected end of stream"));
}

#[test]
fn missing_input_file_exit_code() {
    let output = run_edi(&["check", "/nonexistent/input.edi"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("cannot open input"));
}

#[test]
fn check_command_lists_messages() {
    let output = run_edi(&[
        "check",
        &testdata("edi/orders.edi"),
        "--model-file",
        &testdata("models/orders_d_96a_un.yaml"),
    ]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("interchange ICR001 from SENDER to RECEIVER"));
    assert!(stdout.contains("message ORDERS:D:96A:UN 1 segments=14"));
    assert!(stdout.contains("message ORDERS:D:96A:UN 2 segments=7"));
}

#[test]
fn standalone_message_stream() {
    let output = run_edi(&[
        "parse",
        &testdata("edi/orders_message.edi"),
        "--mappings",
        &testdata("models"),
        "--message",
        "ORDERS:D:96A:UN",
        "--format",
        "json",
    ]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should contain valid JSON");
    assert_eq!(parsed["root"]["name"]["local_name"], "Order");
    assert!(stderr(&output).contains("Parse summary: messages=1, warnings=0"));
}
