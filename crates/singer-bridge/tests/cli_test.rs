use assert_cmd::Command;

const SINGER_BRIDGE: &str = "singer-bridge";

#[test]
fn help_message_succeeds() {
    let mut cmd = Command::cargo_bin(SINGER_BRIDGE).unwrap();
    cmd.arg("--help").assert().success();
}

#[test]
fn missing_run_spec_file_is_reported_as_an_error() {
    let mut cmd = Command::cargo_bin(SINGER_BRIDGE).unwrap();
    cmd.args(["--spec", "/nonexistent/run-spec.json"])
        .assert()
        .failure();
}
