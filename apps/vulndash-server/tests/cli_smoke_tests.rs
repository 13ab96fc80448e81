//! CLI smoke tests for the vulndash-server binary: help output, config
//! validation, module checks and a short-lived `run`.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;

fn run_vulndash_server(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_vulndash-server"))
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("Failed to execute vulndash-server")
}

async fn run_vulndash_server_with_timeout(
    args: &[&str],
    timeout_duration: Duration,
) -> Result<std::process::Output, Box<dyn std::error::Error>> {
    let mut cmd = tokio::process::Command::new(env!("CARGO_BIN_EXE_vulndash-server"));
    cmd.args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match timeout(timeout_duration, cmd.output()).await {
        Ok(result) => result.map_err(|e| e.into()),
        Err(elapsed) => Err(elapsed.into()),
    }
}

fn yaml_path(p: &Path) -> String {
    p.to_string_lossy().replace('\\', "/")
}

/// Config rooted in `dir`, listening on an ephemeral port, plus `extra` YAML.
fn write_config(dir: &TempDir, extra: &str) -> String {
    let config_path = dir.path().join("config.yaml");
    let content = format!(
        r#"
server:
  home_dir: "{home}"
  host: "127.0.0.1"
  port: 0

logging:
  default:
    console_level: warn
    file: "logs/vulndash.log"
    file_level: info
    max_age_days: 1
    max_backups: 1
    max_size_mb: 10
{extra}"#,
        home = yaml_path(&dir.path().join("home")),
    );
    std::fs::write(&config_path, content).expect("Failed to write config file");
    config_path.to_string_lossy().to_string()
}

fn dump(output: &std::process::Output) {
    eprintln!("STDOUT: {}", String::from_utf8_lossy(&output.stdout));
    eprintln!("STDERR: {}", String::from_utf8_lossy(&output.stderr));
}

#[test]
fn test_cli_help_command() {
    let output = run_vulndash_server(&["--help"]);

    assert!(output.status.success(), "Help command should succeed");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("vulndash-server"), "Should contain binary name");
    assert!(stdout.contains("Usage:"), "Should contain usage information");
    assert!(stdout.contains("run"), "Should contain 'run' subcommand");
    assert!(stdout.contains("check"), "Should contain 'check' subcommand");
    assert!(stdout.contains("modules"), "Should contain 'modules' subcommand");
    assert!(stdout.contains("--config"), "Should mention config option");
}

#[test]
fn test_cli_version_command() {
    let output = run_vulndash_server(&["--version"]);

    assert!(output.status.success(), "Version command should succeed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("vulndash-server"));
    assert!(stdout.chars().any(|c| c.is_ascii_digit()));
}

#[test]
fn test_cli_invalid_command() {
    let output = run_vulndash_server(&["invalid-command"]);

    assert!(!output.status.success(), "Invalid command should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error"), "{}", stderr);
}

#[test]
fn test_cli_config_missing_file() {
    let output = run_vulndash_server(&["-c", "/nonexistent/config.yaml", "check"]);

    assert!(!output.status.success(), "Should fail with missing config");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("config file not found"), "{}", stderr);
}

#[test]
fn test_cli_config_invalid_yaml() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("broken.yaml");
    std::fs::write(&config_path, "invalid: yaml: content: [unclosed")
        .expect("Failed to write file");

    let output = run_vulndash_server(&["--config", config_path.to_str().unwrap(), "check"]);

    assert!(!output.status.success(), "Should fail with invalid YAML");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load config"), "{}", stderr);
}

#[test]
fn test_cli_config_unknown_section() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = write_config(&temp_dir, "database:\n  url: \"sqlite://x.db\"\n");

    let output = run_vulndash_server(&["--config", &config_path, "check"]);

    assert!(!output.status.success(), "Unknown sections are rejected");
}

#[test]
fn test_cli_check_valid_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = write_config(&temp_dir, "");

    let output = run_vulndash_server(&["--config", &config_path, "check"]);
    if !output.status.success() {
        dump(&output);
    }
    assert!(output.status.success(), "Should succeed with valid config");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ok      registry-admin"), "{}", stdout);
    assert!(stdout.contains("ok      inspector-reports"), "{}", stdout);
    assert!(stdout.contains("Configuration check passed"), "{}", stdout);
}

#[test]
fn test_cli_check_reports_invalid_module_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = write_config(
        &temp_dir,
        "modules:\n  inspector-reports:\n    min_severity: SEVERE\n",
    );

    let output = run_vulndash_server(&["--config", &config_path, "check"]);

    assert!(!output.status.success(), "Invalid module config must fail the check");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("invalid inspector-reports"), "{}", stdout);
    assert!(stdout.contains("min_severity"), "{}", stdout);
}

#[test]
fn test_cli_modules_lists_directory_manifests() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let modules_dir = temp_dir.path().join("modules");
    std::fs::create_dir_all(&modules_dir).unwrap();
    std::fs::write(
        modules_dir.join("inspector.yaml"),
        "id: inspector-reports\nname: Inspector Reports\nenabled: false\n",
    )
    .unwrap();
    let config_path = write_config(&temp_dir, "modules_dir: modules\n");

    let output = run_vulndash_server(&["--config", &config_path, "modules"]);
    if !output.status.success() {
        dump(&output);
    }
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let inspector = stdout
        .lines()
        .find(|l| l.starts_with("inspector-reports"))
        .expect("inspector-reports listed");
    assert!(inspector.contains("disabled"), "{}", inspector);
    assert!(inspector.contains("inspector.yaml"), "{}", inspector);

    let admin = stdout
        .lines()
        .find(|l| l.starts_with("registry-admin"))
        .expect("registry-admin listed");
    assert!(admin.contains("builtin"), "{}", admin);
}

#[test]
fn test_cli_print_config_applies_port_override() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = write_config(&temp_dir, "");

    let output = run_vulndash_server(&["--config", &config_path, "--port", "9321", "--print-config"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("port: 9321"), "{}", stdout);
    assert!(stdout.contains("default_prefix_root: /modules"), "{}", stdout);
}

#[test]
fn test_cli_subcommand_help() {
    let output = run_vulndash_server(&["run", "--help"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Start the server"));

    let output = run_vulndash_server(&["check", "--help"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("validate"));
}

#[tokio::test]
async fn test_cli_run_command_starts() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = write_config(&temp_dir, "");

    let result = run_vulndash_server_with_timeout(
        &["--config", &config_path, "run"],
        Duration::from_secs(5),
    )
    .await;

    // still serving when the timeout fires
    match result {
        Err(err) => assert!(err.to_string().contains("elapsed"), "{}", err),
        Ok(output) => {
            dump(&output);
            panic!("server exited early with {}", output.status);
        }
    }
}
