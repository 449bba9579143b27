#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

use metrics_state_manager::core::config::Config;

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_msm") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "msm.exe" } else { "msm" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve msm binary path for integration test"),
    }
}

/// Config with every persisted path under `state_dir`.
pub fn isolated_config(state_dir: &Path) -> Config {
    let mut config = Config::default();
    config.paths.config_file = state_dir.join("config.toml");
    config.paths.local_state_file = state_dir.join("Local State");
    config.paths.client_info_backup_file = state_dir.join("client_info.json");
    config.paths.user_data_dir = state_dir.to_path_buf();
    config.paths.event_log = state_dir.join("events.jsonl");
    config
}

/// Write the paths and reporting sections of `config` to its `config_file`
/// and return that path.
pub fn write_config(config: &Config) -> PathBuf {
    let paths = &config.paths;
    let mut raw = String::new();
    raw.push_str("[paths]\n");
    raw.push_str(&format!("local_state_file = {:?}\n", paths.local_state_file.to_string_lossy()));
    raw.push_str(&format!(
        "client_info_backup_file = {:?}\n",
        paths.client_info_backup_file.to_string_lossy()
    ));
    raw.push_str(&format!("user_data_dir = {:?}\n", paths.user_data_dir.to_string_lossy()));
    raw.push_str(&format!("beacon_file_name = {:?}\n", paths.beacon_file_name));
    raw.push_str(&format!("event_log = {:?}\n", paths.event_log.to_string_lossy()));
    raw.push_str("\n[reporting]\n");
    raw.push_str(&format!("consent_given = {}\n", config.reporting.consent_given));
    raw.push_str(&format!("backup_enabled = {}\n", config.reporting.backup_enabled));
    if let Some(external) = &config.reporting.external_client_id {
        raw.push_str(&format!("external_client_id = {external:?}\n"));
    }
    fs::write(&paths.config_file, raw).expect("write test config");
    paths.config_file.clone()
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("msm-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("MSM_OUTPUT_FORMAT", "json")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute msm command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Run `args` against the config at `config_path`.
pub fn run_cli_with_config(case_name: &str, config_path: &Path, args: &[&str]) -> CmdResult {
    let config_arg = config_path.to_string_lossy().into_owned();
    let mut full_args = vec!["--config", config_arg.as_str()];
    full_args.extend_from_slice(args);
    run_cli_case(case_name, &full_args)
}
