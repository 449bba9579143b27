//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgGroup, Args, Parser, Subcommand};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use metrics_state_manager::core::config::Config;
use metrics_state_manager::core::errors::MsmError;
use metrics_state_manager::identity::client_info::{ClientInfoBackup, FileClientInfoBackup};
use metrics_state_manager::identity::cloned_install::{CloneResetState, ClonedInstallInfo};
use metrics_state_manager::identity::state_manager::{
    MetricsStateBootstrap, MetricsStateManager, MetricsStateParams, SwitchableEnabledState,
};
use metrics_state_manager::logger::jsonl::JsonlWriter;
use metrics_state_manager::platform::pal::{
    FixedMachineIdProvider, MachineIdProvider, PlatformCapabilities, detect_machine_id_provider,
};
use metrics_state_manager::prefs::local_state::{JsonPrefStore, PrefStore};
use metrics_state_manager::protocol::SystemProfile;
use metrics_state_manager::variations::entropy_provider::EntropyProviderType;
use metrics_state_manager::variations::field_trial::FieldTrialRegistry;
use metrics_state_manager::variations::switches::CommandLine;

/// Metrics state manager: telemetry identity and field-trial bootstrap.
#[derive(Debug, Parser)]
#[command(
    name = "msm",
    author,
    version,
    about = "Metrics State Manager - telemetry client identity and field-trial bootstrap",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Use this machine identity instead of the platform's.
    #[arg(long, global = true, value_name = "ID")]
    machine_id: Option<String>,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Show identity, entropy and stability state.
    Status,
    /// Grant metrics consent for this run and resolve the client id.
    Enable,
    /// Instantiate field trials from passthrough switches.
    Trials(TrialsArgs),
    /// Report the cloned-install check for this run.
    CheckClone,
    /// Record the clean-exit beacon.
    Beacon(BeaconArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct TrialsArgs {
    /// Use the low entropy provider regardless of identity.
    #[arg(long)]
    low_entropy: bool,
    /// Switch that also enables benchmarking when present.
    #[arg(long, value_name = "NAME")]
    gpu_switch: Option<String>,
    /// Report the entropy assigned to this trial name.
    #[arg(long, value_name = "TRIAL")]
    probe: Vec<String>,
    /// Process switches, after `--` (e.g. `-- --force-fieldtrials=A/B/`).
    #[arg(last = true, value_name = "SWITCHES")]
    switches: Vec<String>,
}

#[derive(Debug, Clone, Args, Default)]
#[command(group(ArgGroup::new("outcome").required(true).args(["clean", "crashed"])))]
struct BeaconArgs {
    /// The session is ending cleanly.
    #[arg(long)]
    clean: bool,
    /// The session is still running or crashed.
    #[arg(long)]
    crashed: bool,
    /// Flush local state before returning.
    #[arg(long)]
    sync: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Library failure.
    #[error(transparent)]
    Msm(#[from] MsmError),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Msm(MsmError::InvalidSwitch { .. } | MsmError::InvalidConfig { .. }) => 1,
            Self::Runtime(_) | Self::Msm(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Status => run_status(cli),
        Command::Enable => run_enable(cli),
        Command::Trials(args) => run_trials(cli, args),
        Command::CheckClone => run_check_clone(cli),
        Command::Beacon(args) => run_beacon(cli, args),
    }
}

// ──────────────────── session ────────────────────

/// One constructed manager plus the handles the commands need afterwards.
struct Session {
    manager: MetricsStateManager,
    local_state: Arc<JsonPrefStore>,
    config: Config,
}

impl Session {
    fn commit(&self) -> Result<(), CliError> {
        self.local_state.commit()?;
        Ok(())
    }
}

fn open_session(
    cli: &Cli,
    consent_override: Option<bool>,
    command_line: CommandLine,
) -> Result<Session, CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let local_state = Arc::new(JsonPrefStore::open(config.paths.local_state_file.clone()));
    if let Some(error) = local_state.load_error() {
        eprintln!("[MSM-CLI] local state unreadable, starting empty: {error}");
    }

    let consent = consent_override.unwrap_or(config.reporting.consent_given);
    let event_log = config.logging.jsonl_enabled.then(|| {
        JsonlWriter::shared(config.logging.jsonl_config(&config.paths.event_log))
    });

    let mut params = MetricsStateParams::new(
        local_state.clone(),
        Arc::new(SwitchableEnabledState::new(consent)),
    );
    params.backup_registry_key = config.paths.beacon_file_name.clone();
    params.user_data_dir = Some(config.paths.user_data_dir.clone());
    params.channel = config.channel;
    params.external_client_id = config.reporting.external_client_id.clone();
    params.calibration = config.calibration;
    params.command_line = command_line;
    params.platform = PlatformCapabilities::detect();
    params.event_log = event_log.clone();
    if config.reporting.backup_enabled {
        let backup: Arc<dyn ClientInfoBackup> = Arc::new(
            FileClientInfoBackup::new(config.paths.client_info_backup_file.clone())
                .with_event_log(event_log),
        );
        params.client_info_backup = Some(backup);
    }
    params.machine_id_provider = match &cli.machine_id {
        Some(id) => {
            let provider: Arc<dyn MachineIdProvider> = Arc::new(FixedMachineIdProvider::new(id));
            Some(provider)
        }
        None => detect_machine_id_provider(),
    };

    let manager = MetricsStateBootstrap::new()
        .create(params)
        .ok_or_else(|| CliError::Runtime("metrics state manager already constructed".to_string()))?;
    Ok(Session {
        manager,
        local_state,
        config,
    })
}

// ──────────────────── commands ────────────────────

fn run_status(cli: &Cli) -> Result<(), CliError> {
    let session = open_session(cli, None, CommandLine::new())?;
    let manager = &session.manager;
    let local_state = manager.local_state().as_ref();

    let mut profile = SystemProfile::default();
    manager.get_provider().provide_system_profile_metrics(&mut profile);
    let cloned = ClonedInstallInfo::read(local_state);
    let reset_state = CloneResetState::from_prefs(local_state);
    let low = manager.low_entropy_source();
    let old_low = manager.old_low_entropy_source();
    let high = manager.high_entropy_source();
    let config_hash = session.config.stable_hash()?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!("{}", "Metrics state".bold());
            println!("  Client id:           {}", display_or_none(manager.client_id()));
            println!(
                "  Provisional id:      {}",
                display_or_none(manager.provisional_client_id())
            );
            println!("  Reporting enabled:   {}", manager.is_metrics_reporting_enabled());
            println!("  Low entropy source:  {low}");
            println!(
                "  Old low entropy:     {}",
                old_low.map_or_else(|| "(none)".to_string(), |v| v.to_string())
            );
            println!(
                "  High entropy source: {}",
                high.as_deref().unwrap_or("(none)")
            );
            println!("  Clone resets:        {} ({reset_state:?})", cloned.reset_count);
            if manager.metrics_ids_were_reset() {
                println!("  {}", "Identity was reset this run (cloned install)".yellow());
            }
            println!("  Channel:             {}", manager.channel());
            println!("  Config hash:         {config_hash}");
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "status",
                "client_id": manager.client_id(),
                "provisional_client_id": manager.provisional_client_id(),
                "initial_client_id": manager.initial_client_id(),
                "reporting_enabled": manager.is_metrics_reporting_enabled(),
                "low_entropy_source": low,
                "old_low_entropy_source": old_low,
                "high_entropy_source": high,
                "metrics_ids_were_reset": manager.metrics_ids_were_reset(),
                "cloned_install": cloned,
                "reset_state": reset_state,
                "system_profile": profile,
                "channel": manager.channel(),
                "config_hash": config_hash,
            });
            write_json_line(&payload)?;
        }
    }
    session.commit()
}

fn run_enable(cli: &Cli) -> Result<(), CliError> {
    let session = open_session(cli, Some(true), CommandLine::new())?;
    let manager = &session.manager;
    session.commit()?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!("{} {}", "Client id:".green().bold(), manager.client_id());
            if manager.metrics_ids_were_reset() {
                println!(
                    "  replaced cloned id {}",
                    display_or_none(manager.previous_client_id())
                );
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "enable",
                "client_id": manager.client_id(),
                "metrics_ids_were_reset": manager.metrics_ids_were_reset(),
                "backup_enabled": session.config.reporting.backup_enabled,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_trials(cli: &Cli, args: &TrialsArgs) -> Result<(), CliError> {
    let command_line = CommandLine::from_args(args.switches.iter().map(String::as_str));
    let mut session = open_session(cli, None, command_line)?;
    let provider_type = if args.low_entropy {
        EntropyProviderType::Low
    } else {
        EntropyProviderType::Default
    };

    let mut registry = FieldTrialRegistry::new();
    session.manager.instantiate_field_trial_list(
        &mut registry,
        args.gpu_switch.as_deref(),
        provider_type,
    )?;
    let list = registry
        .get()
        .ok_or_else(|| CliError::Runtime("field trial list was not created".to_string()))?;

    let probes: Vec<(String, f64)> = args
        .probe
        .iter()
        .map(|trial| {
            (
                trial.clone(),
                list.entropy_provider().entropy_for_trial(trial),
            )
        })
        .collect();
    let trials = list.trial_states();
    let beacon = session.manager.clean_exit_beacon();

    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "{} ({} entropy, benchmarking={})",
                "Field trials".bold(),
                session.manager.entropy_source_returned().as_str(),
                list.is_benchmarking()
            );
            if trials.is_empty() {
                println!("  (none)");
            }
            for trial in &trials {
                println!(
                    "  {:<30} {}",
                    trial.trial_name,
                    trial.group_name.as_deref().unwrap_or("(unset)")
                );
            }
            for (trial, entropy) in &probes {
                println!("  entropy[{trial}] = {entropy:.6}");
            }
            println!(
                "  Previous session exited cleanly: {} (crash streak {})",
                beacon.exited_cleanly(),
                beacon.crash_streak()
            );
        }
        OutputMode::Json => {
            let probes: serde_json::Map<String, Value> = probes
                .into_iter()
                .map(|(trial, entropy)| (trial, json!(entropy)))
                .collect();
            let payload = json!({
                "command": "trials",
                "entropy_source": session.manager.entropy_source_returned(),
                "benchmarking": list.is_benchmarking(),
                "trials": trials,
                "param_groups": list.param_group_count(),
                "probes": probes,
                "exited_cleanly": beacon.exited_cleanly(),
                "crash_streak": beacon.crash_streak(),
            });
            write_json_line(&payload)?;
        }
    }
    session.commit()
}

fn run_check_clone(cli: &Cli) -> Result<(), CliError> {
    let session = open_session(cli, None, CommandLine::new())?;
    let manager = &session.manager;
    let Some(detector) = manager.cloned_install_detector() else {
        return Err(CliError::User(
            "no machine identity on this platform; pass --machine-id".to_string(),
        ));
    };
    let local_state = manager.local_state().as_ref();
    let machine_id_state = detector.last_machine_id_state();
    let cloned = ClonedInstallInfo::read(local_state);
    let reset_state = CloneResetState::from_prefs(local_state);
    let detected = detector.cloned_install_detected_in_current_session();

    match output_mode(cli) {
        OutputMode::Human => {
            let verdict = if detected {
                "cloned install detected".red().bold()
            } else {
                "no clone detected".green().bold()
            };
            println!("{verdict}");
            println!("  Machine id state: {machine_id_state:?}");
            println!("  Reset state:      {reset_state:?}");
            println!("  Reset count:      {}", cloned.reset_count);
            if manager.metrics_ids_were_reset() {
                println!(
                    "  Previous client id: {}",
                    display_or_none(manager.previous_client_id())
                );
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "check-clone",
                "machine_id_state": machine_id_state,
                "cloned_install_detected": detected,
                "metrics_ids_were_reset": manager.metrics_ids_were_reset(),
                "reset_state": reset_state,
                "cloned_install": cloned,
            });
            write_json_line(&payload)?;
        }
    }
    session.commit()
}

fn run_beacon(cli: &Cli, args: &BeaconArgs) -> Result<(), CliError> {
    let session = open_session(cli, None, CommandLine::new())?;
    let beacon = session.manager.clean_exit_beacon();
    let previous_crash_streak = beacon.crash_streak();
    session
        .manager
        .log_has_session_shutdown_cleanly(args.clean, args.sync)?;
    session.commit()?;

    let beacon_file = beacon
        .beacon_file_path()
        .map(|path| path.to_string_lossy().into_owned());
    match output_mode(cli) {
        OutputMode::Human => {
            let outcome = if args.clean { "clean" } else { "crashed" };
            println!("Recorded {outcome} exit beacon.");
            if let Some(path) = &beacon_file {
                println!("  Beacon file: {path}");
            }
            println!("  Crash streak: {previous_crash_streak}");
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "beacon",
                "exited_cleanly": args.clean,
                "sync": args.sync,
                "beacon_file": beacon_file,
                "crash_streak": previous_crash_streak,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── output ────────────────────

fn display_or_none(value: &str) -> &str {
    if value.is_empty() { "(none)" } else { value }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("MSM_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
