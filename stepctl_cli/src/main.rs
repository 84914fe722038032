mod cli;
mod error_fmt;
mod rt;
mod session;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use eyre::{Result, WrapErr};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tracing_appender::non_blocking::WorkerGuard;

use crate::cli::{Cli, Commands};
use crate::session::{RunRequest, TuneRequest, mode_name, telemetry_json};

fn load_config(path: Option<&Path>) -> Result<stepctl_config::Config> {
    let cfg = match path {
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .wrap_err_with(|| format!("read config {}", p.display()))?;
            stepctl_config::load_toml(&text)
                .wrap_err_with(|| format!("parse config {}", p.display()))?
        }
        None => stepctl_config::Config::default(),
    };
    cfg.validate()
        .map_err(|e| eyre::Report::new(stepctl_core::ControlError::Config(e.to_string())))?;
    Ok(cfg)
}

/// Console logs go to stderr so `--json` output on stdout stays parseable.
/// The returned guard flushes the file sink when dropped.
fn init_tracing(
    json: bool,
    level: Option<&str>,
    logging: &stepctl_config::Logging,
) -> Result<Option<WorkerGuard>> {
    let level = level.or(logging.level.as_deref()).unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let (json_layer, text_layer) = if json {
        (
            Some(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
            None,
        )
    } else {
        (
            None,
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
    };

    let mut file_guard = None;
    let file_layer = match logging.file.as_deref() {
        Some(file) => {
            let path = Path::new(file);
            let dir = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().map_or_else(|| "stepctl.log".into(), |n| n.to_os_string());
            let appender = match logging.rotation.as_deref() {
                Some("daily") => tracing_appender::rolling::daily(dir, name),
                Some("hourly") => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            file_guard = Some(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .try_init()?;
    Ok(file_guard)
}

fn real_main(cli: Cli) -> Result<()> {
    let cfg = load_config(cli.config.as_deref())?;
    let _log_guard = init_tracing(cli.json, cli.log_level.as_deref(), &cfg.logging)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
            tracing::warn!(error = %e, "failed to install Ctrl-C handler");
        }
    }

    match cli.cmd {
        Commands::Run {
            mode,
            duration_ms,
            move_steps,
            move_angle,
            rpm,
            dropin_rate,
            block_after_ms,
            direct,
            stats,
            rt,
        } => {
            let req = RunRequest {
                mode,
                duration: Duration::from_millis(duration_ms),
                move_steps,
                move_angle,
                rpm,
                dropin_rate,
                block_after: block_after_ms.map(Duration::from_millis),
                direct,
                rt,
            };
            let summary = session::run_session(cli.backend, &cfg, &req, shutdown)?;
            let t = summary.telemetry;
            if cli.json {
                let mut out = serde_json::json!({
                    "status": if summary.aborted { "aborted" } else { "complete" },
                    "telemetry": telemetry_json(&t),
                });
                if stats && let Some(s) = summary.stats {
                    out["stats"] = serde_json::json!({
                        "ticks": s.ticks,
                        "missed": s.missed,
                        "worst_exec_us": s.worst_exec.as_micros(),
                    });
                }
                println!("{out}");
            } else {
                println!(
                    "run {}: mode={} ticks={} angle={:.2}° speed={:.1} rpm stalled={} stalls={} rebases={}",
                    if summary.aborted { "aborted" } else { "complete" },
                    mode_name(t.mode),
                    t.ticks,
                    t.angle_moved_deg,
                    t.speed_rpm,
                    t.stalled,
                    t.stalls,
                    t.rebases,
                );
                if stats {
                    match summary.stats {
                        Some(s) => {
                            eprintln!("\n--- Tick Stats ---");
                            eprintln!("Ticks: {}", s.ticks);
                            eprintln!("Missed deadlines (> period): {}", s.missed);
                            eprintln!("Worst execution (us): {}", s.worst_exec.as_micros());
                            eprintln!("------------------\n");
                        }
                        None => eprintln!("Tick stats are only collected on the tick thread (omit --direct)"),
                    }
                }
            }
        }
        Commands::SelfCheck => {
            let check = session::self_check(cli.backend, &cfg)?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "status": "ok",
                        "encoder_angle_deg": check.encoder_angle_deg,
                        "encoder_status": check.encoder_status,
                        "driver_status": check.driver.bits(),
                    })
                );
            } else {
                println!(
                    "self-check ok: encoder at {:.2}° (status {:#04x}), driver status {:#04x}",
                    check.encoder_angle_deg,
                    check.encoder_status,
                    check.driver.bits()
                );
            }
        }
        Commands::Tune {
            kp,
            ki,
            kd,
            current,
            hold_current,
            store,
        } => {
            let req = TuneRequest {
                kp,
                ki,
                kd,
                current,
                hold_current,
                store,
            };
            let r = session::tune(cli.backend, &cfg, &req)?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "status": "saved",
                        "kp": r.kp,
                        "ki": r.ki,
                        "kd": r.kd,
                        "current": r.current,
                        "hold_current": r.hold_current,
                        "invert_direction": r.invert_direction,
                    })
                );
            } else {
                println!(
                    "tuning saved: kp={} ki={} kd={} current={} hold_current={}",
                    r.kp, r.ki, r.kd, r.current, r.hold_current
                );
            }
        }
    }
    Ok(())
}

fn main() {
    if let Err(e) = color_eyre::install() {
        eprintln!("failed to install error reporter: {e}");
    }
    let cli = Cli::parse();
    let json = cli.json;
    if let Err(err) = real_main(cli) {
        tracing::debug!(error = ?err, "command failed");
        if json {
            println!("{}", error_fmt::format_error_json(&err));
        } else {
            eprintln!("{}", error_fmt::humanize(&err));
        }
        std::process::exit(error_fmt::exit_code_for_error(&err));
    }
}
