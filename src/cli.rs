use clap::{Parser, Subcommand};
use std::path::PathBuf;

use wps_crack::config::RecurringDelay;
use wps_crack::MacAddr;

#[derive(Parser)]
#[command(name = "wps-crack")]
#[command(author = "maxgfr")]
#[command(version)]
#[command(about = "Online WPS PIN recovery - Educational use only", long_about = None)]
pub struct Args {
    /// Only print errors and the final result
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Command to execute
    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(Subcommand)]
pub enum Mode {
    /// Recover the WPS PIN and network key of an access point
    ///
    /// Requires an interface in monitor mode and root privileges.
    /// The AP checks each PIN half separately, so at most 11,000 PINs are tried.
    ///
    /// Example: wps-crack crack -i wlan0mon -b 00:90:4C:C1:AC:21 -c 6
    Crack(CrackArgs),

    /// Compute the checksum digit of a 7-digit PIN
    ///
    /// Example: wps-crack checksum 1234567
    Checksum {
        /// First seven digits of the PIN
        #[arg(value_name = "DIGITS")]
        pin: String,
    },

    /// Show the content of a saved session file
    ///
    /// Example: wps-crack session ./sessions/00904CC1AC21.json
    Session {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(clap::Args)]
pub struct CrackArgs {
    /// Monitor-mode interface
    #[arg(short, long)]
    pub interface: String,

    /// Target BSSID
    #[arg(short, long)]
    pub bssid: MacAddr,

    /// Target ESSID (learned from beacons when omitted)
    #[arg(short, long)]
    pub essid: Option<String>,

    /// Fixed channel (hops when omitted)
    #[arg(short, long)]
    pub channel: Option<u8>,

    /// Hop over 5 GHz channels instead of 2.4 GHz
    #[arg(short = '5', long = "5ghz")]
    pub five_ghz: bool,

    /// Local MAC address (read from the interface when omitted)
    #[arg(short, long)]
    pub mac: Option<MacAddr>,

    /// Receive timeout in seconds
    #[arg(short, long, default_value = "5")]
    pub timeout: f64,

    /// M5/M7 timeout in seconds (capped at 1)
    #[arg(short = 'T', long, default_value = "0.2")]
    pub m57_timeout: f64,

    /// Delay between attempts in seconds
    #[arg(short, long, default_value = "1")]
    pub delay: f64,

    /// Wait when the AP locks WPS, in seconds
    #[arg(short, long, default_value = "60")]
    pub lock_delay: f64,

    /// Sleep M seconds every N attempts, as N:M
    #[arg(short, long, value_parser = parse_recurring)]
    pub recurring_delay: Option<RecurringDelay>,

    /// Sleep after too many consecutive failures, in seconds (0 disables)
    #[arg(short = 'x', long, default_value = "0")]
    pub fail_wait: f64,

    /// Consecutive failures before `--fail-wait` applies
    #[arg(long, default_value = "10")]
    pub fail_threshold: u32,

    /// Tries per PIN on inconclusive attempts before skipping it
    #[arg(long, default_value = "3")]
    pub retries: u32,

    /// Stop after this many attempts
    #[arg(short = 'g', long)]
    pub max_attempts: Option<u64>,

    /// Give up after this many consecutive lock waits
    #[arg(long)]
    pub max_lock_waits: Option<u32>,

    /// Keep going when the AP reports it is locked
    #[arg(short = 'L', long)]
    pub ignore_locks: bool,

    /// The AP always answers wrong PINs with a NACK
    #[arg(short, long)]
    pub nack: bool,

    /// End each attempt with an EAP-Failure
    #[arg(short = 'E', long)]
    pub eap_terminate: bool,

    /// Try all 10^7 PINs in order instead of half by half
    #[arg(long)]
    pub full: bool,

    /// Start PIN (7 or 8 digits)
    #[arg(short, long)]
    pub pin: Option<String>,

    /// Skip authentication and association (already associated)
    #[arg(short = 'A', long)]
    pub no_associate: bool,

    /// Skip probing for the AP
    #[arg(long)]
    pub no_discover: bool,

    /// Give up after this many discovery rounds without hearing the AP (default: keep trying)
    #[arg(long)]
    pub discover_rounds: Option<u32>,

    /// Session file (default: <session-dir>/<BSSID>.json)
    #[arg(short, long)]
    pub session: Option<PathBuf>,

    /// Directory for session files
    #[arg(long, default_value = ".")]
    pub session_dir: PathBuf,

    /// Neither resume nor save a session
    #[arg(long)]
    pub no_session: bool,
}

fn parse_recurring(text: &str) -> Result<RecurringDelay, String> {
    wps_crack::config::parse_recurring_delay(text)
        .ok_or_else(|| format!("expected N:M (every N attempts sleep M seconds), got '{}'", text))
}
