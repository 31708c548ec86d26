//! Whole-run scenarios against the in-process registrar

use std::time::{Duration, Instant};

use wps_crack::config::ChannelPlan;
use wps_crack::pin::PinCandidate;
use wps_crack::scheduler::RecordingSleeper;
use wps_crack::session::SessionFile;
use wps_crack::transport::{ApBehavior, ScriptedAp};
use wps_crack::wsc::MessageType;
use wps_crack::{AccessPointInfo, CancelToken, CrackConfig, CrackEngine, KeyStatus, MacAddr, RunFailure};

const PSK: &str = "hunter2moresecret";

fn bssid() -> MacAddr {
    "00:90:4C:C1:AC:21".parse().unwrap()
}

fn config() -> CrackConfig {
    let mut cfg = CrackConfig::new(bssid());
    cfg.local_mac = Some("02:00:00:00:00:01".parse().unwrap());
    cfg.channel = ChannelPlan::Fixed(6);
    cfg.rx_timeout = Duration::from_millis(100);
    cfg.m57_timeout = Duration::from_millis(50);
    cfg.delay = Duration::ZERO;
    cfg
}

fn registrar(pin: &str) -> ScriptedAp {
    ScriptedAp::new(bssid(), "TestNet", 6, PinCandidate::parse(pin).unwrap(), PSK)
}

#[test]
fn test_full_recovery_within_split_bound() {
    let pin = format!("1234567{}", wps_crack::pin::checksum(1_234_567));
    assert_eq!(pin, "12345670");

    let mut engine = CrackEngine::new(config(), AccessPointInfo::new(bssid()), registrar(&pin))
        .with_sleeper(RecordingSleeper::new());
    let report = engine.run(&CancelToken::new());

    let keys = report.result.unwrap();
    assert_eq!(keys.pin, pin);
    assert_eq!(keys.psk, PSK);
    assert_eq!(keys.essid, "TestNet");
    assert_eq!(report.status.key_status, KeyStatus::Done);
    assert!(report.skipped.is_empty());

    // 1234 wrong first halves, 567 wrong second halves, then the hit
    assert_eq!(report.status.attempts, 1802);
    assert!(report.status.attempts < 11_000);

    let ap = engine.transport();
    assert_eq!(ap.count(MessageType::M3), 1802);
    // M5 only goes out once the first half is proven
    assert_eq!(ap.count(MessageType::M5), 568);
    assert_eq!(ap.count(MessageType::M7), 1);
}

#[test]
fn test_wrong_first_halves_never_reach_m5() {
    let mut cfg = config();
    cfg.max_attempts = Some(25);
    let mut engine = CrackEngine::new(cfg, AccessPointInfo::new(bssid()), registrar("99999995"))
        .with_sleeper(RecordingSleeper::new());
    let report = engine.run(&CancelToken::new());

    assert!(matches!(report.result, Err(RunFailure::MaxAttemptsReached(25))));
    assert_eq!(report.status.pins_rejected, 25);
    assert_eq!(engine.transport().count(MessageType::M3), 25);
    assert_eq!(engine.transport().count(MessageType::M5), 0);
    assert_eq!(engine.resume_point().first_half, 25);
}

#[test]
fn test_second_half_gated_at_m6() {
    let mut cfg = config();
    cfg.start_pin = PinCandidate::parse("1234560");
    cfg.max_attempts = Some(4);
    let mut engine = CrackEngine::new(cfg, AccessPointInfo::new(bssid()), registrar("12345670"))
        .with_sleeper(RecordingSleeper::new());
    let report = engine.run(&CancelToken::new());

    assert!(matches!(report.result, Err(RunFailure::MaxAttemptsReached(4))));
    let resume = engine.resume_point();
    assert!(resume.first_half_confirmed);
    assert_eq!(resume.first_half, 1234);
    assert_eq!(resume.second_half, 564);
    assert_eq!(engine.transport().count(MessageType::M5), 4);
    assert_eq!(engine.transport().count(MessageType::M7), 0);
}

#[test]
fn test_start_pin_second_half_restarts_on_next_first_half() {
    let mut cfg = config();
    cfg.start_pin = PinCandidate::parse("0000998");
    let mut engine = CrackEngine::new(cfg, AccessPointInfo::new(bssid()), registrar("00010030"))
        .with_sleeper(RecordingSleeper::new());
    let report = engine.run(&CancelToken::new());

    assert_eq!(report.result.unwrap().pin, "00010030");
    // 0000/998, then 0001 with second halves 000..003
    assert_eq!(report.status.attempts, 5);
}

#[test]
fn test_silent_ap_yields_one_decision_per_attempt() {
    let mut cfg = config();
    cfg.max_attempts = Some(1);
    let ap = registrar("12345670").with_behavior(ApBehavior {
        silent_from: Some(MessageType::M1),
        ..ApBehavior::default()
    });
    let mut engine = CrackEngine::new(cfg, AccessPointInfo::new(bssid()), ap)
        .with_sleeper(RecordingSleeper::new());

    let started = Instant::now();
    let report = engine.run(&CancelToken::new());
    assert!(started.elapsed() < Duration::from_secs(2));

    assert!(matches!(report.result, Err(RunFailure::MaxAttemptsReached(1))));
    assert_eq!(report.status.attempts, 1);
    assert_eq!(engine.retry_state().unexpected_failures, 1);
    assert_eq!(engine.transport().count(MessageType::M1), 1);
}

#[test]
fn test_lock_backs_off() {
    let mut cfg = config();
    cfg.lock_delay = Duration::from_secs(60);
    let ap = registrar("00000055").with_behavior(ApBehavior {
        lock_after: Some(1),
        lock_sessions: 1,
        ..ApBehavior::default()
    });
    let mut engine = CrackEngine::new(cfg, AccessPointInfo::new(bssid()), ap)
        .with_sleeper(RecordingSleeper::new());
    let report = engine.run(&CancelToken::new());

    assert_eq!(report.result.unwrap().pin, "00000055");
    // The locked session costs one extra attempt
    assert_eq!(report.status.attempts, 7);
    assert!(engine.sleeper().total() >= Duration::from_secs(60));
}

#[test]
fn test_ignored_lock_does_not_wait() {
    let mut cfg = config();
    cfg.lock_delay = Duration::from_secs(60);
    cfg.ignore_locks = true;
    let ap = registrar("00000055").with_behavior(ApBehavior {
        lock_after: Some(1),
        lock_sessions: 1,
        ..ApBehavior::default()
    });
    let mut engine = CrackEngine::new(cfg, AccessPointInfo::new(bssid()), ap)
        .with_sleeper(RecordingSleeper::new());
    let report = engine.run(&CancelToken::new());

    assert_eq!(report.result.unwrap().pin, "00000055");
    assert_eq!(engine.sleeper().total(), Duration::ZERO);
}

#[test]
fn test_too_many_lock_waits() {
    let mut cfg = config();
    cfg.max_lock_waits = Some(2);
    let ap = registrar("00000055").with_behavior(ApBehavior {
        lock_after: Some(0),
        lock_sessions: 100,
        ..ApBehavior::default()
    });
    let mut engine = CrackEngine::new(cfg, AccessPointInfo::new(bssid()), ap)
        .with_sleeper(RecordingSleeper::new());
    let report = engine.run(&CancelToken::new());

    assert!(matches!(report.result, Err(RunFailure::LockedOut(2))));
    assert_eq!(report.status.key_status, KeyStatus::Failed);
    assert_eq!(report.status.attempts, 3);
}

#[test]
fn test_duplicate_frames_do_not_change_result() {
    let ap = registrar("00000055").with_behavior(ApBehavior {
        duplicate: true,
        ..ApBehavior::default()
    });
    let mut engine = CrackEngine::new(config(), AccessPointInfo::new(bssid()), ap)
        .with_sleeper(RecordingSleeper::new());
    let report = engine.run(&CancelToken::new());

    assert_eq!(report.result.unwrap().pin, "00000055");
    assert_eq!(report.status.attempts, 6);
    assert_eq!(engine.transport().count(MessageType::M7), 1);
}

#[test]
fn test_resume_continues_without_repeats() {
    let dir = tempfile::tempdir().unwrap();
    let path = SessionFile::default_path(dir.path(), &bssid());

    let cancel = CancelToken::new();
    let remote = cancel.clone();
    let mut first = CrackEngine::new(config(), AccessPointInfo::new(bssid()), registrar("00070003"))
        .with_sleeper(RecordingSleeper::new())
        .with_progress(move |status| {
            if status.attempts == 3 {
                remote.cancel();
            }
        });
    let report = first.run(&cancel);
    assert!(matches!(report.result, Err(RunFailure::Cancelled)));
    assert_eq!(report.status.key_status, KeyStatus::Working);
    SessionFile::from_status(bssid(), first.ap().essid.clone(), &report.status)
        .save(&path)
        .unwrap();

    let saved = SessionFile::load(&path, &bssid()).unwrap();
    assert_eq!(saved.resume, first.resume_point());
    let mut second = CrackEngine::new(config(), AccessPointInfo::new(bssid()), registrar("00070003"))
        .with_sleeper(RecordingSleeper::new())
        .with_pin_space(saved.pin_space())
        .with_retry_state(saved.retry_state());
    let report = second.run(&CancelToken::new());

    assert_eq!(report.result.unwrap().pin, "00070003");
    assert_eq!(report.status.attempts, 8);
    // First halves 0003..0007 only
    assert_eq!(second.transport().sessions(), 5);
}

#[test]
fn test_done_session_records_recovered_pin() {
    let dir = tempfile::tempdir().unwrap();
    let path = SessionFile::default_path(dir.path(), &bssid());

    let mut engine = CrackEngine::new(config(), AccessPointInfo::new(bssid()), registrar("00000055"))
        .with_sleeper(RecordingSleeper::new());
    let report = engine.run(&CancelToken::new());
    assert_eq!(report.status.key_status, KeyStatus::Done);
    SessionFile::from_status(bssid(), engine.ap().essid.clone(), &report.status)
        .save(&path)
        .unwrap();

    let saved = SessionFile::load(&path, &bssid()).unwrap();
    assert!(saved.is_complete());
    assert_eq!(saved.pin.as_deref(), Some("00000055"));
    assert_eq!(saved.essid.as_deref(), Some("TestNet"));
}

#[test]
fn test_cancel_before_start() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut engine = CrackEngine::new(config(), AccessPointInfo::new(bssid()), registrar("12345670"))
        .with_sleeper(RecordingSleeper::new());
    let report = engine.run(&cancel);

    assert!(matches!(report.result, Err(RunFailure::Cancelled)));
    assert_eq!(report.status.attempts, 0);
    assert_eq!(engine.transport().sessions(), 0);
}
