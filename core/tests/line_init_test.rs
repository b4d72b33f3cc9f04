// ============================================================================
// LINE INITIALISATION TESTS
// ============================================================================
// The AT handshake runs as its own machine ahead of the answer machine and
// releases it through a soft-signal.
// ============================================================================

mod common;

use common::init_logging;
use softfax_core::fax::{
    spawn_answer, AnswerMachine, AnswerMode, AnswerState, NegotiateMachine,
};
use softfax_core::line::{LineInit, LineSignals, ScriptedDevice};
use softfax_core::{Driver, FaxConfig, LineConfig, SessionEvent, TerminationReason};

const QUANTUM: usize = 200;

fn one_command(command: &str, timeout_ms: u64) -> LineConfig {
    LineConfig {
        init_commands: vec![command.to_string()],
        response_timeout_ms: timeout_ms,
        retries: 2,
    }
}

#[test]
fn test_ready_line_releases_answer_machine() {
    init_logging();
    let mut driver = Driver::new(QUANTUM).expect("Failed to create driver");
    let signals = LineSignals::allocate(driver.signals_mut()).expect("Failed to allocate");
    let config = LineConfig::default();
    let line = driver
        .spawn(LineInit::new(ScriptedDevice::agreeable(3), &config, signals))
        .expect("Failed to spawn line init");
    let answer = spawn_answer(&mut driver, &FaxConfig::default(), AnswerMode::Linear, Some(signals))
        .expect("Failed to build session");

    let silence = vec![0i16; QUANTUM];
    for _ in 0..10 {
        driver.step(&silence).expect("Step failed");
    }

    // One pass per command answered, then ready on the fourth
    let machine = driver
        .scheduler()
        .machine::<AnswerMachine>(answer)
        .expect("Machine vanished");
    assert_eq!(
        machine.entered(AnswerState::StartAnswerIncoming),
        Some(3 * QUANTUM as u64)
    );
    assert_eq!(machine.entered(AnswerState::AwaitLine), Some(0));

    let init = driver
        .scheduler()
        .machine::<LineInit<ScriptedDevice>>(line)
        .expect("Machine vanished");
    assert_eq!(init.device().sent, vec!["ATZ", "ATE0", "AT+FCLASS=1"]);
    assert_eq!(driver.events().first(), Some(&SessionEvent::LineReady));
}

#[test]
fn test_answer_waits_while_line_is_down() {
    init_logging();
    let mut driver = Driver::new(QUANTUM).expect("Failed to create driver");
    let signals = LineSignals::allocate(driver.signals_mut()).expect("Failed to allocate");
    let answer = spawn_answer(&mut driver, &FaxConfig::default(), AnswerMode::Linear, Some(signals))
        .expect("Failed to build session");

    let silence = vec![0i16; QUANTUM];
    for _ in 0..50 {
        let out = driver.step(&silence).expect("Step failed");
        assert!(out.samples.iter().all(|&s| s == 0));
    }
    let machine = driver
        .scheduler()
        .machine::<AnswerMachine>(answer)
        .expect("Machine vanished");
    assert_eq!(machine.entered(AnswerState::StartAnswerIncoming), None);
    assert_eq!(driver.scheduler().depth(answer), Some(1));
}

#[test]
fn test_error_response_is_retried() {
    init_logging();
    let mut driver = Driver::new(QUANTUM).expect("Failed to create driver");
    let signals = LineSignals::allocate(driver.signals_mut()).expect("Failed to allocate");
    let device = ScriptedDevice::new()
        .then_reply(&["ATZ", "", "ERROR"])
        .then_reply(&["OK"]);
    let line = driver
        .spawn(LineInit::new(device, &one_command("ATZ", 2000), signals))
        .expect("Failed to spawn line init");

    driver.run_until_done(100 * QUANTUM as u64).expect("Run failed");

    let init = driver
        .scheduler()
        .machine::<LineInit<ScriptedDevice>>(line)
        .expect("Machine vanished");
    assert_eq!(init.device().sent, vec!["ATZ", "ATZ"]);
    assert_eq!(
        init.exchanges(),
        &[
            (String::from("ATZ"), String::from("ERROR")),
            (String::from("ATZ"), String::from("OK")),
        ]
    );
    assert_eq!(driver.events(), &[SessionEvent::LineReady]);
}

#[test]
fn test_silent_device_fails_after_retries() {
    init_logging();
    let mut driver = Driver::new(QUANTUM).expect("Failed to create driver");
    let signals = LineSignals::allocate(driver.signals_mut()).expect("Failed to allocate");
    let line = driver
        .spawn(LineInit::new(ScriptedDevice::new(), &one_command("ATZ", 0), signals))
        .expect("Failed to spawn line init");

    driver.run_until_done(100 * QUANTUM as u64).expect("Run failed");

    let init = driver
        .scheduler()
        .machine::<LineInit<ScriptedDevice>>(line)
        .expect("Machine vanished");
    assert_eq!(init.device().sent.len(), 3);
    assert_eq!(init.exchanges().len(), 3);
    assert!(init.exchanges().iter().all(|(_, response)| response.is_empty()));
    assert_eq!(
        driver.events(),
        &[SessionEvent::CallTerminated {
            reason: TerminationReason::LineFailure
        }]
    );
    assert!(driver.scheduler().all_finished());
}

#[test]
fn test_failed_line_ends_linear_answer() {
    init_logging();
    let mut driver = Driver::new(QUANTUM).expect("Failed to create driver");
    let signals = LineSignals::allocate(driver.signals_mut()).expect("Failed to allocate");
    driver
        .spawn(LineInit::new(ScriptedDevice::new(), &one_command("ATZ", 0), signals))
        .expect("Failed to spawn line init");
    let answer = spawn_answer(&mut driver, &FaxConfig::default(), AnswerMode::Linear, Some(signals))
        .expect("Failed to build session");

    let max_ticks = 60 * 8000;
    let audio = driver.run_until_done(max_ticks).expect("Run failed");

    assert!(driver.scheduler().all_finished());
    assert!(driver.now() < 20 * QUANTUM as u64, "ran until tick {}", driver.now());
    assert!(audio.iter().all(|&s| s == 0));
    let machine = driver
        .scheduler()
        .machine::<AnswerMachine>(answer)
        .expect("Machine vanished");
    assert_eq!(machine.entered(AnswerState::StartAnswerIncoming), None);
    assert!(machine.entered(AnswerState::LineSettled).is_some());
    // One termination, from line init
    assert_eq!(
        driver.events(),
        &[SessionEvent::CallTerminated {
            reason: TerminationReason::LineFailure
        }]
    );
}

#[test]
fn test_failed_line_ends_negotiation() {
    init_logging();
    let mut driver = Driver::new(QUANTUM).expect("Failed to create driver");
    let signals = LineSignals::allocate(driver.signals_mut()).expect("Failed to allocate");
    driver
        .spawn(LineInit::new(ScriptedDevice::new(), &one_command("ATZ", 0), signals))
        .expect("Failed to spawn line init");
    let answer = spawn_answer(
        &mut driver,
        &FaxConfig::default(),
        AnswerMode::Negotiate,
        Some(signals),
    )
    .expect("Failed to build session");

    driver.run_until_done(60 * 8000).expect("Run failed");

    assert!(driver.scheduler().all_finished());
    let machine = driver
        .scheduler()
        .machine::<NegotiateMachine>(answer)
        .expect("Machine vanished");
    assert_eq!(machine.reason(), Some(TerminationReason::LineFailure));
    assert_eq!(machine.dis_sent(), 0);
    assert_eq!(driver.events().len(), 1);
}
