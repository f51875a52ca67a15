//! End-to-end loads against a simulated monitor.

mod common;

use common::{Behaviour, SimulatedMonitor};
use retroload::{
    AddressError, Error, LoadMethod, LoadRequest, LoaderConfig, Phase, ProgramLoader, SessionConfig,
    TransferConfig, TransferError,
};
use std::time::Duration;

fn fast(max_retries: u32) -> LoaderConfig {
    common::init_logging();
    LoaderConfig {
        transfer: TransferConfig {
            ready_timeout: Duration::from_millis(200),
            ack_timeout: Duration::from_millis(50),
            max_retries,
            byte_delay: Duration::ZERO,
        },
        session: SessionConfig {
            prompt_timeout: Duration::from_millis(100),
            ..SessionConfig::default()
        },
        run_timeout: Duration::from_millis(100),
        tolerate_incomplete_finish: false,
    }
}

fn program(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i * 7 + 3) as u8)
        .collect()
}

#[test]
fn test_small_program_is_loaded_and_run() {
    let monitor = SimulatedMonitor::new();
    let payload = program(24);

    let outcome = ProgramLoader::new(monitor.clone(), fast(10))
        .load(
            &LoadRequest::new(payload.clone())
                .at(0x0300)
                .execute(true),
        )
        .unwrap();

    assert_eq!(outcome.bytes_sent, 24);
    assert_eq!(outcome.packets, 1);
    let output = outcome
        .program_output()
        .unwrap();
    assert_eq!(output, "HELLO");

    let state = monitor.state();
    assert_eq!(state.commands, vec!["", "L 0300", "J 0300"]);
    assert_eq!(state.accepted, vec![1]);
    assert_eq!(&state.memory[0x0300..0x0318], payload.as_slice());
    // Padding of the single packet.
    assert!(state.memory[0x0318..0x0380].iter().all(|&b| b == 0));
    // The loader closed the port on drop.
    assert!(state.closed);
}

#[test]
fn test_two_packet_program() {
    let monitor = SimulatedMonitor::new();
    let payload = program(256);

    let outcome = ProgramLoader::new(monitor.clone(), fast(10))
        .load(&LoadRequest::new(payload.clone()).at(0x1000))
        .unwrap();

    assert_eq!(outcome.bytes_sent, 256);
    assert_eq!(outcome.packets, 2);
    assert!(outcome.run_response.is_none());

    let state = monitor.state();
    assert_eq!(state.accepted, vec![1, 2]);
    assert_eq!(&state.memory[0x1000..0x1100], payload.as_slice());
    assert_eq!(state.commands, vec!["", "L 1000"]);
}

#[test]
fn test_progress_is_reported_per_packet() {
    let monitor = SimulatedMonitor::new();
    let mut seen = Vec::new();

    ProgramLoader::new(monitor, fast(10))
        .load_with_progress(&LoadRequest::new(program(300)), |done, total| {
            seen.push((done, total));
        })
        .unwrap();

    assert_eq!(seen, vec![(1, 3), (2, 3), (3, 3)]);
}

#[test]
fn test_verify_reads_back_every_byte() {
    let monitor = SimulatedMonitor::new();
    let outcome = ProgramLoader::new(monitor.clone(), fast(10))
        .load(&LoadRequest::new(program(5)).verify(true))
        .unwrap();

    assert!(outcome.verified);
    let state = monitor.state();
    assert_eq!(
        &state.commands[2..],
        &["E 0300", "E 0301", "E 0302", "E 0303", "E 0304"]
    );
}

#[test]
fn test_verify_detects_corruption() {
    let monitor = SimulatedMonitor::with_behaviour(Behaviour {
        corrupt_at: Some(0x0302),
        ..Behaviour::default()
    });
    let payload = program(5);

    let err = ProgramLoader::new(monitor, fast(10))
        .load(&LoadRequest::new(payload.clone()).verify(true))
        .unwrap_err();

    match err {
        Error::VerificationMismatch {
            offset,
            expected,
            actual,
        } => {
            assert_eq!(offset, 2);
            assert_eq!(expected, payload[2]);
            assert_eq!(actual, !payload[2]);
        },
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_rejected_packets_are_resent() {
    let monitor = SimulatedMonitor::with_behaviour(Behaviour {
        naks: 2,
        ..Behaviour::default()
    });

    ProgramLoader::new(monitor.clone(), fast(3))
        .load(&LoadRequest::new(program(24)))
        .unwrap();

    let state = monitor.state();
    assert_eq!(state.attempts, vec![1, 1, 1]);
    assert_eq!(state.accepted, vec![1]);
}

#[test]
fn test_retries_exhausted() {
    let monitor = SimulatedMonitor::with_behaviour(Behaviour {
        naks: usize::MAX,
        ..Behaviour::default()
    });

    let err = ProgramLoader::new(monitor.clone(), fast(4))
        .load(&LoadRequest::new(program(24)))
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Transfer(TransferError::MaxRetriesExceeded { sequence: 1 })
    ));
    assert_eq!(err.phase(), Some(Phase::AwaitAck));
    assert_eq!(monitor.state().attempts.len(), 4);
}

#[test]
fn test_receiver_cancel_aborts() {
    let monitor = SimulatedMonitor::with_behaviour(Behaviour {
        cancel_after: Some(1),
        ..Behaviour::default()
    });

    let err = ProgramLoader::new(monitor.clone(), fast(10))
        .load(&LoadRequest::new(program(300)))
        .unwrap_err();

    assert!(matches!(err, Error::Transfer(TransferError::Aborted)));
    assert_eq!(monitor.state().accepted, vec![1]);
}

#[test]
fn test_unacknowledged_eot() {
    let behaviour = Behaviour {
        ack_eot: false,
        ..Behaviour::default()
    };

    let err = ProgramLoader::new(SimulatedMonitor::with_behaviour(behaviour.clone()), fast(10))
        .load(&LoadRequest::new(program(24)))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Transfer(TransferError::IncompleteFinish { bytes_sent: 24, .. })
    ));
    assert_eq!(err.phase(), Some(Phase::AwaitFinish));

    let config = LoaderConfig {
        tolerate_incomplete_finish: true,
        ..fast(10)
    };
    let outcome = ProgramLoader::new(SimulatedMonitor::with_behaviour(behaviour), config)
        .load(&LoadRequest::new(program(24)).execute(true))
        .unwrap();
    assert_eq!(outcome.bytes_sent, 24);
    assert!(outcome.run_response.is_some());
}

#[test]
fn test_invalid_addresses_never_touch_the_port() {
    for (address, len, expected) in [
        (0x0100, 4, AddressError::TooLow(0x0100)),
        (0x8000, 4, AddressError::InReservedSpace(0x8000)),
        (0x7FF0, 32, AddressError::InReservedSpace(0x8000)),
    ] {
        let monitor = SimulatedMonitor::new();
        let err = ProgramLoader::new(monitor.clone(), fast(10))
            .load(&LoadRequest::new(program(len)).at(address))
            .unwrap_err();

        match err {
            Error::Address(e) => assert_eq!(e, expected),
            other => panic!("unexpected error: {other}"),
        }
        assert!(monitor.state().commands.is_empty());
    }
}

#[test]
fn test_silent_monitor_times_out_waiting_for_prompt() {
    let monitor = SimulatedMonitor::with_behaviour(Behaviour {
        responsive: false,
        ..Behaviour::default()
    });

    let err = ProgramLoader::new(monitor.clone(), fast(10))
        .load(&LoadRequest::new(program(24)))
        .unwrap_err();

    assert!(matches!(err, Error::Timeout(Phase::AwaitPrompt)));
    assert!(monitor.state().closed);
}

#[test]
fn test_deposit_method() {
    let monitor = SimulatedMonitor::new();
    let payload = program(4);

    let outcome = ProgramLoader::new(monitor.clone(), fast(10))
        .load(
            &LoadRequest::new(payload.clone())
                .at(0x0400)
                .method(LoadMethod::Deposit)
                .verify(true),
        )
        .unwrap();

    assert_eq!(outcome.bytes_sent, 4);
    assert_eq!(outcome.packets, 0);
    let state = monitor.state();
    assert_eq!(&state.memory[0x0400..0x0404], payload.as_slice());
    assert!(state.accepted.is_empty());
    assert_eq!(state.commands[1], format!("D 0400 {:02X}", payload[0]));
}
