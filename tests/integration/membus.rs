//! MemBus transport behavior: attach handshakes, lock exclusion,
//! staleness recovery, and request/response ordering.

use std::time::{Duration, Instant};

use epoch::{error::BusError, membus::MemBus};

/// Keys scoped to this test binary so parallel runs can't collide.
fn key(salt: i32) -> i32 {
    0x4560_0000 | ((std::process::id() as i32 & 0xfff) << 4) | salt
}

/// Runs a client attach on a helper thread while the main thread answers
/// the connect ping, the way the supervisor's heavy tick would.
fn attach_client(server: &MemBus, bus_key: i32) -> MemBus {
    let joiner = std::thread::spawn(move || MemBus::init_client(bus_key));
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if server.handle_pings() {
            break;
        }
        assert!(Instant::now() < deadline, "client never pinged");
        std::thread::sleep(Duration::from_millis(1));
    }
    joiner.join().expect("join").expect("client attach")
}

#[test]
fn request_response_cycle() {
    let bus_key = key(1);
    let mut server = MemBus::init_server(bus_key).expect("server");
    let mut client = attach_client(&server, bus_key);

    client.write("OBJSTART sshd").expect("request");
    assert_eq!(server.read().as_deref(), Some("OBJSTART sshd"));
    server.write("OK OBJSTART sshd").expect("response");
    assert_eq!(client.read_blocking().expect("reply"), "OK OBJSTART sshd");

    // The toggle protocol means reads on an idle bus return nothing.
    assert!(server.read().is_none());
    assert!(client.read().is_none());

    client.shutdown();
    server.shutdown();
}

#[test]
fn second_client_is_locked_out() {
    let bus_key = key(2);
    let mut server = MemBus::init_server(bus_key).expect("server");
    let mut first = attach_client(&server, bus_key);

    // While the lock is held and fresh, another attach must fail fast.
    let second = MemBus::init_client(bus_key);
    assert!(matches!(second, Err(BusError::Locked(_))));

    first.shutdown();

    // The lock was released; a new client can attach now.
    let mut third = attach_client(&server, bus_key);
    third.shutdown();
    server.shutdown();
}

#[test]
fn stale_lock_returns_the_bus_to_idle() {
    let bus_key = key(3);
    let mut server = MemBus::init_server(bus_key).expect("server");
    let mut client = attach_client(&server, bus_key);

    // A fresh lock passes the integrity check.
    assert!(server.check_integrity());

    // Pretend the client hung for over a minute.
    server.age_lock_for_tests(61);
    assert!(!server.check_integrity());

    // The slots are idle again and a new client can come in.
    client.shutdown();
    let mut replacement = attach_client(&server, bus_key);
    replacement.shutdown();
    server.shutdown();
}

#[test]
fn binary_frames_round_trip() {
    let bus_key = key(4);
    let mut server = MemBus::init_server(bus_key).expect("server");
    let mut client = attach_client(&server, bus_key);

    let frame: Vec<u8> = (0..=255u8).collect();
    server.bin_write(&frame).expect("bin write");

    let mut buffer = [0u8; 4096];
    let len = client.bin_read_blocking(&mut buffer).expect("bin read");
    assert!(len >= frame.len());
    assert_eq!(&buffer[..frame.len()], frame.as_slice());

    client.shutdown();
    server.shutdown();
}

#[test]
fn shutdown_removes_the_region() {
    let bus_key = key(5);
    let mut server = MemBus::init_server(bus_key).expect("server");
    assert!(MemBus::region_exists(bus_key));
    server.shutdown();
    assert!(!MemBus::region_exists(bus_key));
}
