//! Ctrl-c while a receiver is blocked on the socket
//!
//! Lives in its own test binary because a process can install only one
//! ctrl-c handler.

#![cfg(unix)]

use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};
use vidcast::io::{shutdown_channel, MediaSocket};
use vidcast::{Receiver, ReceiverConfig};

#[test]
fn test_ctrl_c_stops_receiver_cleanly() {
    let (handle, shutdown) = shutdown_channel();
    ctrlc::set_handler(move || handle.trigger()).unwrap();

    let mut config = ReceiverConfig::broadcast();
    // Long enough that the signal lands inside a blocking receive
    config.poll_interval = Duration::from_secs(1);
    config.idle_timeout = Duration::from_secs(10);
    let receiver = Receiver::new(
        MediaSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap(),
        config,
        Vec::new(),
        shutdown,
    )
    .unwrap();

    let pid = std::process::id().to_string();
    let killer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        Command::new("kill").args(["-INT", &pid]).status().unwrap()
    });

    let started = Instant::now();
    let (report, sink) = receiver.run().expect("ctrl-c must end the receiver without error");
    assert!(killer.join().unwrap().success());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.streams, 0);
    assert!(sink.is_empty());
}
