mod common;

use std::{
    io::Write,
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    sync::Arc,
    thread,
};

use anyhow::Result;
use broadcast_relay::{
    config::RelayConfig,
    message::sender_tag,
    peer::PeerId,
    threaded::{ThreadedRegistry, ThreadedRelay},
};

use common::{assert_silent, connect, read_until_contains, wait_until};

fn start_relay() -> Result<(SocketAddr, Arc<ThreadedRegistry>)> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let relay = ThreadedRelay::new(listener, RelayConfig::default());
    let addr = relay.local_addr()?;
    let registry = relay.registry();
    // The accept loop never returns; the thread dies with the test process.
    thread::spawn(move || relay.run());
    Ok((addr, registry))
}

/// Connects a client and waits until the relay has registered it.
fn join(addr: SocketAddr, registry: &ThreadedRegistry) -> Result<(TcpStream, PeerId)> {
    let before = registry.ids();
    let stream = connect(addr)?;
    wait_until("peer registration", || registry.len() == before.len() + 1)?;
    let id = registry
        .ids()
        .into_iter()
        .find(|id| !before.contains(id))
        .expect("new peer id");
    Ok((stream, id))
}

#[test]
fn message_reaches_every_other_peer() -> Result<()> {
    let (addr, registry) = start_relay()?;
    let (mut alice, alice_id) = join(addr, &registry)?;
    let (mut bob, _) = join(addr, &registry)?;
    let (mut carol, _) = join(addr, &registry)?;

    alice.write_all(b"hi")?;

    let expected = format!("{}hi", sender_tag(alice_id));
    read_until_contains(&mut bob, expected.as_bytes())?;
    read_until_contains(&mut carol, expected.as_bytes())?;
    assert_silent(&mut alice)?;

    Ok(())
}

#[test]
fn connect_then_disconnect_leaves_registry_unchanged() -> Result<()> {
    let (addr, registry) = start_relay()?;
    let (mut observer, _) = join(addr, &registry)?;

    let (quitter, quitter_id) = join(addr, &registry)?;
    drop(quitter);

    wait_until("quitter removal", || registry.len() == 1)?;
    assert!(!registry.contains(quitter_id));
    assert_silent(&mut observer)?;

    Ok(())
}

#[test]
fn half_closed_peer_does_not_stall_sender() -> Result<()> {
    let (addr, registry) = start_relay()?;
    let (mut alice, alice_id) = join(addr, &registry)?;
    let (bob, bob_id) = join(addr, &registry)?;
    let (mut carol, _) = join(addr, &registry)?;

    bob.shutdown(Shutdown::Write)?;
    alice.write_all(b"during")?;

    let tag = sender_tag(alice_id);
    read_until_contains(&mut carol, format!("{tag}during").as_bytes())?;
    wait_until("bob removal", || !registry.contains(bob_id))?;

    alice.write_all(b"after")?;
    read_until_contains(&mut carol, format!("{tag}after").as_bytes())?;
    assert!(registry.contains(alice_id));

    Ok(())
}

#[test]
fn reset_peer_does_not_interrupt_others() -> Result<()> {
    let (addr, registry) = start_relay()?;
    let (mut alice, alice_id) = join(addr, &registry)?;
    let (mut bob, _) = join(addr, &registry)?;
    let (doomed, doomed_id) = join(addr, &registry)?;

    alice.write_all(b"first")?;
    let tag = sender_tag(alice_id);
    read_until_contains(&mut bob, format!("{tag}first").as_bytes())?;

    // Closing with unread bytes in the receive buffer makes the kernel send RST.
    drop(doomed);
    wait_until("reset peer removal", || !registry.contains(doomed_id))?;

    alice.write_all(b"second")?;
    read_until_contains(&mut bob, format!("{tag}second").as_bytes())?;
    assert_eq!(registry.len(), 2);

    Ok(())
}

#[test]
fn every_peer_can_send() -> Result<()> {
    let (addr, registry) = start_relay()?;
    let mut peers = Vec::new();
    for _ in 0..4 {
        peers.push(join(addr, &registry)?);
    }

    for sender in 0..peers.len() {
        let payload = format!("from-{sender};");
        peers[sender].0.write_all(payload.as_bytes())?;
        let expected = format!("{}{payload}", sender_tag(peers[sender].1));

        for (receiver, (stream, _)) in peers.iter_mut().enumerate() {
            if receiver != sender {
                read_until_contains(stream, expected.as_bytes())?;
            }
        }
    }

    for (stream, _) in peers.iter_mut() {
        assert_silent(stream)?;
    }
    drop(peers);
    wait_until("all peers removed", || registry.is_empty())?;

    Ok(())
}

#[test]
fn peer_limit_refuses_extra_connections() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let relay = ThreadedRelay::new(
        listener,
        RelayConfig {
            max_peers: Some(2),
            ..RelayConfig::default()
        },
    );
    let addr = relay.local_addr()?;
    let registry = relay.registry();
    thread::spawn(move || relay.run());

    let (mut alice, alice_id) = join(addr, &registry)?;
    let (mut bob, _) = join(addr, &registry)?;
    let mut refused = connect(addr)?;

    // The refused socket is closed by the relay without ever being registered.
    let mut buf = [0u8; 8];
    assert!(matches!(std::io::Read::read(&mut refused, &mut buf), Ok(0) | Err(_)));
    assert_eq!(registry.len(), 2);

    alice.write_all(b"still works")?;
    read_until_contains(&mut bob, format!("{}still works", sender_tag(alice_id)).as_bytes())?;
    assert_silent(&mut alice)?;

    Ok(())
}
