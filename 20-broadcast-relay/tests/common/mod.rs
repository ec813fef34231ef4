#![allow(dead_code)]

use std::{
    io::{self, Read},
    net::{SocketAddr, TcpStream},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Result, anyhow};

pub const READ_TIMEOUT: Duration = Duration::from_secs(3);
pub const SILENCE_WINDOW: Duration = Duration::from_millis(200);

pub fn connect(addr: SocketAddr) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    Ok(stream)
}

/// Polls `condition` until it holds or a few seconds pass.
pub fn wait_until(description: &str, condition: impl Fn() -> bool) -> Result<()> {
    let deadline = Instant::now() + READ_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return Ok(());
        }
        thread::sleep(Duration::from_millis(10));
    }
    if condition() {
        Ok(())
    } else {
        Err(anyhow!("timed out waiting for {description}"))
    }
}

/// Reads until the accumulated bytes contain `needle`. Relayed chunks carry
/// no framing, so a single read may return part of a message.
pub fn read_until_contains(stream: &mut TcpStream, needle: &[u8]) -> Result<Vec<u8>> {
    let deadline = Instant::now() + READ_TIMEOUT;
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];

    while !contains(&received, needle) {
        if Instant::now() >= deadline {
            return Err(anyhow!(
                "timed out waiting for {:?}, got {:?}",
                String::from_utf8_lossy(needle),
                String::from_utf8_lossy(&received)
            ));
        }
        match stream.read(&mut buf) {
            Ok(0) => {
                return Err(anyhow!(
                    "stream closed before {:?} arrived",
                    String::from_utf8_lossy(needle)
                ));
            }
            Ok(read) => received.extend_from_slice(&buf[..read]),
            Err(err) if is_timeout(&err) => {}
            Err(err) => return Err(err.into()),
        }
    }

    Ok(received)
}

/// Asserts that nothing arrives on `stream` for a short window.
pub fn assert_silent(stream: &mut TcpStream) -> Result<()> {
    stream.set_read_timeout(Some(SILENCE_WINDOW))?;
    let mut buf = [0u8; 256];
    let outcome = stream.read(&mut buf);
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    match outcome {
        Ok(0) => Err(anyhow!("stream was closed")),
        Ok(read) => Err(anyhow!(
            "expected silence, got {:?}",
            String::from_utf8_lossy(&buf[..read])
        )),
        Err(err) if is_timeout(&err) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|window| window == needle)
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
