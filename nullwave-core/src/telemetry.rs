//! Debug telemetry: stream `(original, inverted)` byte pairs to a single
//! TCP client.
//!
//! ## Wire format
//!
//! One frame per offered pair, all values as decimal text lines:
//!
//! ```text
//! <len(original)>
//! <len(inverted)>
//! <original[0] as i8>
//! <inverted[0] as i8>
//! <original[1] as i8>
//! ...
//! ```
//!
//! The exporter holds at most one pair. Offers made while no client is
//! connected, or while the previous pair has not been written yet, are
//! dropped: telemetry must never slow the playback task down.

use std::io::{self, BufWriter, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::error::Result;

pub const DEFAULT_TELEMETRY_PORT: u16 = 8575;

/// Accept / channel poll interval of the exporter thread.
const POLL: Duration = Duration::from_millis(10);

/// Receiver of captured/inverted pairs, called from the playback task.
pub trait TelemetrySink: Send + Sync + 'static {
    /// Hand over one pair. Returns `false` if the pair was dropped.
    fn offer(&self, original: &[u8], inverted: &[u8]) -> bool;
}

/// Write one frame in the line format described in the module docs.
pub fn write_frame<W: Write>(out: &mut W, original: &[u8], inverted: &[u8]) -> io::Result<()> {
    writeln!(out, "{}", original.len())?;
    writeln!(out, "{}", inverted.len())?;
    for (o, i) in original.iter().zip(inverted) {
        writeln!(out, "{}", *o as i8)?;
        writeln!(out, "{}", *i as i8)?;
    }
    out.flush()
}

type Pair = (Vec<u8>, Vec<u8>);

struct ExporterShared {
    connected: AtomicBool,
    /// A pair has been offered and not yet written.
    pending: AtomicBool,
    shutdown: AtomicBool,
}

/// Loopback TCP exporter serving one client at a time.
pub struct TcpExporter {
    shared: Arc<ExporterShared>,
    tx: Sender<Pair>,
    local_addr: SocketAddr,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl TcpExporter {
    /// Listen on `127.0.0.1:port`. Port 0 picks an ephemeral port.
    pub fn bind_loopback(port: u16) -> Result<Self> {
        Self::bind(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)))
    }

    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(ExporterShared {
            connected: AtomicBool::new(false),
            pending: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        });
        let (tx, rx) = bounded::<Pair>(1);

        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("nullwave-telemetry".into())
            .spawn(move || serve(listener, rx, thread_shared))?;

        info!(%local_addr, "telemetry exporter listening");
        Ok(Self {
            shared,
            tx,
            local_addr,
            handle: parking_lot::Mutex::new(Some(handle)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Close the client connection and the listener. Idempotent.
    pub fn stop(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("telemetry thread panicked");
            }
        }
    }
}

impl TelemetrySink for TcpExporter {
    fn offer(&self, original: &[u8], inverted: &[u8]) -> bool {
        if !self.is_connected() {
            return false;
        }
        if self
            .shared
            .pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        match self.tx.try_send((original.to_vec(), inverted.to_vec())) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.shared.pending.store(false, Ordering::Release);
                false
            }
        }
    }
}

impl Drop for TcpExporter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve(listener: TcpListener, rx: Receiver<Pair>, shared: Arc<ExporterShared>) {
    while !shared.shutdown.load(Ordering::Acquire) {
        let stream = match listener.accept() {
            Ok((stream, peer)) => {
                info!(%peer, "telemetry client connected");
                stream
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(POLL);
                continue;
            }
            Err(e) => {
                warn!("telemetry accept failed: {e}");
                std::thread::sleep(POLL);
                continue;
            }
        };
        if let Err(e) = stream_to(stream, &rx, &shared) {
            debug!("telemetry client dropped: {e}");
        }
        shared.connected.store(false, Ordering::Release);
        // Anything still queued belonged to the old client.
        while rx.try_recv().is_ok() {}
        shared.pending.store(false, Ordering::Release);
    }
    debug!("telemetry exporter stopped");
}

fn stream_to(stream: TcpStream, rx: &Receiver<Pair>, shared: &ExporterShared) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    let mut out = BufWriter::new(stream);
    shared.connected.store(true, Ordering::Release);
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            return Ok(());
        }
        match rx.recv_timeout(POLL) {
            Ok((original, inverted)) => {
                let result = write_frame(&mut out, &original, &inverted);
                shared.pending.store(false, Ordering::Release);
                result?;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::time::Instant;

    #[test]
    fn frame_lists_lengths_then_interleaved_signed_bytes() {
        let mut out = Vec::new();
        write_frame(&mut out, &[0x01, 0xFF], &[0xFF, 0x01]).expect("write frame");
        assert_eq!(String::from_utf8(out).expect("utf8"), "2\n2\n1\n-1\n-1\n1\n");
    }

    #[test]
    fn offers_without_client_are_dropped() {
        let exporter = TcpExporter::bind_loopback(0).expect("bind");
        assert!(!exporter.offer(&[1, 2], &[3, 4]));
        exporter.stop();
    }

    #[test]
    fn connected_client_receives_frame() {
        let exporter = TcpExporter::bind_loopback(0).expect("bind");
        let client = TcpStream::connect(exporter.local_addr()).expect("connect");
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("read timeout");

        let deadline = Instant::now() + Duration::from_secs(2);
        while !exporter.is_connected() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(exporter.is_connected());
        assert!(exporter.offer(&[0x10, 0x80], &[0xF0, 0x7F]));

        let mut lines = BufReader::new(client).lines();
        let received: Vec<String> = (0..6)
            .map(|_| lines.next().expect("line").expect("read"))
            .collect();
        assert_eq!(received, ["2", "2", "16", "-16", "-128", "127"]);
        exporter.stop();
    }
}
