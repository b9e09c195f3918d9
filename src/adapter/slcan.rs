//! SLCAN-over-serial adapter, selected by `-p PORT`.
//!
//! `serialport`'s blocking `read` has no guaranteed per-call wake-on-timeout
//! on every platform once a read is in flight, so a daemon thread owns the
//! port exclusively and feeds whole SLCAN frames into a bounded channel;
//! `receive_frame` only ever talks to that channel (§9 background-RX-thread
//! pattern).

use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::channel::{ChannelError, FrameChannel};
use crate::frame::Frame;

const QUEUE_DEPTH: usize = 64;

pub struct SlcanChannel {
    port: Box<dyn serialport::SerialPort>,
    inbound: Receiver<Frame>,
    _worker: thread::JoinHandle<()>,
}

impl SlcanChannel {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, ChannelError> {
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| ChannelError::Fatal(format!("opening {path}: {e}")))?;

        let reader = port
            .try_clone()
            .map_err(|e| ChannelError::Fatal(format!("cloning handle for {path}: {e}")))?;

        let (tx, rx) = mpsc::sync_channel(QUEUE_DEPTH);
        let worker = thread::Builder::new()
            .name("slcan-rx".into())
            .spawn(move || rx_worker(reader, tx))
            .map_err(|e| ChannelError::Fatal(format!("spawning rx thread: {e}")))?;

        Ok(Self {
            port,
            inbound: rx,
            _worker: worker,
        })
    }
}

fn rx_worker(mut port: Box<dyn serialport::SerialPort>, tx: SyncSender<Frame>) {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match port.read(&mut byte) {
            Ok(0) => continue,
            Ok(_) => {
                if byte[0] == b'\r' {
                    if !line.is_empty() {
                        match decode_slcan_line(&line) {
                            Some(frame) => {
                                if tx.send(frame).is_err() {
                                    return; // receiving end dropped; shut down
                                }
                            }
                            None => trace!("ignoring unrecognized SLCAN line"),
                        }
                    }
                    line.clear();
                } else {
                    line.push(byte[0]);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) => {
                warn!("slcan rx thread stopping: {e}");
                return;
            }
        }
    }
}

/// Encode one frame as an SLCAN ASCII line: `t` (standard) or `T`
/// (extended), followed by the hex ID, a single hex DLC digit, and the
/// hex payload, terminated by `\r`.
fn encode_slcan_line(frame: &Frame) -> String {
    let mut out = String::new();
    if frame.extended {
        out.push('T');
        out.push_str(&format!("{:08X}", frame.id));
    } else {
        out.push('t');
        out.push_str(&format!("{:03X}", frame.id));
    }
    out.push_str(&format!("{:X}", frame.dlc()));
    for byte in frame.payload() {
        out.push_str(&format!("{byte:02X}"));
    }
    out.push('\r');
    out
}

fn decode_slcan_line(line: &[u8]) -> Option<Frame> {
    let text = std::str::from_utf8(line).ok()?;
    let mut chars = text.chars();
    let kind = chars.next()?;
    let extended = match kind {
        't' => false,
        'T' => true,
        _ => return None,
    };

    let id_len = if extended { 8 } else { 3 };
    let rest: String = chars.collect();
    if rest.len() < id_len + 1 {
        return None;
    }

    let id = u32::from_str_radix(&rest[..id_len], 16).ok()?;
    let dlc = rest[id_len..id_len + 1].chars().next()?.to_digit(16)? as usize;
    if dlc > 8 {
        return None;
    }

    let hex_payload = rest.get(id_len + 1..id_len + 1 + dlc * 2)?;
    let mut payload = Vec::with_capacity(dlc);
    for chunk in hex_payload.as_bytes().chunks(2) {
        let byte_str = std::str::from_utf8(chunk).ok()?;
        payload.push(u8::from_str_radix(byte_str, 16).ok()?);
    }

    Some(Frame::new(id, &payload, extended))
}

impl FrameChannel for SlcanChannel {
    fn send_frame(&mut self, frame: &Frame) -> Result<(), ChannelError> {
        let line = encode_slcan_line(frame);
        self.port
            .write_all(line.as_bytes())
            .map_err(|e| ChannelError::Fatal(e.to_string()))
    }

    fn receive_frame(&mut self, deadline: Duration) -> Result<Option<Frame>, ChannelError> {
        match self.inbound.recv_timeout(deadline) {
            Ok(frame) => {
                debug!(id = format!("{:#x}", frame.id), "rx slcan frame");
                Ok(Some(frame))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(ChannelError::Fatal("slcan rx thread terminated".into()))
            }
        }
    }
}
