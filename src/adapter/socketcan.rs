//! Linux SocketCAN adapter, selected by `-i INTERFACE`.

use std::io;
use std::time::Duration;

use socketcan::{CanFrame, ExtendedId, Frame as _, Socket, SocketOptions, StandardId};
use tracing::trace;

use crate::channel::{ChannelError, FrameChannel, ENETDOWN, ENOBUFS};
use crate::frame::Frame;

pub struct SocketCanChannel {
    socket: socketcan::CanSocket,
}

impl SocketCanChannel {
    pub fn open(interface: &str) -> Result<Self, ChannelError> {
        let socket = socketcan::CanSocket::open(interface)
            .map_err(|e| ChannelError::Fatal(format!("opening {interface}: {e}")))?;
        socket
            .set_nonblocking(false)
            .map_err(|e| ChannelError::Fatal(e.to_string()))?;
        Ok(Self { socket })
    }
}

fn classify_io_error(err: io::Error) -> ChannelError {
    match err.raw_os_error() {
        Some(ENOBUFS) => ChannelError::TxBufferOverflow,
        Some(ENETDOWN) => ChannelError::Down,
        _ => ChannelError::Fatal(err.to_string()),
    }
}

impl FrameChannel for SocketCanChannel {
    fn send_frame(&mut self, frame: &Frame) -> Result<(), ChannelError> {
        let can_frame = if frame.extended {
            let id = ExtendedId::new(frame.id)
                .ok_or_else(|| ChannelError::Fatal(format!("extended id {:#x} out of range", frame.id)))?;
            CanFrame::new(id, frame.payload())
        } else {
            let id = StandardId::new(frame.id as u16)
                .ok_or_else(|| ChannelError::Fatal(format!("standard id {:#x} out of range", frame.id)))?;
            CanFrame::new(id, frame.payload())
        }
        .ok_or_else(|| ChannelError::Fatal("payload too long for a classic CAN frame".into()))?;

        self.socket.write_frame(&can_frame).map_err(classify_io_error)
    }

    fn receive_frame(&mut self, deadline: Duration) -> Result<Option<Frame>, ChannelError> {
        self.socket
            .set_read_timeout(deadline)
            .map_err(classify_io_error)?;

        match self.socket.read_frame() {
            Ok(can_frame) => {
                let id = match can_frame.id() {
                    socketcan::Id::Standard(id) => id.as_raw() as u32,
                    socketcan::Id::Extended(id) => id.as_raw(),
                };
                trace!(id = format!("{id:#x}"), dlc = can_frame.dlc(), "rx socketcan frame");
                Ok(Some(Frame::new(id, can_frame.data(), can_frame.is_extended())))
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(classify_io_error(e)),
        }
    }
}
