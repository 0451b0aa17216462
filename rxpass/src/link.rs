//! MAVLink link: typed messages over a [`Port`].
//!
//! The handshake logic only ever needs four things from a link: its baud
//! rate, sending a message, a non-blocking "is there a message of this kind
//! waiting" query, and closing. Those form the [`Transport`] trait. Opening a
//! link is a separate [`Connector`] so the controller can close and reopen
//! the port at a different baud rate.

use {
    crate::{
        error::{Error, Result},
        port::Port,
        protocol::{Header, Message, MessageKind, frame, frame::FrameParser},
    },
    log::{debug, trace},
    std::io,
};

#[cfg(feature = "native")]
use crate::port::{NativePort, SerialConfig};

/// Read chunk size for one receive pass.
const READ_CHUNK: usize = 512;

/// A MAVLink system/component address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Identity {
    /// System id.
    pub system_id: u8,
    /// Component id.
    pub component_id: u8,
}

impl Identity {
    /// Construct an identity.
    pub const fn new(system_id: u8, component_id: u8) -> Self {
        Self {
            system_id,
            component_id,
        }
    }
}

impl Default for Identity {
    /// The ground-station identity used for our own frames.
    fn default() -> Self {
        Self::new(255, 190)
    }
}

/// A message together with who sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    /// Frame header (sender and sequence).
    pub header: Header,
    /// Decoded message.
    pub message: Message,
}

impl Received {
    /// Sender identity.
    pub fn sender(&self) -> Identity {
        Identity::new(self.header.system_id, self.header.component_id)
    }
}

/// An open, bidirectional MAVLink message link.
pub trait Transport {
    /// Baud rate the link was opened at.
    fn baud_rate(&self) -> u32;

    /// Send one message.
    fn send(&mut self, message: &Message) -> Result<()>;

    /// Return the next queued message of `kind`, if any, without blocking.
    ///
    /// Messages of other kinds that are ahead of it in the queue are
    /// discarded.
    fn recv(&mut self, kind: MessageKind) -> Result<Option<Received>>;

    /// Close the link. Closing twice is a no-op.
    fn close(&mut self) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn baud_rate(&self) -> u32 {
        (**self).baud_rate()
    }

    fn send(&mut self, message: &Message) -> Result<()> {
        (**self).send(message)
    }

    fn recv(&mut self, kind: MessageKind) -> Result<Option<Received>> {
        (**self).recv(kind)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Opens links on a named port.
pub trait Connector {
    /// Link type produced.
    type Link: Transport;

    /// Open `port` at `baud`.
    fn open(&mut self, port: &str, baud: u32) -> Result<Self::Link>;
}

/// MAVLink 2 link over any byte [`Port`].
pub struct MavLink<P: Port> {
    port: P,
    parser: FrameParser,
    source: Identity,
    sequence: u8,
}

impl<P: Port> MavLink<P> {
    /// Wrap an open port; outgoing frames carry `source` as sender.
    pub fn new(port: P, source: Identity) -> Self {
        Self {
            port,
            parser: FrameParser::new(),
            source,
            sequence: 0,
        }
    }

    /// The underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Wrap a freshly opened port, discarding bytes the driver queued
    /// before the link existed.
    pub fn open(mut port: P, source: Identity) -> Result<Self> {
        port.clear_buffers()?;
        Ok(Self::new(port, source))
    }

    /// Read whatever bytes are available into the parser.
    fn fill(&mut self) -> Result<usize> {
        let mut buf = [0u8; READ_CHUNK];
        match self
            .port
            .read(&mut buf)
        {
            Ok(n) => {
                self.parser
                    .push(&buf[..n]);
                Ok(n)
            },
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(0)
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Pop buffered frames until one of `kind` turns up.
    fn next_of_kind(&mut self, kind: MessageKind) -> Option<Received> {
        while let Some(frame) = self
            .parser
            .next_frame()
        {
            let Some(message) = frame.message() else {
                trace!("Dropping malformed message {}", frame.message_id);
                continue;
            };
            if message.kind() == Some(kind) {
                return Some(Received {
                    header: frame.header,
                    message,
                });
            }
            trace!("Skipping {:?} while waiting for {kind}", message.kind());
        }
        None
    }
}

impl<P: Port> Transport for MavLink<P> {
    fn baud_rate(&self) -> u32 {
        self.port
            .baud_rate()
    }

    fn send(&mut self, message: &Message) -> Result<()> {
        let header = Header {
            sequence: self.sequence,
            system_id: self
                .source
                .system_id,
            component_id: self
                .source
                .component_id,
        };
        let bytes = frame::encode(header, message)
            .ok_or_else(|| Error::Protocol(format!("cannot encode message {}", message.id())))?;
        self.sequence = self
            .sequence
            .wrapping_add(1);
        trace!("TX {} ({} bytes)", message.id(), bytes.len());
        self.port
            .write_all_bytes(&bytes)
    }

    fn recv(&mut self, kind: MessageKind) -> Result<Option<Received>> {
        if let Some(received) = self.next_of_kind(kind) {
            return Ok(Some(received));
        }
        if self.fill()? == 0 {
            return Ok(None);
        }
        Ok(self.next_of_kind(kind))
    }

    fn close(&mut self) -> Result<()> {
        self.parser
            .clear();
        self.port
            .close()
    }
}

/// Opens [`MavLink`] links on native serial ports.
#[cfg(feature = "native")]
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeConnector {
    source: Identity,
}

#[cfg(feature = "native")]
impl NativeConnector {
    /// Connector whose links send as `source`.
    pub const fn new(source: Identity) -> Self {
        Self { source }
    }
}

#[cfg(feature = "native")]
impl Connector for NativeConnector {
    type Link = MavLink<NativePort>;

    fn open(&mut self, port: &str, baud: u32) -> Result<Self::Link> {
        let port = NativePort::open(&SerialConfig::new(port, baud))?;
        debug!("Link open on {} at {baud} baud", port.name());
        MavLink::open(port, self.source)
    }
}
