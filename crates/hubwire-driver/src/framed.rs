use std::sync::Arc;

use hubwire_frame::{Decoded, Frame, FrameReader, FrameWriter};
use hubwire_transport::{HubStream, PollReadable, Wake, WaitReady, Waker};
use tracing::debug;

use crate::config::DriverConfig;
use crate::error::Result;
use crate::transport::{Inbound, Receive, Transmit, Transport, TransportParts};

#[cfg(target_os = "linux")]
use crate::config::I2cConfig;
#[cfg(target_os = "linux")]
use hubwire_transport::{I2cBus, WakeLine};

/// Binary wire protocol over a byte stream.
///
/// Over I2C the bus never blocks, so readiness comes from the Hub's wake
/// line. Over anything else (a socket pair, a pipe-like device) the stream
/// itself is polled for input.
pub struct FramedTransport {
    stream: HubStream,
    ready: Option<Box<dyn WaitReady>>,
    waker: Arc<Waker>,
}

impl FramedTransport {
    /// Frame traffic over `stream`, polling it for readiness.
    pub fn new(stream: HubStream) -> Result<Self> {
        Ok(Self {
            stream,
            ready: None,
            waker: Arc::new(Waker::new()?),
        })
    }

    /// Frame traffic over `stream`, gated by the Hub's wake line. `waker`
    /// must be the one the line was opened with.
    #[cfg(target_os = "linux")]
    pub fn with_wake_line(stream: HubStream, line: WakeLine, waker: Arc<Waker>) -> Self {
        Self {
            stream,
            ready: Some(Box::new(line)),
            waker,
        }
    }

    /// Open the I2C bus and wake line described by `config`.
    #[cfg(target_os = "linux")]
    pub fn open_i2c(config: &I2cConfig) -> Result<Self> {
        let waker = Arc::new(Waker::new()?);
        let stream = I2cBus::open(&config.device, config.address)?;
        let line = WakeLine::open(&config.sysfs_root, config.wake_gpio, Arc::clone(&waker))?;
        Ok(Self::with_wake_line(stream, line, waker))
    }

    pub fn waker(&self) -> &Arc<Waker> {
        &self.waker
    }
}

impl Transport for FramedTransport {
    fn into_parts(self, _config: &DriverConfig) -> Result<TransportParts> {
        let name = self.stream.transport_name();
        let writer = self.stream.try_clone()?;
        let closer = self.stream.try_clone()?;
        let ready: Box<dyn WaitReady> = match self.ready {
            Some(ready) => ready,
            None => Box::new(PollReadable::new(&self.stream, Arc::clone(&self.waker))),
        };
        debug!(transport = name, "framed transport ready");

        Ok(TransportParts {
            name,
            receiver: Box::new(FramedReceiver {
                reader: FrameReader::new(self.stream),
                ready,
            }),
            transmitter: Box::new(FramedTransmitter {
                writer: FrameWriter::new(writer),
            }),
            waker: self.waker,
            closer: Some(closer),
        })
    }
}

struct FramedReceiver {
    reader: FrameReader<HubStream>,
    ready: Box<dyn WaitReady>,
}

impl Receive for FramedReceiver {
    fn receive(&mut self) -> Result<Inbound> {
        if self.ready.wait_ready()? == Wake::Interrupted {
            return Ok(Inbound::Interrupted);
        }
        Ok(match self.reader.read_frame()? {
            Decoded::Keepalive => Inbound::Keepalive,
            Decoded::Frame(frame) => Inbound::Frame(frame),
        })
    }
}

struct FramedTransmitter {
    writer: FrameWriter<HubStream>,
}

impl Transmit for FramedTransmitter {
    fn transmit(&mut self, frame: &Frame) -> Result<Option<Frame>> {
        self.writer.write_frame(frame)?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use hubwire_frame::request;

    use super::*;

    #[test]
    fn frames_cross_the_stream_both_ways() {
        let (ours, mut hub) = HubStream::pair().unwrap();
        let mut parts = FramedTransport::new(ours)
            .unwrap()
            .into_parts(&DriverConfig::default())
            .unwrap();

        parts.transmitter.transmit(&request::port_value(2)).unwrap();
        let mut sent = [0u8; 5];
        hub.read_exact(&mut sent).unwrap();
        assert_eq!(sent, [0x05, 0x00, 0x21, 0x02, 0x00]);

        hub.write_all(&[0x00, 0x06, 0x00, 0x03, 0x01, 0x04, 0x01])
            .unwrap();
        assert_eq!(parts.receiver.receive().unwrap(), Inbound::Keepalive);
        match parts.receiver.receive().unwrap() {
            Inbound::Frame(frame) => assert_eq!(frame.payload(), &[0x01, 0x04, 0x01]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn waker_interrupts_receive() {
        let (ours, _hub) = HubStream::pair().unwrap();
        let mut parts = FramedTransport::new(ours)
            .unwrap()
            .into_parts(&DriverConfig::default())
            .unwrap();
        parts.waker.wake().unwrap();
        assert_eq!(parts.receiver.receive().unwrap(), Inbound::Interrupted);
    }
}
