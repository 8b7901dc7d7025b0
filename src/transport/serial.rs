use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf},
    time::Instant,
};
use tokio_serial::{SerialPortBuilderExt, SerialPortType, SerialStream};

use crate::{
    config::ConnectionSettings,
    error::{Error, Result},
};

use super::{Connector, LineReader, LineWriter, Link, visible};

/// Input counts as drained once the line stays quiet this long
const DRAIN_QUIET: Duration = Duration::from_millis(20);
/// Upper bound on draining a device that never stops talking
const DRAIN_LIMIT: Duration = Duration::from_millis(250);

/// Opens local serial devices through tokio-serial.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialConnector;

#[async_trait]
impl Connector for SerialConnector {
    async fn open(&self, settings: &ConnectionSettings) -> Result<Link> {
        debug!("open({}, {})", settings.port, settings.baud);

        let serial = tokio_serial::new(&settings.port, settings.baud)
            .timeout(settings.timeout)
            .open_native_async()?;
        let (rx, tx) = tokio::io::split(serial);

        Ok(Link {
            reader: Box::new(SerialLineReader {
                stream: BufReader::new(rx),
                pending: vec![],
            }),
            writer: Box::new(SerialLineWriter { stream: tx }),
        })
    }
}

struct SerialLineReader {
    stream: BufReader<ReadHalf<SerialStream>>,
    /// Bytes of a line whose terminator has not arrived yet
    pending: Vec<u8>,
}

#[async_trait]
impl LineReader for SerialLineReader {
    async fn read_line(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        /* read_until leaves partial data in `pending` when the timeout fires */
        match tokio::time::timeout(timeout, self.stream.read_until(b'\n', &mut self.pending)).await
        {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(Error::Disconnected(e.to_string())),
            Ok(Ok(0)) if self.pending.is_empty() => {
                Err(Error::Disconnected("end of stream".into()))
            }
            Ok(Ok(_)) => {
                let line = std::mem::take(&mut self.pending);
                debug!("read_line: {}", visible(&line));
                Ok(Some(line))
            }
        }
    }

    async fn clear_input(&mut self) -> Result<()> {
        let buffered = self.stream.buffer().len();
        self.stream.consume(buffered);
        self.pending.clear();

        debug!("clear_input(): dropped {buffered} buffered bytes");

        let end = Instant::now() + DRAIN_LIMIT;
        let mut scratch = [0u8; 256];
        loop {
            let now = Instant::now();
            if now >= end {
                break;
            }
            let wait = DRAIN_QUIET.min(end - now);

            match tokio::time::timeout(wait, self.stream.get_mut().read(&mut scratch)).await {
                Err(_) | Ok(Ok(0)) => break,
                Ok(Ok(n)) => debug!("clear_input(): {}", visible(&scratch[..n])),
                Ok(Err(e)) => return Err(Error::Disconnected(e.to_string())),
            }
        }

        Ok(())
    }
}

struct SerialLineWriter {
    stream: WriteHalf<SerialStream>,
}

#[async_trait]
impl LineWriter for SerialLineWriter {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        debug!("write_all(): {}", visible(data));

        self.stream
            .write_all(data)
            .await
            .map_err(|e| Error::Disconnected(e.to_string()))?;
        self.stream
            .flush()
            .await
            .map_err(|e| Error::Disconnected(e.to_string()))?;

        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Device names of the serial ports present on this machine.
pub fn available_ports() -> Result<Vec<String>> {
    Ok(tokio_serial::available_ports()?
        .into_iter()
        .map(|p| p.port_name)
        .collect())
}

/// `(device, description)` pairs of the serial ports present on this machine.
pub fn available_ports_with_desc() -> Result<Vec<(String, String)>> {
    Ok(tokio_serial::available_ports()?
        .into_iter()
        .map(|p| {
            let desc = match p.port_type {
                SerialPortType::UsbPort(usb) => usb
                    .product
                    .unwrap_or_else(|| format!("USB {:04x}:{:04x}", usb.vid, usb.pid)),
                SerialPortType::PciPort => "PCI serial port".to_string(),
                SerialPortType::BluetoothPort => "Bluetooth serial port".to_string(),
                SerialPortType::Unknown => "n/a".to_string(),
            };
            (p.port_name, desc)
        })
        .collect())
}
