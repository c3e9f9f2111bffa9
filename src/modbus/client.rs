use async_trait::async_trait;
use log::{debug, error, info};
use serialport::{ClearBuffer, SerialPort};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::protocol::{FunctionCode, ReadRequest, EXCEPTION_FRAME_LEN};
use crate::config::settings::ParityConfig;
use crate::utils::error::ModbusError;

/// One request/response exchange with a slave on the field-bus.
///
/// Implementations own the RTU framing and byte-level timing. The returned
/// words are in the order the device put them on the wire.
#[async_trait]
pub trait RegisterTransport: Send + Sync {
    async fn execute(
        &self,
        slave_id: u8,
        function: FunctionCode,
        start_register: u16,
        word_count: u16,
    ) -> Result<Vec<u16>, ModbusError>;
}

pub struct ModbusClient {
    port: Arc<Mutex<Box<dyn SerialPort>>>,
    port_name: String,
}

impl ModbusClient {
    pub fn new(
        port_name: &str,
        baud_rate: u32,
        parity: ParityConfig,
        timeout: Duration,
    ) -> Result<Self, ModbusError> {
        info!("🔌 Connecting to Modbus RTU port: {}", port_name);
        info!("⚙️  Configuration: {} baud, 8 data bits, parity {}, 1 stop bit", baud_rate, parity);

        let serial_parity = match parity {
            ParityConfig::None => serialport::Parity::None,
            ParityConfig::Even => serialport::Parity::Even,
            ParityConfig::Odd => serialport::Parity::Odd,
        };

        let port = serialport::new(port_name, baud_rate)
            .timeout(timeout)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serial_parity)
            .open()
            .map_err(|e| {
                error!("❌ Failed to open serial port {}: {}", port_name, e);
                ModbusError::ConnectionError(format!("Failed to open port: {}", e))
            })?;

        info!("✅ Modbus RTU connection established successfully");
        Ok(Self {
            port: Arc::new(Mutex::new(port)),
            port_name: port_name.to_string(),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

/// Writes `request` to `link` and reads back one reply frame, stopping early
/// on an exception reply.
fn exchange<L>(link: &mut L, request: &ReadRequest) -> Result<Vec<u8>, ModbusError>
where
    L: Read + Write + ?Sized,
{
    let frame = request.to_frame();
    link.write_all(&frame)
        .map_err(|e| ModbusError::CommunicationError(format!("Write failed: {}", e)))?;
    link.flush()
        .map_err(|e| ModbusError::CommunicationError(format!("Flush failed: {}", e)))?;

    let expected_len = request.expected_response_len();
    let mut response = vec![0u8; expected_len];

    link.read_exact(&mut response[..EXCEPTION_FRAME_LEN])?;
    if response[1] & 0x80 != 0 {
        response.truncate(EXCEPTION_FRAME_LEN);
    } else {
        link.read_exact(&mut response[EXCEPTION_FRAME_LEN..])?;
    }
    Ok(response)
}

fn transact(
    port: &Mutex<Box<dyn SerialPort>>,
    port_name: &str,
    request: &ReadRequest,
) -> Result<Vec<u16>, ModbusError> {
    debug!("📤 TX [{}]: {}", port_name, hex::encode(request.to_frame()));

    let mut port = port.lock().map_err(|_| ModbusError::LockError)?;

    // Drop any late bytes from a previous timed-out exchange.
    port.clear(ClearBuffer::Input)?;
    let response = exchange(&mut **port, request)?;

    debug!("📥 RX [{}]: {}", port_name, hex::encode(&response));
    request.parse_response(&response)
}

/// Runs blocking serial work on tokio's blocking pool so timers and the
/// watchdog keep running while a read waits out its timeout.
async fn off_runtime<T, F>(work: F) -> Result<T, ModbusError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ModbusError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ModbusError::CommunicationError(format!("Serial worker failed: {}", e)))?
}

#[async_trait]
impl RegisterTransport for ModbusClient {
    async fn execute(
        &self,
        slave_id: u8,
        function: FunctionCode,
        start_register: u16,
        word_count: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        debug!(
            "📊 {} x{} from slave {} at 0x{:04X}",
            function, word_count, slave_id, start_register
        );
        let request = ReadRequest::new(slave_id, function, start_register, word_count);
        let port = Arc::clone(&self.port);
        let port_name = self.port_name.clone();
        off_runtime(move || transact(&port, &port_name, &request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::crc::crc16_modbus;
    use std::io::Cursor;
    use tokio::time::sleep;

    /// Serial line with a canned reply; records what was written.
    struct CannedLink {
        reply: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl CannedLink {
        fn replying(mut body: Vec<u8>) -> Self {
            let crc = crc16_modbus(&body);
            body.extend_from_slice(&crc.to_le_bytes());
            Self {
                reply: Cursor::new(body),
                written: Vec::new(),
            }
        }
    }

    impl Read for CannedLink {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.reply.read(buf)
        }
    }

    impl Write for CannedLink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn exchange_reads_a_full_reply() {
        let request = ReadRequest::new(1, FunctionCode::ReadInputRegisters, 0x0000, 2);
        let mut link = CannedLink::replying(vec![0x01, 0x04, 0x04, 0x43, 0x66, 0x80, 0x00]);

        let response = exchange(&mut link, &request).unwrap();
        assert_eq!(link.written, request.to_frame());
        assert_eq!(response.len(), 9);
        assert_eq!(request.parse_response(&response).unwrap(), vec![0x4366, 0x8000]);
    }

    #[test]
    fn exchange_stops_after_exception_frame() {
        let request = ReadRequest::new(51, FunctionCode::ReadInputRegisters, 0x0400, 2);
        let mut link = CannedLink::replying(vec![51, 0x84, 0x02]);

        let response = exchange(&mut link, &request).unwrap();
        assert_eq!(response.len(), EXCEPTION_FRAME_LEN);
        assert!(matches!(
            request.parse_response(&response),
            Err(ModbusError::ExceptionResponse { code: 0x02, .. })
        ));
    }

    #[test]
    fn truncated_reply_is_a_communication_error() {
        let request = ReadRequest::new(1, FunctionCode::ReadInputRegisters, 0x0000, 2);
        let mut link = CannedLink {
            reply: Cursor::new(vec![0x01, 0x04]),
            written: Vec::new(),
        };
        assert!(matches!(
            exchange(&mut link, &request),
            Err(ModbusError::CommunicationError(_))
        ));
    }

    #[tokio::test]
    async fn blocking_serial_work_leaves_timers_running() {
        let work = off_runtime(|| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(7u16)
        });
        tokio::pin!(work);

        tokio::select! {
            _ = sleep(Duration::from_millis(20)) => {}
            _ = &mut work => panic!("serial work finished before the timer"),
        }
        assert_eq!(work.await.unwrap(), 7);
    }
}
