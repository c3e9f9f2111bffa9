use std::fmt;

use super::crc::crc16_modbus;
use crate::utils::error::ModbusError;

/// Modbus function codes used by the acquisition path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCode {
    ReadInputRegisters,
}

impl FunctionCode {
    pub fn code(self) -> u8 {
        match self {
            FunctionCode::ReadInputRegisters => 0x04,
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionCode::ReadInputRegisters => write!(f, "READ_INPUT_REGISTERS"),
        }
    }
}

/// Slave address, function code and byte count preceding the payload.
pub const RESPONSE_HEADER_LEN: usize = 3;
/// Exception replies are always address + function + code + CRC.
pub const EXCEPTION_FRAME_LEN: usize = 5;

#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub slave_id: u8,
    pub function: FunctionCode,
    pub start_register: u16,
    pub quantity: u16,
}

impl ReadRequest {
    pub fn new(slave_id: u8, function: FunctionCode, start_register: u16, quantity: u16) -> Self {
        Self {
            slave_id,
            function,
            start_register,
            quantity,
        }
    }

    /// RTU frame: address, function, start (BE), quantity (BE), CRC (LE).
    pub fn to_frame(&self) -> Vec<u8> {
        let mut frame = vec![self.slave_id, self.function.code()];
        frame.extend_from_slice(&self.start_register.to_be_bytes());
        frame.extend_from_slice(&self.quantity.to_be_bytes());

        let crc = crc16_modbus(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    /// Length of a successful reply frame, CRC included.
    pub fn expected_response_len(&self) -> usize {
        RESPONSE_HEADER_LEN + self.quantity as usize * 2 + 2
    }

    /// Validates a complete reply frame and returns its registers in wire order.
    pub fn parse_response(&self, frame: &[u8]) -> Result<Vec<u16>, ModbusError> {
        if frame.len() < EXCEPTION_FRAME_LEN {
            return Err(ModbusError::InvalidResponse(format!(
                "frame too short: {} bytes",
                frame.len()
            )));
        }

        let data_len = frame.len() - 2;
        let received = u16::from_le_bytes([frame[data_len], frame[data_len + 1]]);
        let expected = crc16_modbus(&frame[..data_len]);
        if received != expected {
            return Err(ModbusError::CrcError { expected, received });
        }

        if frame[0] != self.slave_id {
            return Err(ModbusError::InvalidResponse(format!(
                "reply from slave {} while addressing {}",
                frame[0], self.slave_id
            )));
        }

        let function = self.function.code();
        if frame[1] == function | 0x80 {
            return Err(ModbusError::ExceptionResponse {
                function,
                code: frame[2],
            });
        }
        if frame[1] != function {
            return Err(ModbusError::InvalidResponse(format!(
                "unexpected function 0x{:02X}",
                frame[1]
            )));
        }

        let byte_count = frame[2] as usize;
        if byte_count != self.quantity as usize * 2 || data_len != RESPONSE_HEADER_LEN + byte_count {
            return Err(ModbusError::InvalidResponse(format!(
                "byte count {} does not match {} requested registers",
                byte_count, self.quantity
            )));
        }

        Ok(frame[RESPONSE_HEADER_LEN..data_len]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }
}
