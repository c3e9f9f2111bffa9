//! Register layout and value decoding for the DTS6619 family of three-phase
//! DIN-rail meters.
//!
//! Every measurement on the meter is an IEEE-754 single spanning two
//! consecutive 16-bit input registers. The meter returns the high word first
//! and each word carries its own byte order, so the float is rebuilt as the
//! little-endian byte sequence `word[1]` followed by `word[0]`.

use crate::utils::error::ModbusError;

/// Registers per decoded value.
pub const WORDS_PER_VALUE: u16 = 2;

/// Rebuilds one float from a word pair in the order the transaction returned it.
pub fn decode(word_pair: (u16, u16)) -> f32 {
    let (first, second) = word_pair;
    let [b0, b1] = second.to_le_bytes();
    let [b2, b3] = first.to_le_bytes();
    f32::from_le_bytes([b0, b1, b2, b3])
}

/// Inverse of [`decode`]: the word pair a meter would return for `value`.
pub fn encode(value: f32) -> (u16, u16) {
    let [b0, b1, b2, b3] = value.to_le_bytes();
    (u16::from_le_bytes([b2, b3]), u16::from_le_bytes([b0, b1]))
}

/// Decodes a multi-register reply, one float per word pair, in request order.
///
/// # Panics
///
/// Panics when `words` holds an odd number of registers. Transactions are
/// always issued for whole pairs, so an odd reply is a caller bug.
pub fn decode_words(words: &[u16]) -> Vec<f32> {
    assert!(
        words.len() % WORDS_PER_VALUE as usize == 0,
        "register reply of {} words is not a whole number of pairs",
        words.len()
    );
    words
        .chunks_exact(WORDS_PER_VALUE as usize)
        .map(|pair| decode((pair[0], pair[1])))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    pub name: String,
    pub address: u16,
}

/// Named registers of one meter model in physical layout order.
///
/// The declared order is what maps a block read back onto names, so it must
/// follow the device's own layout.
#[derive(Debug, Clone)]
pub struct RegisterTable {
    model: String,
    registers: Vec<Register>,
}

impl RegisterTable {
    pub fn new<I, S>(model: &str, entries: I) -> Result<Self, ModbusError>
    where
        I: IntoIterator<Item = (S, u16)>,
        S: Into<String>,
    {
        let mut registers: Vec<Register> = Vec::new();
        for (name, address) in entries {
            let name = name.into();
            if registers.iter().any(|r| r.name == name) {
                return Err(ModbusError::InvalidTable(format!("duplicate register '{}'", name)));
            }
            if let Some(last) = registers.last() {
                if address <= last.address {
                    return Err(ModbusError::InvalidTable(format!(
                        "register '{}' at 0x{:04X} does not follow '{}' at 0x{:04X}",
                        name, address, last.name, last.address
                    )));
                }
            }
            registers.push(Register { name, address });
        }

        Ok(Self {
            model: model.to_string(),
            registers,
        })
    }

    /// Input register map of the DTS6619 meter.
    pub fn dts6619() -> Self {
        let registers = [
            ("line_a_voltage", 0x00),
            ("line_b_voltage", 0x02),
            ("line_c_voltage", 0x04),
            ("line_a_current", 0x08),
            ("line_b_current", 0x0A),
            ("line_c_current", 0x0C),
            ("sum_active_power", 0x10),
            ("line_a_active_power", 0x12),
            ("line_b_active_power", 0x14),
            ("line_c_active_power", 0x16),
            ("sum_reactive_power", 0x18),
            ("line_a_reactive_power", 0x1A),
            ("line_b_reactive_power", 0x1C),
            ("line_c_reactive_power", 0x1E),
            ("line_a_power_factor", 0x2A),
            ("line_b_power_factor", 0x2C),
            ("line_c_power_factor", 0x2E),
            ("frequency", 0x36),
            ("total_active_power", 0x100),
            ("total_reactive_power", 0x400),
        ]
        .into_iter()
        .map(|(name, address)| Register {
            name: name.to_string(),
            address,
        })
        .collect();

        Self {
            model: "DTS6619".to_string(),
            registers,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Register> {
        self.registers.iter()
    }

    pub fn get(&self, name: &str) -> Result<&Register, ModbusError> {
        self.registers
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| ModbusError::UnknownRegister(name.to_string()))
    }

    /// `count` consecutive table entries starting at `name`.
    pub fn window(&self, name: &str, count: usize) -> Result<&[Register], ModbusError> {
        let start = self
            .registers
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| ModbusError::UnknownRegister(name.to_string()))?;

        let available = self.registers.len() - start;
        if count > available {
            return Err(ModbusError::RegisterRangeExceeded {
                start: name.to_string(),
                requested: count,
                available,
            });
        }
        Ok(&self.registers[start..start + count])
    }
}
