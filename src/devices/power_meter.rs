use log::{debug, info};
use serde_json::{Map, Value};
use std::sync::Arc;

use super::registers::{self, RegisterTable, WORDS_PER_VALUE};
use crate::modbus::{FunctionCode, RegisterTransport};
use crate::utils::error::ModbusError;

/// Register values of one acquisition, in the order they were read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reading {
    values: Vec<(String, f32)>,
}

impl Reading {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f32) {
        let name = name.into();
        match self.values.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => self.values.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.values
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| *value)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn extend(&mut self, other: Reading) {
        for (name, value) in other.values {
            self.insert(name, value);
        }
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .values
            .iter()
            .map(|(name, value)| (name.clone(), Value::from(*value as f64)))
            .collect();
        Value::Object(map)
    }
}

/// Typed reads against one meter on the bus.
///
/// Each call is exactly one transaction; retrying is left to the caller.
pub struct PowerMeter {
    slave_id: u8,
    table: RegisterTable,
    // Contiguous register runs fetched by `read_all`, as (first register, count)
    blocks: Vec<(String, usize)>,
    transport: Arc<dyn RegisterTransport>,
}

impl PowerMeter {
    pub fn new(slave_id: u8, table: RegisterTable, transport: Arc<dyn RegisterTransport>) -> Self {
        Self {
            slave_id,
            table,
            blocks: Vec::new(),
            transport,
        }
    }

    /// DTS6619 meter read as its contiguous register runs.
    pub fn dts6619(slave_id: u8, transport: Arc<dyn RegisterTransport>) -> Self {
        Self::new(slave_id, RegisterTable::dts6619(), transport).with_blocks([
            ("line_a_voltage", 3),
            ("line_a_current", 3),
            ("sum_active_power", 8),
            ("line_a_power_factor", 3),
            ("frequency", 1),
            ("total_active_power", 1),
            ("total_reactive_power", 1),
        ])
    }

    pub fn with_blocks<I, S>(mut self, blocks: I) -> Self
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        self.blocks = blocks.into_iter().map(|(name, count)| (name.into(), count)).collect();
        self
    }

    pub fn slave_id(&self) -> u8 {
        self.slave_id
    }

    pub fn table(&self) -> &RegisterTable {
        &self.table
    }

    pub async fn read(&self, register_name: &str) -> Result<f32, ModbusError> {
        let register = self.table.get(register_name)?;
        info!("📡 Reading {} from register 0x{:04X}", register_name, register.address);

        let words = self.execute(register.address, 1).await?;
        Ok(registers::decode((words[0], words[1])))
    }

    /// Reads `count` values starting at `start_register`.
    ///
    /// Names are assigned by walking the table from the start entry, not by
    /// address arithmetic: the device returns the block in its physical
    /// layout, which the table order mirrors.
    pub async fn read_multiple(&self, start_register: &str, count: usize) -> Result<Reading, ModbusError> {
        let window = self.table.window(start_register, count)?;
        let start_address = window.first().map(|r| r.address).unwrap_or_default();
        info!(
            "📡 Reading {} registers starting from {} (0x{:04X})",
            count, start_register, start_address
        );

        let words = self.execute(start_address, count).await?;
        let mut reading = Reading::new();
        for (register, value) in window.iter().zip(registers::decode_words(&words)) {
            reading.insert(register.name.clone(), value);
        }
        Ok(reading)
    }

    /// Every configured block, all-or-nothing.
    pub async fn read_all(&self) -> Result<Reading, ModbusError> {
        let mut reading = Reading::new();
        for (start, count) in &self.blocks {
            if *count == 1 {
                let value = self.read(start).await?;
                reading.insert(start.clone(), value);
            } else {
                reading.extend(self.read_multiple(start, *count).await?);
            }
        }
        debug!("📊 Meter {} returned {} values", self.slave_id, reading.len());
        Ok(reading)
    }

    async fn execute(&self, address: u16, values: usize) -> Result<Vec<u16>, ModbusError> {
        let word_count = values * WORDS_PER_VALUE as usize;
        let requested = u16::try_from(word_count).map_err(|_| {
            ModbusError::InvalidResponse(format!("{} registers exceed a single request", word_count))
        })?;

        let words = self
            .transport
            .execute(self.slave_id, FunctionCode::ReadInputRegisters, address, requested)
            .await?;

        if words.len() != word_count {
            return Err(ModbusError::InvalidResponse(format!(
                "expected {} registers, got {}",
                word_count,
                words.len()
            )));
        }
        Ok(words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves float values laid out at their register addresses.
    struct FakeMeter {
        values: HashMap<u16, f32>,
        calls: Mutex<Vec<(u8, FunctionCode, u16, u16)>>,
    }

    impl FakeMeter {
        fn new(values: &[(u16, f32)]) -> Arc<Self> {
            Arc::new(Self {
                values: values.iter().copied().collect(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(u8, FunctionCode, u16, u16)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RegisterTransport for FakeMeter {
        async fn execute(
            &self,
            slave_id: u8,
            function: FunctionCode,
            start_register: u16,
            word_count: u16,
        ) -> Result<Vec<u16>, ModbusError> {
            self.calls.lock().unwrap().push((slave_id, function, start_register, word_count));
            // Block reads return consecutive pairs regardless of table gaps
            let mut words = Vec::new();
            for offset in (0..word_count).step_by(2) {
                let value = self.values.get(&(start_register + offset)).copied().unwrap_or(0.0);
                let (high, low) = registers::encode(value);
                words.push(high);
                words.push(low);
            }
            Ok(words)
        }
    }

    fn abc_table() -> RegisterTable {
        RegisterTable::new("test", [("A", 0x00), ("B", 0x02), ("C", 0x04)]).unwrap()
    }

    #[tokio::test]
    async fn read_issues_one_two_word_transaction() {
        let fake = FakeMeter::new(&[(0x02, 230.5)]);
        let meter = PowerMeter::new(51, abc_table(), fake.clone());

        assert_eq!(meter.read("B").await.unwrap(), 230.5);
        assert_eq!(fake.calls(), vec![(51, FunctionCode::ReadInputRegisters, 0x02, 2)]);
    }

    #[tokio::test]
    async fn unknown_register_skips_the_bus() {
        let fake = FakeMeter::new(&[]);
        let meter = PowerMeter::new(1, abc_table(), fake.clone());

        assert!(matches!(meter.read("Z").await, Err(ModbusError::UnknownRegister(_))));
        assert!(matches!(
            meter.read_multiple("Z", 1).await,
            Err(ModbusError::UnknownRegister(_))
        ));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn read_multiple_maps_names_in_table_order() {
        let fake = FakeMeter::new(&[(0x00, 1.0), (0x02, 2.0), (0x04, 3.0)]);
        let meter = PowerMeter::new(1, abc_table(), fake.clone());

        let reading = meter.read_multiple("A", 3).await.unwrap();
        assert_eq!(reading.names().collect::<Vec<_>>(), vec!["A", "B", "C"]);
        assert_eq!(reading.get("C"), Some(3.0));
        assert_eq!(fake.calls(), vec![(1, FunctionCode::ReadInputRegisters, 0x00, 6)]);
    }

    #[tokio::test]
    async fn read_multiple_ignores_address_gaps() {
        // The wire block is contiguous; names follow the table, not addresses
        let table = RegisterTable::new("gappy", [("A", 0x00), ("B", 0x10), ("C", 0x80)]).unwrap();
        let fake = FakeMeter::new(&[(0x00, 1.0), (0x02, 2.0), (0x04, 3.0)]);
        let meter = PowerMeter::new(1, table, fake);

        let reading = meter.read_multiple("A", 3).await.unwrap();
        assert_eq!(reading.names().collect::<Vec<_>>(), vec!["A", "B", "C"]);
        assert_eq!(reading.get("B"), Some(2.0));
    }

    #[tokio::test]
    async fn read_multiple_starts_from_matched_entry() {
        let fake = FakeMeter::new(&[(0x02, 2.0), (0x04, 3.0)]);
        let meter = PowerMeter::new(1, abc_table(), fake.clone());

        let reading = meter.read_multiple("B", 2).await.unwrap();
        assert_eq!(reading.names().collect::<Vec<_>>(), vec!["B", "C"]);
        assert_eq!(fake.calls()[0].2, 0x02);
    }

    #[tokio::test]
    async fn dts6619_read_all_covers_every_register() {
        let fake = FakeMeter::new(&[(0x00, 231.0), (0x36, 50.0), (0x100, 1200.0)]);
        let meter = PowerMeter::dts6619(1, fake.clone());

        let reading = meter.read_all().await.unwrap();
        assert_eq!(reading.len(), RegisterTable::dts6619().len());
        assert_eq!(reading.get("line_a_voltage"), Some(231.0));
        assert_eq!(reading.get("frequency"), Some(50.0));
        assert_eq!(reading.get("total_active_power"), Some(1200.0));
        assert_eq!(fake.calls().len(), 7);
    }

    #[tokio::test]
    async fn short_reply_is_an_error_not_a_panic() {
        struct Truncating;

        #[async_trait]
        impl RegisterTransport for Truncating {
            async fn execute(
                &self,
                _slave_id: u8,
                _function: FunctionCode,
                _start_register: u16,
                _word_count: u16,
            ) -> Result<Vec<u16>, ModbusError> {
                Ok(vec![0x4248])
            }
        }

        let meter = PowerMeter::new(1, abc_table(), Arc::new(Truncating));
        assert!(matches!(meter.read("A").await, Err(ModbusError::InvalidResponse(_))));
    }
}
