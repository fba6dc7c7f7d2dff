//! The device layer's side of the receiver.
//!
//! The receiver owns framing and routing; whatever models ports and motors
//! implements [`DeviceObserver`] to learn about attach/detach, value updates
//! and feedback, and to say how wide a mode's values are. The observer runs
//! on the receiver thread: it must be quick and must not call back into the
//! command layer. User code belongs in an event handler instead.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use hubwire_frame::{Value, ValueFormat, ValueKind};
use serde::Serialize;

use crate::error::Result;

/// Receiver-side collaborator.
pub trait DeviceObserver: Send + Sync {
    /// Format of the values a port is currently reporting.
    ///
    /// `entry` is `None` for a single-mode value and `Some(i)` for the i-th
    /// entry of a combined-mode value.
    fn value_format(&self, port: u8, entry: Option<u8>) -> Option<ValueFormat>;

    /// Decode one value from the front of `buf`, returning the datasets and the
    /// bytes used (not counting the port byte that precedes a single value).
    fn decode_value(&self, format: &ValueFormat, buf: &[u8]) -> Result<(Vec<Value>, usize)> {
        Ok(hubwire_frame::decode_value(format, buf)?)
    }

    fn on_port_attached(&self, _port: u8, _device_type: u16, _hw: [u8; 4], _fw: [u8; 4]) {}

    fn on_port_detached(&self, _port: u8) {}

    fn on_pair_attached(&self, _pair: u8, _primary: u8, _secondary: u8, _device_type: u16) {}

    fn on_pair_detached(&self, _pair: u8) {}

    /// A port finished switching mode or format.
    fn on_format_changed(&self, _port: u8) {}

    fn on_output_feedback(&self, _id: u8, _status: u8) {}

    fn on_value(&self, _port: u8, _entry: Option<u8>, _values: &[Value]) {}

    fn on_alert(&self, _alert_id: u8, _value: u8) {}

    fn on_firmware_event(&self, _reason: u8, _param: u8) {}

    /// The line transport learned which mode and value type a port is in.
    fn on_mode_format(&self, _port: u8, _mode: u8, _kind: ValueKind) {}
}

/// What the registry knows about one physical port.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortState {
    pub device_type: u16,
    pub hw_revision: [u8; 4],
    pub fw_revision: [u8; 4],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<ValueFormat>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub combi_formats: Vec<ValueFormat>,
    pub format_changes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_feedback: Option<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub last_values: Vec<Value>,
}

impl PortState {
    fn attached(device_type: u16, hw_revision: [u8; 4], fw_revision: [u8; 4]) -> Self {
        Self {
            device_type,
            hw_revision,
            fw_revision,
            mode: None,
            format: None,
            combi_formats: Vec::new(),
            format_changes: 0,
            last_feedback: None,
            last_values: Vec::new(),
        }
    }
}

/// A virtual port made of two physical ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PairState {
    pub primary: u8,
    pub secondary: u8,
    pub device_type: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_feedback: Option<u8>,
}

#[derive(Debug, Default)]
struct Registry {
    ports: BTreeMap<u8, PortState>,
    pairs: BTreeMap<u8, PairState>,
    alerts: BTreeMap<u8, u8>,
}

/// Minimal observer that records attached devices, pairs and value formats.
///
/// Enough for diagnostics and tests; a full device model would replace it.
#[derive(Debug, Default)]
pub struct PortRegistry {
    inner: RwLock<Registry>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tell the registry how to decode single-mode values on `port`.
    pub fn set_value_format(&self, port: u8, mode: u8, format: ValueFormat) {
        if let Some(state) = self.write().ports.get_mut(&port) {
            state.mode = Some(mode);
            state.format = Some(format);
        }
    }

    /// Formats of each entry of the combination active on `port`.
    pub fn set_combi_formats(&self, port: u8, formats: Vec<ValueFormat>) {
        if let Some(state) = self.write().ports.get_mut(&port) {
            state.combi_formats = formats;
        }
    }

    pub fn port(&self, port: u8) -> Option<PortState> {
        self.read().ports.get(&port).cloned()
    }

    pub fn ports(&self) -> BTreeMap<u8, PortState> {
        self.read().ports.clone()
    }

    pub fn pair(&self, pair: u8) -> Option<PairState> {
        self.read().pairs.get(&pair).copied()
    }

    pub fn alert(&self, alert_id: u8) -> Option<u8> {
        self.read().alerts.get(&alert_id).copied()
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceObserver for PortRegistry {
    fn value_format(&self, port: u8, entry: Option<u8>) -> Option<ValueFormat> {
        let registry = self.read();
        let state = registry.ports.get(&port)?;
        match entry {
            None => state.format,
            Some(index) => state.combi_formats.get(index as usize).copied(),
        }
    }

    fn on_port_attached(&self, port: u8, device_type: u16, hw: [u8; 4], fw: [u8; 4]) {
        self.write()
            .ports
            .insert(port, PortState::attached(device_type, hw, fw));
    }

    fn on_port_detached(&self, port: u8) {
        self.write().ports.remove(&port);
    }

    fn on_pair_attached(&self, pair: u8, primary: u8, secondary: u8, device_type: u16) {
        self.write().pairs.insert(
            pair,
            PairState {
                primary,
                secondary,
                device_type,
                last_feedback: None,
            },
        );
    }

    fn on_pair_detached(&self, pair: u8) {
        self.write().pairs.remove(&pair);
    }

    fn on_format_changed(&self, port: u8) {
        if let Some(state) = self.write().ports.get_mut(&port) {
            state.format_changes = state.format_changes.wrapping_add(1);
        }
    }

    fn on_output_feedback(&self, id: u8, status: u8) {
        let mut registry = self.write();
        if let Some(state) = registry.ports.get_mut(&id) {
            state.last_feedback = Some(status);
        } else if let Some(pair) = registry.pairs.get_mut(&id) {
            pair.last_feedback = Some(status);
        }
    }

    fn on_value(&self, port: u8, entry: Option<u8>, values: &[Value]) {
        if let Some(state) = self.write().ports.get_mut(&port) {
            match entry {
                None | Some(0) => state.last_values = values.to_vec(),
                Some(_) => state.last_values.extend_from_slice(values),
            }
        }
    }

    fn on_alert(&self, alert_id: u8, value: u8) {
        self.write().alerts.insert(alert_id, value);
    }

    fn on_mode_format(&self, port: u8, mode: u8, kind: ValueKind) {
        self.set_value_format(port, mode, ValueFormat::single(kind));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_then_format_then_detach() {
        let registry = PortRegistry::new();
        registry.on_port_attached(1, 0x30, [1, 0, 0, 0], [2, 0, 0, 0]);
        assert_eq!(registry.value_format(1, None), None);

        registry.on_mode_format(1, 2, ValueKind::I32);
        let format = registry.value_format(1, None).unwrap();
        assert_eq!(format.kind, ValueKind::I32);
        assert_eq!(registry.port(1).unwrap().mode, Some(2));

        registry.on_port_detached(1);
        assert!(registry.port(1).is_none());
    }

    #[test]
    fn format_for_unattached_port_is_ignored() {
        let registry = PortRegistry::new();
        registry.set_value_format(3, 0, ValueFormat::single(ValueKind::I8));
        assert!(registry.value_format(3, None).is_none());
    }

    #[test]
    fn combined_entries_accumulate() {
        let registry = PortRegistry::new();
        registry.on_port_attached(0, 0x31, [0; 4], [0; 4]);
        registry.set_combi_formats(
            0,
            vec![
                ValueFormat::single(ValueKind::I8),
                ValueFormat::single(ValueKind::I32),
            ],
        );
        assert_eq!(
            registry.value_format(0, Some(1)).map(|f| f.kind),
            Some(ValueKind::I32)
        );
        assert!(registry.value_format(0, Some(2)).is_none());

        registry.on_value(0, Some(0), &[Value::Int(5)]);
        registry.on_value(0, Some(1), &[Value::Int(-90)]);
        assert_eq!(
            registry.port(0).unwrap().last_values,
            vec![Value::Int(5), Value::Int(-90)]
        );
    }

    #[test]
    fn feedback_goes_to_port_or_pair() {
        let registry = PortRegistry::new();
        registry.on_port_attached(0, 0x30, [0; 4], [0; 4]);
        registry.on_pair_attached(0x10, 0, 1, 0x30);

        registry.on_output_feedback(0, 0x0A);
        registry.on_output_feedback(0x10, 0x20);
        assert_eq!(registry.port(0).unwrap().last_feedback, Some(0x0A));
        assert_eq!(registry.pair(0x10).unwrap().last_feedback, Some(0x20));

        registry.on_pair_detached(0x10);
        assert!(registry.pair(0x10).is_none());
    }

    #[test]
    fn default_decode_uses_format_width() {
        let registry = PortRegistry::new();
        let (values, used) = registry
            .decode_value(&ValueFormat::single(ValueKind::I16), &[0x10, 0x00, 0xFF])
            .unwrap();
        assert_eq!(values, vec![Value::Int(16)]);
        assert_eq!(used, 2);
    }
}
