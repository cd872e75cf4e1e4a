//! SETTINGS ids and the `Settings` map (§3's Settings data model).

use crate::error::Http2Error;
use crate::flags::SettingsFlags;
use crate::frame::{Frame, FrameType};
use crate::types::{
    DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE,
};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use std::collections::HashMap;

/// <https://httpwg.org/specs/rfc7540.html#SettingValues>
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u16)]
pub enum SettingsParameter {
    HeaderTableSize = 0x1,
    EnablePush = 0x2,
    MaxConcurrentStreams = 0x3,
    InitialWindowSize = 0x4,
    MaxFrameSize = 0x5,
    MaxHeaderListSize = 0x6,
}

/// A SETTINGS payload: a mapping from recognized ids to their (clamped) values. Unknown ids are
/// dropped on decode per §3; values exceeding i32::MAX are clamped to it.
#[derive(Debug, Clone)]
pub struct Settings {
    values: HashMap<SettingsParameter, u32>,
}

impl Settings {
    /// The client's locally advertised defaults: push disabled, the nominal initial window, and
    /// an advisory header-list cap, matching the ordering asserted by the settings-serialization
    /// test in §8 (`HEADER_TABLE_SIZE, ENABLE_PUSH, INITIAL_WINDOW_SIZE, MAX_HEADER_LIST_SIZE`).
    pub fn local_defaults(header_table_size: u32, max_header_list_size: u32) -> Self {
        let mut values = HashMap::new();
        values.insert(SettingsParameter::HeaderTableSize, header_table_size);
        values.insert(SettingsParameter::EnablePush, 0);
        values.insert(
            SettingsParameter::InitialWindowSize,
            DEFAULT_INITIAL_WINDOW_SIZE,
        );
        values.insert(SettingsParameter::MaxHeaderListSize, max_header_list_size);
        Self { values }
    }

    /// The RFC 7540 §6.5.2 defaults assumed for the peer until its SETTINGS frame arrives.
    pub fn peer_defaults() -> Self {
        let mut values = HashMap::new();
        values.insert(
            SettingsParameter::HeaderTableSize,
            DEFAULT_HEADER_TABLE_SIZE,
        );
        values.insert(SettingsParameter::EnablePush, 1);
        values.insert(SettingsParameter::MaxConcurrentStreams, u32::MAX);
        values.insert(
            SettingsParameter::InitialWindowSize,
            DEFAULT_INITIAL_WINDOW_SIZE,
        );
        values.insert(SettingsParameter::MaxFrameSize, DEFAULT_MAX_FRAME_SIZE);
        values.insert(SettingsParameter::MaxHeaderListSize, u32::MAX);
        Self { values }
    }

    pub fn get(&self, param: SettingsParameter) -> Option<u32> {
        self.values.get(&param).copied()
    }

    pub fn set(&mut self, param: SettingsParameter, value: u32) {
        self.values.insert(param, value);
    }

    pub fn header_table_size(&self) -> u32 {
        self.get(SettingsParameter::HeaderTableSize)
            .unwrap_or(DEFAULT_HEADER_TABLE_SIZE)
    }

    pub fn initial_window_size(&self) -> u32 {
        self.get(SettingsParameter::InitialWindowSize)
            .unwrap_or(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    pub fn max_frame_size(&self) -> u32 {
        self.get(SettingsParameter::MaxFrameSize)
            .unwrap_or(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Iterates `(id, value)` pairs in a stable order matching insertion of
    /// [`Settings::local_defaults`], which the settings-serialization test in §8 depends on.
    pub fn iter_in_order(&self) -> impl Iterator<Item = (SettingsParameter, u32)> + '_ {
        const ORDER: [SettingsParameter; 6] = [
            SettingsParameter::HeaderTableSize,
            SettingsParameter::EnablePush,
            SettingsParameter::MaxConcurrentStreams,
            SettingsParameter::InitialWindowSize,
            SettingsParameter::MaxFrameSize,
            SettingsParameter::MaxHeaderListSize,
        ];
        ORDER
            .into_iter()
            .filter_map(move |param| self.values.get(&param).map(|v| (param, *v)))
    }

    /// Encodes this settings map as a SETTINGS frame (non-ACK), values clamped to i32::MAX per
    /// §3.
    pub fn to_frame(&self) -> Frame {
        let mut payload = Vec::with_capacity(self.values.len() * 6);
        for (param, value) in self.iter_in_order() {
            let clamped = value.min(i32::MAX as u32);
            payload.extend_from_slice(&(param.to_u16().unwrap()).to_be_bytes());
            payload.extend_from_slice(&clamped.to_be_bytes());
        }
        Frame::new(FrameType::Settings, 0, 0, payload)
    }

    /// Decodes a SETTINGS frame's payload, ignoring unknown ids and clamping values that exceed
    /// i32::MAX.
    pub fn from_frame_payload(payload: &[u8]) -> Result<Self, Http2Error> {
        if payload.len() % 6 != 0 {
            return Err(Http2Error::PayloadTooShort);
        }
        let mut values = HashMap::with_capacity(payload.len() / 6);
        for chunk in payload.chunks_exact(6) {
            let id = u16::from_be_bytes([chunk[0], chunk[1]]);
            if let Some(param) = SettingsParameter::from_u16(id) {
                let value = u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);
                values.insert(param, value.min(i32::MAX as u32));
            }
        }
        Ok(Self { values })
    }

    pub fn ack_frame() -> Frame {
        Frame::new(FrameType::Settings, SettingsFlags::ACK.bits(), 0, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_local_defaults_in_the_spec_order() {
        let settings = Settings::local_defaults(4096, 65536);
        let frame = settings.to_frame();
        assert_eq!(frame.payload.len(), 24);

        let entries: Vec<(u16, u32)> = frame
            .payload
            .chunks_exact(6)
            .map(|c| {
                (
                    u16::from_be_bytes([c[0], c[1]]),
                    u32::from_be_bytes([c[2], c[3], c[4], c[5]]),
                )
            })
            .collect();
        assert_eq!(
            entries,
            vec![
                (SettingsParameter::HeaderTableSize as u16, 4096),
                (SettingsParameter::EnablePush as u16, 0),
                (SettingsParameter::InitialWindowSize as u16, 65535),
                (SettingsParameter::MaxHeaderListSize as u16, 65536),
            ]
        );
    }

    #[test]
    fn unknown_ids_are_ignored_on_decode() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&99u16.to_be_bytes());
        payload.extend_from_slice(&1234u32.to_be_bytes());
        payload.extend_from_slice(&(SettingsParameter::MaxFrameSize as u16).to_be_bytes());
        payload.extend_from_slice(&32_768u32.to_be_bytes());

        let settings = Settings::from_frame_payload(&payload).unwrap();
        assert_eq!(settings.max_frame_size(), 32_768);
    }

    #[test]
    fn values_above_i32_max_are_clamped() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(SettingsParameter::InitialWindowSize as u16).to_be_bytes());
        payload.extend_from_slice(&u32::MAX.to_be_bytes());

        let settings = Settings::from_frame_payload(&payload).unwrap();
        assert_eq!(settings.initial_window_size(), i32::MAX as u32);
    }
}
