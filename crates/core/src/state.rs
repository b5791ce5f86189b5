//! SysEx patch memory mirror.
//!
//! Holds a copy of every dump the device has sent or been sent, so editors
//! can be answered without waking the firmware. Requests that miss the
//! cache and every accepted write are queued for the device; messages that
//! came from the device are never echoed back to it.

use tracing::{debug, info, warn};

use crate::error::DumpError;
use crate::midi::{split_multiple_sysex, MidiBufferParser, MidiEvent};
use crate::sysex::{
    self, buffer, header, multi, GlobalParameter, SysexCommand, IDX_BUFFER, IDX_COMMAND,
    IDX_ID_MICROQ, IDX_ID_WALDORF, IDX_LOCATION, ID_MICROQ, ID_WALDORF, MIN_SYSEX_LEN,
};

pub type SysEx = Vec<u8>;
pub type Responses = Vec<SysEx>;

/// Who sent a message into [`State::receive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The emulated device itself (its MIDI output).
    Device,
    /// A host, editor or saved state.
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DumpType {
    Single,
    Multi,
    Drum,
    Global,
    Mode,
}

/// Layout of one dump type and its parameter messages.
#[derive(Debug, Clone, Copy)]
pub struct Dump {
    pub dump_type: DumpType,
    pub cmd_request: SysexCommand,
    pub cmd_dump: SysexCommand,
    pub cmd_param_change: SysexCommand,
    pub cmd_param_request: SysexCommand,
    /// Index of the first payload byte inside a dump.
    pub first_param_index: usize,
    /// Positions of the parameter index bytes and value inside a
    /// parameter change message.
    pub idx_param_index_h: usize,
    pub idx_param_index_l: usize,
    pub idx_param_value: usize,
    /// Total dump length including F0 and F7.
    pub dump_size: usize,
}

impl Dump {
    pub const fn has_address(&self) -> bool {
        self.first_param_index > IDX_BUFFER
    }

    pub const fn payload_len(&self) -> usize {
        self.dump_size - self.first_param_index - 2
    }
}

pub static DUMPS: [Dump; 5] = [
    Dump {
        dump_type: DumpType::Single,
        cmd_request: SysexCommand::SingleRequest,
        cmd_dump: SysexCommand::SingleDump,
        cmd_param_change: SysexCommand::SingleParameterChange,
        cmd_param_request: SysexCommand::SingleParameterRequest,
        first_param_index: 7,
        idx_param_index_h: 6,
        idx_param_index_l: 7,
        idx_param_value: 8,
        dump_size: 392,
    },
    Dump {
        dump_type: DumpType::Multi,
        cmd_request: SysexCommand::MultiRequest,
        cmd_dump: SysexCommand::MultiDump,
        cmd_param_change: SysexCommand::MultiParameterChange,
        cmd_param_request: SysexCommand::MultiParameterRequest,
        first_param_index: 7,
        idx_param_index_h: 5,
        idx_param_index_l: 6,
        idx_param_value: 7,
        dump_size: 393,
    },
    Dump {
        dump_type: DumpType::Drum,
        cmd_request: SysexCommand::DrumRequest,
        cmd_dump: SysexCommand::DrumDump,
        cmd_param_change: SysexCommand::DrumParameterChange,
        cmd_param_request: SysexCommand::DrumParameterRequest,
        first_param_index: 7,
        idx_param_index_h: 5,
        idx_param_index_l: 6,
        idx_param_value: 7,
        dump_size: 393,
    },
    Dump {
        dump_type: DumpType::Global,
        cmd_request: SysexCommand::GlobalRequest,
        cmd_dump: SysexCommand::GlobalDump,
        cmd_param_change: SysexCommand::GlobalParameterChange,
        cmd_param_request: SysexCommand::GlobalParameterRequest,
        first_param_index: 5,
        idx_param_index_h: 5,
        idx_param_index_l: 6,
        idx_param_value: 7,
        dump_size: 207,
    },
    Dump {
        dump_type: DumpType::Mode,
        cmd_request: SysexCommand::ModeRequest,
        cmd_dump: SysexCommand::ModeDump,
        cmd_param_change: SysexCommand::ModeParameterChange,
        cmd_param_request: SysexCommand::ModeParameterRequest,
        first_param_index: 5,
        idx_param_index_h: 5,
        idx_param_index_l: 6,
        idx_param_value: 7,
        dump_size: 8,
    },
];

impl DumpType {
    pub fn dump(self) -> &'static Dump {
        &DUMPS[self as usize]
    }
}

pub const ROM_SINGLE_BANKS: usize = 3;
pub const ROM_SINGLES_PER_BANK: usize = 100;
pub const ROM_MULTIS: usize = 100;
pub const ROM_DRUM_MAPS: usize = 20;
pub const INSTRUMENT_SINGLES: usize = 4;
pub const MULTI_SINGLES: usize = 16;
pub const DRUM_SINGLES: usize = 32;

/// Audio frames the device runs between polls while waiting for the
/// global dump during [`State::create_init_state`].
const INIT_STATE_FRAMES: usize = 8;
const INIT_STATE_POLL_LIMIT: usize = 1 << 16;

pub const SEQUENCER_MULTI_NAME: &[u8; 16] = b"Emu-Plugin-Multi";

/// The orchestrator as seen from the state machine.
pub trait DeviceLink {
    fn send_sysex(&mut self, data: &[u8]);
    /// Run the device for `frames` audio frames.
    fn process(&mut self, frames: usize);
    /// Append the device's MIDI output.
    fn receive_midi(&mut self, out: &mut Vec<u8>);
}

pub struct State {
    rom_singles: Vec<SysEx>,
    rom_multis: Vec<SysEx>,
    rom_drums: Vec<SysEx>,
    instrument_singles: Vec<SysEx>,
    multi_singles: Vec<SysEx>,
    drum_singles: Vec<SysEx>,
    current_multi: SysEx,
    current_drum: SysEx,
    global: SysEx,
    mode: SysEx,
    sender: Origin,
    to_device: Vec<SysEx>,
}

fn empty(ty: DumpType, count: usize) -> Vec<SysEx> {
    vec![vec![0; ty.dump().dump_size]; count]
}

fn is_valid(ty: DumpType, dump: &[u8]) -> bool {
    match ty {
        DumpType::Global => dump.last() == Some(&0xF7),
        _ => dump.first() == Some(&0xF0),
    }
}

/// Validate framing and header, returning the command.
pub fn parse_command(data: &[u8]) -> Result<SysexCommand, DumpError> {
    if data.len() < MIN_SYSEX_LEN {
        return Err(DumpError::TooShort(data.len()));
    }
    if data.first() != Some(&0xF0) || data.last() != Some(&0xF7) {
        return Err(DumpError::BadFraming);
    }
    if data[IDX_ID_WALDORF] != ID_WALDORF || data[IDX_ID_MICROQ] != ID_MICROQ {
        return Err(DumpError::WrongHeader);
    }
    SysexCommand::from_u8(data[IDX_COMMAND]).ok_or(DumpError::UnknownCommand(data[IDX_COMMAND]))
}

fn address(data: &[u8]) -> Result<(u8, u8), DumpError> {
    match (data.get(IDX_BUFFER), data.get(IDX_LOCATION)) {
        (Some(&b), Some(&l)) if data.len() > IDX_LOCATION + 1 => Ok((b, l)),
        _ => Err(DumpError::TooShort(data.len())),
    }
}

/// Build a complete dump around `payload`, padded or cut to the dump size,
/// with a valid checksum.
pub fn create_dump(ty: DumpType, buffer: u8, location: u8, payload: &[u8]) -> SysEx {
    let d = ty.dump();
    let mut out = header(d.cmd_dump);
    if d.has_address() {
        out.push(buffer);
        out.push(location);
    }
    let n = payload.len().min(d.payload_len());
    out.extend_from_slice(&payload[..n]);
    out.resize(d.first_param_index + d.payload_len(), 0);
    out.push(0);
    out.push(0xF7);
    sysex::update_checksum(&mut out);
    out
}

/// Copy a valid dump to `out`, optionally readdressed, with a fresh checksum.
fn append(out: &mut Vec<u8>, ty: DumpType, dump: &[u8], address: Option<(u8, u8)>) {
    if !is_valid(ty, dump) {
        return;
    }
    let start = out.len();
    out.extend_from_slice(dump);
    if let Some((b, l)) = address {
        out[start + IDX_BUFFER] = b;
        out[start + IDX_LOCATION] = l;
    }
    sysex::update_checksum(&mut out[start..]);
}

fn request(ty: DumpType, address: Option<(u8, u8)>) -> SysEx {
    let mut out = header(ty.dump().cmd_request);
    if let Some((b, l)) = address {
        out.push(b);
        out.push(l);
    }
    out.push(0xF7);
    out
}

impl State {
    pub fn new() -> Self {
        Self {
            rom_singles: empty(DumpType::Single, ROM_SINGLE_BANKS * ROM_SINGLES_PER_BANK),
            rom_multis: empty(DumpType::Multi, ROM_MULTIS),
            rom_drums: empty(DumpType::Drum, ROM_DRUM_MAPS),
            instrument_singles: empty(DumpType::Single, INSTRUMENT_SINGLES),
            multi_singles: empty(DumpType::Single, MULTI_SINGLES),
            drum_singles: empty(DumpType::Single, DRUM_SINGLES),
            current_multi: vec![0; DumpType::Multi.dump().dump_size],
            current_drum: vec![0; DumpType::Drum.dump().dump_size],
            global: vec![0; DumpType::Global.dump().dump_size],
            mode: vec![0; DumpType::Mode.dump().dump_size],
            sender: Origin::External,
            to_device: Vec::new(),
        }
    }

    /// Messages queued for the device since the last call.
    pub fn take_device_messages(&mut self) -> Vec<SysEx> {
        std::mem::take(&mut self.to_device)
    }

    pub fn receive_event(&mut self, responses: &mut Responses, ev: &MidiEvent, origin: Origin) -> bool {
        match ev.sysex() {
            Some(s) => self.receive(responses, s, origin),
            None => false,
        }
    }

    /// Returns true if the message was handled. Unhandled messages should be
    /// passed on to the device by the caller.
    pub fn receive(&mut self, responses: &mut Responses, data: &[u8], origin: Origin) -> bool {
        let cmd = match parse_command(data) {
            Ok(cmd) => cmd,
            Err(e) => {
                debug!(error = %e, "ignoring sysex");
                return false;
            }
        };

        self.sender = origin;

        use SysexCommand::*;
        let result = match cmd {
            SingleRequest => self.get_dump(DumpType::Single, responses, data),
            MultiRequest => self.get_dump(DumpType::Multi, responses, data),
            DrumRequest => self.get_dump(DumpType::Drum, responses, data),
            GlobalRequest => self.get_dump(DumpType::Global, responses, data),
            ModeRequest => self.get_dump(DumpType::Mode, responses, data),

            SingleDump => self.parse_dump(DumpType::Single, data),
            MultiDump => self.parse_dump(DumpType::Multi, data),
            DrumDump => self.parse_dump(DumpType::Drum, data),
            GlobalDump => self.parse_dump(DumpType::Global, data),
            ModeDump => self.parse_dump(DumpType::Mode, data),

            SingleParameterChange => self.modify_dump(DumpType::Single, data),
            MultiParameterChange => self.modify_dump(DumpType::Multi, data),
            DrumParameterChange => self.modify_dump(DumpType::Drum, data),
            GlobalParameterChange => self.modify_dump(DumpType::Global, data),
            ModeParameterChange => self.modify_dump(DumpType::Mode, data),

            SingleParameterRequest => self.parameter_request(DumpType::Single, responses, data),
            MultiParameterRequest => self.parameter_request(DumpType::Multi, responses, data),
            DrumParameterRequest => self.parameter_request(DumpType::Drum, responses, data),
            GlobalParameterRequest => self.parameter_request(DumpType::Global, responses, data),
            ModeParameterRequest => self.parameter_request(DumpType::Mode, responses, data),

            EmuLcd | EmuLeds | EmuButtons | EmuRotaries | EmuLcdCgRam => Ok(false),
        };

        match result {
            Ok(handled) => handled,
            Err(e) => {
                debug!(?cmd, error = %e, "sysex rejected");
                false
            }
        }
    }

    fn get_dump(&mut self, ty: DumpType, responses: &mut Responses, data: &[u8]) -> Result<bool, DumpError> {
        let addr = if ty.dump().has_address() {
            Some(address(data)?)
        } else {
            None
        };

        let cached = self
            .dump_slot(ty, addr)
            .filter(|d| is_valid(ty, d))
            .cloned();

        match cached {
            Some(mut dump) => {
                if let Some((b, l)) = addr {
                    dump[IDX_BUFFER] = b;
                    dump[IDX_LOCATION] = l;
                }
                sysex::update_checksum(&mut dump);
                responses.push(dump);
            }
            None => {
                debug!(?ty, ?addr, "dump not cached, asking the device");
                self.forward_to_device(data);
            }
        }
        Ok(true)
    }

    fn parse_dump(&mut self, ty: DumpType, data: &[u8]) -> Result<bool, DumpError> {
        let d = ty.dump();
        if data.len() != d.dump_size {
            return Err(DumpError::WrongSize {
                expected: d.dump_size,
                actual: data.len(),
            });
        }

        let expected = sysex::checksum(data);
        let actual = data[data.len() - 2];
        if expected != actual {
            warn!(?ty, expected, actual, "dump checksum mismatch, accepting anyway");
        }

        let addr = if d.has_address() {
            Some(address(data)?)
        } else {
            None
        };

        let slot = self.dump_slot(ty, addr).ok_or_else(|| {
            let (buffer, location) = addr.unwrap_or((0, 0));
            DumpError::UnknownAddress { buffer, location }
        })?;
        slot.clear();
        slot.extend_from_slice(data);

        self.forward_to_device(data);
        Ok(true)
    }

    fn modify_dump(&mut self, ty: DumpType, data: &[u8]) -> Result<bool, DumpError> {
        let d = ty.dump();
        let value = *data
            .get(d.idx_param_value)
            .filter(|_| d.idx_param_value < data.len() - 1)
            .ok_or(DumpError::TooShort(data.len()))?;

        let (slot, index) = self.parameter_slot(ty, data)?;
        let previous = slot[index];
        slot[index] = value;
        sysex::update_checksum(slot);

        self.forward_to_device(data);

        if ty == DumpType::Global
            && index == d.first_param_index + GlobalParameter::SingleMultiMode as usize
            && previous != value
        {
            self.on_play_mode_changed(value != 0);
        }
        Ok(true)
    }

    fn parameter_request(&mut self, ty: DumpType, responses: &mut Responses, data: &[u8]) -> Result<bool, DumpError> {
        let d = ty.dump();
        let (slot, index) = self.parameter_slot(ty, data)?;
        if !is_valid(ty, slot) {
            return Ok(false);
        }
        let value = slot[index];

        let mut response = data[..=d.idx_param_index_l].to_vec();
        response[IDX_COMMAND] = d.cmd_param_change as u8;
        response.push(value);
        response.push(0xF7);
        responses.push(response);
        Ok(true)
    }

    /// Locate the dump and byte addressed by a parameter message.
    fn parameter_slot(&mut self, ty: DumpType, data: &[u8]) -> Result<(&mut SysEx, usize), DumpError> {
        let d = ty.dump();
        let h = *data.get(d.idx_param_index_h).ok_or(DumpError::TooShort(data.len()))?;
        let l = *data.get(d.idx_param_index_l).ok_or(DumpError::TooShort(data.len()))?;
        if d.idx_param_index_l >= data.len() - 1 {
            return Err(DumpError::TooShort(data.len()));
        }

        let index = d.first_param_index + ((usize::from(h) << 7) | usize::from(l));
        if index >= d.first_param_index + d.payload_len() {
            return Err(DumpError::BadParameter(index));
        }

        let addr = match ty {
            // single parameter messages carry the edit buffer location first
            DumpType::Single => Some((buffer::SINGLE_EDIT_BUFFER_MULTI_MODE, data[IDX_BUFFER])),
            DumpType::Multi => Some((buffer::MULTI_EDIT_BUFFER, 0)),
            DumpType::Drum => Some((buffer::DRUM_EDIT_BUFFER, 0)),
            DumpType::Global | DumpType::Mode => None,
        };

        let slot = self.dump_slot(ty, addr).ok_or_else(|| {
            let (buffer, location) = addr.unwrap_or((0, 0));
            DumpError::UnknownAddress { buffer, location }
        })?;
        Ok((slot, index))
    }

    fn dump_slot(&mut self, ty: DumpType, addr: Option<(u8, u8)>) -> Option<&mut SysEx> {
        match ty {
            DumpType::Global => Some(&mut self.global),
            DumpType::Mode => Some(&mut self.mode),
            DumpType::Single => {
                let (b, l) = addr?;
                self.single_mut(b, l)
            }
            DumpType::Multi => {
                let (b, l) = addr?;
                self.multi_mut(b, l)
            }
            DumpType::Drum => {
                let (b, l) = addr?;
                self.drum_mut(b, l)
            }
        }
    }

    fn single_mut(&mut self, buf: u8, loc: u8) -> Option<&mut SysEx> {
        let loc = usize::from(loc);
        let rom = |bank: usize| (loc < ROM_SINGLES_PER_BANK).then(|| bank * ROM_SINGLES_PER_BANK + loc);

        match buf {
            buffer::SINGLE_BANK_A | buffer::DEPRECATED_SINGLE_BANK_A => {
                rom(0).map(|i| &mut self.rom_singles[i])
            }
            buffer::SINGLE_BANK_B | buffer::DEPRECATED_SINGLE_BANK_B => {
                rom(1).map(|i| &mut self.rom_singles[i])
            }
            buffer::SINGLE_BANK_C | buffer::DEPRECATED_SINGLE_BANK_C => {
                rom(2).map(|i| &mut self.rom_singles[i])
            }
            // no card slot on this model
            buffer::SINGLE_BANK_X | buffer::DEPRECATED_SINGLE_BANK_X => None,
            buffer::SINGLE_EDIT_BUFFER_SINGLE_MODE => {
                let selected = usize::from(self.global_parameter(GlobalParameter::InstrumentSelection));
                self.instrument_singles.get_mut(selected)
            }
            buffer::SINGLE_EDIT_BUFFER_MULTI_MODE => {
                let first = usize::from(buffer::LOCATION_FIRST_DRUM_INSTRUMENT);
                let last = usize::from(buffer::LOCATION_LAST_DRUM_INSTRUMENT);
                if (first..=last).contains(&loc) {
                    return self.drum_singles.get_mut(loc - first);
                }
                if self.is_multi_mode() {
                    self.multi_singles.get_mut(loc)
                } else {
                    self.instrument_singles.get_mut(loc)
                }
            }
            _ => None,
        }
    }

    fn multi_mut(&mut self, buf: u8, loc: u8) -> Option<&mut SysEx> {
        match buf {
            buffer::MULTI_EDIT_BUFFER => Some(&mut self.current_multi),
            buffer::MULTI_BANK_INTERNAL | buffer::DEPRECATED_MULTI_BANK_INTERNAL => {
                self.rom_multis.get_mut(usize::from(loc))
            }
            _ => None,
        }
    }

    fn drum_mut(&mut self, buf: u8, loc: u8) -> Option<&mut SysEx> {
        match buf {
            buffer::DRUM_EDIT_BUFFER => Some(&mut self.current_drum),
            buffer::DRUM_BANK_INTERNAL | buffer::DEPRECATED_DRUM_BANK_INTERNAL => {
                self.rom_drums.get_mut(usize::from(loc))
            }
            _ => None,
        }
    }

    pub fn global_parameter(&self, p: GlobalParameter) -> u8 {
        self.global[DumpType::Global.dump().first_param_index + p as usize]
    }

    fn set_global_parameter(&mut self, p: GlobalParameter, value: u8) {
        self.global[DumpType::Global.dump().first_param_index + p as usize] = value;
        sysex::update_checksum(&mut self.global);
    }

    pub fn is_multi_mode(&self) -> bool {
        self.global_parameter(GlobalParameter::SingleMultiMode) != 0
    }

    pub fn is_global_valid(&self) -> bool {
        is_valid(DumpType::Global, &self.global)
    }

    /// The device shares one edit buffer between the first single of
    /// single mode and the first part of multi mode. Drop both cached
    /// copies and fetch the one that is live now.
    fn on_play_mode_changed(&mut self, multi_mode: bool) {
        self.instrument_singles[0][0] = 0;
        self.multi_singles[0][0] = 0;
        if multi_mode {
            self.current_multi[0] = 0;
        }

        let buf = if multi_mode {
            buffer::SINGLE_EDIT_BUFFER_MULTI_MODE
        } else {
            buffer::SINGLE_EDIT_BUFFER_SINGLE_MODE
        };
        debug!(multi_mode, "play mode changed, re-requesting edit buffer");
        self.to_device.push(request(DumpType::Single, Some((buf, 0))));
    }

    fn forward_to_device(&mut self, data: &[u8]) {
        if self.sender != Origin::External {
            return;
        }
        self.to_device.push(data.to_vec());
    }

    fn send_global_parameter(&mut self, p: GlobalParameter, value: u8) {
        self.set_global_parameter(p, value);
        let index = p as u8;
        let mut msg = header(SysexCommand::GlobalParameterChange);
        msg.extend_from_slice(&[index >> 7, index & 0x7F, value, 0xF7]);
        self.to_device.push(msg);
    }

    fn flush_to<L: DeviceLink>(&mut self, link: &mut L) {
        for msg in self.take_device_messages() {
            link.send_sysex(&msg);
        }
    }

    /// Request the global dump, run the device until it has answered, then
    /// push the default global setup. `preset` may hold concatenated SysEx
    /// (a default multi or a saved state) that is loaded afterwards.
    ///
    /// Returns false if the device never answered.
    pub fn create_init_state<L: DeviceLink>(&mut self, link: &mut L, preset: Option<&[u8]>) -> bool {
        self.to_device.push(request(DumpType::Global, None));

        let mut parser = MidiBufferParser::new();
        let mut midi = Vec::new();
        let mut events = Vec::new();
        let mut unused = Responses::new();
        let mut polls = 0;

        while !self.is_global_valid() {
            if polls == INIT_STATE_POLL_LIMIT {
                warn!("device did not answer the global request");
                return false;
            }
            polls += 1;

            self.flush_to(link);
            link.process(INIT_STATE_FRAMES);

            midi.clear();
            link.receive_midi(&mut midi);
            parser.write(&midi);

            events.clear();
            parser.get_events(&mut events);
            for ev in &events {
                if let Some(s) = ev.sysex() {
                    self.receive(&mut unused, s, Origin::Device);
                }
            }
        }

        use GlobalParameter::*;
        for (param, value) in [
            (InstrumentSelection, 0),
            (SingleMultiMode, 0),
            (MultiNumber, 0),
            (InstrumentABankNumber, 0),
            (InstrumentASingleNumber, 0),
            (Tuning, 64),
            (Transpose, 64),
            (ControllerSend, 2),
            (ControllerReceive, 1),
            (ArpSend, 0),
            (Clock, 0),
            (MidiChannel, 0),
            (SysExDeviceId, 0),
            (LocalControl, 1),
            (InputGain, 3),
        ] {
            self.send_global_parameter(param, value);
        }

        if let Some(preset) = preset {
            self.load_state(preset);
        }

        self.flush_to(link);
        info!(polls, "initial state created");
        true
    }

    /// Feed concatenated SysEx through [`State::receive`] as external input.
    pub fn load_state(&mut self, data: &[u8]) -> bool {
        let messages = split_multiple_sysex(data);
        if messages.is_empty() {
            return false;
        }
        let mut nop = Responses::new();
        for m in &messages {
            self.receive(&mut nop, m, Origin::External);
        }
        true
    }

    pub fn set_state(&mut self, data: &[u8]) -> bool {
        self.load_state(data)
    }

    /// All valid cached edit buffers as concatenated dumps.
    ///
    /// Singles are written to the multi mode edit buffer address, which
    /// resolves by play mode. The buffers of the inactive play mode go
    /// first behind a global dump switched to that mode; the real global
    /// dump and the active buffers follow, so they win when the state is
    /// loaded.
    pub fn get_state(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let multi_mode = self.is_multi_mode();

        append(&mut out, DumpType::Mode, &self.mode, None);
        append(&mut out, DumpType::Drum, &self.current_drum, Some((buffer::DRUM_EDIT_BUFFER, 0)));
        for (i, s) in self.drum_singles.iter().enumerate() {
            let loc = buffer::LOCATION_FIRST_DRUM_INSTRUMENT + i as u8;
            append(&mut out, DumpType::Single, s, Some((buffer::SINGLE_EDIT_BUFFER_MULTI_MODE, loc)));
        }

        if self.is_global_valid() {
            let mut inactive = self.global.clone();
            inactive[DumpType::Global.dump().first_param_index + GlobalParameter::SingleMultiMode as usize] =
                u8::from(!multi_mode);
            append(&mut out, DumpType::Global, &inactive, None);
            self.append_play_mode(&mut out, !multi_mode);
        }
        append(&mut out, DumpType::Global, &self.global, None);
        self.append_play_mode(&mut out, multi_mode);
        out
    }

    fn append_play_mode(&self, out: &mut Vec<u8>, multi_mode: bool) {
        let singles = if multi_mode {
            append(out, DumpType::Multi, &self.current_multi, Some((buffer::MULTI_EDIT_BUFFER, 0)));
            &self.multi_singles
        } else {
            &self.instrument_singles
        };
        for (i, s) in singles.iter().enumerate() {
            append(out, DumpType::Single, s, Some((buffer::SINGLE_EDIT_BUFFER_MULTI_MODE, i as u8)));
        }
    }

    /// Multi payload for sequencer use: 16 parts on consecutive MIDI
    /// channels playing the first 16 sounds of bank A.
    pub fn create_sequencer_multi_data() -> Vec<u8> {
        let mut data = vec![0u8; multi::COUNT];

        data[multi::NAME..multi::NAME + multi::NAME_LEN].copy_from_slice(SEQUENCER_MULTI_NAME);
        data[multi::VOLUME] = 127;
        for c in [multi::CONTROL_W, multi::CONTROL_X, multi::CONTROL_Y, multi::CONTROL_Z] {
            data[c] = 120;
        }

        for i in 0..multi::INST_COUNT {
            let base = multi::INST0 + i * multi::INST_STRIDE;
            let mut set = |param: usize, v: u8| data[base + param] = v;
            set(multi::INST_SOUND_BANK, 0);
            set(multi::INST_SOUND_NUMBER, i as u8);
            set(multi::INST_MIDI_CHANNEL, i as u8);
            set(multi::INST_VOLUME, 127);
            set(multi::INST_TRANSPOSE, 64);
            set(multi::INST_DETUNE, 64);
            set(multi::INST_OUTPUT, 0);
            set(multi::INST_FLAGS, 3);
            set(multi::INST_PAN, 64);
            set(multi::INST_PATTERN, 0);
            set(multi::INST_VELO_LOW, 0);
            set(multi::INST_VELO_HIGH, 127);
            set(multi::INST_KEY_LOW, 0);
            set(multi::INST_KEY_HIGH, 127);
            set(multi::INST_MIDI_RX_FLAGS, 63);
        }
        data
    }

    /// [`State::create_sequencer_multi_data`] wrapped as a dump for the
    /// multi edit buffer.
    pub fn sequencer_multi_dump() -> SysEx {
        create_dump(
            DumpType::Multi,
            buffer::MULTI_EDIT_BUFFER,
            0,
            &Self::create_sequencer_multi_data(),
        )
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn global_dump(single_multi_mode: u8) -> SysEx {
        let mut payload = vec![0u8; DumpType::Global.dump().payload_len()];
        payload[GlobalParameter::SingleMultiMode as usize] = single_multi_mode;
        payload[GlobalParameter::Tuning as usize] = 64;
        create_dump(DumpType::Global, 0, 0, &payload)
    }

    fn single(buf: u8, loc: u8, fill: u8) -> SysEx {
        create_dump(DumpType::Single, buf, loc, &[fill; 383])
    }

    fn single_request(buf: u8, loc: u8) -> SysEx {
        request(DumpType::Single, Some((buf, loc)))
    }

    fn global_change(param: GlobalParameter, value: u8) -> SysEx {
        let p = param as u8;
        vec![0xF0, 0x3E, 0x10, 0x7F, 0x24, p >> 7, p & 0x7F, value, 0xF7]
    }

    #[test]
    fn test_dump_sizes() {
        assert_eq!(DumpType::Single.dump().payload_len(), 383);
        assert_eq!(DumpType::Multi.dump().payload_len(), 384);
        assert_eq!(DumpType::Global.dump().payload_len(), 200);
        assert_eq!(DumpType::Mode.dump().payload_len(), 1);
        assert_eq!(single(0x40, 0, 1).len(), 392);
        assert_eq!(global_dump(0).len(), 207);
    }

    #[test]
    fn test_rejects_bad_header() {
        let mut state = State::new();
        let mut r = Responses::new();
        let mut msg = single(0x40, 0, 1);
        msg[1] = 0x3F;
        assert!(!state.receive(&mut r, &msg, Origin::External));
        assert!(!state.receive(&mut r, &[0xF0, 0x3E, 0xF7], Origin::External));
        let mut unterminated = single(0x40, 0, 1);
        unterminated.pop();
        assert!(!state.receive(&mut r, &unterminated, Origin::External));
        assert!(state.take_device_messages().is_empty());
    }

    #[test]
    fn test_parse_then_get_round_trip() {
        let mut state = State::new();
        let mut r = Responses::new();
        let cases = [
            (DumpType::Single, Some((0x40, 0))),
            (DumpType::Single, Some((0x41, 99))),
            (DumpType::Single, Some((0x42, 5))),
            (DumpType::Single, Some((0x20, 0))),
            (DumpType::Single, Some((0x30, 3))),
            (DumpType::Single, Some((0x30, 0x10))),
            (DumpType::Single, Some((0x30, 0x11))),
            (DumpType::Single, Some((0x30, 0x2F))),
            (DumpType::Multi, Some((0x20, 0))),
            (DumpType::Multi, Some((0x40, 0))),
            (DumpType::Multi, Some((0x40, 99))),
            (DumpType::Multi, Some((0x00, 5))),
            (DumpType::Drum, Some((0x20, 0))),
            (DumpType::Drum, Some((0x40, 0))),
            (DumpType::Drum, Some((0x40, 19))),
            (DumpType::Drum, Some((0x00, 3))),
            (DumpType::Global, None),
            (DumpType::Mode, None),
        ];
        for (n, (ty, addr)) in cases.into_iter().enumerate() {
            let (buf, loc) = addr.unwrap_or((0, 0));
            let dump = create_dump(ty, buf, loc, &[n as u8 + 1; 384]);
            assert!(state.receive(&mut r, &dump, Origin::External), "{ty:?} {addr:?}");
            r.clear();
            assert!(state.receive(&mut r, &request(ty, addr), Origin::External), "{ty:?} {addr:?}");
            assert_eq!(r, vec![dump], "{ty:?} {addr:?}");
            r.clear();
        }
    }

    #[test]
    fn test_multi_and_drum_slots_out_of_range() {
        let mut state = State::new();
        let mut r = Responses::new();
        let drum = create_dump(DumpType::Drum, 0x40, 20, &[1; 384]);
        let multi = create_dump(DumpType::Multi, 0x40, 100, &[1; 384]);
        assert!(!state.receive(&mut r, &drum, Origin::External));
        assert!(!state.receive(&mut r, &multi, Origin::External));
        assert!(state.take_device_messages().is_empty());
    }

    #[test]
    fn test_rom_slot_out_of_range() {
        let mut state = State::new();
        let mut r = Responses::new();
        assert!(!state.receive(&mut r, &single(0x40, 100, 1), Origin::External));
        assert!(!state.receive(&mut r, &single(0x48, 0, 1), Origin::External));
        assert!(state.take_device_messages().is_empty());
    }

    #[test]
    fn test_deprecated_bank_aliases() {
        let mut state = State::new();
        let mut r = Responses::new();
        let dump = single(0x01, 7, 9);
        assert!(state.receive(&mut r, &dump, Origin::External));
        assert!(state.receive(&mut r, &single_request(0x41, 7), Origin::External));
        assert_eq!(r.len(), 1);
        assert_eq!(r[0][IDX_BUFFER], 0x41);
        assert_eq!(&r[0][7..390], &dump[7..390]);
        assert_eq!(sysex::checksum(&r[0]), r[0][390]);
    }

    #[test]
    fn test_cache_miss_forwards_request() {
        let mut state = State::new();
        let mut r = Responses::new();
        let req = single_request(0x40, 3);
        assert!(state.receive(&mut r, &req, Origin::External));
        assert!(r.is_empty());
        assert_eq!(state.take_device_messages(), vec![req]);
    }

    #[test]
    fn test_device_origin_not_echoed() {
        let mut state = State::new();
        let mut r = Responses::new();
        assert!(state.receive(&mut r, &global_dump(0), Origin::Device));
        assert!(state.receive(&mut r, &single(0x20, 0, 4), Origin::Device));
        assert!(state.take_device_messages().is_empty());

        assert!(state.receive(&mut r, &single(0x20, 0, 5), Origin::External));
        assert_eq!(state.take_device_messages().len(), 1);
    }

    #[test]
    fn test_single_edit_buffer_follows_play_mode() {
        let mut state = State::new();
        let mut r = Responses::new();
        state.receive(&mut r, &global_dump(0), Origin::Device);
        state.receive(&mut r, &single(0x30, 1, 11), Origin::Device);
        // single mode: location 1 is instrument B
        assert_eq!(state.instrument_singles[1][7], 11);

        state.receive(&mut r, &global_dump(1), Origin::Device);
        state.receive(&mut r, &single(0x30, 1, 22), Origin::Device);
        assert_eq!(state.multi_singles[1][7], 22);
        assert_eq!(state.instrument_singles[1][7], 11);
    }

    #[test]
    fn test_modify_updates_checksum() {
        let mut state = State::new();
        let mut r = Responses::new();
        state.receive(&mut r, &single(0x30, 2, 1), Origin::Device);

        let change = vec![0xF0, 0x3E, 0x10, 0x7F, 0x20, 2, 1, 5, 0x55, 0xF7];
        assert!(state.receive(&mut r, &change, Origin::External));
        let s = &state.instrument_singles[2];
        assert_eq!(s[7 + 128 + 5], 0x55);
        assert_eq!(sysex::checksum(s), s[s.len() - 2]);
        assert_eq!(state.take_device_messages(), vec![change]);
    }

    #[test]
    fn test_parameter_out_of_range() {
        let mut state = State::new();
        let mut r = Responses::new();
        state.receive(&mut r, &global_dump(0), Origin::Device);
        let change = vec![0xF0, 0x3E, 0x10, 0x7F, 0x24, 1, 0x48, 1, 0xF7];
        assert!(!state.receive(&mut r, &change, Origin::External));
    }

    #[test]
    fn test_single_multi_mode_change_rerequests_edit_buffer() {
        let mut state = State::new();
        let mut r = Responses::new();
        state.receive(&mut r, &global_dump(0), Origin::Device);
        state.receive(&mut r, &single(0x20, 0, 3), Origin::Device);
        assert!(is_valid(DumpType::Single, &state.instrument_singles[0]));

        let change = global_change(GlobalParameter::SingleMultiMode, 1);
        assert!(state.receive(&mut r, &change, Origin::External));

        assert_eq!(state.global_parameter(GlobalParameter::SingleMultiMode), 1);
        assert!(!is_valid(DumpType::Single, &state.instrument_singles[0]));
        assert_eq!(
            state.take_device_messages(),
            vec![change, vec![0xF0, 0x3E, 0x10, 0x7F, 0x00, 0x30, 0x00, 0xF7]]
        );
    }

    #[test]
    fn test_same_mode_value_does_not_rerequest() {
        let mut state = State::new();
        let mut r = Responses::new();
        state.receive(&mut r, &global_dump(1), Origin::Device);
        let change = global_change(GlobalParameter::SingleMultiMode, 1);
        assert!(state.receive(&mut r, &change, Origin::External));
        assert_eq!(state.take_device_messages(), vec![change]);
    }

    #[test]
    fn test_parameter_request_answers_from_cache() {
        let mut state = State::new();
        let mut r = Responses::new();
        state.receive(&mut r, &global_dump(0), Origin::Device);

        let p = GlobalParameter::Tuning as u8;
        let req = vec![0xF0, 0x3E, 0x10, 0x7F, 0x34, 0, p, 0xF7];
        assert!(state.receive(&mut r, &req, Origin::External));
        assert_eq!(r, vec![vec![0xF0, 0x3E, 0x10, 0x7F, 0x24, 0, p, 64, 0xF7]]);
        assert!(state.take_device_messages().is_empty());
    }

    #[test]
    fn test_parameter_request_without_cache_is_unhandled() {
        let mut state = State::new();
        let mut r = Responses::new();
        let req = vec![0xF0, 0x3E, 0x10, 0x7F, 0x31, 0, 0, 0xF7];
        assert!(!state.receive(&mut r, &req, Origin::External));
        assert!(r.is_empty());
    }

    #[test]
    fn test_checksum_mismatch_accepted() {
        let mut state = State::new();
        let mut r = Responses::new();
        let mut dump = single(0x40, 1, 2);
        let n = dump.len();
        dump[n - 2] ^= 0x01;
        assert!(state.receive(&mut r, &dump, Origin::Device));
    }

    #[test]
    fn test_wrong_size_dump_rejected() {
        let mut state = State::new();
        let mut r = Responses::new();
        let mut dump = single(0x40, 1, 2);
        dump.remove(10);
        assert!(!state.receive(&mut r, &dump, Origin::External));
    }

    #[test]
    fn test_get_state_orders_active_mode_last() {
        let mut state = State::new();
        let mut r = Responses::new();
        state.receive(&mut r, &global_dump(1), Origin::Device);
        state.receive(&mut r, &State::sequencer_multi_dump(), Origin::Device);
        state.receive(&mut r, &single(0x30, 0, 7), Origin::Device);

        let blob = state.get_state();
        let parts = split_multiple_sysex(&blob);
        let cmds: Vec<u8> = parts.iter().map(|p| p[IDX_COMMAND]).collect();
        assert_eq!(cmds, vec![0x14, 0x14, 0x11, 0x10]);
        let mode_index = DumpType::Global.dump().first_param_index + GlobalParameter::SingleMultiMode as usize;
        assert_eq!((parts[0][mode_index], parts[1][mode_index]), (0, 1));

        let mut restored = State::new();
        assert!(restored.set_state(&blob));
        assert_eq!(restored.get_state(), blob);
        assert_eq!(restored.take_device_messages().len(), 4);
    }

    #[test]
    fn test_get_state_keeps_both_play_modes() {
        let mut state = State::new();
        let mut r = Responses::new();
        state.receive(&mut r, &global_dump(0), Origin::Device);
        for i in 0..4 {
            state.receive(&mut r, &single(0x30, i, 10 + i), Origin::Device);
        }
        state.receive(&mut r, &global_dump(1), Origin::Device);
        for i in 0..16 {
            state.receive(&mut r, &single(0x30, i, 30 + i), Origin::Device);
        }
        state.receive(&mut r, &single(0x30, 0x12, 60), Origin::Device);
        // arrived through the single mode edit buffer
        state.instrument_singles[3] = single(0x20, 0, 13);

        let blob = state.get_state();
        let mut restored = State::new();
        assert!(restored.set_state(&blob));
        assert_eq!(restored.get_state(), blob);
        assert!(restored.is_multi_mode());

        for i in 0..4 {
            assert_eq!(restored.instrument_singles[i][7], 10 + i as u8);
        }
        for i in 0..16 {
            assert_eq!(restored.multi_singles[i][7], 30 + i as u8);
        }
        assert_eq!(restored.drum_singles[2][7], 60);
        assert_eq!(restored.global, state.global);
    }

    #[test]
    fn test_get_state_without_global() {
        let mut state = State::new();
        let mut r = Responses::new();
        state.receive(&mut r, &single(0x30, 1, 5), Origin::Device);

        let blob = state.get_state();
        let parts = split_multiple_sysex(&blob);
        assert_eq!(parts.len(), 1);
        assert_eq!((parts[0][IDX_BUFFER], parts[0][IDX_LOCATION]), (0x30, 1));
    }

    #[test]
    fn test_load_state_empty() {
        let mut state = State::new();
        assert!(!state.load_state(&[]));
    }

    #[test]
    fn test_sequencer_multi() {
        let data = State::create_sequencer_multi_data();
        assert_eq!(data.len(), multi::COUNT);
        assert_eq!(&data[16..32], b"Emu-Plugin-Multi");
        let inst15 = multi::INST0 + 15 * multi::INST_STRIDE;
        assert_eq!(data[inst15 + multi::INST_SOUND_NUMBER], 15);
        assert_eq!(data[inst15 + multi::INST_MIDI_CHANNEL], 15);
        assert_eq!(data[inst15 + multi::INST_MIDI_RX_FLAGS], 63);

        let dump = State::sequencer_multi_dump();
        assert_eq!(dump.len(), 393);
        assert_eq!(sysex::checksum(&dump), dump[391]);
    }

    struct ScriptedLink {
        sent: Vec<SysEx>,
        processed: usize,
        answer_after: usize,
    }

    impl DeviceLink for ScriptedLink {
        fn send_sysex(&mut self, data: &[u8]) {
            self.sent.push(data.to_vec());
        }

        fn process(&mut self, frames: usize) {
            self.processed += frames;
        }

        fn receive_midi(&mut self, out: &mut Vec<u8>) {
            if self.processed == self.answer_after {
                out.push(0xFE);
                out.extend_from_slice(&global_dump(0));
            }
        }
    }

    #[test]
    fn test_create_init_state() {
        let mut state = State::new();
        let mut link = ScriptedLink {
            sent: Vec::new(),
            processed: 0,
            answer_after: 24,
        };
        assert!(state.create_init_state(&mut link, Some(&State::sequencer_multi_dump())));

        assert_eq!(link.sent[0], vec![0xF0, 0x3E, 0x10, 0x7F, 0x04, 0xF7]);
        assert_eq!(link.processed, 24);
        assert!(link.sent.contains(&global_change(GlobalParameter::ControllerSend, 2)));
        assert_eq!(link.sent.last(), Some(&State::sequencer_multi_dump()));
        assert_eq!(state.global_parameter(GlobalParameter::InputGain), 3);
    }

    #[test]
    fn test_create_init_state_gives_up() {
        let mut state = State::new();
        let mut link = ScriptedLink {
            sent: Vec::new(),
            processed: 0,
            answer_after: usize::MAX,
        };
        assert!(!state.create_init_state(&mut link, None));
    }
}
