//! microQ SysEx wire constants.
//!
//! Every message is `F0 3E 10 <device> <command> ... F7`. Dumps carry a
//! buffer number and a location after the command byte (Global and Mode
//! dumps do not), then the payload, a 7-bit checksum and F7.

pub const ID_WALDORF: u8 = 0x3E;
pub const ID_MICROQ: u8 = 0x10;
pub const ID_DEVICE_OMNI: u8 = 0x7F;

pub const IDX_ID_WALDORF: usize = 1;
pub const IDX_ID_MICROQ: usize = 2;
pub const IDX_DEVICE_ID: usize = 3;
pub const IDX_COMMAND: usize = 4;
pub const IDX_BUFFER: usize = 5;
pub const IDX_LOCATION: usize = 6;

/// Smallest well-formed message: header, command and F7.
pub const MIN_SYSEX_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SysexCommand {
    SingleRequest = 0x00,
    SingleDump = 0x10,
    SingleParameterChange = 0x20,
    SingleParameterRequest = 0x30,
    MultiRequest = 0x01,
    MultiDump = 0x11,
    MultiParameterChange = 0x21,
    MultiParameterRequest = 0x31,
    DrumRequest = 0x02,
    DrumDump = 0x12,
    DrumParameterChange = 0x22,
    DrumParameterRequest = 0x32,
    GlobalRequest = 0x04,
    GlobalDump = 0x14,
    GlobalParameterChange = 0x24,
    GlobalParameterRequest = 0x34,
    ModeRequest = 0x07,
    ModeDump = 0x17,
    ModeParameterChange = 0x27,
    ModeParameterRequest = 0x37,

    EmuLcd = 0x50,
    EmuLeds = 0x51,
    EmuButtons = 0x52,
    EmuRotaries = 0x53,
    EmuLcdCgRam = 0x54,
}

impl SysexCommand {
    pub fn from_u8(v: u8) -> Option<Self> {
        use SysexCommand::*;
        Some(match v {
            0x00 => SingleRequest,
            0x10 => SingleDump,
            0x20 => SingleParameterChange,
            0x30 => SingleParameterRequest,
            0x01 => MultiRequest,
            0x11 => MultiDump,
            0x21 => MultiParameterChange,
            0x31 => MultiParameterRequest,
            0x02 => DrumRequest,
            0x12 => DrumDump,
            0x22 => DrumParameterChange,
            0x32 => DrumParameterRequest,
            0x04 => GlobalRequest,
            0x14 => GlobalDump,
            0x24 => GlobalParameterChange,
            0x34 => GlobalParameterRequest,
            0x07 => ModeRequest,
            0x17 => ModeDump,
            0x27 => ModeParameterChange,
            0x37 => ModeParameterRequest,
            0x50 => EmuLcd,
            0x51 => EmuLeds,
            0x52 => EmuButtons,
            0x53 => EmuRotaries,
            0x54 => EmuLcdCgRam,
            _ => return None,
        })
    }
}

/// Buffer numbers. Several names share a value on the wire, so these are
/// plain constants rather than an enum.
pub mod buffer {
    pub const DEPRECATED_SINGLE_BANK_A: u8 = 0x00;
    pub const DEPRECATED_SINGLE_BANK_B: u8 = 0x01;
    pub const DEPRECATED_SINGLE_BANK_C: u8 = 0x02;
    pub const DEPRECATED_SINGLE_BANK_X: u8 = 0x03;
    pub const ALL_SOUNDS: u8 = 0x10;
    pub const SINGLE_EDIT_BUFFER_SINGLE_MODE: u8 = 0x20;
    /// Also addresses the drum map instrument edit buffers (locations 0x10..=0x2F).
    pub const SINGLE_EDIT_BUFFER_MULTI_MODE: u8 = 0x30;
    pub const SINGLE_BANK_A: u8 = 0x40;
    pub const SINGLE_BANK_B: u8 = 0x41;
    pub const SINGLE_BANK_C: u8 = 0x42;
    pub const SINGLE_BANK_X: u8 = 0x48;

    pub const DEPRECATED_MULTI_BANK_INTERNAL: u8 = 0x00;
    pub const DEPRECATED_MULTI_BANK_CARD: u8 = 0x03;
    pub const MULTI_EDIT_BUFFER: u8 = 0x20;
    pub const MULTI_BANK_INTERNAL: u8 = 0x40;
    pub const MULTI_BANK_CARD: u8 = 0x48;

    pub const DEPRECATED_DRUM_BANK_INTERNAL: u8 = 0x00;
    pub const DEPRECATED_DRUM_BANK_CARD: u8 = 0x01;
    pub const DRUM_EDIT_BUFFER: u8 = 0x20;
    pub const DRUM_BANK_INTERNAL: u8 = 0x40;
    pub const DRUM_BANK_CARD: u8 = 0x48;

    /// First drum map instrument inside the multi mode edit buffer.
    pub const LOCATION_FIRST_DRUM_INSTRUMENT: u8 = 0x10;
    pub const LOCATION_LAST_DRUM_INSTRUMENT: u8 = 0x2F;
}

/// Offsets into the Global dump payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GlobalParameter {
    Version = 0,
    InstrumentASingleNumber = 1,
    InstrumentBSingleNumber = 2,
    InstrumentCSingleNumber = 3,
    InstrumentDSingleNumber = 4,
    Tuning = 5,
    Transpose = 6,
    ControllerSend = 7,
    ControllerReceive = 8,
    InstrumentABankNumber = 9,
    InstrumentBBankNumber = 10,
    InstrumentCBankNumber = 11,
    InstrumentDBankNumber = 12,
    ArpSend = 15,
    Clock = 19,
    InstrumentSelection = 20,
    SingleMultiMode = 21,
    MultiNumber = 22,
    MidiChannel = 24,
    SysExDeviceId = 25,
    LocalControl = 26,
    PopupTime = 27,
    LabelTime = 28,
    DisplayContrast = 29,
    OnVelocityCurve = 30,
    ReleaseVelocityCurve = 31,
    PressureCurve = 32,
    InputGain = 33,
    GlobalLinkFx2 = 35,
    ControllerW = 53,
    ControllerX = 54,
    ControllerY = 55,
    ControllerZ = 56,
    ProgramChangeRx = 57,
    Send = 58,
    Level = 59,
    PedalOffset = 70,
    PedalGain = 71,
    PedalCurve = 72,
    PedalControl = 73,
    ProgramChangeTx = 74,
}

/// Offsets into the Multi dump payload.
pub mod multi {
    pub const VOLUME: usize = 0;
    pub const CONTROL_W: usize = 1;
    pub const CONTROL_X: usize = 2;
    pub const CONTROL_Y: usize = 3;
    pub const CONTROL_Z: usize = 4;
    pub const NAME: usize = 16;
    pub const NAME_LEN: usize = 16;

    pub const INST0: usize = 32;
    pub const INST_STRIDE: usize = 22;
    pub const INST_COUNT: usize = 16;

    // Relative to the start of an instrument block.
    pub const INST_SOUND_BANK: usize = 0;
    pub const INST_SOUND_NUMBER: usize = 1;
    pub const INST_MIDI_CHANNEL: usize = 2;
    pub const INST_VOLUME: usize = 3;
    pub const INST_TRANSPOSE: usize = 4;
    pub const INST_DETUNE: usize = 5;
    pub const INST_OUTPUT: usize = 6;
    pub const INST_FLAGS: usize = 7;
    pub const INST_PAN: usize = 8;
    pub const INST_RESERVED_A: usize = 9;
    pub const INST_RESERVED_B: usize = 10;
    pub const INST_PATTERN: usize = 11;
    pub const INST_VELO_LOW: usize = 12;
    pub const INST_VELO_HIGH: usize = 13;
    pub const INST_KEY_LOW: usize = 14;
    pub const INST_KEY_HIGH: usize = 15;
    pub const INST_MIDI_RX_FLAGS: usize = 16;

    /// Payload size of a multi.
    pub const COUNT: usize = 379;
}

/// Header shared by every message this crate emits.
pub fn header(command: SysexCommand) -> Vec<u8> {
    vec![0xF0, ID_WALDORF, ID_MICROQ, ID_DEVICE_OMNI, command as u8]
}

/// Sum of everything from the command byte up to (excluding) the checksum
/// slot, reduced to 7 bits. The checksum slot is the byte before F7.
pub fn checksum(data: &[u8]) -> u8 {
    if data.len() < IDX_COMMAND + 2 {
        return 0;
    }
    let end = data.len() - 2;
    data[IDX_COMMAND..end]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
        & 0x7F
}

/// Rewrite the checksum slot in place. Returns false for messages too short
/// to carry one.
pub fn update_checksum(data: &mut [u8]) -> bool {
    if data.len() < IDX_COMMAND + 2 {
        return false;
    }
    let c = checksum(data);
    let idx = data.len() - 2;
    data[idx] = c;
    true
}
