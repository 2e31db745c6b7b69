//! Wire packets exchanged with the flight-dynamics simulator
//!
//! Every packet is a fixed-size, packed, host-endian struct. There is no
//! framing beyond the leading `message_type` tag and the `message_size` field,
//! which always equals the struct size. Both peers are expected to run on the
//! same machine, so no byte-order conversion happens anywhere.

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

/// Message discriminant, the first byte of every packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Gps = 0,
    Sensor = 1,
    RcInputsRaw = 2,
    StateQuaternion = 3,
    Accel = 4,
    Gyro = 5,
    Battery = 6,
    Compass = 7,
    Barometer = 8,
    Mode = 9,
}

impl MessageType {
    /// Fixed wire size for this kind, `None` for the reserved kinds without a layout
    pub fn packet_size(self) -> Option<usize> {
        match self {
            MessageType::Gps => Some(GpsPacket::SIZE),
            MessageType::Accel => Some(AccelPacket::SIZE),
            MessageType::Gyro => Some(GyroPacket::SIZE),
            MessageType::Battery => Some(BatteryPacket::SIZE),
            MessageType::Compass => Some(CompassPacket::SIZE),
            MessageType::Barometer => Some(BarometerPacket::SIZE),
            MessageType::Mode => Some(ModePacket::SIZE),
            MessageType::Sensor | MessageType::RcInputsRaw | MessageType::StateQuaternion => None,
        }
    }

    /// Whether packets of this kind carry `instance` and `ignore`
    pub fn has_ignore(self) -> bool {
        !matches!(self, MessageType::Battery | MessageType::Mode)
    }
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            0 => MessageType::Gps,
            1 => MessageType::Sensor,
            2 => MessageType::RcInputsRaw,
            3 => MessageType::StateQuaternion,
            4 => MessageType::Accel,
            5 => MessageType::Gyro,
            6 => MessageType::Battery,
            7 => MessageType::Compass,
            8 => MessageType::Barometer,
            9 => MessageType::Mode,
            other => return Err(CodecError::UnknownType(other)),
        })
    }
}

/// Errors from decoding raw bytes into packets
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Unknown message type: {0}")]
    UnknownType(u8),

    #[error("Message type {0:?} has no wire layout")]
    Unsupported(MessageType),

    #[error("Expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

/// A fixed-layout packet that can be sent as-is
pub trait WirePacket: Pod + std::fmt::Debug {
    const MESSAGE_TYPE: MessageType;
    const SIZE: usize = size_of::<Self>();

    /// Whether the receiver flagged this packet as not applied
    fn ignored(&self) -> bool {
        false
    }

    fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Raw tag byte as found on the wire
    fn tag(&self) -> u8 {
        self.as_bytes()[0]
    }

    /// The self-described size, as found on the wire
    fn message_size(&self) -> u32 {
        bytemuck::pod_read_unaligned(&self.as_bytes()[1..5])
    }

    /// Whether tag and `message_size` agree with this layout
    fn header_consistent(&self) -> bool {
        self.tag() == Self::MESSAGE_TYPE as u8 && self.message_size() as usize == Self::SIZE
    }

    /// Reinterpret exactly `SIZE` bytes as this packet
    ///
    /// The header is not checked; see [`WirePacket::header_consistent`].
    fn read_from(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != Self::SIZE {
            return Err(CodecError::Length {
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }
        Ok(bytemuck::pod_read_unaligned(bytes))
    }
}

fn size_field<P: WirePacket>() -> u32 {
    P::SIZE as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C, packed)]
pub struct GyroPacket {
    pub message_type: u8,
    pub message_size: u32,
    pub instance: u8,
    pub ignore: u8,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl GyroPacket {
    pub fn new(instance: u8, x: f32, y: f32, z: f32) -> Self {
        Self {
            message_type: MessageType::Gyro as u8,
            message_size: size_field::<Self>(),
            instance,
            ignore: 0,
            x,
            y,
            z,
        }
    }
}

impl WirePacket for GyroPacket {
    const MESSAGE_TYPE: MessageType = MessageType::Gyro;

    fn ignored(&self) -> bool {
        self.ignore != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C, packed)]
pub struct AccelPacket {
    pub message_type: u8,
    pub message_size: u32,
    pub instance: u8,
    pub ignore: u8,
    pub accelx: f32,
    pub accely: f32,
    pub accelz: f32,
}

impl AccelPacket {
    pub fn new(instance: u8, accelx: f32, accely: f32, accelz: f32) -> Self {
        Self {
            message_type: MessageType::Accel as u8,
            message_size: size_field::<Self>(),
            instance,
            ignore: 0,
            accelx,
            accely,
            accelz,
        }
    }
}

impl WirePacket for AccelPacket {
    const MESSAGE_TYPE: MessageType = MessageType::Accel;

    fn ignored(&self) -> bool {
        self.ignore != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C, packed)]
pub struct CompassPacket {
    pub message_type: u8,
    pub message_size: u32,
    pub instance: u8,
    pub ignore: u8,
    pub mag_0: f32,
    pub mag_1: f32,
    pub mag_2: f32,
}

impl CompassPacket {
    pub fn new(instance: u8, mag_0: f32, mag_1: f32, mag_2: f32) -> Self {
        Self {
            message_type: MessageType::Compass as u8,
            message_size: size_field::<Self>(),
            instance,
            ignore: 0,
            mag_0,
            mag_1,
            mag_2,
        }
    }
}

impl WirePacket for CompassPacket {
    const MESSAGE_TYPE: MessageType = MessageType::Compass;

    fn ignored(&self) -> bool {
        self.ignore != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C, packed)]
pub struct BarometerPacket {
    pub message_type: u8,
    pub message_size: u32,
    pub instance: u8,
    pub ignore: u8,
    pub pressure: f32,
    pub temperature: f32,
}

impl BarometerPacket {
    pub fn new(instance: u8, pressure: f32, temperature: f32) -> Self {
        Self {
            message_type: MessageType::Barometer as u8,
            message_size: size_field::<Self>(),
            instance,
            ignore: 0,
            pressure,
            temperature,
        }
    }
}

impl WirePacket for BarometerPacket {
    const MESSAGE_TYPE: MessageType = MessageType::Barometer;

    fn ignored(&self) -> bool {
        self.ignore != 0
    }
}

/// Battery state; no instance and no ignore flag, every reply is authoritative
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C, packed)]
pub struct BatteryPacket {
    pub message_type: u8,
    pub message_size: u32,
    pub voltage: f32,
    pub current: f32,
    pub throttle: f32,
}

impl BatteryPacket {
    pub fn new(voltage: f32, current: f32, throttle: f32) -> Self {
        Self {
            message_type: MessageType::Battery as u8,
            message_size: size_field::<Self>(),
            voltage,
            current,
            throttle,
        }
    }
}

impl WirePacket for BatteryPacket {
    const MESSAGE_TYPE: MessageType = MessageType::Battery;
}

/// Flight mode notification, never answered
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C, packed)]
pub struct ModePacket {
    pub message_type: u8,
    pub message_size: u32,
    pub mode: u32,
}

impl ModePacket {
    pub fn new(mode: u32) -> Self {
        Self {
            message_type: MessageType::Mode as u8,
            message_size: size_field::<Self>(),
            mode,
        }
    }
}

impl WirePacket for ModePacket {
    const MESSAGE_TYPE: MessageType = MessageType::Mode;
}

/// Pack the three mode components the way the autopilot reports them
pub fn encode_mode(bmode: u8, cmode: u8, smode: u8) -> u32 {
    (u32::from(bmode) << 16) | (u32::from(cmode) << 8) | u32::from(smode)
}

/// Inverse of [`encode_mode`]; bits above the third byte are dropped
pub fn decode_mode(mode: u32) -> (u8, u8, u8) {
    ((mode >> 16) as u8, (mode >> 8) as u8, mode as u8)
}

/// GPS payload as seen by callers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpsFix {
    pub time_usec: u64,
    pub fix_type: u8,
    pub lat: i32,
    pub lon: i32,
    pub alt: i32,
    pub eph: u16,
    pub epv: u16,
    pub vel: u16,
    pub vn: i16,
    pub ve: i16,
    pub vd: i16,
    pub cog: u16,
    pub satellites_visible: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C, packed)]
pub struct GpsPacket {
    pub message_type: u8,
    pub message_size: u32,
    pub instance: u8,
    pub ignore: u8,
    pub time_usec: u64,
    pub fix_type: u8,
    pub lat: i32,
    pub lon: i32,
    pub alt: i32,
    pub eph: u16,
    pub epv: u16,
    pub vel: u16,
    pub vn: i16,
    pub ve: i16,
    pub vd: i16,
    pub cog: u16,
    pub satellites_visible: u8,
}

impl GpsPacket {
    pub fn new(instance: u8, fix: &GpsFix) -> Self {
        Self {
            message_type: MessageType::Gps as u8,
            message_size: size_field::<Self>(),
            instance,
            ignore: 0,
            time_usec: fix.time_usec,
            fix_type: fix.fix_type,
            lat: fix.lat,
            lon: fix.lon,
            alt: fix.alt,
            eph: fix.eph,
            epv: fix.epv,
            vel: fix.vel,
            vn: fix.vn,
            ve: fix.ve,
            vd: fix.vd,
            cog: fix.cog,
            satellites_visible: fix.satellites_visible,
        }
    }

    pub fn fix(&self) -> GpsFix {
        GpsFix {
            time_usec: self.time_usec,
            fix_type: self.fix_type,
            lat: self.lat,
            lon: self.lon,
            alt: self.alt,
            eph: self.eph,
            epv: self.epv,
            vel: self.vel,
            vn: self.vn,
            ve: self.ve,
            vd: self.vd,
            cog: self.cog,
            satellites_visible: self.satellites_visible,
        }
    }
}

impl WirePacket for GpsPacket {
    const MESSAGE_TYPE: MessageType = MessageType::Gps;

    fn ignored(&self) -> bool {
        self.ignore != 0
    }
}

/// Any packet with a wire layout, keyed on its tag
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Packet {
    Gps(GpsPacket),
    Gyro(GyroPacket),
    Accel(AccelPacket),
    Compass(CompassPacket),
    Barometer(BarometerPacket),
    Battery(BatteryPacket),
    Mode(ModePacket),
}

impl Packet {
    /// Decode a complete packet, dispatching on the leading tag byte
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let tag = *bytes.first().ok_or(CodecError::Length {
            expected: 1,
            actual: 0,
        })?;

        Ok(match MessageType::try_from(tag)? {
            MessageType::Gps => Packet::Gps(GpsPacket::read_from(bytes)?),
            MessageType::Gyro => Packet::Gyro(GyroPacket::read_from(bytes)?),
            MessageType::Accel => Packet::Accel(AccelPacket::read_from(bytes)?),
            MessageType::Compass => Packet::Compass(CompassPacket::read_from(bytes)?),
            MessageType::Barometer => Packet::Barometer(BarometerPacket::read_from(bytes)?),
            MessageType::Battery => Packet::Battery(BatteryPacket::read_from(bytes)?),
            MessageType::Mode => Packet::Mode(ModePacket::read_from(bytes)?),
            reserved => return Err(CodecError::Unsupported(reserved)),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Packet::Gps(p) => p.as_bytes(),
            Packet::Gyro(p) => p.as_bytes(),
            Packet::Accel(p) => p.as_bytes(),
            Packet::Compass(p) => p.as_bytes(),
            Packet::Barometer(p) => p.as_bytes(),
            Packet::Battery(p) => p.as_bytes(),
            Packet::Mode(p) => p.as_bytes(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Packet::Gps(_) => MessageType::Gps,
            Packet::Gyro(_) => MessageType::Gyro,
            Packet::Accel(_) => MessageType::Accel,
            Packet::Compass(_) => MessageType::Compass,
            Packet::Barometer(_) => MessageType::Barometer,
            Packet::Battery(_) => MessageType::Battery,
            Packet::Mode(_) => MessageType::Mode,
        }
    }

    pub fn ignored(&self) -> bool {
        match self {
            Packet::Gps(p) => p.ignored(),
            Packet::Gyro(p) => p.ignored(),
            Packet::Accel(p) => p.ignored(),
            Packet::Compass(p) => p.ignored(),
            Packet::Barometer(p) => p.ignored(),
            Packet::Battery(p) => p.ignored(),
            Packet::Mode(p) => p.ignored(),
        }
    }

    /// Set the ignore flag; returns false for kinds that have none
    pub fn set_ignore(&mut self, ignore: bool) -> bool {
        let flag = u8::from(ignore);
        match self {
            Packet::Gps(p) => p.ignore = flag,
            Packet::Gyro(p) => p.ignore = flag,
            Packet::Accel(p) => p.ignore = flag,
            Packet::Compass(p) => p.ignore = flag,
            Packet::Barometer(p) => p.ignore = flag,
            Packet::Battery(_) | Packet::Mode(_) => return false,
        }
        true
    }

    pub fn header_consistent(&self) -> bool {
        match self {
            Packet::Gps(p) => p.header_consistent(),
            Packet::Gyro(p) => p.header_consistent(),
            Packet::Accel(p) => p.header_consistent(),
            Packet::Compass(p) => p.header_consistent(),
            Packet::Barometer(p) => p.header_consistent(),
            Packet::Battery(p) => p.header_consistent(),
            Packet::Mode(p) => p.header_consistent(),
        }
    }

    /// Whether the simulator answers this packet
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Packet::Mode(_))
    }
}
