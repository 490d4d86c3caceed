//! Packet definitions
//!
//! One variant per packet kind; each carries only the fields that kind defines.

/// Packet type codes carried in the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Null = 0,
    EegData = 1,
    Event = 5,
}

impl PacketType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PacketType::Null),
            1 => Some(PacketType::EegData),
            5 => Some(PacketType::Event),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Event codes carried by EVENT packets
///
/// Codes the streamer may add in later versions are kept as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCode {
    Version,
    DataStart,
    DataStop,
    SensorMap,
    DataRate,
    Unknown(u32),
}

impl EventCode {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => EventCode::Version,
            2 => EventCode::DataStart,
            3 => EventCode::DataStop,
            9 => EventCode::SensorMap,
            10 => EventCode::DataRate,
            other => EventCode::Unknown(other),
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            EventCode::Version => 1,
            EventCode::DataStart => 2,
            EventCode::DataStop => 3,
            EventCode::SensorMap => 9,
            EventCode::DataRate => 10,
            EventCode::Unknown(raw) => raw,
        }
    }
}

/// Fixed header preceding every packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_type: PacketType,
    /// Byte length of the type-specific payload
    ///
    /// Saturates at `u16::MAX` for packets built locally with an oversize
    /// payload; `Encoder::encode` rejects those.
    pub payload_length: u16,
    /// Sequence number assigned by the streamer
    pub sequence: u32,
}

fn wire_length(length: usize) -> u16 {
    u16::try_from(length).unwrap_or(u16::MAX)
}

/// EVENT packet payload
#[derive(Debug, Clone, PartialEq)]
pub struct EventPacket {
    pub header: PacketHeader,
    pub code: EventCode,
    pub sending_node: u32,
    /// Present only when the payload is longer than code + node
    pub message: Option<String>,
}

impl EventPacket {
    pub fn new(sequence: u32, code: EventCode, sending_node: u32, message: Option<String>) -> Self {
        let payload_length = match &message {
            Some(m) => super::EVENT_FIXED_SIZE + 4 + m.len(),
            None => super::EVENT_FIXED_SIZE,
        };

        Self {
            header: PacketHeader {
                packet_type: PacketType::Event,
                payload_length: wire_length(payload_length),
                sequence,
            },
            code,
            sending_node,
            message,
        }
    }
}

/// EEG_DATA packet payload
#[derive(Debug, Clone, PartialEq)]
pub struct EegDataPacket {
    pub header: PacketHeader,
    pub timestamp: f32,
    /// Always zero with current streamers
    pub data_counter: u8,
    /// ADC status bytes, passed through unexamined
    pub adc_status: [u8; 6],
    /// One value per physical sensor slot, in header order
    pub sensor_data: Vec<f32>,
}

impl EegDataPacket {
    pub fn new(sequence: u32, timestamp: f32, sensor_data: Vec<f32>) -> Self {
        let payload_length = super::EEG_FIXED_SIZE + 4 * sensor_data.len();

        Self {
            header: PacketHeader {
                packet_type: PacketType::EegData,
                payload_length: wire_length(payload_length),
                sequence,
            },
            timestamp,
            data_counter: 0,
            adc_status: [0; 6],
            sensor_data,
        }
    }
}

/// NULL packet: framing padding with no content
#[derive(Debug, Clone, PartialEq)]
pub struct NullPacket {
    pub header: PacketHeader,
}

impl NullPacket {
    pub fn new(sequence: u32) -> Self {
        Self {
            header: PacketHeader {
                packet_type: PacketType::Null,
                payload_length: super::NULL_FILLER_SIZE as u16,
                sequence,
            },
        }
    }
}

/// One decoded packet of the streamer protocol
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Null(NullPacket),
    EegData(EegDataPacket),
    Event(EventPacket),
}

impl Packet {
    pub fn header(&self) -> &PacketHeader {
        match self {
            Packet::Null(p) => &p.header,
            Packet::EegData(p) => &p.header,
            Packet::Event(p) => &p.header,
        }
    }

    pub fn packet_type(&self) -> PacketType {
        self.header().packet_type
    }

    pub fn sequence(&self) -> u32 {
        self.header().sequence
    }

    /// The event payload if this is an event with the given code
    pub fn as_event(&self, code: EventCode) -> Option<&EventPacket> {
        match self {
            Packet::Event(event) if event.code == code => Some(event),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_event_code_is_preserved() {
        let code = EventCode::from_raw(42);
        assert_eq!(code, EventCode::Unknown(42));
        assert_eq!(code.raw(), 42);
        assert_eq!(EventCode::from_raw(9), EventCode::SensorMap);
    }

    #[test]
    fn test_packet_type_codes() {
        assert_eq!(PacketType::from_code(0), Some(PacketType::Null));
        assert_eq!(PacketType::from_code(1), Some(PacketType::EegData));
        assert_eq!(PacketType::from_code(5), Some(PacketType::Event));
        assert_eq!(PacketType::from_code(2), None);
    }

    #[test]
    fn test_payload_lengths() {
        let event = EventPacket::new(1, EventCode::DataRate, 0, Some("mains,300".into()));
        assert_eq!(event.header.payload_length, 8 + 4 + 9);

        let bare = EventPacket::new(2, EventCode::DataStart, 0, None);
        assert_eq!(bare.header.payload_length, 8);

        let eeg = EegDataPacket::new(3, 0.5, vec![0.0; 25]);
        assert_eq!(eeg.header.payload_length, 11 + 100);
    }

    #[test]
    fn test_oversize_payload_length_saturates() {
        let eeg = EegDataPacket::new(0, 0.0, vec![0.0; 20_000]);
        assert_eq!(eeg.header.payload_length, u16::MAX);

        let event = EventPacket::new(0, EventCode::Version, 0, Some("x".repeat(70_000)));
        assert_eq!(event.header.payload_length, u16::MAX);
    }

    #[test]
    fn test_as_event() {
        let packet = Packet::Event(EventPacket::new(0, EventCode::SensorMap, 1, Some("P3".into())));
        assert!(packet.as_event(EventCode::SensorMap).is_some());
        assert!(packet.as_event(EventCode::DataRate).is_none());
        assert!(Packet::Null(NullPacket::new(0)).as_event(EventCode::SensorMap).is_none());
    }
}
