//! Protocol codec for decoding/encoding streamer packets
//!
//! Handles framing of the byte stream into packets.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use super::{
    EegDataPacket, EventCode, EventPacket, NullPacket, Packet, PacketHeader, PacketType,
    EEG_FIXED_SIZE, EVENT_FIXED_SIZE, HEADER_SIZE, MARKER, NULL_FILLER_SIZE,
};

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Invalid packet marker: {0:02x?}")]
    InvalidMarker([u8; 5]),

    #[error("Unknown packet type: {0}")]
    UnknownPacketType(u8),

    #[error("EEG payload length {0} does not hold a whole number of samples")]
    SampleCountNotIntegral(u16),

    #[error("Payload too short for {packet_type:?}: {length} bytes")]
    PayloadTooShort { packet_type: PacketType, length: u16 },

    #[error("Event message length {message_length} does not fit payload length {payload_length}")]
    MessageLengthMismatch {
        message_length: u32,
        payload_length: u16,
    },

    #[error("Event message is not ASCII")]
    InvalidMessage,

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Stream ended mid-packet: needed {needed} bytes, had {available}")]
    Truncated { needed: usize, available: usize },
}

impl CodecError {
    /// Framing errors mean the stream is desynchronized and the connection is unusable
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            CodecError::InvalidMarker(_) | CodecError::UnknownPacketType(_)
        )
    }
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Decodes packets from the wire format
pub struct Decoder {
    state: DecodeState,
}

#[derive(Default)]
enum DecodeState {
    #[default]
    Header,
    Body {
        header: PacketHeader,
        length: usize,
    },
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Header,
        }
    }

    /// Attempt to decode a packet from the buffer
    /// Returns Ok(None) if more data is needed
    pub fn decode(&mut self, buf: &mut BytesMut) -> CodecResult<Option<Packet>> {
        loop {
            match &self.state {
                DecodeState::Header => {
                    if buf.len() < HEADER_SIZE {
                        return Ok(None);
                    }

                    let header = parse_header(&buf[..HEADER_SIZE])?;
                    let length = body_length(&header)?;

                    buf.advance(HEADER_SIZE);
                    self.state = DecodeState::Body { header, length };
                }
                DecodeState::Body { header, length } => {
                    if buf.len() < *length {
                        return Ok(None);
                    }

                    let header = *header;
                    let mut body = buf.split_to(*length);
                    self.state = DecodeState::Header;

                    let packet = match header.packet_type {
                        PacketType::Null => Packet::Null(NullPacket { header }),
                        PacketType::Event => Packet::Event(parse_event(header, &mut body)?),
                        PacketType::EegData => Packet::EegData(parse_eeg(header, &mut body)),
                    };

                    return Ok(Some(packet));
                }
            }
        }
    }

    /// The error to report when the stream ends with `buf` still pending
    pub fn truncated(&self, buf: &BytesMut) -> Option<CodecError> {
        match &self.state {
            DecodeState::Header if buf.is_empty() => None,
            DecodeState::Header => Some(CodecError::Truncated {
                needed: HEADER_SIZE,
                available: buf.len(),
            }),
            DecodeState::Body { length, .. } => Some(CodecError::Truncated {
                needed: *length,
                available: buf.len(),
            }),
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_header(bytes: &[u8]) -> CodecResult<PacketHeader> {
    let mut bytes = bytes;

    let mut marker = [0u8; 5];
    bytes.copy_to_slice(&mut marker);
    if marker != MARKER {
        return Err(CodecError::InvalidMarker(marker));
    }

    let code = bytes.get_u8();
    let packet_type = PacketType::from_code(code).ok_or(CodecError::UnknownPacketType(code))?;

    Ok(PacketHeader {
        packet_type,
        payload_length: bytes.get_u16(),
        sequence: bytes.get_u32(),
    })
}

/// Number of body bytes following the header, validated against the packet kind
fn body_length(header: &PacketHeader) -> CodecResult<usize> {
    let length = header.payload_length;

    match header.packet_type {
        PacketType::Null => Ok(NULL_FILLER_SIZE),
        PacketType::Event => {
            let fits_message = length as usize == EVENT_FIXED_SIZE
                || length as usize >= EVENT_FIXED_SIZE + 4;
            if !fits_message {
                return Err(CodecError::PayloadTooShort {
                    packet_type: PacketType::Event,
                    length,
                });
            }
            Ok(length as usize)
        }
        PacketType::EegData => {
            if (length as usize) < EEG_FIXED_SIZE {
                return Err(CodecError::PayloadTooShort {
                    packet_type: PacketType::EegData,
                    length,
                });
            }
            if (length as usize - EEG_FIXED_SIZE) % 4 != 0 {
                return Err(CodecError::SampleCountNotIntegral(length));
            }
            Ok(length as usize)
        }
    }
}

fn parse_event(header: PacketHeader, body: &mut BytesMut) -> CodecResult<EventPacket> {
    let code = EventCode::from_raw(body.get_u32());
    let sending_node = body.get_u32();

    let message = if header.payload_length as usize > EVENT_FIXED_SIZE {
        let message_length = body.get_u32();
        if message_length as usize != body.remaining() {
            return Err(CodecError::MessageLengthMismatch {
                message_length,
                payload_length: header.payload_length,
            });
        }
        if !body.is_ascii() {
            return Err(CodecError::InvalidMessage);
        }
        Some(String::from_utf8_lossy(&body[..]).into_owned())
    } else {
        None
    };

    Ok(EventPacket {
        header,
        code,
        sending_node,
        message,
    })
}

fn parse_eeg(header: PacketHeader, body: &mut BytesMut) -> EegDataPacket {
    let timestamp = body.get_f32();
    let data_counter = body.get_u8();

    let mut adc_status = [0u8; 6];
    body.copy_to_slice(&mut adc_status);

    let count = (header.payload_length as usize - EEG_FIXED_SIZE) / 4;
    let sensor_data = (0..count).map(|_| body.get_f32()).collect();

    EegDataPacket {
        header,
        timestamp,
        data_counter,
        adc_status,
        sensor_data,
    }
}

/// Encodes packets into the wire format
///
/// Used by the simulated streamer; the acquisition client never writes to the device.
pub struct Encoder {
    sequence: u32,
}

impl Encoder {
    pub fn new() -> Self {
        Self { sequence: 0 }
    }

    /// Take the next sequence number
    pub fn next_sequence(&mut self) -> u32 {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        sequence
    }

    /// Encode a packet into a buffer
    ///
    /// The payload length is derived from the packet's fields.
    pub fn encode(&self, packet: &Packet, buf: &mut BytesMut) -> CodecResult<()> {
        let mut payload = BytesMut::new();

        match packet {
            Packet::Null(_) => {
                payload.put_bytes(0, NULL_FILLER_SIZE);
            }
            Packet::Event(event) => {
                payload.put_u32(event.code.raw());
                payload.put_u32(event.sending_node);
                if let Some(message) = &event.message {
                    if !message.is_ascii() {
                        return Err(CodecError::InvalidMessage);
                    }
                    payload.put_u32(message.len() as u32);
                    payload.put_slice(message.as_bytes());
                }
            }
            Packet::EegData(eeg) => {
                payload.put_f32(eeg.timestamp);
                payload.put_u8(eeg.data_counter);
                payload.put_slice(&eeg.adc_status);
                for sample in &eeg.sensor_data {
                    payload.put_f32(*sample);
                }
            }
        }

        if payload.len() > u16::MAX as usize {
            return Err(CodecError::PayloadTooLarge(payload.len()));
        }

        buf.put_slice(&MARKER);
        buf.put_u8(packet.packet_type().code());
        buf.put_u16(payload.len() as u16);
        buf.put_u32(packet.sequence());
        buf.put_slice(&payload);

        Ok(())
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}
