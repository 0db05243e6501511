use std::io::Read;

use crate::error::{Error, Result};

const FIN_BIT: u8 = 0b10000000;
const MASK_BIT: u8 = 0b10000000;
const OPCODE_BITS: u8 = 0b00001111;
const LENGTH_BITS: u8 = 0b01111111;

#[derive(PartialEq, Debug, Clone, Copy)]
pub enum Opcode {
    Text,
    Close,
}

impl Opcode {
    fn from_u8(value: u8) -> Option<Opcode> {
        match value {
            0x01 => Some(Opcode::Text),
            0x08 => Some(Opcode::Close),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Opcode::Text => 0x01,
            Opcode::Close => 0x08,
        }
    }
}

#[derive(PartialEq, Debug, Clone, Copy)]
enum PayloadLengthType {
    // The 7 bit length field is the length.
    Normal,

    // Length field is 126, a 16 bit length follows.
    Extended,

    // Length field is 127, a 64 bit length follows.
    LongExtended,
}

impl PayloadLengthType {
    fn from_number(value: u8) -> PayloadLengthType {
        match value {
            126 => PayloadLengthType::Extended,
            127 => PayloadLengthType::LongExtended,
            _ => PayloadLengthType::Normal,
        }
    }

    fn extended_bytes(self) -> usize {
        match self {
            PayloadLengthType::Normal => 0,
            PayloadLengthType::Extended => 2,
            PayloadLengthType::LongExtended => 8,
        }
    }
}

#[derive(PartialEq, Debug, Clone)]
pub struct DataFrame {
    pub opcode: Opcode,
    pub payload_bytes: Vec<u8>,

    // Only set for frames read off the wire; frames we send are never masked.
    pub masking_key: Option<[u8; 4]>,
}

impl DataFrame {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload_bytes).into_owned()
    }

    /// Status code carried in the first two bytes of a close frame, if any.
    pub fn close_code(&self) -> Option<u16> {
        if self.opcode != Opcode::Close || self.payload_bytes.len() < 2 {
            return None;
        }

        Some(u16::from_be_bytes([self.payload_bytes[0], self.payload_bytes[1]]))
    }
}

struct UnfinishedDataFrame {
    opcode: Opcode,
    payload_length_type: PayloadLengthType,
    payload_length: u64,
    masking_key: [u8; 4],
    payload_bytes: Vec<u8>,
}

pub trait DataFrameReceiver {
    fn receive(&mut self, frame: DataFrame);
}

#[derive(PartialEq, Debug)]
enum ParserState {
    // We are waiting for the first byte of the frame.
    FirstByte,

    // We are waiting for the payload length byte of the frame.
    PayloadLength,

    // Optional state that happens if the length byte is 126 or 127. Here, we wait for all the bytes to finish the extended payload length.
    ExtendedPayloadLength,

    // We are reading the bytes of the masking key.
    MaskingKey,

    // We are reading the bytes of the payload.
    Payload,
}

/// Incremental parser for client-to-server frames.
///
/// Bytes can arrive in any chunking; every completed frame is handed to a
/// [`DataFrameReceiver`]. Only unfragmented, masked text and close frames are
/// accepted, anything else is a protocol violation.
pub struct FrameParser {
    unfinished_frame: Option<UnfinishedDataFrame>,
    state: ParserState,

    // A buffer used when reading the multi-byte header fields
    byte_buffer: Vec<u8>,
}

// Upper bound for a single read while collecting payload bytes.
const READ_CHUNK: usize = 4096;

impl FrameParser {
    pub fn new() -> FrameParser {
        FrameParser {
            unfinished_frame: None,
            state: ParserState::FirstByte,
            byte_buffer: Vec::with_capacity(8),
        }
    }

    /// How many bytes the parser can take before it has to look at them.
    ///
    /// Feeding at most this many bytes at a time never consumes anything past
    /// the end of the current frame.
    pub fn bytes_needed(&self) -> usize {
        match (&self.state, &self.unfinished_frame) {
            (ParserState::ExtendedPayloadLength, Some(frame)) => {
                frame.payload_length_type.extended_bytes() - self.byte_buffer.len()
            }
            (ParserState::MaskingKey, _) => 4 - self.byte_buffer.len(),
            (ParserState::Payload, Some(frame)) => {
                let remaining = frame.payload_length - frame.payload_bytes.len() as u64;
                remaining.min(READ_CHUNK as u64) as usize
            }
            _ => 1,
        }
    }

    pub fn parse_bytes(&mut self, bytes: &[u8], receiver: &mut dyn DataFrameReceiver) -> Result<()> {
        let mut offset = 0;
        while offset < bytes.len() {
            match self.parse_step(&bytes[offset..], receiver) {
                Ok(consumed) => offset += consumed,
                Err(err) => {
                    self.reset();
                    return Err(err);
                }
            }
        }

        Ok(())
    }

    /// Reads exactly one frame from `reader`.
    pub fn decode<R: Read>(&mut self, reader: &mut R) -> Result<DataFrame> {
        let mut collector = SingleFrame(None);
        let mut buffer = [0u8; READ_CHUNK];

        loop {
            let needed = self.bytes_needed();
            reader
                .read_exact(&mut buffer[..needed])
                .map_err(Error::from_read)?;
            self.parse_bytes(&buffer[..needed], &mut collector)?;

            if let Some(frame) = collector.0.take() {
                return Ok(frame);
            }
        }
    }

    fn parse_step(&mut self, bytes: &[u8], receiver: &mut dyn DataFrameReceiver) -> Result<usize> {
        match self.state {
            ParserState::FirstByte => self.parse_first_byte(bytes[0]),
            ParserState::PayloadLength => self.parse_payload_length(bytes[0]),
            ParserState::ExtendedPayloadLength => Ok(self.parse_extended_payload_length(bytes)),
            ParserState::MaskingKey => Ok(self.parse_masking_key(bytes, receiver)),
            ParserState::Payload => Ok(self.parse_payload(bytes, receiver)),
        }
    }

    fn parse_first_byte(&mut self, byte: u8) -> Result<usize> {
        if byte & FIN_BIT != FIN_BIT {
            return Err(Error::ProtocolViolation(
                "continuation frames are not supported".to_owned(),
            ));
        }

        let opcode = Opcode::from_u8(byte & OPCODE_BITS).ok_or_else(|| {
            Error::ProtocolViolation(format!("unsupported opcode {:#x}", byte & OPCODE_BITS))
        })?;

        self.unfinished_frame = Some(UnfinishedDataFrame {
            opcode,
            payload_length_type: PayloadLengthType::Normal,
            payload_length: 0,
            masking_key: [0; 4],
            payload_bytes: Vec::new(),
        });

        self.state = ParserState::PayloadLength;
        Ok(1)
    }

    fn parse_payload_length(&mut self, byte: u8) -> Result<usize> {
        if byte & MASK_BIT != MASK_BIT {
            return Err(Error::ProtocolViolation(
                "client frames must be masked".to_owned(),
            ));
        }

        let unfinished_frame = self.current_frame();
        let payload_length = byte & LENGTH_BITS;
        unfinished_frame.payload_length_type = PayloadLengthType::from_number(payload_length);

        if unfinished_frame.payload_length_type == PayloadLengthType::Normal {
            unfinished_frame.payload_length = payload_length as u64;
            self.state = ParserState::MaskingKey;
        } else {
            self.state = ParserState::ExtendedPayloadLength;
        }

        Ok(1)
    }

    fn parse_extended_payload_length(&mut self, bytes: &[u8]) -> usize {
        let taken = self.bytes_needed().min(bytes.len());
        self.byte_buffer.extend_from_slice(&bytes[..taken]);

        if self.bytes_needed() == 0 {
            let payload_length = self
                .byte_buffer
                .iter()
                .fold(0u64, |length, &byte| (length << 8) | byte as u64);
            self.byte_buffer.clear();
            self.current_frame().payload_length = payload_length;
            self.state = ParserState::MaskingKey;
        }

        taken
    }

    fn parse_masking_key(&mut self, bytes: &[u8], receiver: &mut dyn DataFrameReceiver) -> usize {
        let taken = self.bytes_needed().min(bytes.len());
        self.byte_buffer.extend_from_slice(&bytes[..taken]);

        if self.byte_buffer.len() == 4 {
            let mut masking_key = [0; 4];
            masking_key.copy_from_slice(&self.byte_buffer);
            self.byte_buffer.clear();

            let unfinished_frame = self.current_frame();
            unfinished_frame.masking_key = masking_key;
            // Do not trust the announced length for the allocation.
            let capacity = unfinished_frame.payload_length.min(READ_CHUNK as u64) as usize;
            unfinished_frame.payload_bytes.reserve(capacity);

            if unfinished_frame.payload_length > 0 {
                self.state = ParserState::Payload;
            } else {
                self.finish_frame(receiver);
            }
        }

        taken
    }

    fn parse_payload(&mut self, bytes: &[u8], receiver: &mut dyn DataFrameReceiver) -> usize {
        let unfinished_frame = self.current_frame();
        let remaining = unfinished_frame.payload_length - unfinished_frame.payload_bytes.len() as u64;
        let taken = remaining.min(bytes.len() as u64) as usize;

        for &byte in &bytes[..taken] {
            let index = unfinished_frame.payload_bytes.len();
            let key = unfinished_frame.masking_key[index % 4];
            unfinished_frame.payload_bytes.push(byte ^ key);
        }

        if unfinished_frame.payload_bytes.len() as u64 == unfinished_frame.payload_length {
            self.finish_frame(receiver);
        }

        taken
    }

    fn finish_frame(&mut self, receiver: &mut dyn DataFrameReceiver) {
        if let Some(finished_frame) = self.unfinished_frame.take() {
            receiver.receive(DataFrame {
                opcode: finished_frame.opcode,
                payload_bytes: finished_frame.payload_bytes,
                masking_key: Some(finished_frame.masking_key),
            });
        }

        self.state = ParserState::FirstByte;
    }

    fn current_frame(&mut self) -> &mut UnfinishedDataFrame {
        // Every state after FirstByte is entered with a frame in progress.
        self.unfinished_frame.get_or_insert_with(|| UnfinishedDataFrame {
            opcode: Opcode::Text,
            payload_length_type: PayloadLengthType::Normal,
            payload_length: 0,
            masking_key: [0; 4],
            payload_bytes: Vec::new(),
        })
    }

    fn reset(&mut self) {
        self.unfinished_frame = None;
        self.byte_buffer.clear();
        self.state = ParserState::FirstByte;
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        FrameParser::new()
    }
}

struct SingleFrame(Option<DataFrame>);

impl DataFrameReceiver for SingleFrame {
    fn receive(&mut self, frame: DataFrame) {
        self.0 = Some(frame);
    }
}

/// Reads one frame from `reader`.
pub fn decode<R: Read>(reader: &mut R) -> Result<DataFrame> {
    FrameParser::new().decode(reader)
}

/// Builds a single unfragmented, unmasked text frame.
pub fn encode_text_frame(message: &[u8]) -> Vec<u8> {
    let length = message.len();
    let mut frame = Vec::with_capacity(length + 10);
    frame.push(FIN_BIT | Opcode::Text.as_u8());

    if length < 126 {
        frame.push(length as u8);
    } else if length < 65536 {
        frame.push(126);
        frame.extend_from_slice(&(length as u16).to_be_bytes());
    } else {
        frame.push(127);
        frame.extend_from_slice(&(length as u64).to_be_bytes());
    }

    frame.extend_from_slice(message);
    frame
}
