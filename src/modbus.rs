//! Modbus-TCP application protocol.
//!
//! Only the holding-register subset the node exposes is modelled:
//! Read Holding Registers (0x03), Write Single Register (0x06) and Write
//! Multiple Registers (0x10). Frames are an MBAP header followed by the PDU;
//! all multi-byte fields are big-endian.
//!
//! Requests that parse as a frame but are not acceptable (unknown function,
//! bad quantity, unallocated address) are answered with an exception
//! response. Only a broken MBAP header is treated as a connection error.

use crate::registers::{RegisterBank, RegisterError};
use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MBAP_HEADER_LEN: usize = 7;
pub const MAX_PDU_LEN: usize = 253;
pub const MAX_ADU_LEN: usize = MBAP_HEADER_LEN + MAX_PDU_LEN;
pub const MAX_READ_QUANTITY: u16 = 125;
pub const MAX_WRITE_QUANTITY: u16 = 123;
pub const PROTOCOL_ID: u16 = 0;

const EXCEPTION_FLAG: u8 = 0x80;

pub type Pdu = Vec<u8, MAX_PDU_LEN>;
pub type Adu = Vec<u8, MAX_ADU_LEN>;
pub type ReadWords = Vec<u16, { MAX_READ_QUANTITY as usize }>;
pub type WriteWords = Vec<u16, { MAX_WRITE_QUANTITY as usize }>;

#[derive(Debug, Error)]
pub enum ModbusError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected protocol id {0}")]
    ProtocolId(u16),
    #[error("invalid MBAP length {0}")]
    Length(u16),
    #[error("frame too short: {0} bytes")]
    ShortFrame(usize),
    #[error("unexpected function code 0x{0:02X}")]
    UnexpectedFunction(u8),
    #[error("malformed response")]
    MalformedResponse,
    #[error("request does not fit in one frame")]
    Oversized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FunctionCode {
    ReadHoldingRegisters = 0x03,
    WriteSingleRegister = 0x06,
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x03 => Some(FunctionCode::ReadHoldingRegisters),
            0x06 => Some(FunctionCode::WriteSingleRegister),
            0x10 => Some(FunctionCode::WriteMultipleRegisters),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
#[repr(u8)]
pub enum ExceptionCode {
    #[error("illegal function")]
    IllegalFunction = 0x01,
    #[error("illegal data address")]
    IllegalDataAddress = 0x02,
    #[error("illegal data value")]
    IllegalDataValue = 0x03,
    #[error("server device failure")]
    ServerDeviceFailure = 0x04,
}

impl ExceptionCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(ExceptionCode::IllegalFunction),
            0x02 => Some(ExceptionCode::IllegalDataAddress),
            0x03 => Some(ExceptionCode::IllegalDataValue),
            0x04 => Some(ExceptionCode::ServerDeviceFailure),
            _ => None,
        }
    }
}

impl From<RegisterError> for ExceptionCode {
    fn from(error: RegisterError) -> Self {
        match error {
            RegisterError::Unallocated(_) | RegisterError::OutOfRange { .. } => {
                ExceptionCode::IllegalDataAddress
            }
            RegisterError::BankFull => ExceptionCode::ServerDeviceFailure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Unit id plus PDU length.
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn decode(bytes: &[u8; MBAP_HEADER_LEN]) -> Result<Self, ModbusError> {
        let header = Self {
            transaction_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            unit_id: bytes[6],
        };
        if header.protocol_id != PROTOCOL_ID {
            return Err(ModbusError::ProtocolId(header.protocol_id));
        }
        // At least a function code, at most a full PDU
        if header.length < 2 || usize::from(header.length) > MAX_PDU_LEN + 1 {
            return Err(ModbusError::Length(header.length));
        }
        Ok(header)
    }

    pub fn pdu_len(&self) -> usize {
        usize::from(self.length) - 1
    }
}

/// One MBAP frame with its raw PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub pdu: Pdu,
}

impl Frame {
    pub fn encode(&self) -> Adu {
        let mut adu = Adu::new();
        let length = self.pdu.len() as u16 + 1;
        // Capacity is MBAP header + max PDU, so these cannot overflow
        let _ = adu.extend_from_slice(&self.transaction_id.to_be_bytes());
        let _ = adu.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
        let _ = adu.extend_from_slice(&length.to_be_bytes());
        let _ = adu.push(self.unit_id);
        let _ = adu.extend_from_slice(&self.pdu);
        adu
    }
}

/// Read one frame. `Ok(None)` on a clean end of stream before a header.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>, ModbusError> {
    let mut header_bytes = [0u8; MBAP_HEADER_LEN];
    match reader.read_exact(&mut header_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let header = MbapHeader::decode(&header_bytes)?;

    let mut body = [0u8; MAX_PDU_LEN];
    let pdu_len = header.pdu_len();
    reader.read_exact(&mut body[..pdu_len]).await?;

    let mut pdu = Pdu::new();
    pdu.extend_from_slice(&body[..pdu_len])
        .map_err(|()| ModbusError::Length(header.length))?;

    Ok(Some(Frame {
        transaction_id: header.transaction_id,
        unit_id: header.unit_id,
        pdu,
    }))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<(), ModbusError> {
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadHoldingRegisters { address: u16, quantity: u16 },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleRegisters { address: u16, values: WriteWords },
}

impl Request {
    pub fn function(&self) -> FunctionCode {
        match self {
            Request::ReadHoldingRegisters { .. } => FunctionCode::ReadHoldingRegisters,
            Request::WriteSingleRegister { .. } => FunctionCode::WriteSingleRegister,
            Request::WriteMultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters,
        }
    }

    /// Parse a request PDU. The error is the exception to answer with.
    pub fn decode(pdu: &[u8]) -> Result<Self, ExceptionCode> {
        let (&function, body) = pdu.split_first().ok_or(ExceptionCode::IllegalFunction)?;
        let function = FunctionCode::from_u8(function).ok_or(ExceptionCode::IllegalFunction)?;

        match function {
            FunctionCode::ReadHoldingRegisters => {
                let (address, quantity) = two_words(body)?;
                if quantity == 0 || quantity > MAX_READ_QUANTITY {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                Ok(Request::ReadHoldingRegisters { address, quantity })
            }
            FunctionCode::WriteSingleRegister => {
                let (address, value) = two_words(body)?;
                Ok(Request::WriteSingleRegister { address, value })
            }
            FunctionCode::WriteMultipleRegisters => {
                if body.len() < 5 {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                let (address, quantity) = two_words(&body[..4])?;
                let byte_count = usize::from(body[4]);
                let data = &body[5..];
                if quantity == 0
                    || quantity > MAX_WRITE_QUANTITY
                    || byte_count != usize::from(quantity) * 2
                    || data.len() != byte_count
                {
                    return Err(ExceptionCode::IllegalDataValue);
                }

                let mut values = WriteWords::new();
                for chunk in data.chunks_exact(2) {
                    values
                        .push(u16::from_be_bytes([chunk[0], chunk[1]]))
                        .map_err(|_| ExceptionCode::IllegalDataValue)?;
                }
                Ok(Request::WriteMultipleRegisters { address, values })
            }
        }
    }

    pub fn encode(&self) -> Result<Pdu, ModbusError> {
        let mut pdu = Pdu::new();
        pdu.push(self.function() as u8).map_err(|_| ModbusError::Oversized)?;
        match self {
            Request::ReadHoldingRegisters { address, quantity } => {
                push_words(&mut pdu, &[*address, *quantity])?;
            }
            Request::WriteSingleRegister { address, value } => {
                push_words(&mut pdu, &[*address, *value])?;
            }
            Request::WriteMultipleRegisters { address, values } => {
                push_words(&mut pdu, &[*address, values.len() as u16])?;
                pdu.push((values.len() * 2) as u8).map_err(|_| ModbusError::Oversized)?;
                push_words(&mut pdu, values)?;
            }
        }
        Ok(pdu)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadHoldingRegisters(ReadWords),
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleRegisters { address: u16, quantity: u16 },
    Exception { function: u8, code: ExceptionCode },
}

impl Response {
    pub fn exception(function: u8, code: ExceptionCode) -> Self {
        Response::Exception {
            function: function & !EXCEPTION_FLAG,
            code,
        }
    }

    pub fn encode(&self) -> Pdu {
        let mut pdu = Pdu::new();
        // Largest response is 2 + 2 * 125 bytes, well inside the PDU capacity
        match self {
            Response::ReadHoldingRegisters(words) => {
                let _ = pdu.push(FunctionCode::ReadHoldingRegisters as u8);
                let _ = pdu.push((words.len() * 2) as u8);
                let _ = push_words(&mut pdu, words);
            }
            Response::WriteSingleRegister { address, value } => {
                let _ = pdu.push(FunctionCode::WriteSingleRegister as u8);
                let _ = push_words(&mut pdu, &[*address, *value]);
            }
            Response::WriteMultipleRegisters { address, quantity } => {
                let _ = pdu.push(FunctionCode::WriteMultipleRegisters as u8);
                let _ = push_words(&mut pdu, &[*address, *quantity]);
            }
            Response::Exception { function, code } => {
                let _ = pdu.push(function | EXCEPTION_FLAG);
                let _ = pdu.push(*code as u8);
            }
        }
        pdu
    }

    /// Parse a response PDU to a request with function `expected`.
    pub fn decode(expected: FunctionCode, pdu: &[u8]) -> Result<Self, ModbusError> {
        let (&function, body) = pdu.split_first().ok_or(ModbusError::ShortFrame(0))?;

        if function == expected as u8 | EXCEPTION_FLAG {
            let code = body
                .first()
                .copied()
                .and_then(ExceptionCode::from_u8)
                .ok_or(ModbusError::MalformedResponse)?;
            return Ok(Response::exception(function, code));
        }
        if function != expected as u8 {
            return Err(ModbusError::UnexpectedFunction(function));
        }

        match expected {
            FunctionCode::ReadHoldingRegisters => {
                let (&byte_count, data) = body.split_first().ok_or(ModbusError::MalformedResponse)?;
                if usize::from(byte_count) != data.len() || data.len() % 2 != 0 {
                    return Err(ModbusError::MalformedResponse);
                }
                let mut words = ReadWords::new();
                for chunk in data.chunks_exact(2) {
                    words
                        .push(u16::from_be_bytes([chunk[0], chunk[1]]))
                        .map_err(|_| ModbusError::MalformedResponse)?;
                }
                Ok(Response::ReadHoldingRegisters(words))
            }
            FunctionCode::WriteSingleRegister => {
                let (address, value) = two_words(body).map_err(|_| ModbusError::MalformedResponse)?;
                Ok(Response::WriteSingleRegister { address, value })
            }
            FunctionCode::WriteMultipleRegisters => {
                let (address, quantity) = two_words(body).map_err(|_| ModbusError::MalformedResponse)?;
                Ok(Response::WriteMultipleRegisters { address, quantity })
            }
        }
    }
}

/// Apply a request to the bank. Failed requests leave the bank untouched.
pub fn execute(bank: &mut RegisterBank, request: &Request) -> Response {
    let function = request.function() as u8;
    let result = match request {
        Request::ReadHoldingRegisters { address, quantity } => {
            if *quantity == 0 || *quantity > MAX_READ_QUANTITY {
                return Response::exception(function, ExceptionCode::IllegalDataValue);
            }
            let count = usize::from(*quantity);
            let mut words = [0u16; MAX_READ_QUANTITY as usize];
            bank.read_range(*address, &mut words[..count]).map(|()| {
                let mut out = ReadWords::new();
                let _ = out.extend_from_slice(&words[..count]);
                Response::ReadHoldingRegisters(out)
            })
        }
        Request::WriteSingleRegister { address, value } => {
            bank.write(*address, *value)
                .map(|()| Response::WriteSingleRegister {
                    address: *address,
                    value: *value,
                })
        }
        Request::WriteMultipleRegisters { address, values } => {
            if values.is_empty() {
                return Response::exception(function, ExceptionCode::IllegalDataValue);
            }
            bank.write_range(*address, values)
                .map(|()| Response::WriteMultipleRegisters {
                    address: *address,
                    quantity: values.len() as u16,
                })
        }
    };

    result.unwrap_or_else(|e| Response::exception(function, e.into()))
}

/// Decode and execute one request frame, producing the reply frame.
pub fn handle_frame(bank: &mut RegisterBank, frame: &Frame) -> Frame {
    let response = match Request::decode(&frame.pdu) {
        Ok(request) => execute(bank, &request),
        Err(code) => Response::exception(frame.pdu.first().copied().unwrap_or(0), code),
    };
    Frame {
        transaction_id: frame.transaction_id,
        unit_id: frame.unit_id,
        pdu: response.encode(),
    }
}

fn two_words(body: &[u8]) -> Result<(u16, u16), ExceptionCode> {
    match body {
        [a0, a1, b0, b1] => Ok((
            u16::from_be_bytes([*a0, *a1]),
            u16::from_be_bytes([*b0, *b1]),
        )),
        _ => Err(ExceptionCode::IllegalDataValue),
    }
}

fn push_words(pdu: &mut Pdu, words: &[u16]) -> Result<(), ModbusError> {
    for word in words {
        pdu.extend_from_slice(&word.to_be_bytes())
            .map_err(|()| ModbusError::Oversized)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::RegisterPair;

    fn bank() -> RegisterBank {
        let mut bank = RegisterBank::new();
        bank.allocate_pair(RegisterPair(0)).unwrap();
        bank.allocate_pair(RegisterPair(4)).unwrap();
        bank
    }

    fn frame(pdu: &[u8]) -> Frame {
        let mut buf = Pdu::new();
        buf.extend_from_slice(pdu).unwrap();
        Frame {
            transaction_id: 0x1234,
            unit_id: 1,
            pdu: buf,
        }
    }

    #[test]
    fn test_read_holding_registers() {
        let mut bank = bank();
        bank.write_range(0, &[0x41C0, 0x0000]).unwrap();

        let reply = handle_frame(&mut bank, &frame(&[0x03, 0x00, 0x00, 0x00, 0x02]));
        assert_eq!(reply.transaction_id, 0x1234);
        assert_eq!(reply.unit_id, 1);
        assert_eq!(&reply.pdu[..], &[0x03, 0x04, 0x41, 0xC0, 0x00, 0x00]);
    }

    #[test]
    fn test_read_gap_is_illegal_address() {
        let mut bank = bank();
        // Cells 2 and 3 are not allocated
        let reply = handle_frame(&mut bank, &frame(&[0x03, 0x00, 0x00, 0x00, 0x06]));
        assert_eq!(&reply.pdu[..], &[0x83, 0x02]);
    }

    #[test]
    fn test_unknown_function() {
        let mut bank = bank();
        let reply = handle_frame(&mut bank, &frame(&[0x04, 0x00, 0x00, 0x00, 0x01]));
        assert_eq!(&reply.pdu[..], &[0x84, 0x01]);
    }

    #[test]
    fn test_read_quantity_limits() {
        assert_eq!(
            Request::decode(&[0x03, 0x00, 0x00, 0x00, 0x00]),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(
            Request::decode(&[0x03, 0x00, 0x00, 0x00, 126]),
            Err(ExceptionCode::IllegalDataValue)
        );
    }

    #[test]
    fn test_write_multiple_byte_count_mismatch() {
        // Quantity 2 but byte count 3
        assert_eq!(
            Request::decode(&[0x10, 0x00, 0x00, 0x00, 0x02, 0x03, 0x41, 0xC8, 0x00]),
            Err(ExceptionCode::IllegalDataValue)
        );
    }

    #[test]
    fn test_write_multiple_applies_pair() {
        let mut bank = bank();
        let reply = handle_frame(
            &mut bank,
            &frame(&[0x10, 0x00, 0x04, 0x00, 0x02, 0x04, 0x41, 0xC8, 0x00, 0x00]),
        );
        assert_eq!(&reply.pdu[..], &[0x10, 0x00, 0x04, 0x00, 0x02]);
        assert_eq!(bank.read_f32(RegisterPair(4)), Ok(25.0));
    }

    #[test]
    fn test_write_single_unallocated_leaves_bank() {
        let mut bank = bank();
        let reply = handle_frame(&mut bank, &frame(&[0x06, 0x00, 0x02, 0x12, 0x34]));
        assert_eq!(&reply.pdu[..], &[0x86, 0x02]);
        assert_eq!(bank.len(), 4);
    }

    #[test]
    fn test_header_rejects_foreign_protocol() {
        let bytes = [0x00, 0x01, 0x00, 0x07, 0x00, 0x06, 0x01];
        assert!(matches!(
            MbapHeader::decode(&bytes),
            Err(ModbusError::ProtocolId(7))
        ));
    }

    #[test]
    fn test_header_rejects_empty_pdu() {
        let bytes = [0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x01];
        assert!(matches!(MbapHeader::decode(&bytes), Err(ModbusError::Length(1))));
    }

    #[test]
    fn test_frame_encoding() {
        let adu = frame(&[0x03, 0x00, 0x00, 0x00, 0x02]).encode();
        assert_eq!(
            &adu[..],
            &[0x12, 0x34, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02]
        );
    }

    #[test]
    fn test_exception_response_decoding() {
        let response = Response::decode(FunctionCode::WriteSingleRegister, &[0x86, 0x02]).unwrap();
        assert_eq!(
            response,
            Response::Exception {
                function: 0x06,
                code: ExceptionCode::IllegalDataAddress
            }
        );
    }

    #[test]
    fn test_execute_rejects_oversized_read() {
        let mut bank = bank();
        let request = Request::ReadHoldingRegisters {
            address: 0,
            quantity: 200,
        };
        assert_eq!(
            execute(&mut bank, &request),
            Response::Exception {
                function: 0x03,
                code: ExceptionCode::IllegalDataValue
            }
        );

        let request = Request::ReadHoldingRegisters {
            address: 0,
            quantity: 0,
        };
        assert_eq!(
            execute(&mut bank, &request).encode().as_slice(),
            &[0x83, 0x03]
        );
    }

    #[test]
    fn test_execute_rejects_empty_write() {
        let mut bank = bank();
        let request = Request::WriteMultipleRegisters {
            address: 0,
            values: WriteWords::new(),
        };
        assert_eq!(execute(&mut bank, &request).encode().as_slice(), &[0x90, 0x03]);
    }

    #[test]
    fn test_register_errors_map_to_exceptions() {
        assert_eq!(
            ExceptionCode::from(RegisterError::Unallocated(2)),
            ExceptionCode::IllegalDataAddress
        );
        assert_eq!(
            ExceptionCode::from(RegisterError::OutOfRange { start: 65535, count: 2 }),
            ExceptionCode::IllegalDataAddress
        );
        assert_eq!(
            ExceptionCode::from(RegisterError::BankFull),
            ExceptionCode::ServerDeviceFailure
        );
    }

    #[test]
    fn test_device_failure_response_decoding() {
        let response = Response::decode(FunctionCode::ReadHoldingRegisters, &[0x83, 0x04]).unwrap();
        assert_eq!(response.encode().as_slice(), &[0x83, 0x04]);
        assert!(matches!(
            response,
            Response::Exception {
                code: ExceptionCode::ServerDeviceFailure,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_read_frame_from_stream() {
        let bytes: &[u8] = &[0x00, 0x09, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03, 0x00, 0x04, 0x00, 0x02];
        let mut reader = bytes;
        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame.transaction_id, 9);
        assert_eq!(frame.unit_id, 0x11);
        assert_eq!(&frame.pdu[..], &[0x03, 0x00, 0x04, 0x00, 0x02]);

        // Stream is exhausted
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }
}
