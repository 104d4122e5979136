use crate::codec::{self, WordPair};
use crate::modbus::{self, ExceptionCode, Frame, ModbusError, Request, Response, WriteWords};
use crate::registers::RegisterPair;
use thiserror::Error;
use tokio::net::{TcpStream, ToSocketAddrs};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Modbus(#[from] ModbusError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server answered function 0x{function:02X} with exception: {code}")]
    Exception { function: u8, code: ExceptionCode },
    #[error("transaction id mismatch: sent {sent}, received {received}")]
    TransactionMismatch { sent: u16, received: u16 },
    #[error("connection closed by server")]
    Closed,
    #[error("too many registers in one request: {0}")]
    TooMany(usize),
    #[error("unexpected response to {0:?}")]
    UnexpectedResponse(modbus::FunctionCode),
}

/// Minimal Modbus-TCP client for the holding-register functions the node serves.
#[derive(Debug)]
pub struct ModbusClient {
    stream: TcpStream,
    unit_id: u8,
    next_transaction: u16,
}

impl ModbusClient {
    pub async fn connect<A: ToSocketAddrs>(address: A, unit_id: u8) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            unit_id,
            next_transaction: 1,
        })
    }

    pub async fn read_holding_registers(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, ClientError> {
        match self
            .call(Request::ReadHoldingRegisters { address, quantity })
            .await?
        {
            Response::ReadHoldingRegisters(words) => Ok(words.to_vec()),
            _ => Err(ClientError::UnexpectedResponse(
                modbus::FunctionCode::ReadHoldingRegisters,
            )),
        }
    }

    pub async fn write_single_register(&mut self, address: u16, value: u16) -> Result<(), ClientError> {
        self.call(Request::WriteSingleRegister { address, value })
            .await
            .map(|_| ())
    }

    pub async fn write_multiple_registers(&mut self, address: u16, values: &[u16]) -> Result<(), ClientError> {
        let mut words = WriteWords::new();
        words
            .extend_from_slice(values)
            .map_err(|()| ClientError::TooMany(values.len()))?;
        self.call(Request::WriteMultipleRegisters {
            address,
            values: words,
        })
        .await
        .map(|_| ())
    }

    pub async fn read_f32(&mut self, pair: RegisterPair) -> Result<f32, ClientError> {
        let words = self.read_holding_registers(pair.high(), 2).await?;
        codec::decode_slice(&words).ok_or(ClientError::UnexpectedResponse(
            modbus::FunctionCode::ReadHoldingRegisters,
        ))
    }

    /// Write both halves of a float in one request so the node never sees a torn value.
    pub async fn write_f32(&mut self, pair: RegisterPair, value: f32) -> Result<(), ClientError> {
        let WordPair { high, low } = codec::encode(value);
        self.write_multiple_registers(pair.high(), &[high, low]).await
    }

    async fn call(&mut self, request: Request) -> Result<Response, ClientError> {
        let transaction_id = self.next_transaction;
        self.next_transaction = self.next_transaction.wrapping_add(1);

        let frame = Frame {
            transaction_id,
            unit_id: self.unit_id,
            pdu: request.encode()?,
        };
        modbus::write_frame(&mut self.stream, &frame).await?;

        let reply = modbus::read_frame(&mut self.stream)
            .await?
            .ok_or(ClientError::Closed)?;
        if reply.transaction_id != transaction_id {
            return Err(ClientError::TransactionMismatch {
                sent: transaction_id,
                received: reply.transaction_id,
            });
        }

        match Response::decode(request.function(), &reply.pdu)? {
            Response::Exception { function, code } => Err(ClientError::Exception { function, code }),
            response => Ok(response),
        }
    }
}
