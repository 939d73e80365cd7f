//! 传输层
//!
//! 帧格式：1 字节版本号 + 4 字节大端长度 + JSON 消息体，消息体不超过 64 KiB。
//! 服务端把连接拆成读写两端分别交给不同任务；客户端和测试直接使用 [`Connection`]。

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::{ProtocolError, Result};
use crate::{CONNECT_TIMEOUT, MAX_FRAME_SIZE, PROTOCOL_VERSION};

/// 双向消息连接
#[async_trait]
pub trait Connection: Send + Sync {
    async fn send<M: Serialize + Send + Sync>(&mut self, msg: &M) -> Result<()>;

    async fn recv<M: DeserializeOwned>(&mut self) -> Result<M>;

    /// 关闭写端，对方随后读到连接关闭
    async fn close(&mut self) -> Result<()>;

    fn peer_addr(&self) -> Option<String>;
}

/// 主动建立连接
#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: Connection;

    async fn connect(&self, addr: &str) -> Result<Self::Conn>;
}

/// 被动接受连接
#[async_trait]
pub trait Listener: Send + Sync + Sized {
    type Conn: Connection;

    async fn bind(addr: &str) -> Result<Self>;

    async fn accept(&mut self) -> Result<Self::Conn>;

    fn local_addr(&self) -> Option<String>;
}

// ============================================================================
// 帧编解码
// ============================================================================

/// 帧头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameHeader {
    length: usize,
}

impl FrameHeader {
    const SIZE: usize = 5;

    fn new(length: usize) -> Result<Self> {
        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(Self { length })
    }

    fn decode(bytes: [u8; Self::SIZE]) -> Result<Self> {
        let [version, len @ ..] = bytes;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: version,
            });
        }
        Self::new(u32::from_be_bytes(len) as usize)
    }

    fn encode(self) -> [u8; Self::SIZE] {
        let [a, b, c, d] = (self.length as u32).to_be_bytes();
        [PROTOCOL_VERSION, a, b, c, d]
    }
}

/// 把消息编码成完整的一帧
pub fn encode_frame<M: Serialize + ?Sized>(msg: &M) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(msg)?;
    let header = FrameHeader::new(payload.len())?;

    let mut frame = Vec::with_capacity(FrameHeader::SIZE + payload.len());
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn closed_on_eof(e: std::io::Error) -> ProtocolError {
    match e.kind() {
        std::io::ErrorKind::UnexpectedEof => ProtocolError::ConnectionClosed,
        _ => ProtocolError::Io(e),
    }
}

/// 读端，复用同一块缓冲区
pub struct FrameReader<R> {
    reader: R,
    payload: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            payload: Vec::new(),
        }
    }

    /// 读取一帧并解析为 `M`
    ///
    /// 消息体不是合法 JSON 时返回 [`ProtocolError::Json`]，此时整帧已被消费，可以继续读下一帧。
    pub async fn recv<M: DeserializeOwned>(&mut self) -> Result<M> {
        let mut header = [0u8; FrameHeader::SIZE];
        self.reader
            .read_exact(&mut header)
            .await
            .map_err(closed_on_eof)?;
        let header = FrameHeader::decode(header)?;

        self.payload.resize(header.length, 0);
        self.reader
            .read_exact(&mut self.payload)
            .await
            .map_err(closed_on_eof)?;

        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// 写端
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn send<M: Serialize + ?Sized>(&mut self, msg: &M) -> Result<()> {
        let frame = encode_frame(msg)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

// ============================================================================
// TCP
// ============================================================================

pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Conn = TcpConnection;

    async fn connect(&self, addr: &str) -> Result<Self::Conn> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ProtocolError::ConnectionTimeout)??;
        TcpConnection::from_stream(stream)
    }
}

/// TCP 连接
pub struct TcpConnection {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
    peer_addr: Option<String>,
}

impl TcpConnection {
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr().ok().map(|a| a.to_string());
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half),
            peer_addr,
        })
    }

    /// 拆分为读端和写端
    pub fn split(self) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
        (self.reader, self.writer)
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn send<M: Serialize + Send + Sync>(&mut self, msg: &M) -> Result<()> {
        self.writer.send(msg).await
    }

    async fn recv<M: DeserializeOwned>(&mut self) -> Result<M> {
        self.reader.recv().await
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await
    }

    fn peer_addr(&self) -> Option<String> {
        self.peer_addr.clone()
    }
}

pub struct TcpListener {
    inner: tokio::net::TcpListener,
}

#[async_trait]
impl Listener for TcpListener {
    type Conn = TcpConnection;

    async fn bind(addr: &str) -> Result<Self> {
        let inner = tokio::net::TcpListener::bind(addr).await?;
        Ok(Self { inner })
    }

    async fn accept(&mut self) -> Result<Self::Conn> {
        let (stream, _) = self.inner.accept().await?;
        TcpConnection::from_stream(stream)
    }

    fn local_addr(&self) -> Option<String> {
        self.inner.local_addr().ok().map(|a| a.to_string())
    }
}
