//! Length-prefixed wire frames carrying raw bytes or `f32` payloads.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{LEN_TYPE_SIZE, LenType};

/// The sending end of one rank-to-rank link.
pub(crate) struct FrameSender<W: AsyncWrite + Unpin> {
    tx: W,
}

impl<W: AsyncWrite + Unpin> FrameSender<W> {
    pub(crate) fn new(tx: W) -> Self {
        Self { tx }
    }

    /// Sends `payload` as a single frame.
    pub(crate) async fn send_bytes(&mut self, payload: &[u8]) -> io::Result<()> {
        let header = (payload.len() as LenType).to_be_bytes();
        self.tx.write_all(&header).await?;
        self.tx.write_all(payload).await?;
        self.tx.flush().await
    }

    /// Sends an `f32` slice as a single frame, without copying the payload.
    pub(crate) async fn send_f32s(&mut self, payload: &[f32]) -> io::Result<()> {
        self.send_bytes(bytemuck::cast_slice(payload)).await
    }
}

/// The receiving end of one rank-to-rank link.
pub(crate) struct FrameReceiver<R: AsyncRead + Unpin> {
    rx: R,
}

impl<R: AsyncRead + Unpin> FrameReceiver<R> {
    pub(crate) fn new(rx: R) -> Self {
        Self { rx }
    }

    async fn read_len(&mut self) -> io::Result<usize> {
        let mut size_buf = [0; LEN_TYPE_SIZE];
        self.rx.read_exact(&mut size_buf).await?;
        Ok(LenType::from_be_bytes(size_buf) as usize)
    }

    /// Receives a frame that must hold exactly `N` bytes.
    pub(crate) async fn recv_exact<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let len = self.read_len().await?;
        if len != N {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame length mismatch: got {len} bytes, expected {N}"),
            ));
        }

        let mut buf = [0; N];
        self.rx.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Receives a frame that must hold exactly `out.len()` `f32` values.
    pub(crate) async fn recv_f32s_into(&mut self, out: &mut [f32]) -> io::Result<()> {
        let len = self.read_len().await?;
        let expected = out.len() * size_of::<f32>();
        if len != expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame length mismatch: got {len} bytes, expected {expected}"),
            ));
        }

        self.rx.read_exact(bytemuck::cast_slice_mut(out)).await?;
        Ok(())
    }
}
