//! Framed wire format.
//!
//! Each frame is a token (`i64`, little endian), a body length (`u32`,
//! little endian), and a JSON body. Queries are `[op, term, optargs]`
//! arrays; responses are `{t, r, n?, p?, b?}` objects.

use reql_core::datum::Datum;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame body.
pub const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// Read one frame; `None` on a clean EOF at a frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<(i64, Datum)>>
where
    R: AsyncRead + Unpin,
{
    let mut token_buf = [0u8; 8];
    match reader.read_exact(&mut token_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let token = i64::from_le_bytes(token_buf);

    let len = reader.read_u32_le().await?;
    if len > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds the {MAX_FRAME_BYTES} byte limit"),
        ));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;

    let datum = serde_json::from_slice(&body)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    Ok(Some((token, datum)))
}

/// Write one frame.
pub async fn write_frame<W>(writer: &mut W, token: i64, body: &Datum) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = serde_json::to_vec(body)?;
    writer.write_all(&token.to_le_bytes()).await?;
    writer.write_u32_le(bytes.len() as u32).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await
}
