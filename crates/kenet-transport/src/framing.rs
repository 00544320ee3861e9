use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::LinkError;

/// Write one length-prefixed frame and flush it.
pub async fn write_framed<W>(writer: &mut W, data: &[u8], max_size: usize) -> Result<(), LinkError>
where
    W: AsyncWrite + Unpin,
{
    if data.len() > max_size {
        return Err(LinkError::FrameTooLarge {
            size: data.len(),
            max: max_size,
        });
    }
    let len = (data.len() as u32).to_be_bytes();
    writer.write_all(&len).await.map_err(LinkError::Send)?;
    writer.write_all(data).await.map_err(LinkError::Send)?;
    writer.flush().await.map_err(LinkError::Send)?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly on a frame
/// boundary. A close in the middle of a frame is `TruncatedFrame`.
pub async fn read_framed<R>(reader: &mut R, max_size: usize) -> Result<Option<Vec<u8>>, LinkError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader
            .read(&mut len_buf[filled..])
            .await
            .map_err(LinkError::Receive)?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(LinkError::TruncatedFrame)
            };
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_size {
        return Err(LinkError::FrameTooLarge {
            size: len,
            max: max_size,
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            LinkError::TruncatedFrame
        } else {
            LinkError::Receive(e)
        }
    })?;
    Ok(Some(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_survive_a_duplex_pipe() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        write_framed(&mut a, b"first", 1024).await.unwrap();
        write_framed(&mut a, b"", 1024).await.unwrap();
        write_framed(&mut a, b"third frame", 1024).await.unwrap();
        drop(a);

        assert_eq!(read_framed(&mut b, 1024).await.unwrap().unwrap(), b"first");
        assert_eq!(read_framed(&mut b, 1024).await.unwrap().unwrap(), b"");
        assert_eq!(
            read_framed(&mut b, 1024).await.unwrap().unwrap(),
            b"third frame"
        );
        assert!(read_framed(&mut b, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_write_is_rejected_before_writing() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let err = write_framed(&mut a, &[0u8; 100], 50).await.unwrap_err();
        assert!(matches!(err, LinkError::FrameTooLarge { size: 100, max: 50 }));

        drop(a);
        assert!(read_framed(&mut b, 50).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(1_000_000u32).to_be_bytes()).await.unwrap();

        let err = read_framed(&mut b, 1024).await.unwrap_err();
        assert!(matches!(err, LinkError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn close_mid_frame_is_truncation() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&10u32.to_be_bytes()).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);

        let err = read_framed(&mut b, 1024).await.unwrap_err();
        assert!(matches!(err, LinkError::TruncatedFrame));
    }

    #[tokio::test]
    async fn close_mid_length_prefix_is_truncation() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[0u8, 0]).await.unwrap();
        drop(a);

        let err = read_framed(&mut b, 1024).await.unwrap_err();
        assert!(matches!(err, LinkError::TruncatedFrame));
    }
}
