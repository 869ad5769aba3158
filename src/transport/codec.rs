//! Packet Codec (spec §4.6): length-prefixed, optionally-encrypted framing
//! over an async byte stream, with partial-read/partial-write accumulation.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::packet::{HEADER_LEN, Packet, PacketKind};
use crate::crypto::Cipher;
use crate::error::TransportError;

/// Receive one packet. Reads exactly `HEADER_LEN` bytes, then exactly
/// `length - HEADER_LEN` payload bytes, retrying on short reads; a zero-byte
/// read (peer closed) at either stage surfaces as `FrameShort`.
pub async fn read_packet<S>(
    stream: &mut S,
    cipher: Option<&dyn Cipher>,
) -> Result<Packet, TransportError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    read_exact_or_short(stream, &mut header).await?;

    let mut length_bytes = [0u8; 4];
    length_bytes.copy_from_slice(&header[0..4]);
    let total_length = u32::from_be_bytes(length_bytes) as usize;

    let mut type_bytes = [0u8; 4];
    type_bytes.copy_from_slice(&header[4..8]);
    let kind = PacketKind(u32::from_be_bytes(type_bytes));

    if total_length < HEADER_LEN {
        return Err(TransportError::FrameShort);
    }
    let payload_length = total_length - HEADER_LEN;

    let mut payload = vec![0u8; payload_length];
    read_exact_or_short(stream, &mut payload).await?;

    let decoded_bytes = if !kind.is_plaintext() {
        if let Some(cipher) = cipher {
            cipher.decrypt(&payload)?
        } else {
            payload
        }
    } else {
        payload
    };

    Packet::decode_payload(kind, &decoded_bytes).map_err(|_| TransportError::FrameShort)
}

/// Transmit one packet under the caller's exclusion (the session lock, per
/// spec §5). Attaches a request id if missing, optionally registers a
/// completion callback for that id, encrypts non-plaintext payloads when a
/// cipher is installed, then writes header and payload with full-write
/// accumulation loops.
pub async fn write_packet<S>(
    stream: &mut S,
    packet: &mut Packet,
    cipher: Option<&dyn Cipher>,
    mut register_completion: Option<impl FnMut(String)>,
) -> Result<(), TransportError>
where
    S: AsyncWrite + Unpin,
{
    let request_id = packet.ensure_request_id();
    if let Some(register) = register_completion.as_mut() {
        register(request_id);
    }

    let plaintext = packet.encode_payload();
    let wire_payload = if !packet.kind.is_plaintext() {
        match cipher {
            Some(cipher) => cipher.encrypt(&plaintext)?,
            None => plaintext,
        }
    } else {
        plaintext
    };

    let total_length = (HEADER_LEN + wire_payload.len()) as u32;
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&total_length.to_be_bytes());
    header[4..8].copy_from_slice(&packet.kind.0.to_be_bytes());

    write_all_or_err(stream, &header).await?;
    write_all_or_err(stream, &wire_payload).await?;
    Ok(())
}

async fn read_exact_or_short<S>(stream: &mut S, buf: &mut [u8]) -> Result<(), TransportError>
where
    S: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream
            .read(&mut buf[filled..])
            .await
            .map_err(TransportError::Io)?;
        if n == 0 {
            return Err(TransportError::FrameShort);
        }
        filled += n;
    }
    Ok(())
}

async fn write_all_or_err<S>(stream: &mut S, buf: &[u8]) -> Result<(), TransportError>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(buf).await.map_err(TransportError::Io)
}
