use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{SessionError, WireError};

use super::PeerId;

pub const HANDSHAKE_HEADER: &[u8; 18] = b"P2PFILESHARINGPROJ";
pub const HANDSHAKE_ZERO_BITS: usize = 10;
pub const HANDSHAKE_LEN: usize = 32;

const PREFIX_LEN: usize = HANDSHAKE_HEADER.len() + HANDSHAKE_ZERO_BITS;

/// `header(18) || zero(10) || peer_id(4, big-endian)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(peer_id: PeerId) -> Self {
        Self { peer_id }
    }

    pub fn to_bytes(&self) -> [u8; HANDSHAKE_LEN] {
        let mut bytes = [0; HANDSHAKE_LEN];

        bytes[..HANDSHAKE_HEADER.len()].copy_from_slice(HANDSHAKE_HEADER);
        bytes[PREFIX_LEN..].copy_from_slice(&self.peer_id.to_be_bytes());

        bytes
    }

    /// Checks length and the header/zero region; the identity field is not validated.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() != HANDSHAKE_LEN {
            return Err(WireError::BadHandshakeLength(bytes.len()));
        }

        let (header, zeros) = bytes[..PREFIX_LEN].split_at(HANDSHAKE_HEADER.len());
        if header != HANDSHAKE_HEADER || zeros.iter().any(|&b| b != 0) {
            return Err(WireError::BadHandshakeHeader);
        }

        let mut id = [0; 4];
        id.copy_from_slice(&bytes[PREFIX_LEN..]);

        Ok(Self {
            peer_id: PeerId::from_be_bytes(id),
        })
    }

    pub async fn send<W>(&self, stream: &mut W) -> Result<(), WireError>
    where
        W: AsyncWrite + Unpin,
    {
        stream.write_all(&self.to_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }

    pub async fn recv<R>(stream: &mut R) -> Result<Self, WireError>
    where
        R: AsyncRead + Unpin,
    {
        let mut bytes = [0; HANDSHAKE_LEN];
        stream.read_exact(&mut bytes).await?;

        Self::from_bytes(&bytes)
    }
}

/// Handshake on a connection we opened: send ours, then expect `expected` back.
pub async fn outgoing_handshake<S>(stream: &mut S, local_id: PeerId, expected: PeerId) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    Handshake::new(local_id).send(stream).await?;

    let remote = Handshake::recv(stream).await?;
    if remote.peer_id != expected {
        return Err(SessionError::IdentityMismatch {
            expected,
            actual: remote.peer_id,
        });
    }

    Ok(())
}

/// Handshake on an accepted connection: read theirs, then answer with ours.
pub async fn incoming_handshake<S>(stream: &mut S, local_id: PeerId) -> Result<PeerId, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let remote = Handshake::recv(stream).await?;
    Handshake::new(local_id).send(stream).await?;

    Ok(remote.peer_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_layout() {
        let bytes = Handshake::new(1001).to_bytes();

        assert_eq!(bytes.len(), HANDSHAKE_LEN);
        assert_eq!(&bytes[..18], HANDSHAKE_HEADER);
        assert!(bytes[18..28].iter().all(|&b| b == 0));
        assert_eq!(&bytes[28..], &1001u32.to_be_bytes());
    }

    #[test]
    fn test_handshake_round_trip() {
        for id in [0, 1, 1001, 0xDEAD_BEEF, u32::MAX] {
            let decoded = Handshake::from_bytes(&Handshake::new(id).to_bytes()).unwrap();
            assert_eq!(decoded.peer_id, id);
        }
    }

    #[test]
    fn test_handshake_wrong_length() {
        let bytes = Handshake::new(7).to_bytes();

        assert!(matches!(Handshake::from_bytes(&bytes[..31]), Err(WireError::BadHandshakeLength(31))));
        assert!(matches!(Handshake::from_bytes(&[]), Err(WireError::BadHandshakeLength(0))));

        let mut long = bytes.to_vec();
        long.push(0);
        assert!(matches!(Handshake::from_bytes(&long), Err(WireError::BadHandshakeLength(33))));
    }

    #[test]
    fn test_handshake_corrupted_prefix() {
        for position in [0, 17, 18, 27] {
            let mut bytes = Handshake::new(7).to_bytes();
            bytes[position] ^= 0x01;
            assert!(
                matches!(Handshake::from_bytes(&bytes), Err(WireError::BadHandshakeHeader)),
                "corruption at byte {position} was accepted"
            );
        }
    }

    #[tokio::test]
    async fn test_handshake_exchange_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let server_task = tokio::spawn(async move { incoming_handshake(&mut server, 2).await });

        outgoing_handshake(&mut client, 1, 2).await.unwrap();
        assert_eq!(server_task.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_outgoing_handshake_identity_mismatch() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let server_task = tokio::spawn(async move { incoming_handshake(&mut server, 3).await });

        let result = outgoing_handshake(&mut client, 1, 2).await;
        assert!(matches!(
            result,
            Err(SessionError::IdentityMismatch { expected: 2, actual: 3 })
        ));
        server_task.await.unwrap().unwrap();
    }
}
