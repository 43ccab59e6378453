//! Ephemeral key exchange for the sealed channel.
//!
//! Each side sends a fresh X25519 public key as a fixed-size unencrypted
//! preamble and reads the peer's. The raw shared secret is never used as a
//! cipher key: HKDF-SHA256, salted with both public keys in
//! initiator-then-responder order, derives one ChaCha20-Poly1305 key per
//! direction so the two directions of a leg get independent sequence spaces.
//!
//! The exchange is deliberately unauthenticated. It gives confidentiality
//! and integrity against passive observers and off-path tampering, with
//! forward secrecy from the per-session ephemeral keys, but it does not
//! verify who terminates the other end of the leg. Deployments that need
//! hop authentication must front the relay with an authenticated transport.

use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::TransportError;

/// Wire length of the public-key preamble.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of one derived directional key.
pub const KEY_LEN: usize = 32;

const INFO_INITIATOR: &[u8] = b"saltpipe v1 initiator";
const INFO_RESPONDER: &[u8] = b"saltpipe v1 responder";

/// Which side of a leg this endpoint is. The dialer is the initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Directional keys derived from one completed exchange.
///
/// Zeroized on drop; the sealed stream copies these into its ciphers at
/// construction and drops them right after.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    /// Key for records this endpoint sends.
    pub send: [u8; KEY_LEN],
    /// Key for records this endpoint receives.
    pub recv: [u8; KEY_LEN],
}

/// Run the preamble exchange on a freshly connected leg.
///
/// Writes our public key, reads the peer's, validates it, and derives the
/// directional keys. Fails on a truncated preamble, an all-zero peer key,
/// or a non-contributory exchange (low-order point); each of these tears
/// the session down rather than continuing with a weak secret.
pub async fn exchange<S>(stream: &mut S, role: Role) -> Result<SessionKeys, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let secret = EphemeralSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);

    stream.write_all(public.as_bytes()).await?;
    stream.flush().await?;

    let mut peer_bytes = [0u8; PUBLIC_KEY_LEN];
    stream.read_exact(&mut peer_bytes).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TransportError::Handshake("peer closed before sending a complete preamble".into())
        } else {
            TransportError::Io(e)
        }
    })?;

    if peer_bytes == [0u8; PUBLIC_KEY_LEN] {
        return Err(TransportError::Handshake("all-zero peer public key".into()));
    }
    let peer_public = PublicKey::from(peer_bytes);

    let shared = secret.diffie_hellman(&peer_public);
    if !shared.was_contributory() {
        return Err(TransportError::Handshake(
            "non-contributory key exchange (low-order peer key)".into(),
        ));
    }

    trace!(peer_key = %hex::encode(&peer_bytes[..8]), ?role, "preamble exchanged");

    derive_keys(shared.as_bytes(), role, public.as_bytes(), &peer_bytes)
}

fn derive_keys(
    shared: &[u8],
    role: Role,
    ours: &[u8; PUBLIC_KEY_LEN],
    theirs: &[u8; PUBLIC_KEY_LEN],
) -> Result<SessionKeys, TransportError> {
    // The salt binds both preambles to the derived keys, in a fixed order
    // so the two sides agree on it.
    let mut salt = [0u8; 2 * PUBLIC_KEY_LEN];
    let (initiator_pk, responder_pk) = match role {
        Role::Initiator => (ours, theirs),
        Role::Responder => (theirs, ours),
    };
    salt[..PUBLIC_KEY_LEN].copy_from_slice(initiator_pk);
    salt[PUBLIC_KEY_LEN..].copy_from_slice(responder_pk);

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);

    let mut keys = SessionKeys {
        send: [0u8; KEY_LEN],
        recv: [0u8; KEY_LEN],
    };
    let (send_info, recv_info) = match role {
        Role::Initiator => (INFO_INITIATOR, INFO_RESPONDER),
        Role::Responder => (INFO_RESPONDER, INFO_INITIATOR),
    };
    hk.expand(send_info, &mut keys.send)
        .map_err(|_| TransportError::Handshake("key derivation failed".into()))?;
    hk.expand(recv_info, &mut keys.recv)
        .map_err(|_| TransportError::Handshake("key derivation failed".into()))?;

    salt.zeroize();
    Ok(keys)
}
