//! Record framing for the sealed channel.
//!
//! Wire layout per record: a u16 big-endian ciphertext length, a u64
//! big-endian sequence number, then the ChaCha20-Poly1305 ciphertext with
//! its 16-byte tag. The sequence number doubles as the AEAD nonce (zero
//! padded to 12 bytes), counts up from zero, and must arrive in exact
//! order; the receiver rejects any gap, replay, or reordering outright.

use bytes::{BufMut, BytesMut};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use crate::error::SealError;

/// Maximum plaintext bytes per record.
pub const MAX_RECORD_LEN: usize = 16384;
/// Poly1305 tag length.
pub const TAG_LEN: usize = 16;
/// Record header length on the wire (u16 length + u64 sequence).
pub const HEADER_LEN: usize = 2 + 8;
/// Largest ciphertext length a valid header can claim.
pub const MAX_CIPHERTEXT_LEN: usize = MAX_RECORD_LEN + TAG_LEN;

/// Decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Ciphertext length, tag included.
    pub len: u16,
    /// Sequence number of this record.
    pub seq: u64,
}

impl Header {
    /// Parse and bounds-check a header.
    ///
    /// The length must cover at least one plaintext byte plus the tag
    /// (empty records are illegal, keeping a zero-byte read unambiguous as
    /// end-of-stream) and at most a full record, which bounds the body
    /// allocation before any buffer is reserved.
    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Result<Self, SealError> {
        let len = u16::from_be_bytes([bytes[0], bytes[1]]);
        let mut seq_bytes = [0u8; 8];
        seq_bytes.copy_from_slice(&bytes[2..HEADER_LEN]);
        let seq = u64::from_be_bytes(seq_bytes);

        if (len as usize) <= TAG_LEN || (len as usize) > MAX_CIPHERTEXT_LEN {
            return Err(SealError::FrameLength(len as usize));
        }
        Ok(Self { len, seq })
    }

    /// Encode the header into its wire form.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..2].copy_from_slice(&self.len.to_be_bytes());
        out[2..].copy_from_slice(&self.seq.to_be_bytes());
        out
    }
}

/// AEAD nonce for a sequence number: four zero bytes then the counter.
fn nonce_for(seq: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&seq.to_be_bytes());
    nonce
}

/// Encrypting half of a sealed channel: owns the send key and the send
/// sequence counter.
pub struct Sealer {
    cipher: ChaCha20Poly1305,
    seq: u64,
}

impl Sealer {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
            seq: 0,
        }
    }

    /// Seal one plaintext chunk into `out` as a complete record.
    ///
    /// Consumes the next sequence number exactly once. The caller owns the
    /// produced ciphertext and must never ask for the same chunk to be
    /// sealed again; retrying a short write means re-sending the buffered
    /// record, not re-sealing the plaintext.
    pub fn seal(&mut self, plaintext: &[u8], out: &mut BytesMut) -> Result<(), SealError> {
        if plaintext.is_empty() || plaintext.len() > MAX_RECORD_LEN {
            return Err(SealError::RecordSize(plaintext.len()));
        }

        let seq = self.seq;
        self.seq = seq.checked_add(1).ok_or(SealError::SequenceExhausted)?;

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_for(seq)), plaintext)
            .map_err(|_| SealError::Encrypt)?;

        let header = Header {
            len: ciphertext.len() as u16,
            seq,
        };
        out.reserve(HEADER_LEN + ciphertext.len());
        out.put_slice(&header.encode());
        out.put_slice(&ciphertext);
        Ok(())
    }
}

/// Decrypting half of a sealed channel: owns the receive key and enforces
/// the expected sequence.
pub struct Opener {
    cipher: ChaCha20Poly1305,
    seq: u64,
}

impl Opener {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
            seq: 0,
        }
    }

    /// Open one record. The header must carry exactly the next expected
    /// sequence number; anything else means loss, replay, or reordering and
    /// the channel is unusable from that point on.
    pub fn open(&mut self, header: Header, ciphertext: &[u8]) -> Result<Vec<u8>, SealError> {
        if header.seq != self.seq {
            return Err(SealError::Sequence {
                expected: self.seq,
                got: header.seq,
            });
        }

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_for(header.seq)), ciphertext)
            .map_err(|_| SealError::Auth)?;

        self.seq = self.seq.checked_add(1).ok_or(SealError::SequenceExhausted)?;
        Ok(plaintext)
    }
}
