//! The Frame Codec - length-prefixed command/event frames.
//!
//! Every message on a node connection has the same shape:
//!
//! ```text
//! +--------+----------+---------------------+
//! | kind:1 | length:1 | payload: length     |
//! +--------+----------+---------------------+
//! ```
//!
//! Commands flow coordinator → node (`BUZZER`, `COLOR`, `LOCK`, `UNLOCK`,
//! `LED`); events flow node → coordinator (`BUTTON_PRESSED`,
//! `BUTTON_RELEASED`, `JOY`). Renders are fire-and-forget, there is no
//! acknowledgment frame.

use crate::error::CamuraiError;
use camurai_env::Rgb;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload the 1-byte length field can describe.
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Wire value of the kind byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    ButtonPressed = 0x01,
    ButtonReleased = 0x02,
    Joy = 0x03,
    Buzzer = 0x10,
    Color = 0x11,
    Lock = 0x12,
    Unlock = 0x13,
    Led = 0x14,
}

impl FrameKind {
    /// Parses a kind byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::ButtonPressed),
            0x02 => Some(Self::ButtonReleased),
            0x03 => Some(Self::Joy),
            0x10 => Some(Self::Buzzer),
            0x11 => Some(Self::Color),
            0x12 => Some(Self::Lock),
            0x13 => Some(Self::Unlock),
            0x14 => Some(Self::Led),
            _ => None,
        }
    }

    /// Returns the kind byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Node button went down
    ButtonPressed,

    /// Node button came up
    ButtonReleased,

    /// Smoothed joy intensity from the node's camera, 0-255
    Joy(u8),

    /// ASCII note sequence for the tone player, e.g. `C4eE4q`
    Buzzer(String),

    /// `None` clears the light
    Color(Option<Rgb>),

    /// Hold the commanded color
    Lock,

    /// Release the commanded color
    Unlock,

    /// Raw LED write used by the simpler non-game node firmware
    Led(Rgb),
}

impl Frame {
    /// Returns the frame's kind.
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::ButtonPressed => FrameKind::ButtonPressed,
            Frame::ButtonReleased => FrameKind::ButtonReleased,
            Frame::Joy(_) => FrameKind::Joy,
            Frame::Buzzer(_) => FrameKind::Buzzer,
            Frame::Color(_) => FrameKind::Color,
            Frame::Lock => FrameKind::Lock,
            Frame::Unlock => FrameKind::Unlock,
            Frame::Led(_) => FrameKind::Led,
        }
    }

    /// Returns the payload bytes.
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Frame::ButtonPressed | Frame::ButtonReleased | Frame::Lock | Frame::Unlock => Vec::new(),
            Frame::Joy(level) => vec![*level],
            Frame::Buzzer(notes) => notes.as_bytes().to_vec(),
            Frame::Color(None) => Vec::new(),
            Frame::Color(Some(rgb)) | Frame::Led(rgb) => rgb.to_bytes().to_vec(),
        }
    }

    /// Encodes the frame for the wire.
    pub fn encode(&self) -> Result<Vec<u8>, CamuraiError> {
        encode(self.kind().as_byte(), &self.payload())
    }

    /// Decodes a frame from its kind byte and complete payload.
    ///
    /// Rejects unknown kinds, payload lengths the kind does not allow and
    /// non-ASCII note sequences.
    pub fn decode(kind: u8, payload: &[u8]) -> Result<Frame, CamuraiError> {
        let kind = FrameKind::from_byte(kind)
            .ok_or_else(|| CamuraiError::malformed(format!("unknown kind 0x{:02x}", kind)))?;

        let frame = match (kind, payload) {
            (FrameKind::ButtonPressed, []) => Frame::ButtonPressed,
            (FrameKind::ButtonReleased, []) => Frame::ButtonReleased,
            (FrameKind::Lock, []) => Frame::Lock,
            (FrameKind::Unlock, []) => Frame::Unlock,
            (FrameKind::Joy, [level]) => Frame::Joy(*level),
            (FrameKind::Color, []) => Frame::Color(None),
            (FrameKind::Color, [r, g, b]) => Frame::Color(Some(Rgb::new(*r, *g, *b))),
            (FrameKind::Led, [r, g, b]) => Frame::Led(Rgb::new(*r, *g, *b)),
            (FrameKind::Buzzer, notes) if notes.is_ascii() => {
                // ASCII is always valid UTF-8
                Frame::Buzzer(notes.iter().map(|&b| b as char).collect())
            }
            (FrameKind::Buzzer, _) => {
                return Err(CamuraiError::malformed("buzzer notes are not ASCII"));
            }
            (kind, payload) => {
                return Err(CamuraiError::malformed(format!(
                    "{:?} frame with {} byte payload",
                    kind,
                    payload.len()
                )));
            }
        };

        Ok(frame)
    }
}

/// Encodes `[kind][length][payload]`.
///
/// Fails with `PayloadTooLarge` if the payload exceeds [`MAX_PAYLOAD`].
pub fn encode(kind: u8, payload: &[u8]) -> Result<Vec<u8>, CamuraiError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(CamuraiError::PayloadTooLarge(payload.len()));
    }

    let mut bytes = Vec::with_capacity(2 + payload.len());
    bytes.push(kind);
    bytes.push(payload.len() as u8);
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

/// Reads exactly one frame, suspending until it is complete.
///
/// A stream that ends before a full frame has arrived, whether at a frame
/// boundary or halfway through one, yields `ConnectionClosed`.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, CamuraiError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    read_exact_or_closed(reader, &mut header).await?;

    let mut payload = vec![0u8; header[1] as usize];
    read_exact_or_closed(reader, &mut payload).await?;

    Frame::decode(header[0], &payload)
}

/// Encodes and writes one frame.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), CamuraiError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = frame.encode()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_exact_or_closed<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), CamuraiError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(CamuraiError::ConnectionClosed),
        Err(e) => Err(CamuraiError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_color_clears_light() {
        let bytes = Frame::Color(None).encode().unwrap();
        assert_eq!(bytes, vec![0x11, 0]);

        let frame = Frame::decode(0x11, &[]).unwrap();
        assert_eq!(frame, Frame::Color(None));
    }

    #[test]
    fn test_three_byte_color_sets_rgb() {
        let frame = Frame::decode(0x11, &[255, 0, 0]).unwrap();
        assert_eq!(frame, Frame::Color(Some(Rgb::new(255, 0, 0))));

        let bytes = Frame::Color(Some(Rgb::new(255, 0, 0))).encode().unwrap();
        assert_eq!(bytes, vec![0x11, 3, 255, 0, 0]);
    }

    #[test]
    fn test_buzzer_layout() {
        let bytes = Frame::Buzzer("C4eE4q".to_string()).encode().unwrap();
        assert_eq!(bytes[0], 0x10);
        assert_eq!(bytes[1], 6);
        assert_eq!(&bytes[2..], b"C4eE4q");
    }

    #[test]
    fn test_payload_too_large() {
        assert!(encode(0x10, &[b'A'; MAX_PAYLOAD]).is_ok());

        let err = encode(0x10, &[b'A'; MAX_PAYLOAD + 1]).unwrap_err();
        assert!(matches!(err, CamuraiError::PayloadTooLarge(256)));

        let err = Frame::Buzzer("A".repeat(300)).encode().unwrap_err();
        assert!(matches!(err, CamuraiError::PayloadTooLarge(300)));
    }

    #[test]
    fn test_decode_rejects_bad_lengths() {
        assert!(matches!(Frame::decode(0x11, &[1, 2]), Err(CamuraiError::MalformedFrame(_))));
        assert!(matches!(Frame::decode(0x03, &[]), Err(CamuraiError::MalformedFrame(_))));
        assert!(matches!(Frame::decode(0x01, &[0]), Err(CamuraiError::MalformedFrame(_))));
        assert!(matches!(Frame::decode(0x14, &[0]), Err(CamuraiError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_rejects_unknown_kind_and_binary_notes() {
        assert!(matches!(Frame::decode(0x7f, &[]), Err(CamuraiError::MalformedFrame(_))));
        assert!(matches!(Frame::decode(0x10, &[0xff]), Err(CamuraiError::MalformedFrame(_))));
    }

    #[tokio::test]
    async fn test_read_back_to_back_frames() {
        let (mut node, mut coordinator) = tokio::io::duplex(64);

        write_frame(&mut node, &Frame::ButtonPressed).await.unwrap();
        write_frame(&mut node, &Frame::Joy(200)).await.unwrap();
        write_frame(&mut node, &Frame::ButtonReleased).await.unwrap();

        assert_eq!(read_frame(&mut coordinator).await.unwrap(), Frame::ButtonPressed);
        assert_eq!(read_frame(&mut coordinator).await.unwrap(), Frame::Joy(200));
        assert_eq!(read_frame(&mut coordinator).await.unwrap(), Frame::ButtonReleased);
    }

    #[tokio::test]
    async fn test_closed_at_frame_boundary() {
        let (node, mut coordinator) = tokio::io::duplex(64);
        drop(node);

        let err = read_frame(&mut coordinator).await.unwrap_err();
        assert!(matches!(err, CamuraiError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_closed_mid_frame() {
        let (mut node, mut coordinator) = tokio::io::duplex(64);

        // Header promises 3 bytes, only 1 arrives
        node.write_all(&[0x11, 3, 255]).await.unwrap();
        drop(node);

        let err = read_frame(&mut coordinator).await.unwrap_err();
        assert!(matches!(err, CamuraiError::ConnectionClosed));
    }
}
