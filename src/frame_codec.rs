use std::ops::Range;
use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{trace, warn};

/// magic sequence starting every frame on a stream connection
pub const FRAME_HEADER: [u8; 2] = [0xBE, 0xEF];
pub const FRAME_HEADER_LEN: usize = FRAME_HEADER.len();
pub const LENGTH_FIELD_LEN: usize = size_of::<u32>();

/// number of bytes a frame adds to its payload
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_LEN + LENGTH_FIELD_LEN;

/// The result of scanning a receive buffer for the next frame. All offsets are relative to the
///  start of the scanned buffer.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FrameScan {
    /// There is no frame header anywhere in the buffer, and its contents can never become part
    ///  of a valid frame. The caller should discard the entire buffer.
    NoHeader,
    /// A frame starts after `skipped` bytes of garbage, but it is not complete yet. The caller
    ///  should drop the garbage and wait for more data.
    Incomplete { skipped: usize },
    Complete { skipped: usize, payload: Range<usize> },
    /// A frame header declares a payload that exceeds the maximum payload length. The stream is
    ///  either corrupt or configured inconsistently on both sides, and waiting for the rest of
    ///  the frame would stall the connection.
    Oversized { skipped: usize, declared_len: u32 },
}

impl FrameScan {
    /// the number of bytes at the start of the scanned buffer that are used up by this result
    pub fn consumed(&self, buf_len: usize) -> usize {
        match self {
            FrameScan::NoHeader => buf_len,
            FrameScan::Incomplete { skipped } => *skipped,
            FrameScan::Complete { payload, .. } => payload.end,
            FrameScan::Oversized { skipped, .. } => *skipped,
        }
    }
}

pub fn encode_frame(payload: &[u8], buf: &mut impl BufMut) -> anyhow::Result<()> {
    let Ok(data_len) = u32::try_from(payload.len()) else {
        bail!("payload of {} bytes exceeds the maximum frame length", payload.len());
    };

    buf.put_slice(&FRAME_HEADER);
    buf.put_u32_le(data_len);
    buf.put_slice(payload);
    Ok(())
}

fn find_header(buf: &[u8]) -> Option<usize> {
    buf.windows(FRAME_HEADER_LEN)
        .position(|w| w == FRAME_HEADER)
}

/// Looks for the first frame in a buffer of received bytes.
///
/// NB: A buffer shorter than the frame header is reported as `Incomplete` rather than
///      `NoHeader`, so that a header split across two reads is not discarded
pub fn try_extract_frame(buf: &[u8], max_payload_len: usize) -> FrameScan {
    if buf.len() < FRAME_HEADER_LEN {
        return FrameScan::Incomplete { skipped: 0 };
    }

    let Some(skipped) = find_header(buf) else {
        return FrameScan::NoHeader;
    };

    let frame = &buf[skipped..];
    if frame.len() < FRAME_OVERHEAD {
        return FrameScan::Incomplete { skipped };
    }

    let mut len_field = &frame[FRAME_HEADER_LEN..FRAME_OVERHEAD];
    let declared_len = len_field.get_u32_le();
    let data_len = declared_len as usize;

    if data_len > max_payload_len {
        return FrameScan::Oversized { skipped, declared_len };
    }

    if frame.len() < FRAME_OVERHEAD + data_len {
        return FrameScan::Incomplete { skipped };
    }

    let payload_start = skipped + FRAME_OVERHEAD;
    FrameScan::Complete {
        skipped,
        payload: payload_start..payload_start + data_len,
    }
}

/// Extracts all complete frames from the start of a receive buffer, handing each payload to
///  `on_frame` in order. Garbage before a frame header is dropped, and an incomplete frame is
///  left at the start of the buffer for subsequent reads to complete.
///
/// Returns an error if a frame exceeds the maximum payload length. Frames preceding the
///  oversized one are delivered nonetheless.
pub fn drain_frames(buf: &mut BytesMut, max_payload_len: usize, mut on_frame: impl FnMut(Bytes)) -> anyhow::Result<()> {
    loop {
        let scan = try_extract_frame(buf, max_payload_len);

        match &scan {
            FrameScan::NoHeader => {
                warn!("no frame header in {} received bytes - discarding them", buf.len());
                buf.clear();
                return Ok(());
            }
            FrameScan::Incomplete { skipped } => {
                if *skipped > 0 {
                    warn!("frame header not found where expected - dropping {} preceding bytes", skipped);
                    buf.advance(*skipped);
                }
                return Ok(());
            }
            FrameScan::Oversized { skipped, declared_len } => {
                buf.advance(*skipped);
                bail!("frame declares a payload of {} bytes, maximum is {}", declared_len, max_payload_len);
            }
            FrameScan::Complete { skipped, payload } => {
                if *skipped > 0 {
                    warn!("frame header not found where expected - dropping {} preceding bytes", skipped);
                }
                trace!("extracted frame with {} bytes of payload", payload.len());

                let mut frame = buf.split_to(scan.consumed(buf.len()));
                frame.advance(payload.start);
                on_frame(frame.freeze());
            }
        }
    }
}
