//! Per-session WebSocket frame engine (§3 "WebSocket engine state", §4.5
//! frame decoding/encoding). Bundles the send and receive sides of per-session
//! WS state; a `Session` handler owns one of these alongside its transport
//! and feeds it raw bytes from `on_received`.

use parking_lot::Mutex;
use rand::RngCore;

use crate::buffer::Buffer;
use crate::ws::frame::{self, OpCode, DEFAULT_CLOSE_STATUS};

/// One fully-assembled inbound message or control frame, ready for dispatch
/// (§4.5 "dispatched by opcode").
pub enum Event {
    Message(OpCode, Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(u16, Vec<u8>),
}

/// Accumulates inbound bytes into frames and, across CONTINUATION frames,
/// into whole messages.
pub struct Receiver {
    frame_buffer: Buffer,
    final_buffer: Buffer,
    current_opcode: Option<OpCode>,
    lock: Mutex<()>,
}

impl Receiver {
    pub fn new() -> Receiver {
        Receiver {
            frame_buffer: Buffer::new(),
            final_buffer: Buffer::new(),
            current_opcode: None,
            lock: Mutex::new(()),
        }
    }

    /// The number of additional bytes needed before the next frame (or its
    /// header) can be parsed, for synchronous callers that want to request
    /// exactly that much (§4.5 `required_receive_frame_size`).
    pub fn required_receive_frame_size(&self) -> usize {
        match frame::try_parse_header(self.frame_buffer.data()) {
            Some(header) => (header.header_len + header.payload_len).saturating_sub(self.frame_buffer.size()),
            None => (2usize).saturating_sub(self.frame_buffer.size()).max(1),
        }
    }

    /// Feeds newly received bytes and returns every message/control event
    /// that became complete as a result. Multiple frames in one read are all
    /// drained (§4.5 "the decoder loops until the input is exhausted").
    pub fn receive(&mut self, bytes: &[u8]) -> Result<Vec<Event>, &'static str> {
        let _guard = self.lock.lock();
        self.frame_buffer.append(bytes);

        let mut events = Vec::new();

        loop {
            let header = match frame::try_parse_header(self.frame_buffer.data()) {
                Some(h) => h,
                None => break,
            };

            if self.frame_buffer.size() < header.header_len + header.payload_len {
                break;
            }

            let opcode = if header.opcode_raw == 0 {
                self.current_opcode.ok_or("continuation frame with no preceding opcode")?
            } else {
                OpCode::from_u8(header.opcode_raw).ok_or("unknown opcode")?
            };

            if opcode.is_control() && (!header.fin || header.payload_len > 125) {
                return Err("control frame must be unfragmented and <= 125 bytes");
            }

            let payload_start = header.header_len;
            let payload_end = payload_start + header.payload_len;
            let mut payload = self.frame_buffer.data()[payload_start..payload_end].to_vec();
            if header.masked {
                frame::apply_mask(&mut payload, header.mask);
            }

            self.frame_buffer.remove(0, payload_end).map_err(|_| "frame buffer bookkeeping error")?;

            if opcode.is_control() {
                events.push(Self::dispatch_control(opcode, payload));
                continue;
            }

            if header.opcode_raw != 0 {
                self.current_opcode = Some(opcode);
            }
            self.final_buffer.append(&payload);

            if header.fin {
                let message = self.final_buffer.data().to_vec();
                self.final_buffer.clear();
                let dispatched_opcode = self.current_opcode.take().unwrap_or(opcode);
                events.push(Event::Message(dispatched_opcode, message));
            }
        }

        Ok(events)
    }

    fn dispatch_control(opcode: OpCode, payload: Vec<u8>) -> Event {
        match opcode {
            OpCode::Ping => Event::Ping(payload),
            OpCode::Pong => Event::Pong(payload),
            OpCode::Close => {
                if payload.len() >= 2 {
                    let status = u16::from_be_bytes([payload[0], payload[1]]);
                    Event::Close(status, payload[2..].to_vec())
                } else {
                    Event::Close(DEFAULT_CLOSE_STATUS, Vec::new())
                }
            }
            _ => unreachable!("dispatch_control called with a non-control opcode"),
        }
    }
}

impl Default for Receiver {
    fn default() -> Self {
        Receiver::new()
    }
}

/// Builds outbound frames for one session. `mask` is `Some` for clients
/// (each frame gets a freshly randomized mask) and `None` for servers.
pub struct Sender {
    is_client: bool,
    lock: Mutex<()>,
}

impl Sender {
    pub fn new(is_client: bool) -> Sender {
        Sender { is_client, lock: Mutex::new(()) }
    }

    fn next_mask(&self) -> Option<[u8; 4]> {
        if !self.is_client {
            return None;
        }
        let mut mask = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut mask);
        Some(mask)
    }

    pub fn text(&self, text: &str) -> Vec<u8> {
        let _guard = self.lock.lock();
        frame::encode_frame(OpCode::Text, true, text.as_bytes(), self.next_mask())
    }

    pub fn binary(&self, bytes: &[u8]) -> Vec<u8> {
        let _guard = self.lock.lock();
        frame::encode_frame(OpCode::Binary, true, bytes, self.next_mask())
    }

    pub fn ping(&self, bytes: &[u8]) -> Vec<u8> {
        let _guard = self.lock.lock();
        frame::encode_frame(OpCode::Ping, true, bytes, self.next_mask())
    }

    pub fn pong(&self, bytes: &[u8]) -> Vec<u8> {
        let _guard = self.lock.lock();
        frame::encode_frame(OpCode::Pong, true, bytes, self.next_mask())
    }

    pub fn close(&self, status: u16, reason: &[u8]) -> Vec<u8> {
        let _guard = self.lock.lock();
        frame::encode_close(status, reason, self.next_mask())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_then_unmask_is_identity() {
        let mask = [0x12, 0x34, 0x56, 0x78];
        let mut data = b"any payload bytes at all".to_vec();
        let original = data.clone();
        frame::apply_mask(&mut data, mask);
        frame::apply_mask(&mut data, mask);
        assert_eq!(data, original);
    }

    #[test]
    fn frame_length_encoding_matches_rfc_boundaries() {
        for (len, header_len) in [(125usize, 2usize), (126, 4), (65535, 4), (65536, 10)] {
            let payload = vec![0u8; len];
            let encoded = frame::encode_frame(OpCode::Binary, true, &payload, None);
            assert_eq!(encoded.len() - len, header_len);
        }
    }

    #[test]
    fn decoder_assembles_a_single_unfragmented_text_message() {
        let sender = Sender::new(false);
        let wire = sender.text("hello");

        let mut receiver = Receiver::new();
        let events = receiver.receive(&wire).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Message(OpCode::Text, data) => assert_eq!(data, b"hello"),
            _ => panic!("expected a text message"),
        }
    }

    #[test]
    fn decoder_reassembles_a_fragmented_message() {
        let first = frame::encode_frame(OpCode::Text, false, b"foo", None);
        let second = frame::encode_frame(OpCode::Continuation, true, b"bar", None);

        let mut receiver = Receiver::new();
        assert!(receiver.receive(&first).unwrap().is_empty());
        let events = receiver.receive(&second).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Message(OpCode::Text, data) => assert_eq!(data, b"foobar"),
            _ => panic!("expected a reassembled text message"),
        }
    }

    #[test]
    fn decoder_drains_multiple_frames_from_one_read() {
        let sender = Sender::new(false);
        let mut wire = sender.ping(b"p1");
        wire.extend_from_slice(&sender.ping(b"p2"));

        let mut receiver = Receiver::new();
        let events = receiver.receive(&wire).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn close_frame_carries_status_and_reason() {
        let sender = Sender::new(false);
        let wire = sender.close(1001, b"bye");

        let mut receiver = Receiver::new();
        let events = receiver.receive(&wire).unwrap();
        match &events[0] {
            Event::Close(status, reason) => {
                assert_eq!(*status, 1001);
                assert_eq!(reason, b"bye");
            }
            _ => panic!("expected a close event"),
        }
    }
}
