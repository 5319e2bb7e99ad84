//! Message bodies carried inside sentinel frames.
//!
//! Two kinds of body exist:
//! - the handshake redirect, `[REDIRECT_MAGIC][port u32 BE]`, sent once on the
//!   well-known port;
//! - steady-state messages, `[kind u8][payload]`, exchanged on a dedicated
//!   sub-listener port.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{
    action::Action,
    component::PaddleButtons,
    wire::{self, DecodeError},
};

/// Marks a handshake redirect body.
pub const REDIRECT_MAGIC: [u8; 8] = *b"MSGE-RDR";

/// Length of a redirect body.
pub const REDIRECT_LEN: usize = REDIRECT_MAGIC.len() + 4;

/// Identifies a connected client. Assigned by the server on session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u32);

/// Builds a redirect body pointing at `port`.
pub fn redirect_body(port: u16) -> [u8; REDIRECT_LEN] {
    let mut body = [0u8; REDIRECT_LEN];
    body[..8].copy_from_slice(&REDIRECT_MAGIC);
    body[8..].copy_from_slice(&u32::from(port).to_be_bytes());
    body
}

/// Returns the port if `body` is a redirect.
pub fn parse_redirect(body: &[u8]) -> Option<u16> {
    let rest = body.strip_prefix(&REDIRECT_MAGIC[..])?;
    let port: [u8; 4] = rest.try_into().ok()?;
    u16::try_from(u32::from_be_bytes(port)).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum MessageKind {
    Init = 1,
    WorldSnapshot = 2,
    ControllerState = 3,
    Actions = 4,
}

/// Steady-state message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Server -> client, first message on a dedicated port.
    Init { client_id: ClientId },
    /// Server -> client, an encoded world snapshot.
    WorldSnapshot(Bytes),
    /// Client -> server, buttons currently held.
    ControllerState(PaddleButtons),
    /// Either direction, targeted state changes.
    Actions(Vec<Action>),
}

impl Message {
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        match self {
            Message::Init { client_id } => {
                out.put_u8(MessageKind::Init as u8);
                out.put_u32(client_id.0);
            }
            Message::WorldSnapshot(snapshot) => {
                out.reserve(1 + snapshot.len());
                out.put_u8(MessageKind::WorldSnapshot as u8);
                out.put_slice(snapshot);
            }
            Message::ControllerState(buttons) => {
                out.put_u8(MessageKind::ControllerState as u8);
                out.put_u8(buttons.bits());
            }
            Message::Actions(actions) => {
                let actions = &actions[..actions.len().min(u16::MAX as usize)];
                out.put_u8(MessageKind::Actions as u8);
                out.put_u16(actions.len() as u16);
                for action in actions {
                    action.encode(&mut out);
                }
            }
        }
        out.freeze()
    }

    pub fn decode(body: Bytes) -> Result<Self, DecodeError> {
        let mut buf: &[u8] = &body;
        let kind = wire::get_u8(&mut buf)?;
        let message = match kind {
            k if k == MessageKind::Init as u8 => Message::Init {
                client_id: ClientId(wire::get_u32(&mut buf)?),
            },
            k if k == MessageKind::WorldSnapshot as u8 => {
                return Ok(Message::WorldSnapshot(body.slice(1..)));
            }
            k if k == MessageKind::ControllerState as u8 => {
                Message::ControllerState(PaddleButtons::from_bits_retain(wire::get_u8(&mut buf)?))
            }
            k if k == MessageKind::Actions as u8 => {
                let n = wire::get_u16(&mut buf)?;
                let actions = (0..n)
                    .map(|_| Action::decode(&mut buf))
                    .collect::<Result<Vec<_>, _>>()?;
                Message::Actions(actions)
            }
            other => return Err(DecodeError::UnknownMessageKind(other)),
        };
        wire::expect_end(buf)?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::EntityId;
    use crate::math::Vec3;

    #[test]
    fn redirect_layout_is_magic_then_be_port() {
        let body = redirect_body(5205);
        assert_eq!(&body[..8], b"MSGE-RDR");
        assert_eq!(&body[8..], &[0x00, 0x00, 0x14, 0x55]);
        assert_eq!(parse_redirect(&body), Some(5205));
    }

    #[test]
    fn non_redirect_bodies_are_ignored() {
        assert_eq!(parse_redirect(b"MSGE-RDR"), None);
        assert_eq!(parse_redirect(&Message::Init { client_id: ClientId(1) }.encode()), None);
        let mut body = redirect_body(1).to_vec();
        body.push(0);
        assert_eq!(parse_redirect(&body), None);
    }

    #[test]
    fn messages_decode_to_what_was_encoded() {
        let msgs = [
            Message::Init {
                client_id: ClientId(3),
            },
            Message::WorldSnapshot(Bytes::from_static(&[0, 0, 0, 0])),
            Message::ControllerState(PaddleButtons::UP | PaddleButtons::W),
            Message::Actions(vec![
                Action::Translate {
                    target: EntityId(9),
                    delta: Vec3::new(1.0, 0.0, 0.0),
                },
                Action::SetMovingLeft {
                    target: EntityId(9),
                    value: true,
                },
            ]),
        ];
        for msg in msgs {
            assert_eq!(Message::decode(msg.encode()).unwrap(), msg);
        }
    }

    #[test]
    fn unknown_message_kind_is_an_error() {
        assert_eq!(
            Message::decode(Bytes::from_static(&[0x7F])),
            Err(DecodeError::UnknownMessageKind(0x7F))
        );
        assert!(matches!(
            Message::decode(Bytes::from_static(&[1, 0, 0])),
            Err(DecodeError::Truncated { .. })
        ));
    }
}
