use std::fmt;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::error::CodecError;

pub type ClientId = u8;

/// Never assigned to a client, so as a recipient it reaches no one.
pub const UNASSIGNED_CLIENT_ID: ClientId = 0;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub kind: u8,
    pub reliable: bool,
    /// Outbound: target clients, empty for broadcast. Inbound: the originating
    /// client, empty when the server sent it.
    pub recipients: Vec<ClientId>,
    pub body_len: usize,
}

impl MessageEnvelope {
    pub fn new(kind: u8) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn reliable(kind: u8) -> Self {
        Self {
            kind,
            reliable: true,
            ..Default::default()
        }
    }

    pub fn to(mut self, recipients: impl IntoIterator<Item = ClientId>) -> Self {
        self.recipients = recipients.into_iter().collect();
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipients.is_empty()
    }

    pub fn origin(&self) -> Option<ClientId> {
        self.recipients.first().copied()
    }
}

type Sink = Box<dyn FnOnce(MessageEnvelope, Bytes)>;

/// A message under construction. The body is written through [`writer`] and
/// delivered by [`send`], which consumes the message so it can only go out once.
///
/// [`writer`]: NetworkMessage::writer
/// [`send`]: NetworkMessage::send
pub struct NetworkMessage {
    envelope: MessageEnvelope,
    body: BytesMut,
    sink: Option<Sink>,
}

impl NetworkMessage {
    pub fn new(envelope: MessageEnvelope, sink: impl FnOnce(MessageEnvelope, Bytes) + 'static) -> Self {
        Self {
            envelope,
            body: BytesMut::new(),
            sink: Some(Box::new(sink)),
        }
    }

    /// A message with nowhere to go; `send` drops it.
    pub fn inert(envelope: MessageEnvelope) -> Self {
        Self {
            envelope,
            body: BytesMut::new(),
            sink: None,
        }
    }

    pub fn envelope(&self) -> &MessageEnvelope {
        &self.envelope
    }

    pub fn is_inert(&self) -> bool {
        self.sink.is_none()
    }

    pub fn writer(&mut self) -> &mut BytesMut {
        &mut self.body
    }

    pub fn send(self) {
        let Self {
            mut envelope,
            body,
            sink,
        } = self;
        envelope.body_len = body.len();
        match sink {
            Some(sink) => sink(envelope, body.freeze()),
            None => log::trace!("dropping inert message of type {}", envelope.kind),
        }
    }
}

impl fmt::Debug for NetworkMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkMessage")
            .field("envelope", &self.envelope)
            .field("body_len", &self.body.len())
            .field("inert", &self.is_inert())
            .finish()
    }
}

pub trait MessageSender {
    fn create_message(&self, envelope: MessageEnvelope) -> NetworkMessage;
}

impl<T: MessageSender + ?Sized> MessageSender for Rc<T> {
    fn create_message(&self, envelope: MessageEnvelope) -> NetworkMessage {
        (**self).create_message(envelope)
    }
}

/// Anything that can be turned into a message body.
pub trait NetworkShareable {
    fn encode(&self) -> Result<Bytes, CodecError>;
}

impl NetworkShareable for [u8] {
    fn encode(&self) -> Result<Bytes, CodecError> {
        Ok(Bytes::copy_from_slice(self))
    }
}

impl NetworkShareable for Bytes {
    fn encode(&self) -> Result<Bytes, CodecError> {
        Ok(self.clone())
    }
}

impl NetworkShareable for str {
    fn encode(&self) -> Result<Bytes, CodecError> {
        Ok(Bytes::copy_from_slice(self.as_bytes()))
    }
}

pub trait MessageSenderExt: MessageSender {
    fn send_bytes(&self, envelope: MessageEnvelope, body: &[u8]) {
        let mut message = self.create_message(envelope);
        message.writer().extend_from_slice(body);
        message.send();
    }

    fn send_shareable<T: NetworkShareable + ?Sized>(
        &self,
        envelope: MessageEnvelope,
        value: &T,
    ) -> Result<(), CodecError> {
        let body = value.encode()?;
        self.send_bytes(envelope, &body);
        Ok(())
    }
}

impl<T: MessageSender + ?Sized> MessageSenderExt for T {}
