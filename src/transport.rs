use crate::debug;
use crate::error::{LinkError, Result};
use crate::protocol::{EntityId, Packet};
use crate::serialization::PacketSerializer;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;

/// Byte-level link to the remote side. Delivery may drop or reorder frames.
pub trait Transport {
    fn send(&mut self, frame: Bytes) -> Result<()>;
    fn receive(&mut self) -> Result<Option<Bytes>>;
    fn close(&mut self) -> Result<()>;
    fn is_connected(&self) -> bool;
}

/// Receives the per-frame transform of each rendered entity.
pub trait RenderSink {
    fn update_transform(&mut self, entity_id: EntityId, position: [f32; 3], rotation: [f32; 4]);
}

impl<F> RenderSink for F
where
    F: FnMut(EntityId, [f32; 3], [f32; 4]),
{
    fn update_transform(&mut self, entity_id: EntityId, position: [f32; 3], rotation: [f32; 4]) {
        self(entity_id, position, rotation)
    }
}

pub struct MemoryTransport {
    send_buffer: VecDeque<Bytes>,
    receive_buffer: VecDeque<Bytes>,
    connected: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            send_buffer: VecDeque::new(),
            receive_buffer: VecDeque::new(),
            connected: true,
        }
    }

    /// Move every sent frame into `other`'s inbound queue.
    pub fn deliver_to(&mut self, other: &mut Self) -> usize {
        self.deliver_filtered(other, |_, _| true)
    }

    /// Move sent frames into `other`, dropping those `keep` rejects.
    ///
    /// `keep` gets the frame's index within this batch, for simulating loss.
    pub fn deliver_filtered<F>(&mut self, other: &mut Self, mut keep: F) -> usize
    where
        F: FnMut(usize, &Bytes) -> bool,
    {
        let mut delivered = 0;
        for (index, frame) in self.send_buffer.drain(..).enumerate() {
            if keep(index, &frame) {
                other.receive_buffer.push_back(frame);
                delivered += 1;
            }
        }
        delivered
    }

    pub fn push_inbound(&mut self, frame: Bytes) {
        self.receive_buffer.push_back(frame);
    }

    pub fn take_sent(&mut self) -> Vec<Bytes> {
        self.send_buffer.drain(..).collect()
    }

    pub fn get_send_buffer(&self) -> &VecDeque<Bytes> {
        &self.send_buffer
    }

    pub fn get_receive_buffer(&self) -> &VecDeque<Bytes> {
        &self.receive_buffer
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, frame: Bytes) -> Result<()> {
        if !self.connected {
            return Err(LinkError::ConnectionClosed);
        }

        self.send_buffer.push_back(frame);
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<Bytes>> {
        if !self.connected {
            return Err(LinkError::ConnectionClosed);
        }

        Ok(self.receive_buffer.pop_front())
    }

    fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.send_buffer.clear();
        self.receive_buffer.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Wraps a [`Transport`], framing packets on the way out.
///
/// The inner transport is only ever called through its trait; it is never
/// reconfigured or replaced.
pub struct CompressingTransport<T: Transport> {
    inner: T,
    serializer: PacketSerializer,
    scratch: BytesMut,
    frames_sent: u64,
    bytes_sent: u64,
}

impl<T: Transport> CompressingTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            serializer: PacketSerializer::new(),
            scratch: BytesMut::with_capacity(4096),
            frames_sent: 0,
            bytes_sent: 0,
        }
    }

    /// Frame and send a packet, returning the frame size in bytes.
    pub fn send_packet(&mut self, packet: &Packet) -> Result<usize> {
        debug::log_packet("Outbound", packet);

        let frame = self.serializer.serialize_packet(packet, &mut self.scratch);
        let len = frame.len();
        self.inner.send(frame)?;

        self.frames_sent += 1;
        self.bytes_sent += len as u64;
        debug::trace_transport_send(len, packet.entity_id);
        Ok(len)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Transport> Transport for CompressingTransport<T> {
    fn send(&mut self, frame: Bytes) -> Result<()> {
        let len = frame.len() as u64;
        self.inner.send(frame)?;
        self.frames_sent += 1;
        self.bytes_sent += len;
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<Bytes>> {
        self.inner.receive()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }
}
