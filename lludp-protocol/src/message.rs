//! Logical message set
//!
//! The messages the core stack consumes and produces: transport control
//! (ACKs, pings, pause/resume, circuit close), the legacy Xfer byte-stream
//! protocol, the Transfer asset-download protocol, asset upload, and the
//! image/texture packets. Each message encodes as a big-endian u16
//! discriminant followed by its fields.

use crate::CodecError;
use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

// Message discriminants. Grouped by protocol family.
const MSG_PACKET_ACK: u16 = 0x0001;
const MSG_START_PING_CHECK: u16 = 0x0002;
const MSG_COMPLETE_PING_CHECK: u16 = 0x0003;
const MSG_AGENT_PAUSE: u16 = 0x0004;
const MSG_AGENT_RESUME: u16 = 0x0005;
const MSG_CLOSE_CIRCUIT: u16 = 0x0006;

const MSG_TRANSFER_REQUEST: u16 = 0x0010;
const MSG_TRANSFER_INFO: u16 = 0x0011;
const MSG_TRANSFER_PACKET: u16 = 0x0012;
const MSG_TRANSFER_ABORT: u16 = 0x0013;

const MSG_REQUEST_XFER: u16 = 0x0020;
const MSG_SEND_XFER_PACKET: u16 = 0x0021;
const MSG_CONFIRM_XFER_PACKET: u16 = 0x0022;
const MSG_ABORT_XFER: u16 = 0x0023;

const MSG_ASSET_UPLOAD_REQUEST: u16 = 0x0030;
const MSG_ASSET_UPLOAD_COMPLETE: u16 = 0x0031;

const MSG_REQUEST_IMAGE: u16 = 0x0040;
const MSG_IMAGE_DATA: u16 = 0x0041;
const MSG_IMAGE_PACKET: u16 = 0x0042;
const MSG_IMAGE_NOT_IN_DATABASE: u16 = 0x0043;

/// Final-chunk marker on `SendXferPacket::packet_index`
pub const XFER_EOF_BIT: u32 = 0x8000_0000;

/// Encoded size of one [`ImageRequestEntry`]
const IMAGE_REQUEST_ENTRY_SIZE: usize = 16 + 1 + 4 + 4 + 1;

/// Where a Transfer download sources its payload from.
///
/// Determines the layout of the request's parameter blob. The blob itself is
/// opaque to the transport; only its source-specific framing is fixed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferSource {
    /// Plain asset lookup by asset id
    Asset = 2,
    /// Asset attached to a simulator-side inventory item
    SimInventoryItem = 3,
    /// Estate-scoped asset (covenants and the like)
    SimEstate = 4,
}

impl TransferSource {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            2 => Some(TransferSource::Asset),
            3 => Some(TransferSource::SimInventoryItem),
            4 => Some(TransferSource::SimEstate),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One entry of a `RequestImage` message
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageRequestEntry {
    pub image_id: Uuid,
    /// Requested discard level; -1 together with priority 0 cancels
    pub discard_level: i8,
    pub priority: f32,
    /// First packet index the sender should start from
    pub starting_packet: u32,
    pub image_type: u8,
}

/// A logical protocol message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Explicit acknowledgement of inbound reliable sequence numbers
    PacketAck { acks: Vec<u32> },
    /// Liveness probe; carries the oldest unacknowledged outbound sequence
    StartPingCheck { ping_id: u8, oldest_unacked: u32 },
    CompletePingCheck { ping_id: u8 },
    /// Ask the remote side to stop pushing updates
    AgentPause { serial: u32 },
    AgentResume { serial: u32 },
    /// Graceful circuit teardown
    CloseCircuit,

    TransferRequest {
        transaction_id: Uuid,
        channel: u8,
        source: TransferSource,
        priority: f32,
        params: Bytes,
    },
    TransferInfo {
        transaction_id: Uuid,
        channel: u8,
        target_type: i32,
        status: i32,
        size: u32,
        params: Bytes,
    },
    TransferPacket {
        transaction_id: Uuid,
        channel: u8,
        packet_index: u32,
        status: i32,
        data: Bytes,
    },
    TransferAbort { transaction_id: Uuid, channel: u8 },

    RequestXfer {
        xfer_id: u64,
        filename: String,
        file_path: u8,
        delete_on_completion: bool,
        use_big_packets: bool,
        vfile_id: Uuid,
        vfile_type: i16,
    },
    /// One chunk of an Xfer stream; bit 31 of the index marks the final
    /// chunk, and chunk 0 leads with the little-endian total size
    SendXferPacket {
        xfer_id: u64,
        packet_index: u32,
        data: Bytes,
    },
    ConfirmXferPacket { xfer_id: u64, packet_index: u32 },
    AbortXfer { xfer_id: u64, result: i32 },

    AssetUploadRequest {
        transaction_id: Uuid,
        asset_type: i8,
        temp_file: bool,
        store_local: bool,
        /// Inline payload; empty when a chunked Xfer upload follows
        data: Bytes,
    },
    AssetUploadComplete {
        asset_id: Uuid,
        asset_type: i8,
        success: bool,
    },

    RequestImage { requests: Vec<ImageRequestEntry> },
    /// First texture packet: declares codec and total size
    ImageData {
        image_id: Uuid,
        codec: u8,
        size: u32,
        data: Bytes,
    },
    ImagePacket {
        image_id: Uuid,
        packet_index: u16,
        data: Bytes,
    },
    ImageNotInDatabase { image_id: Uuid },
}

/// Bounded reader over a message body; underflow maps to `BadMessage`.
struct Reader<'a> {
    buf: &'a [u8],
    name: &'static str,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], name: &'static str) -> Self {
        Reader { buf, name }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.buf.len() < n {
            return Err(CodecError::BadMessage(self.name));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.u8()? != 0)
    }

    fn i8(&mut self) -> Result<i8, CodecError> {
        Ok(self.u8()? as i8)
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn i16(&mut self) -> Result<i16, CodecError> {
        Ok(self.u16()? as i16)
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32, CodecError> {
        Ok(self.u32()? as i32)
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    fn f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_bits(self.u32()?))
    }

    fn uuid(&mut self) -> Result<Uuid, CodecError> {
        let b = self.take(16)?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(b);
        Ok(Uuid::from_bytes(raw))
    }

    /// u16-length-prefixed byte field
    fn bytes(&mut self) -> Result<Bytes, CodecError> {
        let len = self.u16()? as usize;
        Ok(Bytes::copy_from_slice(self.take(len)?))
    }

    /// u16-length-prefixed UTF-8 string
    fn string(&mut self) -> Result<String, CodecError> {
        let len = self.u16()? as usize;
        String::from_utf8(self.take(len)?.to_vec())
            .map_err(|_| CodecError::BadMessage(self.name))
    }

    fn finished(&self) -> bool {
        self.buf.is_empty()
    }
}

fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
    debug_assert!(data.len() <= u16::MAX as usize);
    buf.put_u16(data.len() as u16);
    buf.put_slice(data);
}

impl Message {
    /// Serialize the message body (discriminant included)
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(64);
        match self {
            Message::PacketAck { acks } => {
                buf.put_u16(MSG_PACKET_ACK);
                buf.put_u8(acks.len().min(255) as u8);
                for ack in acks.iter().take(255) {
                    buf.put_u32(*ack);
                }
            }
            Message::StartPingCheck {
                ping_id,
                oldest_unacked,
            } => {
                buf.put_u16(MSG_START_PING_CHECK);
                buf.put_u8(*ping_id);
                buf.put_u32(*oldest_unacked);
            }
            Message::CompletePingCheck { ping_id } => {
                buf.put_u16(MSG_COMPLETE_PING_CHECK);
                buf.put_u8(*ping_id);
            }
            Message::AgentPause { serial } => {
                buf.put_u16(MSG_AGENT_PAUSE);
                buf.put_u32(*serial);
            }
            Message::AgentResume { serial } => {
                buf.put_u16(MSG_AGENT_RESUME);
                buf.put_u32(*serial);
            }
            Message::CloseCircuit => {
                buf.put_u16(MSG_CLOSE_CIRCUIT);
            }
            Message::TransferRequest {
                transaction_id,
                channel,
                source,
                priority,
                params,
            } => {
                buf.put_u16(MSG_TRANSFER_REQUEST);
                buf.put_slice(transaction_id.as_bytes());
                buf.put_u8(*channel);
                buf.put_u8(source.as_u8());
                buf.put_f32(*priority);
                put_bytes(&mut buf, params);
            }
            Message::TransferInfo {
                transaction_id,
                channel,
                target_type,
                status,
                size,
                params,
            } => {
                buf.put_u16(MSG_TRANSFER_INFO);
                buf.put_slice(transaction_id.as_bytes());
                buf.put_u8(*channel);
                buf.put_i32(*target_type);
                buf.put_i32(*status);
                buf.put_u32(*size);
                put_bytes(&mut buf, params);
            }
            Message::TransferPacket {
                transaction_id,
                channel,
                packet_index,
                status,
                data,
            } => {
                buf.put_u16(MSG_TRANSFER_PACKET);
                buf.put_slice(transaction_id.as_bytes());
                buf.put_u8(*channel);
                buf.put_u32(*packet_index);
                buf.put_i32(*status);
                put_bytes(&mut buf, data);
            }
            Message::TransferAbort {
                transaction_id,
                channel,
            } => {
                buf.put_u16(MSG_TRANSFER_ABORT);
                buf.put_slice(transaction_id.as_bytes());
                buf.put_u8(*channel);
            }
            Message::RequestXfer {
                xfer_id,
                filename,
                file_path,
                delete_on_completion,
                use_big_packets,
                vfile_id,
                vfile_type,
            } => {
                buf.put_u16(MSG_REQUEST_XFER);
                buf.put_u64(*xfer_id);
                put_bytes(&mut buf, filename.as_bytes());
                buf.put_u8(*file_path);
                buf.put_u8(*delete_on_completion as u8);
                buf.put_u8(*use_big_packets as u8);
                buf.put_slice(vfile_id.as_bytes());
                buf.put_i16(*vfile_type);
            }
            Message::SendXferPacket {
                xfer_id,
                packet_index,
                data,
            } => {
                buf.put_u16(MSG_SEND_XFER_PACKET);
                buf.put_u64(*xfer_id);
                buf.put_u32(*packet_index);
                put_bytes(&mut buf, data);
            }
            Message::ConfirmXferPacket {
                xfer_id,
                packet_index,
            } => {
                buf.put_u16(MSG_CONFIRM_XFER_PACKET);
                buf.put_u64(*xfer_id);
                buf.put_u32(*packet_index);
            }
            Message::AbortXfer { xfer_id, result } => {
                buf.put_u16(MSG_ABORT_XFER);
                buf.put_u64(*xfer_id);
                buf.put_i32(*result);
            }
            Message::AssetUploadRequest {
                transaction_id,
                asset_type,
                temp_file,
                store_local,
                data,
            } => {
                buf.put_u16(MSG_ASSET_UPLOAD_REQUEST);
                buf.put_slice(transaction_id.as_bytes());
                buf.put_i8(*asset_type);
                buf.put_u8(*temp_file as u8);
                buf.put_u8(*store_local as u8);
                put_bytes(&mut buf, data);
            }
            Message::AssetUploadComplete {
                asset_id,
                asset_type,
                success,
            } => {
                buf.put_u16(MSG_ASSET_UPLOAD_COMPLETE);
                buf.put_slice(asset_id.as_bytes());
                buf.put_i8(*asset_type);
                buf.put_u8(*success as u8);
            }
            Message::RequestImage { requests } => {
                buf.put_u16(MSG_REQUEST_IMAGE);
                buf.put_u8(requests.len().min(255) as u8);
                for entry in requests.iter().take(255) {
                    buf.put_slice(entry.image_id.as_bytes());
                    buf.put_i8(entry.discard_level);
                    buf.put_f32(entry.priority);
                    buf.put_u32(entry.starting_packet);
                    buf.put_u8(entry.image_type);
                }
            }
            Message::ImageData {
                image_id,
                codec,
                size,
                data,
            } => {
                buf.put_u16(MSG_IMAGE_DATA);
                buf.put_slice(image_id.as_bytes());
                buf.put_u8(*codec);
                buf.put_u32(*size);
                put_bytes(&mut buf, data);
            }
            Message::ImagePacket {
                image_id,
                packet_index,
                data,
            } => {
                buf.put_u16(MSG_IMAGE_PACKET);
                buf.put_slice(image_id.as_bytes());
                buf.put_u16(*packet_index);
                put_bytes(&mut buf, data);
            }
            Message::ImageNotInDatabase { image_id } => {
                buf.put_u16(MSG_IMAGE_NOT_IN_DATABASE);
                buf.put_slice(image_id.as_bytes());
            }
        }
        buf
    }

    /// Parse a message body (discriminant first)
    pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
        if bytes.len() < 2 {
            return Err(CodecError::InsufficientData {
                expected: 2,
                actual: bytes.len(),
            });
        }
        let discriminant = u16::from_be_bytes([bytes[0], bytes[1]]);
        let body = &bytes[2..];

        match discriminant {
            MSG_PACKET_ACK => {
                let mut r = Reader::new(body, "PacketAck");
                let count = r.u8()? as usize;
                let mut acks = Vec::with_capacity(count);
                for _ in 0..count {
                    acks.push(r.u32()?);
                }
                Ok(Message::PacketAck { acks })
            }
            MSG_START_PING_CHECK => {
                let mut r = Reader::new(body, "StartPingCheck");
                Ok(Message::StartPingCheck {
                    ping_id: r.u8()?,
                    oldest_unacked: r.u32()?,
                })
            }
            MSG_COMPLETE_PING_CHECK => {
                let mut r = Reader::new(body, "CompletePingCheck");
                Ok(Message::CompletePingCheck { ping_id: r.u8()? })
            }
            MSG_AGENT_PAUSE => {
                let mut r = Reader::new(body, "AgentPause");
                Ok(Message::AgentPause { serial: r.u32()? })
            }
            MSG_AGENT_RESUME => {
                let mut r = Reader::new(body, "AgentResume");
                Ok(Message::AgentResume { serial: r.u32()? })
            }
            MSG_CLOSE_CIRCUIT => Ok(Message::CloseCircuit),
            MSG_TRANSFER_REQUEST => {
                let mut r = Reader::new(body, "TransferRequest");
                Ok(Message::TransferRequest {
                    transaction_id: r.uuid()?,
                    channel: r.u8()?,
                    source: TransferSource::from_u8(r.u8()?)
                        .ok_or(CodecError::BadMessage("TransferRequest"))?,
                    priority: r.f32()?,
                    params: r.bytes()?,
                })
            }
            MSG_TRANSFER_INFO => {
                let mut r = Reader::new(body, "TransferInfo");
                Ok(Message::TransferInfo {
                    transaction_id: r.uuid()?,
                    channel: r.u8()?,
                    target_type: r.i32()?,
                    status: r.i32()?,
                    size: r.u32()?,
                    params: r.bytes()?,
                })
            }
            MSG_TRANSFER_PACKET => {
                let mut r = Reader::new(body, "TransferPacket");
                Ok(Message::TransferPacket {
                    transaction_id: r.uuid()?,
                    channel: r.u8()?,
                    packet_index: r.u32()?,
                    status: r.i32()?,
                    data: r.bytes()?,
                })
            }
            MSG_TRANSFER_ABORT => {
                let mut r = Reader::new(body, "TransferAbort");
                Ok(Message::TransferAbort {
                    transaction_id: r.uuid()?,
                    channel: r.u8()?,
                })
            }
            MSG_REQUEST_XFER => {
                let mut r = Reader::new(body, "RequestXfer");
                Ok(Message::RequestXfer {
                    xfer_id: r.u64()?,
                    filename: r.string()?,
                    file_path: r.u8()?,
                    delete_on_completion: r.bool()?,
                    use_big_packets: r.bool()?,
                    vfile_id: r.uuid()?,
                    vfile_type: r.i16()?,
                })
            }
            MSG_SEND_XFER_PACKET => {
                let mut r = Reader::new(body, "SendXferPacket");
                Ok(Message::SendXferPacket {
                    xfer_id: r.u64()?,
                    packet_index: r.u32()?,
                    data: r.bytes()?,
                })
            }
            MSG_CONFIRM_XFER_PACKET => {
                let mut r = Reader::new(body, "ConfirmXferPacket");
                Ok(Message::ConfirmXferPacket {
                    xfer_id: r.u64()?,
                    packet_index: r.u32()?,
                })
            }
            MSG_ABORT_XFER => {
                let mut r = Reader::new(body, "AbortXfer");
                Ok(Message::AbortXfer {
                    xfer_id: r.u64()?,
                    result: r.i32()?,
                })
            }
            MSG_ASSET_UPLOAD_REQUEST => {
                let mut r = Reader::new(body, "AssetUploadRequest");
                Ok(Message::AssetUploadRequest {
                    transaction_id: r.uuid()?,
                    asset_type: r.i8()?,
                    temp_file: r.bool()?,
                    store_local: r.bool()?,
                    data: r.bytes()?,
                })
            }
            MSG_ASSET_UPLOAD_COMPLETE => {
                let mut r = Reader::new(body, "AssetUploadComplete");
                Ok(Message::AssetUploadComplete {
                    asset_id: r.uuid()?,
                    asset_type: r.i8()?,
                    success: r.bool()?,
                })
            }
            MSG_REQUEST_IMAGE => {
                let mut r = Reader::new(body, "RequestImage");
                let count = r.u8()? as usize;
                let mut requests = Vec::with_capacity(count);
                for _ in 0..count {
                    requests.push(ImageRequestEntry {
                        image_id: r.uuid()?,
                        discard_level: r.i8()?,
                        priority: r.f32()?,
                        starting_packet: r.u32()?,
                        image_type: r.u8()?,
                    });
                }
                Ok(Message::RequestImage { requests })
            }
            MSG_IMAGE_DATA => {
                let mut r = Reader::new(body, "ImageData");
                Ok(Message::ImageData {
                    image_id: r.uuid()?,
                    codec: r.u8()?,
                    size: r.u32()?,
                    data: r.bytes()?,
                })
            }
            MSG_IMAGE_PACKET => {
                let mut r = Reader::new(body, "ImagePacket");
                Ok(Message::ImagePacket {
                    image_id: r.uuid()?,
                    packet_index: r.u16()?,
                    data: r.bytes()?,
                })
            }
            MSG_IMAGE_NOT_IN_DATABASE => {
                let mut r = Reader::new(body, "ImageNotInDatabase");
                let image_id = r.uuid()?;
                debug_assert!(r.finished());
                Ok(Message::ImageNotInDatabase { image_id })
            }
            other => Err(CodecError::UnknownMessage(other)),
        }
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Message::PacketAck { .. } => "PacketAck",
            Message::StartPingCheck { .. } => "StartPingCheck",
            Message::CompletePingCheck { .. } => "CompletePingCheck",
            Message::AgentPause { .. } => "AgentPause",
            Message::AgentResume { .. } => "AgentResume",
            Message::CloseCircuit => "CloseCircuit",
            Message::TransferRequest { .. } => "TransferRequest",
            Message::TransferInfo { .. } => "TransferInfo",
            Message::TransferPacket { .. } => "TransferPacket",
            Message::TransferAbort { .. } => "TransferAbort",
            Message::RequestXfer { .. } => "RequestXfer",
            Message::SendXferPacket { .. } => "SendXferPacket",
            Message::ConfirmXferPacket { .. } => "ConfirmXferPacket",
            Message::AbortXfer { .. } => "AbortXfer",
            Message::AssetUploadRequest { .. } => "AssetUploadRequest",
            Message::AssetUploadComplete { .. } => "AssetUploadComplete",
            Message::RequestImage { .. } => "RequestImage",
            Message::ImageData { .. } => "ImageData",
            Message::ImagePacket { .. } => "ImagePacket",
            Message::ImageNotInDatabase { .. } => "ImageNotInDatabase",
        }
    }

    /// Split a message whose encoding exceeds `max_body` into independent
    /// sub-messages, when the format allows it.
    ///
    /// Only `RequestImage` is splittable (each entry stands alone); all other
    /// messages are returned unchanged.
    pub fn split(self, max_body: usize) -> Vec<Message> {
        match self {
            Message::RequestImage { requests } => {
                let per_message =
                    ((max_body.saturating_sub(3)) / IMAGE_REQUEST_ENTRY_SIZE).max(1);
                if requests.len() <= per_message {
                    return vec![Message::RequestImage { requests }];
                }
                requests
                    .chunks(per_message)
                    .map(|chunk| Message::RequestImage {
                        requests: chunk.to_vec(),
                    })
                    .collect()
            }
            other => vec![other],
        }
    }
}
