//! Packet data model (spec §3): a header of `{length, type}` followed by
//! payload bytes, where the payload is itself a small sequence of TLVs.

use rand::Rng;

/// Packet types that are never encrypted regardless of whether a cipher is
/// installed for the session.
pub const PACKET_TYPE_PLAIN_REQUEST: u32 = 0x0000_0001;
pub const PACKET_TYPE_PLAIN_RESPONSE: u32 = 0x0000_0002;

/// TLV carrying the 31-byte printable request identifier (spec §4.6).
pub const TLV_TYPE_REQUEST_ID: u32 = 0x1000_0001;
/// TLV carrying the command-handler-visible body of the packet.
pub const TLV_TYPE_DATA: u32 = 0x1000_0002;

/// Header-exact byte width: 4-byte length + 4-byte type (spec §6).
pub const HEADER_LEN: usize = 8;

/// Number of printable-ASCII bytes in a generated request id (spec §4.6).
pub const REQUEST_ID_LEN: usize = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketKind(pub u32);

impl PacketKind {
    pub const PLAIN_REQUEST: PacketKind = PacketKind(PACKET_TYPE_PLAIN_REQUEST);
    pub const PLAIN_RESPONSE: PacketKind = PacketKind(PACKET_TYPE_PLAIN_RESPONSE);

    /// Plaintext types are never routed through the cipher (spec §4.6, §8).
    pub fn is_plaintext(self) -> bool {
        self.0 == PACKET_TYPE_PLAIN_REQUEST || self.0 == PACKET_TYPE_PLAIN_RESPONSE
    }
}

/// One type-length-value entry inside a packet's payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub tlv_type: u32,
    pub value: Vec<u8>,
}

/// A decoded or to-be-encoded packet: a type tag plus a small TLV list.
///
/// The wire payload is the concatenation of each TLV's
/// `length(u32 BE, inclusive of this 8-byte header) || type(u32 BE) ||
/// value`; this sits entirely inside the header-exact frame from spec §6
/// and is transparent to encryption — the codec encrypts/decrypts the
/// encoded payload bytes, not individual TLVs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    tlvs: Vec<Tlv>,
}

impl Packet {
    pub fn new(kind: PacketKind) -> Self {
        Self {
            kind,
            tlvs: Vec::new(),
        }
    }

    pub fn with_data(kind: PacketKind, data: Vec<u8>) -> Self {
        let mut packet = Self::new(kind);
        packet.tlvs.push(Tlv {
            tlv_type: TLV_TYPE_DATA,
            value: data,
        });
        packet
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.get_tlv_raw(TLV_TYPE_DATA)
    }

    pub fn get_tlv_raw(&self, tlv_type: u32) -> Option<&[u8]> {
        self.tlvs
            .iter()
            .find(|t| t.tlv_type == tlv_type)
            .map(|t| t.value.as_slice())
    }

    pub fn get_tlv_string(&self, tlv_type: u32) -> Option<String> {
        self.get_tlv_raw(tlv_type)
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    pub fn add_tlv_string(&mut self, tlv_type: u32, value: &str) {
        self.tlvs.retain(|t| t.tlv_type != tlv_type);
        self.tlvs.push(Tlv {
            tlv_type,
            value: value.as_bytes().to_vec(),
        });
    }

    pub fn request_id(&self) -> Option<String> {
        self.get_tlv_string(TLV_TYPE_REQUEST_ID)
    }

    /// Generates a 31-byte printable id (characters in `[0x21, 0x7E]`) and
    /// attaches it as a request-id TLV, unless one is already present
    /// (spec §4.6).
    pub fn ensure_request_id(&mut self) -> String {
        if let Some(existing) = self.request_id() {
            return existing;
        }
        let mut rng = rand::thread_rng();
        let id: String = (0..REQUEST_ID_LEN)
            .map(|_| rng.gen_range(0x21u8..=0x7E) as char)
            .collect();
        self.add_tlv_string(TLV_TYPE_REQUEST_ID, &id);
        id
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for tlv in &self.tlvs {
            let total_len = (HEADER_LEN + tlv.value.len()) as u32;
            out.extend_from_slice(&total_len.to_be_bytes());
            out.extend_from_slice(&tlv.tlv_type.to_be_bytes());
            out.extend_from_slice(&tlv.value);
        }
        out
    }

    pub fn decode_payload(kind: PacketKind, mut bytes: &[u8]) -> Result<Self, &'static str> {
        let mut tlvs = Vec::new();
        while !bytes.is_empty() {
            if bytes.len() < HEADER_LEN {
                return Err("truncated TLV header");
            }
            let mut len_buf = [0u8; 4];
            len_buf.copy_from_slice(&bytes[0..4]);
            let total_len = u32::from_be_bytes(len_buf) as usize;
            if total_len < HEADER_LEN || total_len > bytes.len() {
                return Err("TLV length out of range");
            }
            let mut type_buf = [0u8; 4];
            type_buf.copy_from_slice(&bytes[4..8]);
            let tlv_type = u32::from_be_bytes(type_buf);
            let value = bytes[HEADER_LEN..total_len].to_vec();
            tlvs.push(Tlv { tlv_type, value });
            bytes = &bytes[total_len..];
        }
        Ok(Self { kind, tlvs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_printable_request_id_of_expected_length() {
        let mut packet = Packet::new(PacketKind::PLAIN_REQUEST);
        let id = packet.ensure_request_id();
        assert_eq!(id.len(), REQUEST_ID_LEN);
        assert!(id.bytes().all(|b| (0x21..=0x7E).contains(&b)));
        // calling again must not replace the existing id
        assert_eq!(packet.ensure_request_id(), id);
    }

    #[test]
    fn payload_round_trips_through_encode_decode() {
        let mut packet = Packet::with_data(PacketKind::PLAIN_REQUEST, b"ping".to_vec());
        packet.add_tlv_string(TLV_TYPE_REQUEST_ID, "abc");
        let encoded = packet.encode_payload();
        let decoded = Packet::decode_payload(packet.kind, &encoded).unwrap();
        assert_eq!(decoded.data(), Some(&b"ping"[..]));
        assert_eq!(decoded.request_id().as_deref(), Some("abc"));
    }
}
