//! Echo request/reply framing.

use anyhow::{bail, Result};

use crate::checksum;

pub const ECHO_REQUEST: u8 = 8;
pub const ECHO_REPLY: u8 = 0;

/// Fixed 20 byte IP header assumed in front of every received ICMP message.
/// IP options are not handled.
pub const IP_HEADER_LEN: usize = 20;
pub const ICMP_HEADER_LEN: usize = 8;
pub const TIMESTAMP_LEN: usize = 8;
/// ICMP bytes we put on the wire per probe (header plus timestamp payload).
pub const ECHO_PACKET_LEN: usize = ICMP_HEADER_LEN + TIMESTAMP_LEN;

/// One outgoing probe. Immutable once built; the session constructs a fresh
/// one per sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoRequest {
    pub identifier: u16,
    pub sequence: u16,
    /// Monotonic send timestamp in nanoseconds, echoed back in the reply
    /// and used for the RTT computation on receive.
    pub timestamp: u64,
}

impl EchoRequest {
    pub fn new(identifier: u16, sequence: u16, timestamp: u64) -> Self {
        Self {
            identifier,
            sequence,
            timestamp,
        }
    }

    pub fn encode(&self) -> [u8; ECHO_PACKET_LEN] {
        encode_echo(ECHO_REQUEST, self.identifier, self.sequence, self.timestamp)
    }
}

/// Emits header plus payload with the real checksum substituted for the
/// zero placeholder it is computed over. All multi-byte fields big-endian.
pub(crate) fn encode_echo(
    icmp_type: u8,
    identifier: u16,
    sequence: u16,
    timestamp: u64,
) -> [u8; ECHO_PACKET_LEN] {
    let mut packet = [0u8; ECHO_PACKET_LEN];
    packet[0] = icmp_type;
    packet[1] = 0; // code
    // packet[2..4] is the checksum field, zero while the sum is taken
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    packet[8..].copy_from_slice(&timestamp.to_be_bytes());

    let sum = checksum::compute(&packet);
    packet[2..4].copy_from_slice(&sum.to_be_bytes());
    packet
}

/// A decoded candidate reply. Transient; the receive loop consumes it right
/// away for identifier matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
    /// Echoed send timestamp, absent when the reply carries no payload.
    pub timestamp: Option<u64>,
}

impl EchoReply {
    /// Decodes a raw datagram as delivered by the kernel, IP header
    /// included. Checksum validity is not checked here; callers verify the
    /// ICMP portion with [`checksum::verify`] when they care.
    pub fn decode(datagram: &[u8]) -> Result<EchoReply> {
        let Some(icmp) = datagram.get(IP_HEADER_LEN..) else {
            bail!("datagram shorter than the IP header");
        };
        if icmp.len() < ICMP_HEADER_LEN {
            bail!("truncated ICMP header");
        }

        let timestamp =
            match icmp.get(ICMP_HEADER_LEN..ICMP_HEADER_LEN + TIMESTAMP_LEN) {
                Some(raw) => Some(u64::from_be_bytes(raw.try_into()?)),
                None => None,
            };

        Ok(EchoReply {
            icmp_type: icmp[0],
            code: icmp[1],
            checksum: u16::from_be_bytes([icmp[2], icmp[3]]),
            identifier: u16::from_be_bytes([icmp[4], icmp[5]]),
            sequence: u16::from_be_bytes([icmp[6], icmp[7]]),
            timestamp,
        })
    }

    pub fn is_echo_reply(&self) -> bool {
        self.icmp_type == ECHO_REPLY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_ip_header(icmp: &[u8]) -> Vec<u8> {
        // contents of the IP header are irrelevant to the decoder
        let mut datagram = vec![0xaau8; IP_HEADER_LEN];
        datagram.extend_from_slice(icmp);
        datagram
    }

    #[test]
    fn encode_decode_round_trip() {
        let request = EchoRequest::new(0x1234, 7, 0xdead_beef_0042_1111);
        let datagram = with_ip_header(&request.encode());

        let reply = EchoReply::decode(&datagram).unwrap();
        assert_eq!(reply.icmp_type, ECHO_REQUEST);
        assert_eq!(reply.code, 0);
        assert_eq!(reply.identifier, 0x1234);
        assert_eq!(reply.sequence, 7);
        assert_eq!(reply.timestamp, Some(0xdead_beef_0042_1111));
    }

    #[test]
    fn encoded_packet_has_zero_checksum_residue() {
        let packet = EchoRequest::new(99, 1, 42).encode();
        assert!(checksum::verify(&packet));
        assert_eq!(checksum::compute(&packet), 0);
    }

    #[test]
    fn decode_without_payload_has_no_timestamp() {
        let reply_header = encode_echo(ECHO_REPLY, 5, 2, 0);
        let datagram = with_ip_header(&reply_header[..ICMP_HEADER_LEN]);

        let reply = EchoReply::decode(&datagram).unwrap();
        assert!(reply.is_echo_reply());
        assert_eq!(reply.identifier, 5);
        assert_eq!(reply.timestamp, None);
    }

    #[test]
    fn decode_rejects_short_datagrams() {
        assert!(EchoReply::decode(&[0u8; IP_HEADER_LEN - 1]).is_err());
        assert!(
            EchoReply::decode(&[0u8; IP_HEADER_LEN + ICMP_HEADER_LEN - 1])
                .is_err()
        );
    }
}
