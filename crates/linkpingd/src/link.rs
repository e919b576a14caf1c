//! Rtnetlink link message encode/decode
//!
//! Wire codec for the kernel's link-notification channel: the "dump all
//! links" request, RTM_NEWLINK/RTM_DELLINK notifications with their
//! tag-length-value attribute streams, the multi-part continuation flag and
//! the DONE/ERROR control messages. The codec works on plain byte slices and
//! defines its own protocol constants, so it builds and tests on any
//! platform; the socket lives in [`crate::netlink`].
//!
//! Netlink is a host-endian protocol: all multi-byte fields use native byte
//! order.

/// Netlink message header length (struct nlmsghdr)
pub const NLMSG_HDRLEN: usize = 16;
/// Link info header length (struct ifinfomsg)
pub const IFINFOMSG_LEN: usize = 16;
/// Attribute header length (struct rtattr)
pub const RTA_HDRLEN: usize = 4;

/// Multicast group mask for link notifications (RTMGRP_LINK)
pub const RTMGRP_LINK: u32 = 1;

const NLMSG_ERROR: u16 = 2;
const NLMSG_DONE: u16 = 3;
const RTM_NEWLINK: u16 = 16;
const RTM_DELLINK: u16 = 17;
const RTM_GETLINK: u16 = 18;

const NLM_F_REQUEST: u16 = 0x0001;
const NLM_F_MULTI: u16 = 0x0002;
/// NLM_F_ROOT | NLM_F_MATCH
const NLM_F_DUMP: u16 = 0x0100 | 0x0200;

const IFLA_IFNAME: u16 = 3;
const IFF_UP: u32 = 0x1;
const AF_PACKET: u8 = 17;

#[inline]
fn align4(len: usize) -> usize {
    (len + 3) & !3
}

/// One decoded link notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// RTM_NEWLINK: interface created or updated
    Changed { index: u32, name: String, up: bool },
    /// RTM_DELLINK: interface removed
    Removed { index: u32 },
}

/// Result of decoding one receive buffer
///
/// A dump response may span several buffers; `multipart` tells the caller
/// whether the kernel has announced a continuation and `done` whether the
/// explicit terminator arrived. Kernel-reported errors and malformed
/// messages never abort the batch - the offending message is recorded and
/// the stream continues.
#[derive(Debug, Default)]
pub struct LinkBatch {
    /// Decoded link notifications, in arrival order
    pub events: Vec<LinkEvent>,
    /// An NLMSG_DONE terminator was seen
    pub done: bool,
    /// Every message carried NLM_F_MULTI and no terminator arrived yet
    pub multipart: bool,
    /// Negative codes from NLMSG_ERROR messages
    pub kernel_errors: Vec<i32>,
    /// Messages dropped because their framing or attributes did not parse
    pub malformed: usize,
}

impl LinkBatch {
    /// Whether the caller should read again before reporting the batch
    pub fn expects_more(&self) -> bool {
        self.multipart && !self.done
    }
}

fn put_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_ne_bytes());
}

fn put_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_ne_bytes());
}

fn get_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_ne_bytes([buf[off], buf[off + 1]])
}

fn get_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_ne_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn put_header(buf: &mut Vec<u8>, msg_type: u16, flags: u16, sequence: u32, port_id: u32) {
    let start = buf.len();
    buf.resize(start + NLMSG_HDRLEN, 0);
    // length is fixed up by finish_message
    put_u16(buf, start + 4, msg_type);
    put_u16(buf, start + 6, flags);
    put_u32(buf, start + 8, sequence);
    put_u32(buf, start + 12, port_id);
}

fn finish_message(buf: &mut Vec<u8>, start: usize) {
    let len = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&len.to_ne_bytes());
    buf.resize(start + align4(len as usize), 0);
}

fn put_ifinfomsg(buf: &mut Vec<u8>, index: u32, flags: u32, change: u32) {
    let start = buf.len();
    buf.resize(start + IFINFOMSG_LEN, 0);
    buf[start] = AF_PACKET;
    put_u32(buf, start + 4, index);
    put_u32(buf, start + 8, flags);
    put_u32(buf, start + 12, change);
}

fn put_name_attr(buf: &mut Vec<u8>, name: &str) {
    let start = buf.len();
    let payload = name.len() + 1; // NUL terminated
    buf.resize(start + RTA_HDRLEN, 0);
    put_u16(buf, start, (RTA_HDRLEN + payload) as u16);
    put_u16(buf, start + 2, IFLA_IFNAME);
    buf.extend_from_slice(name.as_bytes());
    buf.push(0);
    let end = buf.len();
    buf.resize(start + align4(end - start), 0);
}

/// Encode the "dump all links" request
pub fn encode_dump_request(sequence: u32, port_id: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(NLMSG_HDRLEN + IFINFOMSG_LEN);
    put_header(&mut buf, RTM_GETLINK, NLM_F_REQUEST | NLM_F_DUMP, sequence, port_id);
    put_ifinfomsg(&mut buf, 0, 0, u32::MAX);
    finish_message(&mut buf, 0);
    buf
}

/// Encode an RTM_NEWLINK notification
pub fn encode_new_link(index: u32, name: &str, up: bool, multipart: bool) -> Vec<u8> {
    let mut buf = Vec::new();
    let flags = if multipart { NLM_F_MULTI } else { 0 };
    put_header(&mut buf, RTM_NEWLINK, flags, 0, 0);
    put_ifinfomsg(&mut buf, index, if up { IFF_UP } else { 0 }, u32::MAX);
    put_name_attr(&mut buf, name);
    finish_message(&mut buf, 0);
    buf
}

/// Encode an RTM_DELLINK notification
pub fn encode_del_link(index: u32, multipart: bool) -> Vec<u8> {
    let mut buf = Vec::new();
    let flags = if multipart { NLM_F_MULTI } else { 0 };
    put_header(&mut buf, RTM_DELLINK, flags, 0, 0);
    put_ifinfomsg(&mut buf, index, 0, u32::MAX);
    finish_message(&mut buf, 0);
    buf
}

/// Encode the NLMSG_DONE dump terminator
pub fn encode_done() -> Vec<u8> {
    let mut buf = Vec::new();
    put_header(&mut buf, NLMSG_DONE, NLM_F_MULTI, 0, 0);
    buf.extend_from_slice(&0i32.to_ne_bytes()); // status
    finish_message(&mut buf, 0);
    buf
}

/// Encode an NLMSG_ERROR message carrying a negative errno
pub fn encode_error(code: i32) -> Vec<u8> {
    let mut buf = Vec::new();
    put_header(&mut buf, NLMSG_ERROR, 0, 0, 0);
    buf.extend_from_slice(&code.to_ne_bytes());
    // the offending request header follows the code on the wire
    buf.resize(buf.len() + NLMSG_HDRLEN, 0);
    finish_message(&mut buf, 0);
    buf
}

/// Walk the attribute stream of a link message looking for IFLA_IFNAME
///
/// Returns `None` when the stream is malformed or carries no name.
fn find_name_attr(mut attrs: &[u8]) -> Option<String> {
    while attrs.len() >= RTA_HDRLEN {
        let rta_len = get_u16(attrs, 0) as usize;
        let rta_type = get_u16(attrs, 2);
        if rta_len < RTA_HDRLEN || rta_len > attrs.len() {
            return None;
        }
        if rta_type == IFLA_IFNAME {
            let data = &attrs[RTA_HDRLEN..rta_len];
            // name is NUL terminated on the wire
            let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
            return String::from_utf8(data[..end].to_vec()).ok();
        }
        let step = align4(rta_len);
        if step >= attrs.len() {
            break;
        }
        attrs = &attrs[step..];
    }
    None
}

fn decode_link_message(msg_type: u16, payload: &[u8]) -> Option<LinkEvent> {
    if payload.len() < IFINFOMSG_LEN {
        return None;
    }
    let index = get_u32(payload, 4);
    if msg_type == RTM_DELLINK {
        return Some(LinkEvent::Removed { index });
    }
    let flags = get_u32(payload, 8);
    let name = find_name_attr(&payload[IFINFOMSG_LEN..])?;
    Some(LinkEvent::Changed {
        index,
        name,
        up: flags & IFF_UP != 0,
    })
}

/// Decode every netlink message in one receive buffer
pub fn decode_batch(buf: &[u8]) -> LinkBatch {
    let mut batch = LinkBatch::default();
    let mut saw_message = false;
    let mut all_multipart = true;
    let mut offset = 0;

    while offset + NLMSG_HDRLEN <= buf.len() {
        let msg_len = get_u32(buf, offset) as usize;
        if msg_len < NLMSG_HDRLEN || offset + msg_len > buf.len() {
            // broken framing: nothing behind this point can be trusted
            batch.malformed += 1;
            break;
        }
        let msg_type = get_u16(buf, offset + 4);
        let flags = get_u16(buf, offset + 6);
        let payload = &buf[offset + NLMSG_HDRLEN..offset + msg_len];

        saw_message = true;
        if flags & NLM_F_MULTI == 0 {
            all_multipart = false;
        }

        match msg_type {
            NLMSG_DONE => {
                batch.done = true;
                break;
            }
            NLMSG_ERROR => {
                if payload.len() >= 4 {
                    let code =
                        i32::from_ne_bytes([payload[0], payload[1], payload[2], payload[3]]);
                    if code < 0 {
                        batch.kernel_errors.push(code);
                    }
                } else {
                    batch.malformed += 1;
                }
            }
            RTM_NEWLINK | RTM_DELLINK => match decode_link_message(msg_type, payload) {
                Some(event) => batch.events.push(event),
                None => batch.malformed += 1,
            },
            _ => {}
        }

        offset += align4(msg_len);
    }

    batch.multipart = saw_message && all_multipart && !batch.done;
    batch
}
