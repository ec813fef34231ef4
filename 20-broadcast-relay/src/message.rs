use crate::peer::PeerId;

/// Prefix placed in front of every relayed chunk, e.g. `Client 7: `.
pub fn sender_tag(sender: PeerId) -> String {
    format!("Client {sender}: ")
}

/// Builds the bytes sent to other peers for one read from `sender`.
///
/// The chunk is copied as-is. Nothing is trimmed, no delimiter is added, and
/// a chunk is whatever one read returned, so application-level writes may be
/// split or merged.
pub fn tag_message(sender: PeerId, chunk: &[u8]) -> Vec<u8> {
    let tag = sender_tag(sender);
    let mut message = Vec::with_capacity(tag.len() + chunk.len());
    message.extend_from_slice(tag.as_bytes());
    message.extend_from_slice(chunk);
    message
}
