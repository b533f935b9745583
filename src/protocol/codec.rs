//! Line assembly and classification for the worker byte stream.
//!
//! The worker writes one message per newline-terminated line, but the pipe
//! delivers arbitrary chunks: a line may arrive split across several reads, or
//! several lines may arrive in one. [`LineAssembler`] buffers bytes and yields
//! only complete lines, retaining the trailing partial segment for the next
//! chunk. Classification is a fixed prefix table; anything unrecognized
//! becomes [`ProtocolMessage::Raw`] so no input is ever discarded silently.

use bytes::BytesMut;

use crate::protocol::message::ProtocolMessage;

/// Accumulates raw bytes and splits them into complete lines.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: BytesMut,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Feed a chunk of bytes, returning every line completed by it.
    ///
    /// Line terminators (`\n`, with an optional preceding `\r`) are stripped.
    /// Blank lines carry no message and are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            if line.is_empty() {
                continue;
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Bytes currently held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Classify one complete line into a [`ProtocolMessage`].
///
/// Prefixes are colon- or space-delimited depending on the tag; the
/// space-delimited `IMAGE_PATH` is checked before the shorter `IMAGE`
/// prefixes. A `DATA:` payload that is not valid JSON is reported as an
/// `Error` carrying the offending text rather than aborting the stream.
pub fn classify(line: &str) -> ProtocolMessage {
    if let Some(rest) = line.strip_prefix("STATUS:") {
        return ProtocolMessage::Status(rest.to_string());
    }
    if let Some(rest) = line.strip_prefix("ERROR:") {
        return ProtocolMessage::Error(rest.to_string());
    }
    if let Some(rest) = line.strip_prefix("DATA:") {
        return match serde_json::from_str(rest) {
            Ok(value) => ProtocolMessage::Data(value),
            Err(_) => ProtocolMessage::Error(format!("malformed data payload: {rest}")),
        };
    }
    if let Some(rest) = line.strip_prefix("FRAME:") {
        return ProtocolMessage::Frame(rest.to_string());
    }
    if let Some(rest) = line.strip_prefix("IMAGE_PATH ") {
        return ProtocolMessage::ImagePath(rest.trim().into());
    }
    if let Some(rest) = line.strip_prefix("IMAGE:") {
        return ProtocolMessage::Frame(rest.to_string());
    }
    if let Some(rest) = line.strip_prefix("IMAGE ") {
        return ProtocolMessage::Frame(rest.to_string());
    }
    if line == "TRIGGER_CAMERA" {
        return ProtocolMessage::Trigger;
    }
    if line == "DAQ_INITIALIZED" {
        return ProtocolMessage::Initialized;
    }
    if line == "DAQ_HOME" {
        return ProtocolMessage::Homed;
    }
    if let Some(rest) = line.strip_prefix("DAQ_POSITION ") {
        return match rest.trim().parse::<f64>() {
            Ok(degrees) => ProtocolMessage::PositionChanged(degrees),
            // A garbled position report is surfaced, not dropped.
            Err(_) => ProtocolMessage::Raw(line.to_string()),
        };
    }
    ProtocolMessage::Raw(line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_all(assembler: &mut LineAssembler, bytes: &[u8]) -> Vec<ProtocolMessage> {
        assembler
            .push(bytes)
            .iter()
            .map(|l| classify(l))
            .collect()
    }

    #[test]
    fn test_classify_generic_prefixes() {
        assert_eq!(
            classify("STATUS:IPC handler ready"),
            ProtocolMessage::Status("IPC handler ready".into())
        );
        assert_eq!(
            classify("ERROR:Unknown command: bogus"),
            ProtocolMessage::Error("Unknown command: bogus".into())
        );
        assert_eq!(
            classify(r#"DATA:{"success":true,"position":90.0}"#),
            ProtocolMessage::Data(json!({"success": true, "position": 90.0}))
        );
    }

    #[test]
    fn test_classify_domain_tags() {
        assert_eq!(classify("TRIGGER_CAMERA"), ProtocolMessage::Trigger);
        assert_eq!(classify("DAQ_INITIALIZED"), ProtocolMessage::Initialized);
        assert_eq!(classify("DAQ_HOME"), ProtocolMessage::Homed);
        assert_eq!(
            classify("DAQ_POSITION 182.5"),
            ProtocolMessage::PositionChanged(182.5)
        );
        assert_eq!(
            classify("IMAGE_PATH frame_003.png"),
            ProtocolMessage::ImagePath("frame_003.png".into())
        );
        assert_eq!(
            classify("FRAME:data:image/png;base64,AAAA"),
            ProtocolMessage::Frame("data:image/png;base64,AAAA".into())
        );
        assert_eq!(
            classify("IMAGE fragment"),
            ProtocolMessage::Frame("fragment".into())
        );
    }

    #[test]
    fn test_unknown_line_becomes_raw() {
        assert_eq!(
            classify("WARNING:Frame 4 capture failed"),
            ProtocolMessage::Raw("WARNING:Frame 4 capture failed".into())
        );
    }

    #[test]
    fn test_malformed_data_payload_becomes_error() {
        let msg = classify("DATA:{not json");
        match msg {
            ProtocolMessage::Error(text) => assert!(text.contains("{not json")),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn test_garbled_position_becomes_raw() {
        assert_eq!(
            classify("DAQ_POSITION twelve"),
            ProtocolMessage::Raw("DAQ_POSITION twelve".into())
        );
    }

    #[test]
    fn test_partial_line_retained_across_chunks() {
        let mut assembler = LineAssembler::new();
        assert!(assembler.push(b"STATUS:half").is_empty());
        assert_eq!(assembler.pending(), 11);
        let lines = assembler.push(b" done\nERROR:x\n");
        assert_eq!(lines, vec!["STATUS:half done", "ERROR:x"]);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"STATUS:ok\r\n\r\n\nDAQ_HOME\n");
        assert_eq!(lines, vec!["STATUS:ok", "DAQ_HOME"]);
    }

    #[test]
    fn test_byte_at_a_time_equals_single_chunk() {
        let stream = b"STATUS:IPC handler ready\nDATA:{\"success\":true}\nTRIGGER_CAMERA\nDAQ_POSITION 45.0\nFRAME:data:image/png;base64,Zg==\nnoise\n";

        let mut whole = LineAssembler::new();
        let expected = decode_all(&mut whole, stream);

        let mut dribble = LineAssembler::new();
        let mut got = Vec::new();
        for byte in stream.iter() {
            got.extend(decode_all(&mut dribble, std::slice::from_ref(byte)));
        }

        assert_eq!(expected, got);
        assert_eq!(expected.len(), 6);
    }
}
