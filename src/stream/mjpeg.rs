use bytes::Bytes;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Incremental JPEG extractor for `multipart/x-mixed-replace` bodies.
///
/// Part headers and boundaries are skipped by scanning for start/end of
/// image markers, so the parser does not depend on the server's boundary
/// string or on Content-Length headers being present.
pub struct MjpegParser {
    buffer: Vec<u8>,
    max_frame_bytes: usize,
    /// Where the end-marker search for the partial frame at the head of
    /// `buffer` resumes; bytes before it are known not to hold an EOI.
    scan_from: usize,
}

impl MjpegParser {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_bytes,
            scan_from: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        let mut consumed = 0;

        loop {
            let Some(start) = find(&self.buffer[consumed..], &SOI).map(|i| consumed + i) else {
                // a trailing 0xFF may be the first half of the next SOI
                consumed = if self.buffer.last() == Some(&0xFF) {
                    (self.buffer.len() - 1).max(consumed)
                } else {
                    self.buffer.len()
                };
                break;
            };

            let from = if start == 0 {
                (start + 2).max(self.scan_from)
            } else {
                start + 2
            };
            let Some(end) = find(&self.buffer[from..], &EOI).map(|i| from + i + 2) else {
                consumed = start;
                // back up one byte: the chunk may have ended between 0xFF and 0xD9
                self.scan_from = self.buffer.len() - 1 - start;
                break;
            };

            frames.push(Bytes::copy_from_slice(&self.buffer[start..end]));
            consumed = end;
            self.scan_from = 0;
        }

        self.buffer.drain(..consumed);

        if self.buffer.len() > self.max_frame_bytes {
            tracing::warn!(
                buffered = self.buffer.len(),
                limit = self.max_frame_bytes,
                "jpeg frame exceeds size limit, resyncing"
            );
            self.buffer.clear();
            self.scan_from = 0;
        }

        frames
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

fn find(haystack: &[u8], needle: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut v = SOI.to_vec();
        v.extend_from_slice(body);
        v.extend_from_slice(&EOI);
        v
    }

    fn part(body: &[u8]) -> Vec<u8> {
        let mut v = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        v.extend_from_slice(&jpeg(body));
        v.extend_from_slice(b"\r\n");
        v
    }

    #[test]
    fn test_whole_parts() {
        let mut parser = MjpegParser::new(1024);
        let mut data = part(&[1, 2, 3]);
        data.extend(part(&[4, 5]));

        let frames = parser.push(&data);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref(), jpeg(&[1, 2, 3]).as_slice());
        assert_eq!(frames[1].as_ref(), jpeg(&[4, 5]).as_slice());
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_split_across_chunks() {
        let mut parser = MjpegParser::new(1024);
        let data = part(&[9, 8, 7, 6]);

        // split inside the SOI marker and again inside the EOI marker
        let soi_at = data.iter().position(|&b| b == 0xFF).unwrap();
        let (a, rest) = data.split_at(soi_at + 1);
        let (b, c) = rest.split_at(rest.len() - 3);

        assert!(parser.push(a).is_empty());
        assert!(parser.push(b).is_empty());
        let frames = parser.push(c);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), jpeg(&[9, 8, 7, 6]).as_slice());
    }

    #[test]
    fn test_oversized_frame_is_dropped() {
        let mut parser = MjpegParser::new(16);
        let mut data = SOI.to_vec();
        data.extend(std::iter::repeat(0x11).take(64));

        assert!(parser.push(&data).is_empty());
        assert_eq!(parser.buffered(), 0);

        let frames = parser.push(&part(&[1]));
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_large_frame_in_small_chunks() {
        let mut parser = MjpegParser::new(8 * 1024 * 1024);
        let body: Vec<u8> = (0..2 * 1024 * 1024).map(|i| (i % 0xF0) as u8).collect();
        let mut data = part(&body);
        data.extend(part(&[7, 7]));

        let mut frames = Vec::new();
        for chunk in data.chunks(1024) {
            frames.extend(parser.push(chunk));
            // the partial frame is never rescanned from its start
            assert!(parser.scan_from <= parser.buffered());
            if parser.buffered() > 4096 {
                assert!(parser.scan_from + 1024 >= parser.buffered());
            }
        }

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), body.len() + 4);
        assert_eq!(frames[0].as_ref(), jpeg(&body).as_slice());
        assert_eq!(frames[1].as_ref(), jpeg(&[7, 7]).as_slice());
        assert_eq!(parser.scan_from, 0);
    }

    #[test]
    fn test_end_marker_split_after_resume() {
        let mut parser = MjpegParser::new(1024);
        let data = jpeg(&[1, 2, 3, 4, 5, 6]);
        let eoi_at = data.len() - 2;

        // several pushes inside the frame, the last one ending on the 0xFF of EOI
        assert!(parser.push(&data[..3]).is_empty());
        assert!(parser.push(&data[3..eoi_at + 1]).is_empty());
        let frames = parser.push(&data[eoi_at + 1..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), data.as_slice());
    }
}
