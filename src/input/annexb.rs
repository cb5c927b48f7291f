//! H.264 Annex-B 增量解析
//!
//! 把任意切分的字节流重组为访问单元 (access unit), 每个访问单元对应一帧。
//! 起始码可以是 3 字节或 4 字节, 允许跨越两次 recv 的边界。

const NAL_SEI: u8 = 6;
const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;
const NAL_AUD: u8 = 9;

/// 查找起始码位置 (4 字节形式返回前导 0 的位置)
fn find_start_code(buf: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i + 3 <= buf.len() {
        if buf[i] == 0 && buf[i + 1] == 0 && buf[i + 2] == 1 {
            return Some(if i > 0 && buf[i - 1] == 0 { i - 1 } else { i });
        }
        i += 1;
    }
    None
}

/// 起始码长度 (buf 以起始码开头)
fn prefix_len(buf: &[u8]) -> usize {
    if buf.starts_with(&[0, 0, 1]) {
        3
    } else {
        4
    }
}

#[derive(Debug, Default)]
pub struct AnnexBParser {
    buf: Vec<u8>,
    synced: bool,       // buf 是否以起始码开头
    search_from: usize, // 下次查找的起点
    au: Vec<u8>,
    au_has_vcl: bool,
}

impl AnnexBParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// 输入一段数据, 返回本次完成的访问单元
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        self.buf.extend_from_slice(data);

        if !self.synced {
            match find_start_code(&self.buf, 0) {
                Some(start) => {
                    self.buf.drain(..start);
                    self.synced = true;
                    self.search_from = 0;
                }
                None => {
                    // 保留可能是半个起始码的尾部
                    let keep_from = self.buf.len().saturating_sub(3);
                    self.buf.drain(..keep_from);
                    return out;
                }
            }
        }

        loop {
            let from = self.search_from.max(prefix_len(&self.buf));
            match find_start_code(&self.buf, from) {
                Some(next) => {
                    let nal: Vec<u8> = self.buf.drain(..next).collect();
                    self.search_from = 0;
                    self.accept_nal(nal, &mut out);
                }
                None => {
                    self.search_from = self.buf.len().saturating_sub(3);
                    break;
                }
            }
        }
        out
    }

    /// 流结束: 把缓存的剩余数据作为最后一个访问单元
    pub fn flush(&mut self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        if self.synced && self.buf.len() > 3 {
            let nal = std::mem::take(&mut self.buf);
            self.accept_nal(nal, &mut out);
        }
        self.buf.clear();
        self.synced = false;
        self.search_from = 0;
        self.au_has_vcl = false;
        if !self.au.is_empty() {
            out.push(std::mem::take(&mut self.au));
        }
        out
    }

    fn accept_nal(&mut self, nal: Vec<u8>, out: &mut Vec<Vec<u8>>) {
        let hdr = prefix_len(&nal);
        let Some(&header) = nal.get(hdr) else {
            return;
        };
        let nal_type = header & 0x1f;
        let is_vcl = (1..=5).contains(&nal_type);
        // first_mb_in_slice 是 ue(v), 值为 0 时编码为单个 '1' 位
        let first_slice = is_vcl && nal.get(hdr + 1).map_or(false, |b| b & 0x80 != 0);
        let starts_au =
            matches!(nal_type, NAL_SEI | NAL_SPS | NAL_PPS | NAL_AUD) || first_slice;

        if self.au_has_vcl && starts_au {
            out.push(std::mem::take(&mut self.au));
            self.au_has_vcl = false;
        }
        self.au.extend_from_slice(&nal);
        if is_vcl {
            self.au_has_vcl = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: &[u8] = &[0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1f];
    const PPS: &[u8] = &[0, 0, 0, 1, 0x68, 0xce, 0x3c, 0x80];
    const IDR: &[u8] = &[0, 0, 1, 0x65, 0x88, 0x84, 0x00, 0x33];
    const P1: &[u8] = &[0, 0, 0, 1, 0x41, 0x9a, 0x02, 0x03];
    const P1_SLICE2: &[u8] = &[0, 0, 1, 0x41, 0x20, 0x04, 0x05];
    const P2: &[u8] = &[0, 0, 0, 1, 0x41, 0x9b, 0x06, 0x07];

    fn stream() -> Vec<u8> {
        [SPS, PPS, IDR, P1, P1_SLICE2, P2].concat()
    }

    fn parse_in_chunks(data: &[u8], chunk: usize) -> Vec<Vec<u8>> {
        let mut parser = AnnexBParser::new();
        let mut aus = Vec::new();
        for c in data.chunks(chunk) {
            aus.extend(parser.push(c));
        }
        aus.extend(parser.flush());
        aus
    }

    #[test]
    fn test_groups_nals_into_access_units() {
        let aus = parse_in_chunks(&stream(), 4096);
        assert_eq!(aus.len(), 3);
        assert_eq!(aus[0], [SPS, PPS, IDR].concat());
        assert_eq!(aus[1], [P1, P1_SLICE2].concat());
        assert_eq!(aus[2], P2.to_vec());
    }

    #[test]
    fn test_split_start_codes() {
        let whole = parse_in_chunks(&stream(), 4096);
        for chunk in 1..8 {
            assert_eq!(parse_in_chunks(&stream(), chunk), whole, "chunk {}", chunk);
        }
    }

    #[test]
    fn test_leading_garbage_skipped() {
        let mut data = vec![0xde, 0xad, 0xbe];
        data.extend(stream());
        let aus = parse_in_chunks(&data, 5);
        assert_eq!(aus.len(), 3);
        assert!(aus[0].starts_with(SPS));
    }

    #[test]
    fn test_no_start_code_yields_nothing() {
        let mut parser = AnnexBParser::new();
        assert!(parser.push(&[1, 2, 3, 4, 5]).is_empty());
        assert!(parser.flush().is_empty());
    }
}
