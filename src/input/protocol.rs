use std::io::{self, Read};

use crate::error::StreamError;

/// 设备名字段长度 (NUL 填充)
pub const DEVICE_NAME_LEN: usize = 64;

/// 握手得到的流信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub device_name: String,
    pub width: u32,
    pub height: u32,
}

fn read_field<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<(), StreamError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            StreamError::Protocol(format!("stream closed while reading {}", what))
        }
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
            StreamError::Protocol(format!("timed out reading {}", what))
        }
        _ => StreamError::Io(e),
    })
}

/// 读取视频握手: 64 字节设备名 + 大端 u16 宽 + 大端 u16 高
///
/// `read_exact` 负责拼接任意拆分的 TCP 分片。宽或高为 0 视为协议错误。
pub fn read_handshake<R: Read>(reader: &mut R) -> Result<StreamInfo, StreamError> {
    let mut name = [0u8; DEVICE_NAME_LEN];
    read_field(reader, &mut name, "device name")?;
    let end = name.iter().position(|&b| b == 0).unwrap_or(DEVICE_NAME_LEN);
    let device_name = String::from_utf8_lossy(&name[..end]).into_owned();

    let mut dim = [0u8; 2];
    read_field(reader, &mut dim, "width")?;
    let width = u16::from_be_bytes(dim) as u32;
    read_field(reader, &mut dim, "height")?;
    let height = u16::from_be_bytes(dim) as u32;

    if width == 0 || height == 0 {
        return Err(StreamError::Protocol(format!(
            "invalid video size {}x{}",
            width, height
        )));
    }

    Ok(StreamInfo {
        device_name,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header(name: &str, w: u16, h: u16) -> Vec<u8> {
        let mut bytes = vec![0u8; DEVICE_NAME_LEN];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        bytes.extend_from_slice(&w.to_be_bytes());
        bytes.extend_from_slice(&h.to_be_bytes());
        bytes
    }

    #[test]
    fn test_handshake_big_endian() {
        let mut bytes = header("Pixel 7", 0, 0);
        let n = bytes.len();
        bytes[n - 4..].copy_from_slice(&[0x04, 0x38, 0x07, 0x80]);
        let info = read_handshake(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(info.device_name, "Pixel 7");
        assert_eq!((info.width, info.height), (1080, 1920));
    }

    #[test]
    fn test_handshake_zero_dimension() {
        let err = read_handshake(&mut Cursor::new(header("dev", 1080, 0))).unwrap_err();
        assert!(matches!(err, StreamError::Protocol(_)));
    }

    #[test]
    fn test_handshake_truncated() {
        let mut bytes = header("dev", 720, 1280);
        bytes.truncate(DEVICE_NAME_LEN + 3);
        let err = read_handshake(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, StreamError::Protocol(m) if m.contains("height")));
    }

    #[test]
    fn test_handshake_full_width_name() {
        let mut bytes = vec![b'x'; DEVICE_NAME_LEN];
        bytes.extend_from_slice(&[0, 10, 0, 20]);
        let info = read_handshake(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(info.device_name.len(), DEVICE_NAME_LEN);
        assert_eq!((info.width, info.height), (10, 20));
    }
}
