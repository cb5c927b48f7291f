/// H.264 解码器: 访问单元 → RGBA 帧
/// H.264 decoder: access unit → RGBA frame
use std::sync::Arc;

use openh264::decoder::Decoder;
use openh264::formats::YUVSource;

use crate::error::DecodeError;

const MAX_DIMENSION: usize = 4096;

/// 解码得到的 RGBA 图像
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub rgba_data: Arc<Vec<u8>>, // 紧凑 RGBA, stride = width * 4
    pub width: u32,
    pub height: u32,
}

/// 解码器接口 (在解码线程内构造, 无需跨线程)
pub trait FrameDecoder {
    /// 解码一个访问单元; 解码器仍在缓冲时返回 `Ok(None)`
    fn decode(&mut self, access_unit: &[u8]) -> Result<Option<DecodedFrame>, DecodeError>;

    fn name(&self) -> &str;
}

/// 解码器工厂 (解码线程启动时调用)
pub type DecoderFactory =
    Arc<dyn Fn() -> Result<Box<dyn FrameDecoder>, DecodeError> + Send + Sync>;

/// 默认工厂: OpenH264 软件解码
pub fn openh264_factory() -> DecoderFactory {
    Arc::new(|| Ok(Box::new(OpenH264Decoder::new()?) as Box<dyn FrameDecoder>))
}

/// OpenH264 软件解码器
pub struct OpenH264Decoder {
    inner: Decoder,
    buffer: Arc<Vec<u8>>, // Arc包装避免每帧clone
}

impl OpenH264Decoder {
    pub fn new() -> Result<Self, DecodeError> {
        let inner = Decoder::new().map_err(|e| DecodeError::Codec(e.to_string()))?;
        Ok(Self {
            inner,
            buffer: Arc::new(Vec::new()),
        })
    }
}

impl FrameDecoder for OpenH264Decoder {
    fn decode(&mut self, access_unit: &[u8]) -> Result<Option<DecodedFrame>, DecodeError> {
        let yuv = match self.inner.decode(access_unit) {
            Ok(Some(yuv)) => yuv,
            Ok(None) => return Ok(None),
            Err(e) => return Err(DecodeError::Codec(e.to_string())),
        };

        let (w, h) = yuv.dimensions();
        if w == 0 || h == 0 || w > MAX_DIMENSION || h > MAX_DIMENSION {
            return Err(DecodeError::Geometry {
                width: w,
                height: h,
            });
        }
        let (y_stride, uv_stride, _) = yuv.strides();

        // 只在尺寸变化或下游仍持有上一帧时重新分配
        let required = w * h * 4;
        if Arc::strong_count(&self.buffer) > 1 || self.buffer.len() != required {
            self.buffer = Arc::new(vec![255; required]);
        }
        let Some(buffer) = Arc::get_mut(&mut self.buffer) else {
            return Err(DecodeError::Codec("frame buffer still shared".into()));
        };

        yuv420p_to_rgba(
            yuv.y(),
            yuv.u(),
            yuv.v(),
            y_stride,
            uv_stride,
            buffer,
            w,
            h,
        )?;

        Ok(Some(DecodedFrame {
            rgba_data: Arc::clone(&self.buffer),
            width: w as u32,
            height: h as u32,
        }))
    }

    fn name(&self) -> &str {
        "openh264"
    }
}

/// YUV420P → RGBA (BT.601 整数系数, ×128 定点)
#[allow(clippy::too_many_arguments)]
pub fn yuv420p_to_rgba(
    y_plane: &[u8],
    u_plane: &[u8],
    v_plane: &[u8],
    y_stride: usize,
    uv_stride: usize,
    buffer: &mut [u8],
    width: usize,
    height: usize,
) -> Result<(), DecodeError> {
    let uv_rows = (height + 1) / 2;
    let uv_cols = (width + 1) / 2;
    if y_stride < width
        || uv_stride < uv_cols
        || y_plane.len() < y_stride * (height - 1) + width
        || u_plane.len() < uv_stride * (uv_rows - 1) + uv_cols
        || v_plane.len() < uv_stride * (uv_rows - 1) + uv_cols
        || buffer.len() < width * height * 4
    {
        return Err(DecodeError::Geometry { width, height });
    }

    for (y, out_row) in buffer.chunks_exact_mut(width * 4).take(height).enumerate() {
        let y_row = &y_plane[y * y_stride..y * y_stride + width];
        let uv_off = (y >> 1) * uv_stride;
        let u_row = &u_plane[uv_off..uv_off + uv_cols];
        let v_row = &v_plane[uv_off..uv_off + uv_cols];

        for (x, px) in out_row.chunks_exact_mut(4).enumerate() {
            let y_val = y_row[x] as i32;
            let u_val = u_row[x >> 1] as i32 - 128;
            let v_val = v_row[x >> 1] as i32 - 128;

            px[0] = (y_val + ((v_val * 179) >> 7)).clamp(0, 255) as u8;
            px[1] = (y_val - ((u_val * 44) >> 7) - ((v_val * 91) >> 7)).clamp(0, 255) as u8;
            px[2] = (y_val + ((u_val * 227) >> 7)).clamp(0, 255) as u8;
            px[3] = 255;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_chroma_is_gray() {
        let (w, h) = (4, 2);
        let y = vec![100u8; 4 * 2];
        let u = vec![128u8; 2];
        let v = vec![128u8; 2];
        let mut out = vec![0u8; w * h * 4];
        yuv420p_to_rgba(&y, &u, &v, 4, 2, &mut out, w, h).unwrap();
        assert!(out.chunks(4).all(|px| px == [100, 100, 100, 255]));
    }

    #[test]
    fn test_chroma_shared_by_2x2_block_and_clamped() {
        let (w, h) = (2, 2);
        let y = vec![250u8, 250, 10, 10];
        let u = vec![255u8];
        let v = vec![0u8];
        let mut out = vec![0u8; 16];
        yuv420p_to_rgba(&y, &u, &v, 2, 1, &mut out, w, h).unwrap();
        // R = Y + (-128*179>>7) 下溢, B = Y + (127*227>>7) 上溢
        assert_eq!(out[0], 71);
        assert_eq!(out[2], 255);
        assert_eq!(out[8], 0);
        assert_eq!(out[0..4], out[4..8]);
    }

    #[test]
    fn test_stride_padding_respected() {
        let (w, h) = (2, 2);
        let y = vec![50u8, 60, 0xff, 0xff, 70, 80, 0xff, 0xff];
        let u = vec![128u8, 0xff];
        let v = vec![128u8, 0xff];
        let mut out = vec![0u8; 16];
        yuv420p_to_rgba(&y, &u, &v, 4, 2, &mut out, w, h).unwrap();
        let reds: Vec<u8> = out.chunks(4).map(|px| px[0]).collect();
        assert_eq!(reds, vec![50, 60, 70, 80]);
    }

    #[test]
    fn test_short_plane_rejected() {
        let mut out = vec![0u8; 64];
        let err = yuv420p_to_rgba(&[0; 3], &[0; 4], &[0; 4], 4, 2, &mut out, 4, 4);
        assert!(matches!(err, Err(DecodeError::Geometry { .. })));
    }

    #[test]
    fn test_garbage_access_unit_is_error_or_skipped() {
        let mut decoder = OpenH264Decoder::new().unwrap();
        let garbage = [0u8, 0, 0, 1, 0x65, 0xff, 0xff, 0xff];
        match decoder.decode(&garbage) {
            Ok(None) | Err(_) => {}
            Ok(Some(f)) => panic!("decoded garbage into {}x{}", f.width, f.height),
        }
    }
}
