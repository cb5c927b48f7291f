//! RGBA 缩放 (fast_image_resize, Nearest 插值)

use fast_image_resize as fr;

use crate::error::BridgeError;

/// 将紧凑 RGBA 源图缩放写入目标切片
///
/// 目标切片长度必须 ≥ dst_w * dst_h * 4; 源尺寸与目标一致时直接拷贝。
pub fn resize_rgba_into(
    src: &[u8],
    src_w: u32,
    src_h: u32,
    dst: &mut [u8],
    dst_w: u32,
    dst_h: u32,
) -> Result<(), BridgeError> {
    let dst_len = dst_w as usize * dst_h as usize * 4;
    if dst.len() < dst_len {
        return Err(BridgeError::Resize(format!(
            "destination holds {} bytes, need {}",
            dst.len(),
            dst_len
        )));
    }

    if src_w == dst_w && src_h == dst_h {
        let n = src_w as usize * src_h as usize * 4;
        let src = src
            .get(..n)
            .ok_or_else(|| BridgeError::Resize(format!("source holds {} bytes, need {}", src.len(), n)))?;
        dst[..n].copy_from_slice(src);
        return Ok(());
    }

    let src_image = fr::images::ImageRef::new(src_w, src_h, src, fr::PixelType::U8x4)
        .map_err(|e| BridgeError::Resize(e.to_string()))?;
    let mut dst_image =
        fr::images::Image::from_slice_u8(dst_w, dst_h, &mut dst[..dst_len], fr::PixelType::U8x4)
            .map_err(|e| BridgeError::Resize(e.to_string()))?;

    let mut resizer = fr::Resizer::new();
    resizer
        .resize(
            &src_image,
            &mut dst_image,
            &fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Nearest), // 最快插值算法
        )
        .map_err(|e| BridgeError::Resize(e.to_string()))
}
