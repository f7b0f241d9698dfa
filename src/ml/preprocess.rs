//! 画像の前処理
//!
//! 推論・学習共通: デコード → RGB変換 → 正方形へリサイズ（アスペクト比は保持しない）→ [0,1] へスケール。
//! 出力は (C, H, W) の順で平坦化した `Vec<f32>`。バッチ次元はテンソル化の際に付与する。

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use std::path::Path;

/// モデル入力サイズ（正方形）
pub const IMAGE_SIZE: u32 = 224;

/// リサイズに使うフィルタ（固定）
const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// バイト列をデコードしてRGB画像にする（アルファ・パレットは破棄）
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage> {
    let img = image::load_from_memory(bytes).context("画像をデコードできません")?;
    Ok(img.to_rgb8())
}

/// 画像ファイルを読み込んでRGB画像にする
pub fn open_rgb(path: &Path) -> Result<RgbImage> {
    let img = image::open(path).context(format!("画像を開けません: {}", path.display()))?;
    Ok(img.to_rgb8())
}

/// 指定サイズの正方形へリサイズ
pub fn resize_square(img: &RgbImage, size: u32) -> RgbImage {
    if img.width() == size && img.height() == size {
        return img.clone();
    }
    DynamicImage::ImageRgb8(img.clone())
        .resize_exact(size, size, RESIZE_FILTER)
        .to_rgb8()
}

/// RGB画像を (C, H, W) 順の [0,1] 値に変換
pub fn to_chw_unit(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let mut data = Vec::with_capacity(3 * (width * height) as usize);

    for channel in 0..3 {
        for y in 0..height {
            for x in 0..width {
                let pixel = img.get_pixel(x, y);
                data.push(pixel[channel] as f32 / 255.0);
            }
        }
    }

    data
}

/// 画像バイト列をモデル入力に変換
///
/// 同じバイト列からは常にビット単位で同一の結果を返す。
pub fn preprocess_image_bytes(bytes: &[u8], size: u32) -> Result<Vec<f32>> {
    let img = decode_rgb(bytes)?;
    Ok(to_chw_unit(&resize_square(&img, size)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, Rgba, RgbaImage};
    use std::io::Cursor;

    fn encode_png(img: DynamicImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn test_output_shape_and_range() {
        let bytes = encode_png(DynamicImage::ImageRgb8(gradient(40, 17)));
        let data = preprocess_image_bytes(&bytes, IMAGE_SIZE).unwrap();

        assert_eq!(data.len(), 3 * 224 * 224);
        assert!(data.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_same_bytes_give_identical_tensor() {
        let bytes = encode_png(DynamicImage::ImageRgb8(gradient(64, 48)));
        let a = preprocess_image_bytes(&bytes, IMAGE_SIZE).unwrap();
        let b = preprocess_image_bytes(&bytes, IMAGE_SIZE).unwrap();

        let a_bits: Vec<u32> = a.iter().map(|v| v.to_bits()).collect();
        let b_bits: Vec<u32> = b.iter().map(|v| v.to_bits()).collect();
        assert_eq!(a_bits, b_bits);
    }

    #[test]
    fn test_alpha_is_discarded() {
        let rgba = RgbaImage::from_pixel(8, 8, Rgba([255, 0, 0, 0]));
        let bytes = encode_png(DynamicImage::ImageRgba8(rgba));
        let data = preprocess_image_bytes(&bytes, 8).unwrap();

        // R チャネルは 1.0、G/B は 0.0（透明度は無視）
        assert!(data[..64].iter().all(|v| *v == 1.0));
        assert!(data[64..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_channel_first_layout() {
        let img = RgbImage::from_fn(2, 1, |x, _| if x == 0 { Rgb([255, 0, 0]) } else { Rgb([0, 255, 0]) });
        let data = to_chw_unit(&img);
        assert_eq!(data, vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_invalid_bytes_fail() {
        assert!(preprocess_image_bytes(b"not an image", IMAGE_SIZE).is_err());
        assert!(preprocess_image_bytes(&[], IMAGE_SIZE).is_err());
    }

    #[test]
    fn test_aspect_ratio_not_preserved() {
        let resized = resize_square(&gradient(300, 100), 224);
        assert_eq!(resized.dimensions(), (224, 224));
    }
}
