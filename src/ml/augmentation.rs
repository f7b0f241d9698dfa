//! 学習時のデータ拡張
//!
//! 学習用データにのみ適用する（検証・推論では使わない）。
//! - ランダム回転（±rotation_degrees）
//! - ランダムズーム（1.0 ± zoom_range）
//! - ランダム左右反転
//!
//! 回転とズームは1回の逆写像サンプリングでまとめて行い、
//! 画像外の座標は最も近い端の画素で埋める。

use image::{imageops, Rgb, RgbImage};
use rand::Rng;

use crate::model::AugmentationSettings;

/// ランダム変換を適用する拡張器
#[derive(Debug, Clone)]
pub struct Augmenter {
    settings: AugmentationSettings,
}

impl Augmenter {
    pub fn new(settings: AugmentationSettings) -> Self {
        Self { settings }
    }

    /// 設定に従ってランダムに拡張する
    pub fn augment<R: Rng + ?Sized>(&self, img: &RgbImage, rng: &mut R) -> RgbImage {
        let angle = if self.settings.rotation_degrees > 0.0 {
            rng.gen_range(-self.settings.rotation_degrees..=self.settings.rotation_degrees)
        } else {
            0.0
        };
        let zoom = if self.settings.zoom_range > 0.0 {
            rng.gen_range(1.0 - self.settings.zoom_range..=1.0 + self.settings.zoom_range)
        } else {
            1.0
        };

        let mut result = affine(img, angle, zoom);

        if rng.gen::<f32>() < self.settings.horizontal_flip_prob {
            imageops::flip_horizontal_in_place(&mut result);
        }

        result
    }
}

/// 中心まわりの回転とズームを適用（出力サイズは入力と同じ）
///
/// `zoom` > 1 は拡大（切り抜き）、< 1 は縮小。
pub fn affine(img: &RgbImage, angle_degrees: f32, zoom: f32) -> RgbImage {
    if angle_degrees.abs() < 0.1 && (zoom - 1.0).abs() < 1e-3 {
        return img.clone();
    }

    let (width, height) = img.dimensions();
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;

    let angle_rad = angle_degrees.to_radians();
    let cos_a = angle_rad.cos();
    let sin_a = angle_rad.sin();
    let inv_zoom = 1.0 / zoom.max(1e-3);

    RgbImage::from_fn(width, height, |x, y| {
        let dx = (x as f32 + 0.5 - cx) * inv_zoom;
        let dy = (y as f32 + 0.5 - cy) * inv_zoom;

        let src_x = cx + dx * cos_a + dy * sin_a - 0.5;
        let src_y = cy - dx * sin_a + dy * cos_a - 0.5;

        bilinear_sample_clamped(img, src_x, src_y)
    })
}

/// 端をクランプしたバイリニア補間
fn bilinear_sample_clamped(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;

    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut result = [0u8; 3];
    for c in 0..3 {
        let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;
        result[c] = v.round().clamp(0.0, 255.0) as u8;
    }

    Rgb(result)
}
