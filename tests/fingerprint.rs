mod common;

use std::io::Cursor;

use cardmatch::config::MatchOptions;
use common::*;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use rstest::rstest;

fn threshold() -> u32 {
    MatchOptions::default().max_distance
}

fn brightness(image: &RgbImage, factor: f32) -> RgbImage {
    let mut output = image.clone();
    for p in output.pixels_mut() {
        *p = Rgb(p.0.map(|c| (c as f32 * factor).round().clamp(0., 255.) as u8));
    }
    output
}

fn jpeg(image: &RgbImage, quality: u8) -> RgbImage {
    let mut data = vec![];
    JpegEncoder::new_with_quality(Cursor::new(&mut data), quality).encode_image(image).unwrap();
    image::load_from_memory(&data).unwrap().to_rgb8()
}

#[test]
fn test_deterministic() {
    assert_eq!(card(7), card(7));
    assert_eq!(fingerprint(&card(7)), fingerprint(&card(7)));
    assert_eq!(fingerprint(&card(7)).bits(), 256);
}

#[rstest]
#[case::rotate_cw(3f32)]
#[case::rotate_ccw(-3f32)]
fn test_robust_to_small_rotation(#[case] degrees: f32) {
    let original = card(1);
    let theta = degrees.to_radians();
    let rotated = rotate_about_center(&original, theta, Interpolation::Bilinear, Rgb([10, 10, 10]));
    let distance = fingerprint(&original).distance(&fingerprint(&rotated));
    assert!(distance < threshold(), "distance = {}", distance);
}

#[rstest]
#[case::brighter(1.1)]
#[case::darker(0.9)]
fn test_robust_to_brightness(#[case] factor: f32) {
    let original = card(2);
    let distance = fingerprint(&original).distance(&fingerprint(&brightness(&original, factor)));
    assert!(distance < threshold(), "distance = {}", distance);
}

#[rstest]
#[case(90)]
#[case(60)]
fn test_robust_to_jpeg(#[case] quality: u8) {
    let original = card(3);
    let distance = fingerprint(&original).distance(&fingerprint(&jpeg(&original, quality)));
    assert!(distance < threshold(), "distance = {}", distance);
}

#[test]
fn test_distinct_cards() {
    let fps = REFERENCES.iter().map(|(_, seed)| fingerprint(&card(*seed))).collect::<Vec<_>>();
    for (i, a) in fps.iter().enumerate() {
        for b in &fps[i + 1..] {
            assert!(a.distance(b) > threshold(), "{} vs {}: {}", a, b, a.distance(b));
        }
    }
}

#[test]
fn test_perturbed_copy_is_nearest_to_its_original() {
    // 变形后的卡牌与原卡的距离应小于与其他任何卡牌的距离
    let fps = REFERENCES.iter().map(|(_, seed)| fingerprint(&card(*seed))).collect::<Vec<_>>();
    for (i, (_, seed)) in REFERENCES.iter().enumerate() {
        let perturbed = jpeg(&brightness(&card(*seed), 0.9), 75);
        let fp = fingerprint(&perturbed);
        let nearest = (0..fps.len()).min_by_key(|&j| fp.distance(&fps[j])).unwrap();
        assert_eq!(nearest, i);
    }
}
