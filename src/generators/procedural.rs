//! Built-in selfie synthesizer used when no image command is configured.
//!
//! Every participant gets a stable look derived from their name; the seed
//! varies pose, lighting and expression.

use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::ImageGenerator;
use crate::Result;

pub const SELFIE_SIZE: u32 = 256;

/// 64-bit FNV-1a.
fn fnv1a(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

fn random_color(rng: &mut StdRng, low: u8, high: u8) -> [f32; 3] {
    [
        f32::from(rng.gen_range(low..=high)),
        f32::from(rng.gen_range(low..=high)),
        f32::from(rng.gen_range(low..=high)),
    ]
}

fn mix(a: [f32; 3], b: [f32; 3], t: f32) -> [f32; 3] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

fn to_pixel(c: [f32; 3]) -> Rgb<u8> {
    Rgb([
        c[0].clamp(0.0, 255.0) as u8,
        c[1].clamp(0.0, 255.0) as u8,
        c[2].clamp(0.0, 255.0) as u8,
    ])
}

/// Look shared by all selfies of one participant.
#[derive(Debug, Clone)]
struct Look {
    skin: [f32; 3],
    hair: [f32; 3],
    eyes: [f32; 3],
    backdrop: [f32; 3],
    head_width: f32,
    head_height: f32,
}

impl Look {
    fn for_participant(key: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(key);
        let tone: f32 = rng.gen_range(0.0..1.0);
        Self {
            skin: mix([241.0, 204.0, 177.0], [110.0, 72.0, 50.0], tone),
            hair: random_color(&mut rng, 10, 160),
            eyes: random_color(&mut rng, 20, 120),
            backdrop: random_color(&mut rng, 60, 230),
            head_width: rng.gen_range(58.0..78.0),
            head_height: rng.gen_range(78.0..96.0),
        }
    }
}

/// Seeded portraits, one look per participant.
#[derive(Debug, Clone)]
pub struct ProceduralSelfies {
    participant: String,
    key: u64,
}

impl ProceduralSelfies {
    pub fn new(participant: &str) -> Self {
        Self {
            participant: participant.to_string(),
            key: fnv1a(participant),
        }
    }

    pub fn participant(&self) -> &str {
        &self.participant
    }
}

impl ImageGenerator for ProceduralSelfies {
    fn generate(&self, seed: u64) -> Result<RgbImage> {
        let look = Look::for_participant(self.key);
        let mut rng = StdRng::seed_from_u64(self.key ^ seed.wrapping_mul(0x9e37_79b9_7f4a_7c15));

        let size = SELFIE_SIZE as f32;
        let cx = size / 2.0 + rng.gen_range(-18.0..18.0);
        let cy = size * 0.55 + rng.gen_range(-10.0..10.0);
        let tilt: f32 = rng.gen_range(-0.25..0.25);
        let light: f32 = rng.gen_range(0.75..1.15);
        let smile: f32 = rng.gen_range(-6.0..14.0);
        let backdrop_far = random_color(&mut rng, 20, 120);

        let (sin, cos) = tilt.sin_cos();
        let rx = look.head_width;
        let ry = look.head_height;
        let eye_dx = rx * 0.38;
        let eye_y = -ry * 0.12;
        let eye_r = rx * 0.11;
        let mouth_y = ry * 0.45;

        let image = RgbImage::from_fn(SELFIE_SIZE, SELFIE_SIZE, |x, y| {
            let px = x as f32 - cx;
            let py = y as f32 - cy;
            // Face-local coordinates.
            let u = px * cos + py * sin;
            let v = -px * sin + py * cos;

            let backdrop = mix(look.backdrop, backdrop_far, y as f32 / size);
            let head = (u / rx).powi(2) + (v / ry).powi(2);

            let color = if head > 1.0 {
                let shoulders = py > ry * 0.9 && (px / (rx * 1.9)).powi(2) + ((py - ry * 1.9) / ry).powi(2) < 1.0;
                if shoulders {
                    mix(look.hair, [40.0, 40.0, 40.0], 0.5)
                } else if head < 1.25 && v < ry * 0.1 {
                    look.hair
                } else {
                    backdrop
                }
            } else if v < -ry * 0.55 {
                look.hair
            } else {
                let left = (u + eye_dx).powi(2) + (v - eye_y).powi(2);
                let right = (u - eye_dx).powi(2) + (v - eye_y).powi(2);
                let mouth_curve = mouth_y + smile * (1.0 - (u / (rx * 0.45)).powi(2));
                if left < eye_r * eye_r || right < eye_r * eye_r {
                    look.eyes
                } else if u.abs() < rx * 0.45 && (v - mouth_curve).abs() < 3.0 {
                    [150.0, 50.0, 60.0]
                } else {
                    let shade = 1.0 - head * 0.25;
                    let s = look.skin;
                    [s[0] * shade, s[1] * shade, s[2] * shade]
                }
            };

            to_pixel([color[0] * light, color[1] * light, color[2] * light])
        });
        Ok(image)
    }
}
