//! QR rendering for pairing payloads.

use std::io::Cursor;

use {
    image::{DynamicImage, ImageFormat, Luma},
    qrcode::{QrCode, render::unicode::Dense1x2},
};

#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("qr encode failed: {0}")]
    Encode(#[from] qrcode::types::QrError),
    #[error("png encode failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Smallest edge of the rendered PNG, in pixels.
const MIN_PNG_EDGE: u32 = 320;

/// Render `payload` as a PNG image.
pub fn render_png(payload: &str) -> Result<Vec<u8>, PairingError> {
    let code = QrCode::new(payload.as_bytes())?;
    let image = code
        .render::<Luma<u8>>()
        .min_dimensions(MIN_PNG_EDGE, MIN_PNG_EDGE)
        .build();
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(image).write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Render `payload` with half-block characters for terminals and log viewers.
pub fn render_terminal(payload: &str) -> Result<String, PairingError> {
    let code = QrCode::new(payload.as_bytes())?;
    Ok(code
        .render::<Dense1x2>()
        .dark_color(Dense1x2::Light)
        .light_color(Dense1x2::Dark)
        .build())
}
