//! Image payload encoding for the captioning boundary.
//!
//! Images travel to the caption service as base64 strings. Incoming payloads
//! (from clients of the caption endpoint) may carry a `data:image/...;base64,`
//! prefix and may have lost their trailing padding; both are tolerated.

use std::io::Cursor;

use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::error::{Error, Result};

/// Encode raw image bytes for transport.
pub fn encode_image(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode one base64 image payload, stripping a data-URI header and
/// restoring missing `=` padding first.
pub fn decode_image_payload(payload: &str) -> Result<Vec<u8>> {
    let mut data = payload.trim();
    if data.starts_with("data:image") {
        data = match data.split_once(',') {
            Some((_, rest)) => rest,
            None => {
                return Err(Error::Decode(
                    "data URI has no payload after the header".into(),
                ));
            }
        };
    }

    let mut padded = data.to_string();
    let missing = padded.len() % 4;
    if missing != 0 {
        padded.extend(std::iter::repeat_n('=', 4 - missing));
    }

    STANDARD
        .decode(padded.as_bytes())
        .map_err(|e| Error::Decode(format!("invalid base64 image: {e}")))
}

/// Decode an image in any supported format and re-encode it as PNG.
///
/// Corrupt or unsupported input fails with [`Error::Decode`].
pub fn normalize_image(bytes: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| Error::Decode(e.to_string()))?;
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| Error::Decode(e.to_string()))?;
    Ok(out.into_inner())
}

#[cfg(test)]
pub(crate) fn tiny_png() -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        2,
        2,
        image::Rgb([200, 10, 10]),
    ));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}
