//! Tile payload decoding.
//!
//! The tile service answers with a JSON string holding a base64 PNG. An
//! empty chunk comes back as an empty or very short string, which means
//! "no imagery here" rather than an error.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::imageops::FilterType;
use tilescope_tiles::TileImage;

use crate::constants::MIN_PAYLOAD_LEN;

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("Payload of {0} characters carries no imagery")]
    Empty(usize),

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Cannot decode tile image: {0}")]
    Image(#[from] image::ImageError),
}

impl PayloadError {
    /// Whether the payload is a valid "no data" answer.
    pub fn is_empty_tile(&self) -> bool {
        matches!(self, PayloadError::Empty(_))
    }
}

/// Strip the JSON string quoting and any data URL prefix.
fn unwrap_base64(body: &str) -> std::borrow::Cow<'_, str> {
    let body = body.trim();
    let unquoted: std::borrow::Cow<'_, str> = if body.starts_with('"') {
        match serde_json::from_str::<String>(body) {
            Ok(s) => s.into(),
            Err(_) => body.trim_matches('"').into(),
        }
    } else {
        body.into()
    };
    match unquoted.find("base64,") {
        Some(pos) => unquoted[pos + "base64,".len()..].to_string().into(),
        None => unquoted,
    }
}

/// Decode a response body into a tile of `tile_size_px` squared pixels.
pub fn decode_payload(body: &str, tile_size_px: u32) -> Result<TileImage, PayloadError> {
    let len = body.trim().len();
    if len < MIN_PAYLOAD_LEN {
        return Err(PayloadError::Empty(len));
    }

    let data = unwrap_base64(body);
    let bytes = STANDARD.decode(data.trim())?;
    let image = image::load_from_memory(&bytes)?.to_rgba8();

    if image.dimensions() == (tile_size_px, tile_size_px) {
        Ok(image)
    } else {
        log::debug!(
            "Resizing {}x{} tile to {}px",
            image.width(),
            image.height(),
            tile_size_px
        );
        Ok(image::imageops::resize(
            &image,
            tile_size_px,
            tile_size_px,
            FilterType::Triangle,
        ))
    }
}
