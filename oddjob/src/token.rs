//! Conversion between broker queue names and result tokens.
//!
//! A token is the queue name in URL-safe base64, so it can be used directly as a URL path
//! segment.  This is an encoding, not encryption: the token is unguessable only because the
//! broker's generated queue names are.
//!
//! Decoding accepts tokens with or without `=` padding, and only yields names of the shape the
//! broker generates, so a token can never address an arbitrary named queue.

use crate::Error;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;

/// URL-safe alphabet, emitting no padding and accepting input with or without it.
const TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Prefix of every server-generated queue name.
pub const GENERATED_QUEUE_PREFIX: &str = "amq.gen-";

/// Maximum length of an AMQP queue name, in bytes.
const MAX_QUEUE_NAME_LEN: usize = 255;

/// Encode a queue name as a result token.
pub fn encode(channel_name: &str) -> String {
    TOKEN_ENGINE.encode(channel_name.as_bytes())
}

/// Decode a result token into the queue name it refers to.  Fails with
/// [`Error::InvalidToken`] if the token is not one that [`encode`] could have produced for a
/// generated queue.  Whether that queue still exists is only discovered later, by the broker.
pub fn decode(token: &str) -> Result<String, Error> {
    let bytes = TOKEN_ENGINE
        .decode(token.as_bytes())
        .map_err(|_| Error::InvalidToken)?;
    let name = String::from_utf8(bytes).map_err(|_| Error::InvalidToken)?;
    if is_generated_queue_name(&name) {
        Ok(name)
    } else {
        Err(Error::InvalidToken)
    }
}

fn is_generated_queue_name(name: &str) -> bool {
    name.len() > GENERATED_QUEUE_PREFIX.len()
        && name.len() <= MAX_QUEUE_NAME_LEN
        && name.starts_with(GENERATED_QUEUE_PREFIX)
        && name.chars().all(|c| c.is_ascii_graphic())
}
