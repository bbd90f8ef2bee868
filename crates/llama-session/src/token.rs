//! Tokenization / detokenization helpers.
//!
//! Both directions use the backend's two-pass sizing protocol: try with a
//! heuristic buffer, and if the backend reports a negated required size,
//! retry once with exactly that capacity.

use tracing::debug;

use crate::backend::{Token, Vocab};
use crate::error::{Result, SessionError};

/// Tokenize `text` with the model's vocabulary.
pub fn tokenize<V: Vocab + ?Sized>(
    vocab: &V,
    text: &str,
    add_special: bool,
    parse_special: bool,
) -> Result<Vec<Token>> {
    // Most prompts need fewer tokens than bytes; +2 leaves room for BOS/EOS.
    let mut tokens = vec![0; text.len() + 2];
    let mut n = vocab.tokenize_into(text, add_special, parse_special, &mut tokens);

    if n < 0 {
        let required = n.unsigned_abs() as usize;
        debug!(required, "Token buffer too small, retrying");
        tokens.resize(required, 0);
        n = vocab.tokenize_into(text, add_special, parse_special, &mut tokens);
    }

    if n < 0 {
        return Err(SessionError::TokenizeFailed(format!(
            "tokenizer still needs {} slots after resize",
            n.unsigned_abs()
        )));
    }

    tokens.truncate(n as usize);
    Ok(tokens)
}

/// Bytes of a single token. May be empty, and may be an incomplete UTF-8
/// sequence that only becomes valid together with following pieces.
pub fn token_to_piece<V: Vocab + ?Sized>(vocab: &V, token: Token) -> Vec<u8> {
    let mut buf = vec![0u8; 64];
    let mut len = vocab.token_to_piece_into(token, &mut buf);

    if len < 0 {
        buf.resize(len.unsigned_abs() as usize, 0);
        len = vocab.token_to_piece_into(token, &mut buf);
    }

    if len <= 0 {
        return Vec::new();
    }
    buf.truncate(len as usize);
    buf
}
