//! Inbound frame classification.
//!
//! A text frame that is JSON with `type == "resize"` and positive `cols`/`rows`
//! that fit in `u16` is a resize. Anything else, including JSON that looks like
//! a resize but is missing or mangles a field, is terminal input.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermSize {
    pub rows: u16,
    pub cols: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Resize(TermSize),
    Input(Vec<u8>),
}

pub fn classify_text(text: &str) -> Inbound {
    parse_resize(text).map_or_else(|| Inbound::Input(text.as_bytes().to_vec()), Inbound::Resize)
}

fn parse_resize(text: &str) -> Option<TermSize> {
    // Cheap reject for ordinary keystrokes.
    if !text.trim_start().starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("type")?.as_str()? != "resize" {
        return None;
    }
    let dim = |key: &str| {
        value
            .get(key)?
            .as_u64()
            .filter(|&n| n > 0)
            .and_then(|n| u16::try_from(n).ok())
    };
    Some(TermSize {
        cols: dim("cols")?,
        rows: dim("rows")?,
    })
}
