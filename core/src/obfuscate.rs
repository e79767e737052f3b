/// Reversible character-substitution obfuscation for message bodies
///
/// Bodies are rotated before persistence and rotated back after retrieval so
/// that stored records are not casually readable. This is NOT encryption:
/// there is no key and no integrity check, and it must never be presented as
/// a confidentiality guarantee.

/// Rotation applied to stored bodies unless configured otherwise.
pub const DEFAULT_SHIFT: u8 = 9;

/// Obfuscate `text` by rotating letters and digits forward by `shift`
/// within their own alphabets. Everything else (punctuation, whitespace,
/// multi-byte characters) passes through untouched.
pub fn transform(text: &str, shift: u8) -> String {
    shift_by(text, shift as i16)
}

/// Inverse of `transform`: `untransform(transform(x)) == x` for all inputs.
///
/// Cannot fail; a value that was never transformed simply comes out rotated,
/// which the caller treats as the raw fallback.
pub fn untransform(text: &str, shift: u8) -> String {
    shift_by(text, -(shift as i16))
}

fn shift_by(text: &str, shift: i16) -> String {
    text.chars()
        .map(|c| match c {
            'a'..='z' => rotate(c, b'a', 26, shift),
            'A'..='Z' => rotate(c, b'A', 26, shift),
            '0'..='9' => rotate(c, b'0', 10, shift),
            other => other,
        })
        .collect()
}

fn rotate(c: char, base: u8, len: i16, shift: i16) -> char {
    let offset = (c as u8 - base) as i16;
    let rotated = (offset + shift).rem_euclid(len) as u8;
    (base + rotated) as char
}
